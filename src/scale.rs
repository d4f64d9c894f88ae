//! Derives an export scale from a region's area and a pixel budget so export
//! requests stay under the platform's pixel ceiling.
use crate::error::{config_error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel budget used when the configuration does not name one (20 Mpx).
pub const DEFAULT_MAX_PIXELS: f64 = 2e7;

/// Returns the ground sample distance (meters per pixel) at which `area_m2`
/// covers roughly `max_pixels` pixels. Callers must ensure `max_pixels > 0`.
pub fn calculate_scale(area_m2: f64, max_pixels: f64) -> f64 {
    (area_m2 / max_pixels).sqrt()
}

/// Scale in meters per pixel, computed once per region and shared by every
/// request against that region.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ScaleValue(f64);

impl ScaleValue {
    pub fn for_region(area_m2: f64, max_pixels: f64) -> Result<Self> {
        if !(max_pixels > 0.0) {
            return Err(config_error(format!(
                "max_pixels must be positive, got {max_pixels}"
            )));
        }
        if !(area_m2 >= 0.0) || !area_m2.is_finite() {
            return Err(config_error(format!("invalid region area {area_m2}")));
        }
        Ok(Self(calculate_scale(area_m2, max_pixels)))
    }

    pub fn meters(self: &Self) -> f64 {
        self.0
    }

    /// Number of pixels `area_m2` occupies at this scale.
    pub fn pixel_count(self: &Self, area_m2: f64) -> f64 {
        area_m2 / (self.0 * self.0)
    }
}

impl fmt::Display for ScaleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} m/px", self.0)
    }
}
