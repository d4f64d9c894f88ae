use crate::auth::Credentials;
use crate::error::{config_error, Result};
use crate::export::{Destination, FileFormat, FormatOptions};
use crate::monitor::MonitorSettings;
use crate::query::Region;
use crate::satellite::Satellite;
use crate::scale::DEFAULT_MAX_PIXELS;
use crate::submission::{ExportMode, FailurePolicy};
use crate::window::{monthly_windows, TimeWindow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use toml;

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ExportConfig {
    pub project: String,
    pub region: Region,
    pub period: Period,
    pub export: ExportSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    pub products: Vec<Product>,
    #[serde(default)]
    pub auth: Credentials,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Scenes at or above this cloud percentage are dropped.
    pub cloud_cover_max: f64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ExportSettings {
    pub destination: Destination,
    #[serde(default)]
    pub file_format: FileFormat,
    #[serde(default)]
    pub format_options: FormatOptions,
    /// Pixel budget used to derive the region scale.
    #[serde(default = "default_max_pixels")]
    pub max_pixels: f64,
    /// Pixel ceiling sent with each export request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_max_pixels: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_max_pixels() -> f64 {
    DEFAULT_MAX_PIXELS
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Product {
    pub satellite: Satellite,
    pub mode: ExportMode,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub preprocess: bool,
    /// Overrides both the satellite's native scale and the region scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// Configuration reproducing the Caatinga NDVI run.
pub fn template_toml() -> toml::Table {
    toml::toml! {
        project = "analise-satelite-projeto-01"

        [region]
        asset = "projects/ee-maxwellamaral-proj01/assets/MAPBIOMAS/caatinga"

        [period]
        start = "2017-01-01"
        end = "2024-01-01"
        cloud_cover_max = 20.0

        [export]
        destination = { type = "drive", folder = "analise-satelite-projeto-01" }
        file_format = "GeoTIFF"
        max_pixels = 2e7
        failure_policy = "best_effort"

        [monitor]
        poll_interval_secs = 30
        max_interval_secs = 300
        backoff_factor = 1.5

        [auth]
        method = "interactive"

        [[products]]
        satellite = "landsat8"
        mode = "composite"
        enabled = true

        [[products]]
        satellite = "sentinel2"
        mode = "composite"
        enabled = true

        [[products]]
        satellite = "landsat8"
        mode = "per_image"
        enabled = false

        [[products]]
        satellite = "sentinel2"
        mode = "per_image"
        enabled = false
    }
}

impl ExportConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_template(table: &toml::Table) -> Result<Self> {
        let config: Self = toml::from_str(&table.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(self: &Self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(config_error("project must not be empty"));
        }
        if self.period.start >= self.period.end {
            return Err(config_error(format!(
                "period start {} is not before end {}",
                self.period.start, self.period.end
            )));
        }
        if !(0.0..=100.0).contains(&self.period.cloud_cover_max) {
            return Err(config_error(format!(
                "cloud_cover_max must be within 0..=100, got {}",
                self.period.cloud_cover_max
            )));
        }
        if !(self.export.max_pixels > 0.0) {
            return Err(config_error(format!(
                "max_pixels must be positive, got {}",
                self.export.max_pixels
            )));
        }
        if let Some(scale) = self.products.iter().filter_map(|p| p.scale).find(|s| !(*s > 0.0)) {
            return Err(config_error(format!("product scale must be positive, got {scale}")));
        }
        self.monitor.validate()
    }

    pub fn windows(self: &Self) -> Vec<TimeWindow> {
        monthly_windows(self.period.start, self.period.end)
    }

    pub fn enabled_products(self: &Self) -> Vec<Product> {
        self.products.iter().filter(|p| p.enabled).cloned().collect()
    }
}
