use crate::expr::{arg, call, constant, strings, Expr};
use serde::{Deserialize, Serialize};
use std::fmt;

const QA60_CLOUD_BIT: u32 = 1 << 10;
const QA60_CIRRUS_BIT: u32 = 1 << 11;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Satellite {
    Landsat8,
    Sentinel2,
}

impl Satellite {
    pub fn collection_id(self: &Self) -> &'static str {
        match self {
            Self::Landsat8 => "LANDSAT/LC08/C02/T1_L2",
            Self::Sentinel2 => "COPERNICUS/S2_SR_HARMONIZED",
        }
    }

    /// Metadata property holding the scene's cloud percentage.
    pub fn cloud_property(self: &Self) -> &'static str {
        match self {
            Self::Landsat8 => "CLOUD_COVER",
            Self::Sentinel2 => "CLOUDY_PIXEL_PERCENTAGE",
        }
    }

    pub fn nir_band(self: &Self) -> &'static str {
        match self {
            Self::Landsat8 => "SR_B5",
            Self::Sentinel2 => "B8",
        }
    }

    pub fn red_band(self: &Self) -> &'static str {
        match self {
            Self::Landsat8 => "SR_B4",
            Self::Sentinel2 => "B4",
        }
    }

    /// Prefix used in export descriptions.
    pub fn label(self: &Self) -> &'static str {
        match self {
            Self::Landsat8 => "Landsat",
            Self::Sentinel2 => "Sentinel",
        }
    }

    /// Fixed export scale for per-image exports, if the product has one.
    /// Landsat exports use the scale derived from the region's pixel budget.
    pub fn native_scale(self: &Self) -> Option<f64> {
        match self {
            Self::Landsat8 => None,
            Self::Sentinel2 => Some(10.0),
        }
    }

    /// Per-image preprocessing, as a one-argument function over `img`.
    ///
    /// Landsat 8 Collection 2 gets the surface reflectance and surface
    /// temperature scale factors; Sentinel-2 gets the QA60 cloud/cirrus mask
    /// and is rescaled to reflectance.
    pub fn preprocess(self: &Self, img: Expr) -> Expr {
        match self {
            Self::Landsat8 => landsat_scale_factors(img),
            Self::Sentinel2 => sentinel_cloud_mask(img),
        }
    }
}

impl fmt::Display for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Landsat8 => write!(f, "Landsat 8"),
            Self::Sentinel2 => write!(f, "Sentinel-2"),
        }
    }
}

pub fn image_constant(value: impl Into<serde_json::Value>) -> Expr {
    call("Image.constant", [("value", constant(value))])
}

fn select(img: Expr, bands: &[&str]) -> Expr {
    call("Image.select", [("input", img), ("bandSelectors", strings(bands))])
}

fn binary(function: &str, a: Expr, b: Expr) -> Expr {
    call(function, [("image1", a), ("image2", b)])
}

fn linear(img: Expr, gain: f64, offset: f64) -> Expr {
    binary(
        "Image.add",
        binary("Image.multiply", img, image_constant(gain)),
        image_constant(offset),
    )
}

fn add_bands_overwrite(dst: Expr, src: Expr) -> Expr {
    call(
        "Image.addBands",
        [("dstImg", dst), ("srcImg", src), ("overwrite", constant(true))],
    )
}

fn landsat_scale_factors(img: Expr) -> Expr {
    let optical = linear(select(img.clone(), &["SR_B."]), 0.0000275, -0.2);
    let thermal = linear(select(img.clone(), &["ST_B.*"]), 0.00341802, 149.0);
    add_bands_overwrite(add_bands_overwrite(img, optical), thermal)
}

fn sentinel_cloud_mask(img: Expr) -> Expr {
    let qa = select(img.clone(), &["QA60"]);
    let clear = |bit: u32| {
        binary(
            "Image.eq",
            binary("Image.bitwiseAnd", qa.clone(), image_constant(bit)),
            image_constant(0),
        )
    };
    let mask = binary("Image.and", clear(QA60_CLOUD_BIT), clear(QA60_CIRRUS_BIT));
    let masked = call("Image.updateMask", [("image", img), ("mask", mask)]);
    binary("Image.divide", masked, image_constant(10000))
}

/// `preprocess` wrapped as a named function over a collection element.
pub fn preprocess_fn(satellite: Satellite) -> Expr {
    crate::expr::lambda(&["img"], satellite.preprocess(arg("img")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;

    #[test]
    fn test_band_names() {
        assert_eq!(Satellite::Landsat8.nir_band(), "SR_B5");
        assert_eq!(Satellite::Landsat8.red_band(), "SR_B4");
        assert_eq!(Satellite::Sentinel2.nir_band(), "B8");
        assert_eq!(Satellite::Sentinel2.red_band(), "B4");
    }

    #[test]
    fn test_serde_names() {
        let s: Satellite = serde_json::from_str("\"sentinel2\"").unwrap();
        assert_eq!(s, Satellite::Sentinel2);
    }

    #[test]
    fn test_cloud_mask_uses_qa_bits() {
        let encoded = Expression::new(&Satellite::Sentinel2.preprocess(arg("img")));
        let text = serde_json::to_string(&encoded).unwrap();
        assert!(text.contains("\"QA60\""));
        assert!(text.contains("1024"));
        assert!(text.contains("2048"));
        assert!(text.contains("Image.updateMask"));
    }

    #[test]
    fn test_landsat_scale_factors() {
        let encoded = Expression::new(&Satellite::Landsat8.preprocess(arg("img")));
        let text = serde_json::to_string(&encoded).unwrap();
        assert!(text.contains("2.75e-5") || text.contains("0.0000275"));
        assert!(text.contains("149.0"));
    }
}
