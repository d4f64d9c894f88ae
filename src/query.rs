//! Builders for filtered image collections and the images derived from them.
//!
//! All of these produce [`Expr`] trees; collection filtering, NDVI and
//! compositing are evaluated remotely.
use crate::expr::{arg, call, constant, lambda, strings, Expr};
use crate::satellite::{preprocess_fn, Satellite};
use crate::window::TimeWindow;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Area of interest.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Feature collection asset whose union geometry is the region.
    Asset(String),
    /// `[west, north, east, south]` in degrees.
    Rectangle([f64; 4]),
}

impl Region {
    pub fn geometry(self: &Self) -> Expr {
        match self {
            Self::Asset(id) => call(
                "Collection.geometry",
                [(
                    "collection",
                    call("Collection.loadTable", [("tableId", constant(id.as_str()))]),
                )],
            ),
            Self::Rectangle(coords) => call(
                "GeometryConstructors.Rectangle",
                [
                    ("coordinates", constant(coords.to_vec())),
                    ("geodesic", constant(false)),
                ],
            ),
        }
    }

    /// Area in square meters.
    pub fn area(self: &Self) -> Expr {
        call("Geometry.area", [("geometry", self.geometry())])
    }

    /// Bounding polygon, evaluated as GeoJSON.
    pub fn bounds(self: &Self) -> Expr {
        call("Geometry.bounds", [("geometry", self.geometry())])
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asset(id) => write!(f, "{id}"),
            Self::Rectangle([w, n, e, s]) => write!(f, "rectangle({w},{n},{e},{s})"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ImageQuery {
    pub satellite: Satellite,
    pub window: TimeWindow,
    pub region: Region,
    pub cloud_cover_max: f64,
    pub preprocess: bool,
}

impl ImageQuery {
    /// Collection for the window, intersecting the region, below the cloud
    /// threshold, reduced to the NIR and red bands.
    pub fn collection(self: &Self) -> Expr {
        let sat = self.satellite;
        let (start, end) = self.window.epoch_millis();

        let loaded = call(
            "ImageCollection.load",
            [("id", constant(sat.collection_id()))],
        );
        let by_date = filter(
            loaded,
            call(
                "Filter.dateRangeContains",
                [
                    (
                        "leftValue",
                        call("DateRange", [("start", constant(start)), ("end", constant(end))]),
                    ),
                    ("rightField", constant("system:time_start")),
                ],
            ),
        );
        let by_bounds = filter(
            by_date,
            call(
                "Filter.intersects",
                [
                    ("leftField", constant(".all")),
                    ("rightValue", self.region.geometry()),
                ],
            ),
        );
        let mut collection = filter(
            by_bounds,
            call(
                "Filter.lessThan",
                [
                    ("leftField", constant(sat.cloud_property())),
                    ("rightValue", constant(self.cloud_cover_max)),
                ],
            ),
        );
        if self.preprocess {
            collection = map(collection, preprocess_fn(sat));
        }

        let bands = [sat.nir_band(), sat.red_band()];
        map(
            collection,
            lambda(
                &["img"],
                call(
                    "Image.select",
                    [("input", arg("img")), ("bandSelectors", strings(&bands))],
                ),
            ),
        )
    }
}

fn filter(collection: Expr, filter: Expr) -> Expr {
    call(
        "Collection.filter",
        [("collection", collection), ("filter", filter)],
    )
}

fn map(collection: Expr, function: Expr) -> Expr {
    call(
        "Collection.map",
        [("collection", collection), ("baseAlgorithm", function)],
    )
}

/// Per-image NDVI band named `NDVI`.
pub fn ndvi(collection: Expr, satellite: Satellite) -> Expr {
    let bands = [satellite.nir_band(), satellite.red_band()];
    map(
        collection,
        lambda(
            &["img"],
            call(
                "Image.rename",
                [
                    (
                        "input",
                        call(
                            "Image.normalizedDifference",
                            [("input", arg("img")), ("bandNames", strings(&bands))],
                        ),
                    ),
                    ("names", strings(&["NDVI"])),
                ],
            ),
        ),
    )
}

pub fn median(collection: Expr) -> Expr {
    call("reduce.median", [("collection", collection)])
}

pub fn clip(image: Expr, region: &Region) -> Expr {
    call(
        "Image.clip",
        [("input", image), ("geometry", region.geometry())],
    )
}

pub fn size(collection: Expr) -> Expr {
    call("Collection.size", [("collection", collection)])
}

/// Image at `index` of a collection known to hold `count` images.
pub fn nth_image(collection: Expr, index: u64, count: u64) -> Expr {
    call(
        "List.get",
        [
            (
                "list",
                call(
                    "Collection.toList",
                    [("collection", collection), ("count", constant(count))],
                ),
            ),
            ("index", constant(index)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;
    use chrono::NaiveDate;

    fn query(preprocess: bool) -> ImageQuery {
        ImageQuery {
            satellite: Satellite::Landsat8,
            window: TimeWindow::new(
                NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2017, 2, 1).unwrap(),
            ),
            region: Region::Asset("projects/p/assets/aoi".to_string()),
            cloud_cover_max: 20.0,
            preprocess,
        }
    }

    fn encoded(e: &Expr) -> String {
        serde_json::to_string(&Expression::new(e)).unwrap()
    }

    #[test]
    fn test_collection_filters() {
        let text = encoded(&query(false).collection());
        assert!(text.contains("LANDSAT/LC08/C02/T1_L2"));
        assert!(text.contains("CLOUD_COVER"));
        assert!(text.contains("1483228800000"));
        assert!(text.contains("1485907200000"));
        assert!(text.contains("projects/p/assets/aoi"));
        assert!(text.contains("\"SR_B5\",\"SR_B4\""));
        assert!(!text.contains("Image.addBands"));
    }

    #[test]
    fn test_preprocess_is_optional() {
        let text = encoded(&query(true).collection());
        assert!(text.contains("Image.addBands"));
    }

    #[test]
    fn test_ndvi_band() {
        let e = median(ndvi(query(false).collection(), Satellite::Landsat8));
        let text = encoded(&e);
        assert!(text.contains("Image.normalizedDifference"));
        assert!(text.contains("\"NDVI\""));
        assert!(text.contains("reduce.median"));
    }

    #[test]
    fn test_region_rectangle() {
        let region = Region::Rectangle([-49.7, -28.3, -49.3, -28.7]);
        let text = encoded(&region.area());
        assert!(text.contains("GeometryConstructors.Rectangle"));
        assert!(text.contains("-49.7"));
        assert_eq!(region.to_string(), "rectangle(-49.7,-28.3,-49.3,-28.7)");
    }
}
