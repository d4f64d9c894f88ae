//! Export requests, the task handles they produce, and task states.
use crate::error::Result;
use crate::expr::{call, constant, Expr, Expression};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::OnceLock;

const MAX_DESCRIPTION_LEN: usize = 100;

/// Polygon rings as `[lon, lat]` pairs, as returned by a bounds query.
pub type Coordinates = Vec<Vec<[f64; 2]>>;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    Drive {
        folder: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_prefix: Option<String>,
    },
    CloudStorage {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// Asset path; `{description}` in the path is replaced per export.
    Asset { asset_id: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PixelGrid {
    /// Meters per pixel.
    Scale(f64),
    /// Affine transform `[scaleX, shearX, translateX, shearY, scaleY, translateY]`.
    CrsTransform([f64; 6]),
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FileFormat {
    #[default]
    GeoTIFF,
    TFRecord,
}

impl FileFormat {
    fn wire_name(self: &Self) -> &'static str {
        match self {
            Self::GeoTIFF => "GEO_TIFF",
            Self::TFRecord => "TF_RECORD_IMAGE",
        }
    }
}

/// GeoTIFF-only options.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct FormatOptions {
    #[serde(default)]
    pub cloud_optimized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub image: Expr,
    pub description: String,
    pub destination: Destination,
    pub region: Coordinates,
    pub grid: PixelGrid,
    pub crs: Option<String>,
    pub file_format: FileFormat,
    pub format_options: FormatOptions,
    pub max_pixels: Option<f64>,
}

fn description_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^A-Za-z0-9.,:;_\-]").expect("pattern should compile"))
}

/// Replaces characters the platform rejects in task descriptions and caps the
/// length.
pub fn sanitize_description(description: &str) -> String {
    description_pattern()
        .replace_all(description, "_")
        .chars()
        .take(MAX_DESCRIPTION_LEN)
        .collect()
}

impl ExportRequest {
    fn region_geometry(self: &Self) -> Expr {
        let rings: Vec<Value> = self
            .region
            .iter()
            .map(|ring| ring.iter().map(|[x, y]| json!([x, y])).collect())
            .collect();
        call(
            "GeometryConstructors.Polygon",
            [("coordinates", constant(rings)), ("geodesic", constant(false))],
        )
    }

    /// The image clipped to the export region, resampled to the requested
    /// scale when no explicit transform is given.
    fn export_image(self: &Self) -> Expr {
        match self.grid {
            PixelGrid::Scale(scale) => call(
                "Image.clipToBoundsAndScale",
                [
                    ("input", self.image.clone()),
                    ("geometry", self.region_geometry()),
                    ("scale", constant(scale)),
                ],
            ),
            PixelGrid::CrsTransform(_) => call(
                "Image.clipToBoundsAndScale",
                [("input", self.image.clone()), ("geometry", self.region_geometry())],
            ),
        }
    }

    pub fn description(self: &Self) -> String {
        sanitize_description(&self.description)
    }

    /// JSON body for the `image:export` endpoint.
    pub fn to_body(self: &Self) -> Result<Value> {
        let description = self.description();
        let mut body = Map::new();
        body.insert(
            "expression".into(),
            serde_json::to_value(Expression::new(&self.export_image()))?,
        );
        body.insert("description".into(), json!(description));

        if let Some(max_pixels) = self.max_pixels {
            // int64 fields travel as strings
            body.insert("maxPixels".into(), json!(format!("{}", max_pixels.round() as i64)));
        }

        if let PixelGrid::CrsTransform(t) = self.grid {
            body.insert(
                "grid".into(),
                json!({
                    "crsCode": self.crs.clone().unwrap_or_else(|| "EPSG:4326".to_string()),
                    "affineTransform": {
                        "scaleX": t[0], "shearX": t[1], "translateX": t[2],
                        "shearY": t[3], "scaleY": t[4], "translateY": t[5],
                    }
                }),
            );
        } else if let Some(crs) = &self.crs {
            body.insert("grid".into(), json!({ "crsCode": crs }));
        }

        match &self.destination {
            Destination::Asset { asset_id } => {
                body.insert(
                    "assetExportOptions".into(),
                    json!({
                        "earthEngineDestination": {
                            "name": asset_id.replace("{description}", &description)
                        }
                    }),
                );
            }
            file_destination => {
                let mut options = Map::new();
                options.insert("fileFormat".into(), json!(self.file_format.wire_name()));
                match file_destination {
                    Destination::Drive { folder, file_prefix } => {
                        options.insert(
                            "driveDestination".into(),
                            json!({
                                "folder": folder,
                                "filenamePrefix": match file_prefix {
                                    Some(p) => format!("{}_{}", p.trim_end_matches('_'), description),
                                    None => description.clone(),
                                },
                            }),
                        );
                    }
                    Destination::CloudStorage { bucket, prefix } => {
                        let prefix = match prefix {
                            Some(p) => format!("{}/{}", p.trim_end_matches('/'), description),
                            None => description.clone(),
                        };
                        options.insert(
                            "cloudStorageDestination".into(),
                            json!({ "bucket": bucket, "filenamePrefix": prefix }),
                        );
                    }
                    Destination::Asset { .. } => {}
                }
                if self.file_format == FileFormat::GeoTIFF {
                    let mut tiff = Map::new();
                    if self.format_options.cloud_optimized {
                        tiff.insert("cloudOptimized".into(), json!(true));
                    }
                    if let Some(no_data) = self.format_options.no_data {
                        tiff.insert("noData".into(), json!({ "floatValue": no_data }));
                    }
                    if !tiff.is_empty() {
                        options.insert("geoTiffOptions".into(), Value::Object(tiff));
                    }
                }
                body.insert("fileExportOptions".into(), Value::Object(options));
            }
        }
        Ok(Value::Object(body))
    }
}

/// Handle to a submitted export. It references server-side state only.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ExportTask {
    pub id: String,
    /// Full operation resource name used for status queries.
    pub name: String,
    pub description: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Unsubmitted,
    #[serde(alias = "PENDING")]
    Ready,
    Running,
    #[serde(alias = "SUCCEEDED")]
    Completed,
    Failed,
    Cancelling,
    #[serde(alias = "CANCELED")]
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_active(self: &Self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self: &Self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn parse(state: &str) -> Self {
        serde_json::from_value(Value::String(state.to_string())).unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsubmitted => "UNSUBMITTED",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelling => "CANCELLING",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub error_message: Option<String>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            error_message: None,
        }
    }

    pub fn failed(message: impl ToString) -> Self {
        Self {
            state: TaskState::Failed,
            error_message: Some(message.to_string()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct OperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Long-running operation as returned by the export and status endpoints.
#[derive(Deserialize, Debug, Clone)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub metadata: OperationMetadata,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn task(self: &Self, fallback_description: &str) -> ExportTask {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or(&self.name)
            .to_string();
        ExportTask {
            id,
            name: self.name.clone(),
            description: self
                .metadata
                .description
                .clone()
                .unwrap_or_else(|| fallback_description.to_string()),
        }
    }

    pub fn status(self: &Self) -> TaskStatus {
        let error_message = self.error.as_ref().map(|e| e.message.clone());
        let state = match &self.metadata.state {
            Some(s) => TaskState::parse(s),
            None if self.error.is_some() => TaskState::Failed,
            None if self.done => TaskState::Completed,
            None => TaskState::Ready,
        };
        TaskStatus {
            state,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(destination: Destination, grid: PixelGrid) -> ExportRequest {
        ExportRequest {
            image: call("Image.load", [("id", constant("img"))]),
            description: "Landsat_Image_2017-01-01_0_20240101_120000".to_string(),
            destination,
            region: vec![vec![[-40.0, -9.0], [-39.0, -9.0], [-39.0, -8.0], [-40.0, -9.0]]],
            grid,
            crs: None,
            file_format: FileFormat::GeoTIFF,
            format_options: FormatOptions::default(),
            max_pixels: Some(1e13),
        }
    }

    #[test]
    fn test_sanitize_description() {
        assert_eq!(sanitize_description("NDVI export/2017 #1"), "NDVI_export_2017__1");
        assert_eq!(sanitize_description(&"x".repeat(150)).len(), 100);
        assert_eq!(sanitize_description("a-b_c.d,e:f;g"), "a-b_c.d,e:f;g");
    }

    #[test]
    fn test_drive_body() {
        let req = request(
            Destination::Drive {
                folder: "exports".to_string(),
                file_prefix: None,
            },
            PixelGrid::Scale(30.0),
        );
        let body = req.to_body().unwrap();
        let drive = &body["fileExportOptions"]["driveDestination"];
        assert_eq!(drive["folder"], "exports");
        assert_eq!(drive["filenamePrefix"], "Landsat_Image_2017-01-01_0_20240101_120000");
        assert_eq!(body["fileExportOptions"]["fileFormat"], "GEO_TIFF");
        assert_eq!(body["maxPixels"], "10000000000000");
        assert!(body.get("grid").is_none());
        assert!(body.get("assetExportOptions").is_none());

        let text = body["expression"].to_string();
        assert!(text.contains("Image.clipToBoundsAndScale"));
        assert!(text.contains("\"scale\":{\"constantValue\":30.0}"));
    }

    #[test]
    fn test_asset_body() {
        let req = request(
            Destination::Asset {
                asset_id: "projects/p/assets/{description}".to_string(),
            },
            PixelGrid::Scale(30.0),
        );
        let body = req.to_body().unwrap();
        assert_eq!(
            body["assetExportOptions"]["earthEngineDestination"]["name"],
            "projects/p/assets/Landsat_Image_2017-01-01_0_20240101_120000"
        );
        assert!(body.get("fileExportOptions").is_none());
    }

    #[test]
    fn test_crs_transform_and_tiff_options() {
        let mut req = request(
            Destination::CloudStorage {
                bucket: "b".to_string(),
                prefix: Some("ndvi/".to_string()),
            },
            PixelGrid::CrsTransform([30.0, 0.0, -2493045.0, 0.0, -30.0, 3310005.0]),
        );
        req.crs = Some("EPSG:5070".to_string());
        req.format_options = FormatOptions {
            cloud_optimized: true,
            no_data: Some(-9999.0),
        };
        let body = req.to_body().unwrap();
        assert_eq!(body["grid"]["crsCode"], "EPSG:5070");
        assert_eq!(body["grid"]["affineTransform"]["translateX"], -2493045.0);
        let options = &body["fileExportOptions"];
        assert_eq!(
            options["cloudStorageDestination"]["filenamePrefix"],
            "ndvi/Landsat_Image_2017-01-01_0_20240101_120000"
        );
        assert_eq!(options["geoTiffOptions"]["cloudOptimized"], true);
        assert_eq!(options["geoTiffOptions"]["noData"]["floatValue"], -9999.0);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TaskState::parse("READY"), TaskState::Ready);
        assert_eq!(TaskState::parse("PENDING"), TaskState::Ready);
        assert_eq!(TaskState::parse("SUCCEEDED"), TaskState::Completed);
        assert_eq!(TaskState::parse("COMPLETED"), TaskState::Completed);
        assert_eq!(TaskState::parse("CANCELLED"), TaskState::Cancelled);
        assert_eq!(TaskState::parse("bogus"), TaskState::Unknown);
        assert!(TaskState::Running.is_active());
        assert!(TaskState::Cancelling.is_active());
        assert!(!TaskState::Failed.is_active());
    }

    #[test]
    fn test_operation_parsing() {
        let op: Operation = serde_json::from_value(json!({
            "name": "projects/p/operations/ABC123",
            "metadata": {"state": "RUNNING", "description": "Sentinel_NDVI_Export"},
        }))
        .unwrap();
        let task = op.task("fallback");
        assert_eq!(task.id, "ABC123");
        assert_eq!(task.description, "Sentinel_NDVI_Export");
        assert_eq!(op.status().state, TaskState::Running);

        let failed: Operation = serde_json::from_value(json!({
            "name": "projects/p/operations/XYZ",
            "done": true,
            "metadata": {"state": "FAILED"},
            "error": {"code": 3, "message": "Too many pixels"},
        }))
        .unwrap();
        let status = failed.status();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.error_message.as_deref(), Some("Too many pixels"));
    }

    #[test]
    fn test_cancelled_operation_keeps_state() {
        let cancelled: Operation = serde_json::from_value(json!({
            "name": "projects/p/operations/C1",
            "done": true,
            "metadata": {"state": "CANCELLED"},
            "error": {"code": 1, "message": "Cancelled."},
        }))
        .unwrap();
        let status = cancelled.status();
        assert_eq!(status.state, TaskState::Cancelled);
        assert_eq!(status.error_message.as_deref(), Some("Cancelled."));
    }

    #[test]
    fn test_operation_error_without_state() {
        let op: Operation = serde_json::from_value(json!({
            "name": "projects/p/operations/E1",
            "done": true,
            "error": {"code": 13, "message": "Internal error"},
        }))
        .unwrap();
        assert_eq!(op.status().state, TaskState::Failed);

        let done: Operation = serde_json::from_value(json!({
            "name": "projects/p/operations/D1",
            "done": true,
        }))
        .unwrap();
        let status = done.status();
        assert_eq!(status.state, TaskState::Completed);
        assert!(status.error_message.is_none());
    }

    #[test]
    fn test_drive_prefix_keeps_description() {
        let req = request(
            Destination::Drive {
                folder: "exports".to_string(),
                file_prefix: Some("caatinga".to_string()),
            },
            PixelGrid::Scale(30.0),
        );
        let body = req.to_body().unwrap();
        assert_eq!(
            body["fileExportOptions"]["driveDestination"]["filenamePrefix"],
            "caatinga_Landsat_Image_2017-01-01_0_20240101_120000"
        );
    }
}
