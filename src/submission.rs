//! Builds one export per time window (or per product) and submits it.
//!
//! Every attempt produces a [`SubmissionOutcome`]; whether a failure stops
//! the remaining windows depends on the [`FailurePolicy`].
use crate::client::EarthEngine;
use crate::config::{ExportConfig, Product};
use crate::error::Result;
use crate::export::{
    Coordinates, Destination, ExportRequest, ExportTask, FileFormat, FormatOptions, PixelGrid,
};
use crate::expr::Expr;
use crate::query::{clip, median, ndvi, nth_image, ImageQuery, Region};
use crate::satellite::Satellite;
use crate::scale::ScaleValue;
use crate::window::TimeWindow;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and continue with the remaining windows.
    #[default]
    BestEffort,
    /// Stop at the first failure, keeping what was already submitted.
    FailFast,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Every image of every monthly window.
    PerImage,
    /// One NDVI median over the whole period.
    Composite,
    /// One NDVI median per monthly window.
    MonthlyComposite,
}

/// Everything needed to submit exports, resolved once per run.
#[derive(Clone, Debug)]
pub struct SubmissionPlan {
    pub region: Region,
    pub bounds: Coordinates,
    pub scale: ScaleValue,
    pub windows: Vec<TimeWindow>,
    pub products: Vec<Product>,
    pub cloud_cover_max: f64,
    pub destination: Destination,
    pub file_format: FileFormat,
    pub format_options: FormatOptions,
    pub request_max_pixels: Option<f64>,
    pub crs: Option<String>,
    pub timestamp: String,
}

impl SubmissionPlan {
    pub fn new(
        config: &ExportConfig,
        area_m2: f64,
        bounds: Coordinates,
        timestamp: &str,
    ) -> Result<Self> {
        let scale = ScaleValue::for_region(area_m2, config.export.max_pixels)?;
        Ok(Self {
            region: config.region.clone(),
            bounds,
            scale,
            windows: config.windows(),
            products: config.enabled_products(),
            cloud_cover_max: config.period.cloud_cover_max,
            destination: config.export.destination.clone(),
            file_format: config.export.file_format,
            format_options: config.export.format_options.clone(),
            request_max_pixels: config.export.request_max_pixels,
            crs: config.export.crs.clone(),
            timestamp: timestamp.to_string(),
        })
    }

    /// Queries the region's area and bounds, then derives the scale from them.
    pub async fn prepare(engine: &impl EarthEngine, config: &ExportConfig) -> Result<Self> {
        let area = engine.region_area(&config.region).await?;
        let bounds = engine.region_bounds(&config.region).await?;
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let plan = Self::new(config, area, bounds, &timestamp)?;
        info!(
            "region {} covers {:.0} m², scale {}",
            plan.region, area, plan.scale
        );
        Ok(plan)
    }

    /// The whole period as a single window.
    pub fn period(self: &Self) -> Option<TimeWindow> {
        let first = self.windows.first()?;
        let last = self.windows.last()?;
        Some(TimeWindow::new(first.start, last.end))
    }

    fn query(self: &Self, product: &Product, window: TimeWindow) -> ImageQuery {
        ImageQuery {
            satellite: product.satellite,
            window,
            region: self.region.clone(),
            cloud_cover_max: self.cloud_cover_max,
            preprocess: product.preprocess,
        }
    }

    fn request(self: &Self, image: Expr, description: String, scale: f64) -> ExportRequest {
        ExportRequest {
            image,
            description,
            destination: self.destination.clone(),
            region: self.bounds.clone(),
            grid: PixelGrid::Scale(scale),
            crs: self.crs.clone(),
            file_format: self.file_format,
            format_options: self.format_options.clone(),
            max_pixels: self.request_max_pixels,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubmissionOutcome {
    pub satellite: Satellite,
    pub window: TimeWindow,
    pub description: String,
    pub result: std::result::Result<ExportTask, String>,
}

#[derive(Clone, Debug, Default)]
pub struct SubmissionReport {
    pub outcomes: Vec<SubmissionOutcome>,
    /// Set when a failure stopped submission early.
    pub aborted: bool,
}

impl SubmissionReport {
    /// Accepted tasks, in submission order.
    pub fn tasks(self: &Self) -> Vec<ExportTask> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect()
    }

    pub fn failures(self: &Self) -> Vec<&SubmissionOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err()).collect()
    }

    fn record(self: &mut Self, outcome: SubmissionOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn log_summary(self: &Self) {
        let failures = self.failures();
        info!(
            "submitted {} export(s), {} failure(s){}",
            self.outcomes.len() - failures.len(),
            failures.len(),
            if self.aborted { ", stopped early" } else { "" }
        );
        for f in failures {
            if let Err(e) = &f.result {
                warn!("{} {} {}: {}", f.satellite, f.window, f.description, e);
            }
        }
    }
}

struct Submitter<'a, E: EarthEngine> {
    engine: &'a E,
    plan: &'a SubmissionPlan,
    policy: FailurePolicy,
    report: SubmissionReport,
}

impl<'a, E: EarthEngine> Submitter<'a, E> {
    /// Records a failure; returns false when submission must stop.
    fn fail(
        self: &mut Self,
        product: &Product,
        window: TimeWindow,
        description: String,
        err: String,
    ) -> bool {
        warn!("{} {}: {}", product.satellite, window, err);
        self.report.record(SubmissionOutcome {
            satellite: product.satellite,
            window,
            description,
            result: Err(err),
        });
        self.policy == FailurePolicy::BestEffort
    }

    async fn submit(
        self: &mut Self,
        product: &Product,
        window: TimeWindow,
        image: Expr,
        description: String,
        scale: f64,
    ) -> bool {
        let request = self.plan.request(image, description, scale);
        let description = request.description();
        match self.engine.start_export(&request).await {
            Ok(task) => {
                info!("started {} (task {})", description, task.id);
                self.report.record(SubmissionOutcome {
                    satellite: product.satellite,
                    window,
                    description,
                    result: Ok(task),
                });
                true
            }
            Err(e) => self.fail(product, window, description, e.to_string()),
        }
    }

    /// Number of images matching the query. A failed query is recorded and
    /// `Err` carries whether submission may continue.
    async fn count(
        self: &mut Self,
        product: &Product,
        query: &ImageQuery,
    ) -> std::result::Result<u64, bool> {
        match self.engine.collection_size(&query.collection()).await {
            Ok(n) => {
                debug!("{} {}: {} image(s)", product.satellite, query.window, n);
                Ok(n)
            }
            Err(e) => {
                let description =
                    format!("{}_{}_query", product.satellite.label(), query.window.start_str());
                Err(self.fail(product, query.window, description, e.to_string()))
            }
        }
    }

    async fn per_image(self: &mut Self, product: &Product) -> bool {
        let sat = product.satellite;
        let scale = product
            .scale
            .or(sat.native_scale())
            .unwrap_or(self.plan.scale.meters());

        let plan = self.plan;
        for &window in &plan.windows {
            let query = self.plan.query(product, window);
            let count = match self.count(product, &query).await {
                Ok(n) => n,
                Err(true) => continue,
                Err(false) => return false,
            };
            let collection = query.collection();
            for i in 0..count {
                let image = clip(nth_image(collection.clone(), i, count), &self.plan.region);
                let description = format!(
                    "{}_Image_{}_{}_{}",
                    sat.label(),
                    window.start_str(),
                    i,
                    self.plan.timestamp
                );
                if !self.submit(product, window, image, description, scale).await {
                    return false;
                }
            }
        }
        true
    }

    async fn monthly_composite(self: &mut Self, product: &Product) -> bool {
        let scale = product.scale.unwrap_or(self.plan.scale.meters());
        let plan = self.plan;
        for &window in &plan.windows {
            if !self.composite(product, window, scale, false).await {
                return false;
            }
        }
        true
    }

    async fn composite(
        self: &mut Self,
        product: &Product,
        window: TimeWindow,
        scale: f64,
        whole_period: bool,
    ) -> bool {
        let sat = product.satellite;
        let query = self.plan.query(product, window);
        let count = match self.count(product, &query).await {
            Ok(n) => n,
            Err(keep_going) => return keep_going,
        };
        if count == 0 {
            if whole_period {
                warn!("no {} images available for {}", sat, window);
            }
            return true;
        }

        let image = clip(median(ndvi(query.collection(), sat)), &self.plan.region);
        let description = if whole_period {
            format!("{}_NDVI_Export_{}", sat.label(), self.plan.timestamp)
        } else {
            format!("{}_NDVI_{}_{}", sat.label(), window.start_str(), self.plan.timestamp)
        };
        self.submit(product, window, image, description, scale).await
    }
}

/// Submits every enabled product of the plan.
///
/// The returned report lists accepted tasks in submission order; with
/// [`FailurePolicy::FailFast`] it also carries the tasks accepted before the
/// first failure.
pub async fn submit_all(
    engine: &impl EarthEngine,
    plan: &SubmissionPlan,
    policy: FailurePolicy,
) -> SubmissionReport {
    let mut submitter = Submitter {
        engine,
        plan,
        policy,
        report: SubmissionReport::default(),
    };

    for product in &plan.products {
        let keep_going = match product.mode {
            ExportMode::PerImage => submitter.per_image(product).await,
            ExportMode::MonthlyComposite => submitter.monthly_composite(product).await,
            ExportMode::Composite => match plan.period() {
                Some(period) => {
                    let scale = product.scale.unwrap_or(plan.scale.meters());
                    submitter.composite(product, period, scale, true).await
                }
                None => true,
            },
        };
        if !keep_going {
            submitter.report.aborted = true;
            break;
        }
    }
    submitter.report
}
