use crate::auth::Authenticator;
use crate::error::{unexpected, ExportError, Result};
use crate::export::{Coordinates, ExportRequest, ExportTask, Operation, TaskStatus};
use crate::expr::{Expr, Expression};
use crate::query::{self, Region};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://earthengine.googleapis.com/";

/// Operations the export workflow needs from the remote platform.
pub trait EarthEngine {
    /// Evaluates an expression server-side.
    async fn compute_value(self: &Self, expr: &Expr) -> Result<Value>;

    async fn start_export(self: &Self, request: &ExportRequest) -> Result<ExportTask>;

    async fn task_status(self: &Self, task: &ExportTask) -> Result<TaskStatus>;

    async fn collection_size(self: &Self, collection: &Expr) -> Result<u64> {
        let value = self.compute_value(&query::size(collection.clone())).await?;
        value
            .as_u64()
            .ok_or_else(|| unexpected(format!("collection size is not a count: {value}")))
    }

    /// Region area in square meters.
    async fn region_area(self: &Self, region: &Region) -> Result<f64> {
        let value = self.compute_value(&region.area()).await?;
        value
            .as_f64()
            .ok_or_else(|| unexpected(format!("region area is not a number: {value}")))
    }

    async fn region_bounds(self: &Self, region: &Region) -> Result<Coordinates> {
        let value = self.compute_value(&region.bounds()).await?;
        let coordinates = value
            .get("coordinates")
            .cloned()
            .ok_or_else(|| unexpected(format!("bounds are not a polygon: {value}")))?;
        Ok(serde_json::from_value(coordinates)?)
    }
}

#[derive(Deserialize)]
struct ComputeResponse {
    result: Value,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// [`EarthEngine`] over the v1 REST API.
pub struct RestClient {
    http: reqwest::Client,
    auth: Authenticator,
    base_url: Url,
    project: String,
}

impl RestClient {
    pub fn new(http: reqwest::Client, auth: Authenticator, project: &str) -> Result<Self> {
        Self::with_base_url(http, auth, project, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        auth: Authenticator,
        project: &str,
        base_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            http,
            auth,
            base_url: Url::parse(base_url)?,
            project: project.to_string(),
        })
    }

    /// Obtains a token up front so credential problems surface before any
    /// request is assembled.
    pub async fn authenticate(self: &Self) -> Result<()> {
        self.auth.token().await?;
        Ok(())
    }

    fn project_endpoint(self: &Self, method: &str) -> Result<Url> {
        Ok(self
            .base_url
            .join(&format!("v1/projects/{}/{}", self.project, method))?)
    }

    async fn post<T: for<'de> Deserialize<'de>>(self: &Self, url: Url, body: &Value) -> Result<T> {
        debug!("POST {url}");
        let token = self.auth.token().await?;
        let response = self.http.post(url).bearer_auth(token).json(body).send().await?;
        parse_response(response).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(self: &Self, url: Url) -> Result<T> {
        debug!("GET {url}");
        let token = self.auth.token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        parse_response(response).await
    }
}

async fn parse_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let text = response.text().await.unwrap_or_default();
    Err(api_error(status.as_u16(), &text))
}

fn api_error(status: u16, body: &str) -> ExportError {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(b) if !b.error.message.is_empty() => b.error.message,
        _ => body.trim().to_string(),
    };
    ExportError::Api { status, message }
}

impl EarthEngine for RestClient {
    async fn compute_value(self: &Self, expr: &Expr) -> Result<Value> {
        let url = self.project_endpoint("value:compute")?;
        let body = json!({ "expression": serde_json::to_value(Expression::new(expr))? });
        let response: ComputeResponse = self.post(url, &body).await?;
        Ok(response.result)
    }

    async fn start_export(self: &Self, request: &ExportRequest) -> Result<ExportTask> {
        let url = self.project_endpoint("image:export")?;
        let body = request.to_body()?;
        debug!("export body: {body}");
        let operation: Operation = self.post(url, &body).await?;
        Ok(operation.task(&request.description()))
    }

    async fn task_status(self: &Self, task: &ExportTask) -> Result<TaskStatus> {
        let url = self.base_url.join(&format!("v1/{}", task.name))?;
        let operation: Operation = self.get(url).await?;
        Ok(operation.status())
    }
}
