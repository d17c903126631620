//! reqwest-backed [`StatusEndpoint`] speaking the job routes over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    domain::JobId,
    protocol::{JobStatusResponse, PollStatus, SubmitJobResponse},
};
use tracing::debug;
use url::Url;

use crate::endpoint::{DocumentUpload, EndpointError, StatusEndpoint};

const ID_PLACEHOLDER: &str = "{id}";
const MAX_ERROR_DETAIL_CHARS: usize = 200;

/// Path templates for the job routes; `{id}` stands for the job id segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRoutes {
    pub submit: String,
    pub status: String,
    pub result: String,
    pub health: Option<String>,
}

impl Default for EndpointRoutes {
    fn default() -> Self {
        Self {
            submit: "/jobs".into(),
            status: "/jobs/{id}/status".into(),
            result: "/jobs/{id}".into(),
            health: Some("/healthz".into()),
        }
    }
}

impl EndpointRoutes {
    /// Routes of the paper review backend that predates the `/jobs` API.
    pub fn legacy_review_api() -> Self {
        Self {
            submit: "/api/upload".into(),
            status: "/api/review/{id}/status".into(),
            result: "/api/review/{id}".into(),
            health: Some("/api/status".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Submit,
    Poll,
    Fetch,
    Health,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpStatusEndpoint {
    http: Client,
    base_url: Url,
    routes: EndpointRoutes,
}

impl HttpStatusEndpoint {
    pub fn new(
        base_url: &str,
        routes: EndpointRoutes,
        request_timeout: Duration,
    ) -> Result<Self, EndpointError> {
        let parsed = Url::parse(base_url).map_err(|err| {
            EndpointError::Validation(format!("invalid server url '{base_url}': {err}"))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(EndpointError::Validation(format!(
                "server url '{base_url}' cannot carry request paths"
            )));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| EndpointError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: parsed,
            routes,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn routes(&self) -> &EndpointRoutes {
        &self.routes
    }

    /// Plain-text body of the backend status route.
    pub async fn health(&self) -> Result<String, EndpointError> {
        let route = self
            .routes
            .health
            .as_deref()
            .ok_or_else(|| EndpointError::NotFound("no health route configured".into()))?;
        let url = self.route_url(route, None)?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response, Operation::Health).await?;
        response.text().await.map_err(transport_error)
    }

    fn route_url(&self, template: &str, job_id: Option<&JobId>) -> Result<Url, EndpointError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                EndpointError::Validation(format!(
                    "server url '{}' cannot carry request paths",
                    self.base_url
                ))
            })?;
            segments.pop_if_empty();
            for segment in template.split('/').filter(|segment| !segment.is_empty()) {
                match (segment, job_id) {
                    (ID_PLACEHOLDER, Some(job_id)) => segments.push(job_id.as_str()),
                    (ID_PLACEHOLDER, None) => {
                        return Err(EndpointError::Validation(format!(
                            "route '{template}' needs a job id"
                        )))
                    }
                    (literal, _) => segments.push(literal),
                };
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl StatusEndpoint for HttpStatusEndpoint {
    async fn submit(&self, document: &DocumentUpload) -> Result<JobId, EndpointError> {
        let url = self.route_url(&self.routes.submit, None)?;
        let part = multipart::Part::bytes(document.bytes.clone())
            .file_name(document.filename.clone())
            .mime_str(document.mime_type_or_default())
            .map_err(|err| EndpointError::Validation(format!("invalid mime type: {err}")))?;
        let form = multipart::Form::new().part("file", part);

        debug!(%url, filename = %document.filename, "posting document");
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, Operation::Submit).await?;
        let body: SubmitJobResponse = decode_json(response).await?;
        body.into_job_id()
            .ok_or_else(|| EndpointError::Transport("submit response carried no job id".into()))
    }

    async fn poll(&self, job_id: &JobId) -> Result<PollStatus, EndpointError> {
        let url = self.route_url(&self.routes.status, Some(job_id))?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response, Operation::Poll).await?;
        let body: JobStatusResponse = decode_json(response).await?;
        Ok(body.into())
    }

    async fn fetch(&self, job_id: &JobId) -> Result<serde_json::Value, EndpointError> {
        let url = self.route_url(&self.routes.result, Some(job_id))?;
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let response = check_status(response, Operation::Fetch).await?;
        decode_json(response).await
    }
}

fn transport_error(err: reqwest::Error) -> EndpointError {
    if err.is_timeout() {
        EndpointError::Transport(format!("request timed out: {err}"))
    } else {
        EndpointError::Transport(err.to_string())
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, EndpointError> {
    response
        .json::<T>()
        .await
        .map_err(|err| EndpointError::Transport(format!("malformed response body: {err}")))
}

async fn check_status(response: Response, operation: Operation) -> Result<Response, EndpointError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let message = match error_detail(response).await {
        Some(detail) => format!("{status} from {url}: {detail}"),
        None => format!("{status} from {url}"),
    };

    Err(match (status, operation) {
        (StatusCode::NOT_FOUND, Operation::Poll | Operation::Fetch) => {
            EndpointError::NotFound(message)
        }
        (status, Operation::Submit) if status.is_client_error() && status != StatusCode::NOT_FOUND => {
            EndpointError::Validation(message)
        }
        _ => EndpointError::Transport(message),
    })
}

async fn error_detail(response: Response) -> Option<String> {
    let text = response.text().await.ok()?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let detail = match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody {
            detail: Some(serde_json::Value::String(detail)),
            ..
        }) => detail,
        Ok(ErrorBody {
            detail: Some(detail),
            ..
        }) => detail.to_string(),
        Ok(ErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => text.to_string(),
    };
    Some(detail.chars().take(MAX_ERROR_DETAIL_CHARS).collect())
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
