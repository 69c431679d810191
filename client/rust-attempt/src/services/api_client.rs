use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::{AttemptError, Result};
use crate::metrics::track_api_request;
use crate::models::{
    AssignmentResponse, AttemptContext, SubmissionResults, SubmitRequest, SubmitResponse,
};
use crate::utils::retry::{retry_if, RetryConfig};

/// Backend calls the attempt engine depends on.
#[async_trait]
pub trait AssignmentApi: Send + Sync {
    async fn fetch_assignment(&self, assignment_id: &str) -> Result<AssignmentResponse>;

    async fn submit(&self, assignment_id: &str, request: &SubmitRequest) -> Result<SubmitResponse>;

    async fn fetch_results(&self, submission_id: &str) -> Result<SubmissionResults>;
}

pub struct HttpAssignmentApi {
    http_client: Client,
    base_url: Url,
    auth_token: Option<String>,
    fetch_retry: RetryConfig,
}

impl HttpAssignmentApi {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            AttemptError::Config(config::ConfigError::Message(format!(
                "invalid api base url '{}': {}",
                base_url, e
            )))
        })?;

        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url,
            auth_token,
            fetch_retry: RetryConfig::default(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            &config.api_base_url,
            config.auth_token.clone(),
            Duration::from_secs(config.http.request_timeout_secs),
        )?
        .with_fetch_retry(RetryConfig::with_attempts(config.http.fetch_retry_attempts)))
    }

    pub fn with_fetch_retry(mut self, retry: RetryConfig) -> Self {
        self.fetch_retry = retry;
        self
    }

    /// Joins path segments onto the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AttemptError::Config(config::ConfigError::Message(format!(
                    "api base url '{}' cannot carry a path",
                    self.base_url
                )))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_assignment_once(&self, assignment_id: &str) -> Result<AssignmentResponse> {
        let url = self.endpoint(&["api", "assignments", assignment_id])?;
        tracing::debug!("Fetching assignment {} from {}", assignment_id, url);

        let response = self.authorize(self.http_client.get(url)).send().await?;
        let body: AssignmentResponse = read_json(response).await?;

        if !body.success {
            return Err(AttemptError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: body
                    .message
                    .unwrap_or_else(|| "assignment fetch was not successful".to_string()),
            });
        }
        Ok(body)
    }
}

/// Only transport failures and 5xx answers are worth fetching again.
fn is_transient(err: &AttemptError) -> bool {
    match err {
        AttemptError::Network(_) => true,
        AttemptError::Rejected { status, .. } => *status >= 500,
        _ => false,
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(text);
        return Err(AttemptError::from_status(status, message));
    }

    Ok(response.json::<T>().await?)
}

#[async_trait]
impl AssignmentApi for HttpAssignmentApi {
    async fn fetch_assignment(&self, assignment_id: &str) -> Result<AssignmentResponse> {
        track_api_request(
            "fetch_assignment",
            retry_if(self.fetch_retry.clone(), is_transient, || {
                self.get_assignment_once(assignment_id)
            }),
        )
        .await
    }

    async fn submit(&self, assignment_id: &str, request: &SubmitRequest) -> Result<SubmitResponse> {
        let url = self.endpoint(&["api", "assignments", assignment_id, "submit"])?;
        tracing::info!(
            "Submitting assignment {} with {} answers",
            assignment_id,
            request.answers.len()
        );

        track_api_request("submit", async {
            let response = self
                .authorize(self.http_client.post(url))
                .json(request)
                .send()
                .await?;
            let body: SubmitResponse = read_json(response).await?;

            if !body.success {
                return Err(AttemptError::Rejected {
                    status: StatusCode::OK.as_u16(),
                    message: body
                        .message
                        .unwrap_or_else(|| "submission was not accepted".to_string()),
                });
            }
            Ok::<_, AttemptError>(body)
        })
        .await
    }

    async fn fetch_results(&self, submission_id: &str) -> Result<SubmissionResults> {
        let url = self.endpoint(&["api", "assignments", "submission", submission_id, "results"])?;

        track_api_request("fetch_results", async {
            let response = self.authorize(self.http_client.get(url)).send().await?;
            read_json(response).await
        })
        .await
    }
}

/// Loads an assignment and decides whether a new attempt may begin.
pub async fn prepare_attempt(api: &dyn AssignmentApi, assignment_id: &str) -> Result<AttemptContext> {
    let response = api.fetch_assignment(assignment_id).await?;

    if response.has_submitted && !response.can_retake {
        tracing::info!(
            "Assignment {} already submitted and retakes are closed",
            assignment_id
        );
        return Err(AttemptError::RetakeNotAllowed);
    }

    let assignment = response.assignment.ok_or_else(|| AttemptError::Rejected {
        status: StatusCode::OK.as_u16(),
        message: "assignment missing from response".to_string(),
    })?;

    Ok(AttemptContext {
        assignment,
        questions: response.questions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = HttpAssignmentApi::new("http://localhost:5000/", None, Duration::from_secs(1))
            .unwrap();
        let url = api.endpoint(&["api", "assignments", "a b/c", "submit"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/assignments/a%20b%2Fc/submit"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = HttpAssignmentApi::new("https://lms.example.edu/backend", None, Duration::from_secs(1))
            .unwrap();
        let url = api.endpoint(&["api", "assignments", "42"]).unwrap();
        assert_eq!(url.as_str(), "https://lms.example.edu/backend/api/assignments/42");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpAssignmentApi::new("not a url", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&AttemptError::Rejected {
            status: 503,
            message: String::new()
        }));
        assert!(!is_transient(&AttemptError::Rejected {
            status: 404,
            message: String::new()
        }));
        assert!(!is_transient(&AttemptError::Unauthorized));
    }
}
