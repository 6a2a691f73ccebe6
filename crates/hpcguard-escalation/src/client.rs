//! Incident-intake client.

use std::time::Duration;

use tracing::{debug, warn};

use crate::BoxFuture;
use crate::error::{EscalationError, EscalationResult};
use crate::payload::IncidentPayload;

/// HTTP method used for submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMethod {
    #[default]
    Post,
    Put,
}

impl SubmitMethod {
    /// Case-insensitive; anything other than `put` means `POST`.
    pub fn parse(method: &str) -> Self {
        match method.trim().to_ascii_uppercase().as_str() {
            "POST" => SubmitMethod::Post,
            "PUT" => SubmitMethod::Put,
            other => {
                warn!(method = %other, "unsupported submission method, using POST");
                SubmitMethod::Post
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitMethod::Post => "POST",
            SubmitMethod::Put => "PUT",
        }
    }
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub request_id: String,
    pub http_status: u16,
}

/// Delivers a payload to the intake endpoint. Any error, including a
/// non-2xx status, counts as a failed attempt.
pub trait IncidentClient: Send + Sync {
    fn submit<'a>(
        &'a self,
        payload: &'a IncidentPayload,
        method: SubmitMethod,
    ) -> BoxFuture<'a, EscalationResult<SubmitResponse>>;
}

/// [`IncidentClient`] over HTTP(S) with a JSON body.
#[derive(Debug, Clone)]
pub struct HttpIncidentClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIncidentClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> EscalationResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        payload: &IncidentPayload,
        method: SubmitMethod,
    ) -> EscalationResult<SubmitResponse> {
        let request = match method {
            SubmitMethod::Post => self.client.post(&self.endpoint),
            SubmitMethod::Put => self.client.put(&self.endpoint),
        };

        let response = request.json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EscalationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            endpoint = %self.endpoint,
            method = method.as_str(),
            status = status.as_u16(),
            request_id = %payload.request_id(),
            "incident accepted"
        );
        Ok(SubmitResponse {
            request_id: payload.request_id().to_string(),
            http_status: status.as_u16(),
        })
    }
}

impl IncidentClient for HttpIncidentClient {
    fn submit<'a>(
        &'a self,
        payload: &'a IncidentPayload,
        method: SubmitMethod,
    ) -> BoxFuture<'a, EscalationResult<SubmitResponse>> {
        Box::pin(self.send(payload, method))
    }
}
