// Delivery handlers
//
// The engine never decides how a webhook's business payload is applied. A
// handler does that work and reports back a result code plus an optional body
// or error; the processor turns that report into a state transition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

use super::record::{LastResult, WebhookRecord};

/// Response bodies longer than this are truncated before being stored
pub const MAX_STORED_BODY_BYTES: usize = 4096;

/// What a handler reports for one attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    /// HTTP-like result code
    pub status_code: Option<u16>,
    /// Response body
    pub body: Option<String>,
    /// Error message; any error makes the attempt a failure
    pub error: Option<String>,
}

impl HandlerResponse {
    /// Successful response without a code
    pub fn ok() -> Self {
        Self::default()
    }

    /// Response with a result code; 2xx is success
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::default()
        }
    }

    /// Explicit failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Success means no error and, if a code was given, a 2xx code
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .status_code
                .map_or(true, |code| (200..300).contains(&code))
    }

    /// Convert into the `last_result` stored on the record
    pub fn into_last_result(self) -> LastResult {
        let success = self.is_success();
        let message = match (self.error, self.status_code) {
            (Some(error), _) => Some(error),
            (None, Some(code)) if !success => Some(format!("HTTP {}", code)),
            _ => None,
        };
        LastResult {
            status_code: self.status_code,
            message,
            response_body: self.body.map(truncate_body),
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_STORED_BODY_BYTES {
        let mut cut = MAX_STORED_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Business-side processing of a webhook record
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Process the record's payload.
    ///
    /// Returning `Err` is treated exactly like a failed response.
    async fn handle(&self, record: &WebhookRecord) -> anyhow::Result<HandlerResponse>;
}

/// Handler built from an async closure
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> DeliveryHandler for FnHandler<F>
where
    F: Fn(WebhookRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerResponse>> + Send + 'static,
{
    async fn handle(&self, record: &WebhookRecord) -> anyhow::Result<HandlerResponse> {
        (self.f)(record.clone()).await
    }
}

/// Forwards the record payload to an HTTP endpoint
pub struct HttpForwardHandler {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    auth_token: Option<String>,
}

impl HttpForwardHandler {
    /// Create a new forwarding handler
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            headers: HashMap::new(),
            auth_token: None,
        }
    }

    /// Extra headers sent with every request
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Bearer token for authentication
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }
}

#[async_trait]
impl DeliveryHandler for HttpForwardHandler {
    async fn handle(&self, record: &WebhookRecord) -> anyhow::Result<HandlerResponse> {
        let start = Instant::now();

        let mut request = self
            .client
            .post(&self.url)
            .header("X-Webhook-Id", record.id.to_string())
            .header("X-Webhook-Event", &record.event_type)
            .header("X-Webhook-Source", record.source.as_str())
            .header("X-Webhook-Attempt", record.attempts.to_string())
            .json(&record.payload);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.ok().filter(|b| !b.is_empty());

                debug!(
                    record_id = %record.id,
                    attempt = record.attempts,
                    status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Forwarded webhook"
                );

                Ok(HandlerResponse {
                    status_code: Some(status),
                    body,
                    error: None,
                })
            }
            Err(e) => {
                warn!(
                    record_id = %record.id,
                    attempt = record.attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Forwarding failed: {}",
                    e
                );
                Ok(HandlerResponse::failed(format!("request failed: {}", e)))
            }
        }
    }
}
