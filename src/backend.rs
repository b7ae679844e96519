//! Request client for the remote agent-coordination endpoint.
//!
//! One HTTP request per user utterance, no retries. Any non-success status,
//! transport error, timeout or body without an answer is a [`DispatchFailure`].

use crate::config::BackendConfig;
use crate::conversation::ContextTurn;
use crate::error::{DispatchFailure, Result, VoiceError};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Conversation context sent alongside an utterance.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: String,
    /// Bounded tail of the conversation, oldest first.
    pub conversation: Vec<ContextTurn>,
}

/// A textual answer from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    /// Workflow id reported by the backend, if any.
    pub workflow_id: Option<String>,
}

/// Sends completed user utterances to the backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Send one utterance and wait for its answer.
    async fn send(
        &self,
        utterance_text: &str,
        context: &RequestContext,
    ) -> std::result::Result<Answer, DispatchFailure>;
}

#[derive(Debug, Serialize)]
struct CoordinateRequest<'a> {
    task: &'a str,
    context: TaskContext<'a>,
    agents: &'a [String],
}

#[derive(Debug, Serialize)]
struct TaskContext<'a> {
    session_id: &'a str,
    input_method: &'static str,
    conversation_context: &'a [ContextTurn],
}

/// [`BackendClient`] speaking the coordination service's JSON API over HTTP.
pub struct HttpBackendClient {
    config: BackendConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackendClient")
            .field("base_url", &self.config.base_url)
            .field("timeout_ms", &self.config.timeout_ms)
            .finish()
    }
}

impl HttpBackendClient {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Query the backend health endpoint and return its reported status.
    ///
    /// # Errors
    ///
    /// Returns the same failures as a dispatch: transport, status or body errors.
    pub async fn health(&self) -> std::result::Result<String, DispatchFailure> {
        let url = self.config.endpoint("/health");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(DispatchFailure::Status {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| DispatchFailure::Malformed {
                message: format!("health body is not JSON: {e}"),
            })?;
        value
            .get("status")
            .and_then(|s| s.as_str())
            .map(str::to_owned)
            .ok_or_else(|| DispatchFailure::Malformed {
                message: "health body has no status".to_owned(),
            })
    }

    async fn exchange(
        &self,
        utterance_text: &str,
        context: &RequestContext,
    ) -> std::result::Result<Answer, DispatchFailure> {
        let url = self.config.endpoint(&self.config.coordinate_path);
        let body = CoordinateRequest {
            task: utterance_text,
            context: TaskContext {
                session_id: &context.session_id,
                input_method: "voice",
                conversation_context: &context.conversation,
            },
            agents: &self.config.agents,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(user_id) = &self.config.user_id {
            request = request.header("X-User-ID", user_id);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(DispatchFailure::Status {
                status: status.as_u16(),
                message: extract_error_message(&text),
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| DispatchFailure::Malformed {
                message: format!("response is not JSON: {e}"),
            })?;
        let answer = extract_answer(&value).ok_or_else(|| DispatchFailure::Malformed {
            message: "response has no summary".to_owned(),
        })?;
        let workflow_id = value
            .get("workflow_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned);

        Ok(Answer {
            text: answer,
            workflow_id,
        })
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn send(
        &self,
        utterance_text: &str,
        context: &RequestContext,
    ) -> std::result::Result<Answer, DispatchFailure> {
        info!(
            chars = utterance_text.len(),
            context_turns = context.conversation.len(),
            "dispatching utterance"
        );
        // The reqwest timeout covers the transfer; this bound also covers body decoding.
        match tokio::time::timeout(self.config.timeout(), self.exchange(utterance_text, context))
            .await
        {
            Ok(Ok(answer)) => {
                debug!(workflow_id = ?answer.workflow_id, "backend answered");
                Ok(answer)
            }
            Ok(Err(failure)) => {
                warn!("backend request failed: {failure}");
                Err(failure)
            }
            Err(_) => {
                warn!("backend request timed out after {}ms", self.config.timeout_ms);
                Err(DispatchFailure::Timeout)
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> DispatchFailure {
    if e.is_timeout() {
        DispatchFailure::Timeout
    } else if e.is_decode() {
        DispatchFailure::Malformed {
            message: e.to_string(),
        }
    } else {
        DispatchFailure::Network {
            message: e.to_string(),
        }
    }
}

/// Pull the answer text out of a coordination response.
///
/// Checks `results.summary`, then `summary`, `response` and `answer`.
/// Blank strings do not count.
pub fn extract_answer(body: &serde_json::Value) -> Option<String> {
    let candidates = [
        body.get("results").and_then(|r| r.get("summary")),
        body.get("summary"),
        body.get("response"),
        body.get("answer"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Extract a readable message from an error body (`detail` or `error.message`).
fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.get("detail")
            .and_then(|d| d.as_str())
            .or_else(|| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
            })
            .map(str::to_owned)
    });
    match message {
        Some(m) => m,
        None => body.chars().take(200).collect(),
    }
}
