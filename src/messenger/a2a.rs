//! JSON-RPC 2.0 messenger for A2A participants.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::Messenger;
use crate::error::MessengerError;
use crate::protocol::{
    AgentAction, AgentResponse, CommandResult, CommandResultMessage, ParticipantMessage,
    TaskInstruction,
};

/// JSON-RPC method used for every exchange.
pub const A2A_METHOD: &str = "tasks/send";

/// HTTP timeout for one round trip.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Reasoning attached when the participant answers without any text.
const NO_RESPONSE: &str = "No response";

/// Messenger posting JSON-RPC requests to a participant endpoint.
///
/// The session id returned by the participant is remembered per task and
/// sent back on later calls for the same task.
pub struct A2aMessenger {
    endpoint: String,
    client: Client,
    sessions: Mutex<HashMap<String, String>>,
}

impl A2aMessenger {
    /// Creates a messenger with the default 60 s request timeout.
    ///
    /// # Errors
    ///
    /// Returns `MessengerError::Transport` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, MessengerError> {
        Self::with_timeout(endpoint, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MessengerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MessengerError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: normalize_endpoint(&endpoint.into()),
            client,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Endpoint requests are posted to, always ending in a single `/`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session_for(&self, task_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(task_id).cloned())
    }

    fn remember_session(&self, task_id: &str, session_id: String) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(task_id.to_string(), session_id);
        }
    }

    async fn send(&self, message: &ParticipantMessage) -> Result<AgentAction, MessengerError> {
        let task_id = message.task_id();
        let request = build_request(message, self.session_for(task_id).as_deref())?;

        debug!(task_id = %task_id, endpoint = %self.endpoint, "Sending participant message");

        let http_response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| MessengerError::Transport(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let message = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(MessengerError::Http {
                code: status.as_u16(),
                message,
            });
        }

        let body: Value = http_response
            .json()
            .await
            .map_err(|e| MessengerError::Protocol(format!("Response is not JSON: {e}")))?;

        let (session_id, action) = parse_response(body)?;
        if let Some(session_id) = session_id {
            self.remember_session(task_id, session_id);
        }
        Ok(action)
    }
}

#[async_trait]
impl Messenger for A2aMessenger {
    async fn send_instruction(
        &self,
        instruction: &TaskInstruction,
    ) -> Result<AgentAction, MessengerError> {
        self.send(&ParticipantMessage::TaskInstruction(instruction.clone()))
            .await
    }

    async fn send_command_result(
        &self,
        task_id: &str,
        result: &CommandResult,
    ) -> Result<AgentAction, MessengerError> {
        self.send(&ParticipantMessage::CommandResult(CommandResultMessage::new(
            task_id, result,
        )))
        .await
    }

    async fn finish_task(&self, task_id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(task_id);
        }
    }
}

/// Builds the `tasks/send` envelope carrying `message` as a text part.
pub(crate) fn build_request(
    message: &ParticipantMessage,
    session_id: Option<&str>,
) -> Result<Value, MessengerError> {
    let text = serde_json::to_string(message)
        .map_err(|e| MessengerError::Protocol(format!("Failed to encode message: {e}")))?;

    let mut params = json!({
        "message": {
            "role": "user",
            "parts": [{ "type": "text", "text": text }],
        }
    });
    if let Some(session_id) = session_id {
        params["sessionId"] = Value::String(session_id.to_string());
    }

    Ok(json!({
        "jsonrpc": "2.0",
        "method": A2A_METHOD,
        "id": message.task_id(),
        "params": params,
    }))
}

/// Extracts the session id and the agent action from a JSON-RPC response.
pub(crate) fn parse_response(
    body: Value,
) -> Result<(Option<String>, AgentAction), MessengerError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(MessengerError::Agent(message));
    }

    let result = body.get("result").cloned().unwrap_or(Value::Null);
    let session_id = result
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let text = result
        .get("artifact")
        .and_then(|artifact| artifact.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| {
            parts
                .iter()
                .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        })
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str);

    let action = match text {
        Some(text) => parse_agent_text(text)?,
        None => AgentAction::Complete {
            reasoning: Some(NO_RESPONSE.to_string()),
        },
    };

    Ok((session_id, action))
}

/// Interprets the participant's text part.
///
/// Free text is a completion carrying the text as reasoning; JSON must
/// match the agent response schema.
pub(crate) fn parse_agent_text(text: &str) -> Result<AgentAction, MessengerError> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Ok(AgentAction::Complete {
            reasoning: Some(text.to_string()),
        });
    };

    let response: AgentResponse = serde_json::from_value(value)
        .map_err(|e| MessengerError::Protocol(e.to_string()))?;
    AgentAction::try_from(response)
}

/// `http://host:9019` and `http://host:9019/` name the same route.
fn normalize_endpoint(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}
