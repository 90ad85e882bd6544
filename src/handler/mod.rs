//! Host-independent request handling.
//!
//! A hosting server turns each inbound request into a [`RequestContext`]
//! and forwards the returned [`OutboundEvent`]s to its client.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::RunError;
use crate::metrics::BenchmarkReport;
use crate::runner::Orchestrator;

pub const HELP_TEXT: &str = "TerminalBench Evaluator Commands:

- \"run\" or \"evaluate\": Start the TerminalBench evaluation
- \"status\": Get current evaluation status

The evaluator will:
1. Load tasks from the TerminalBench dataset
2. Create sandboxes for each task
3. Send task instructions to the participant agent
4. Execute returned commands in the sandbox
5. Run verification scripts to check completion
6. Report aggregate results
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    /// Text parts joined by spaces.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                Part::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Inbound request: the host's task id and its message history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub task_id: String,
    #[serde(default)]
    pub history: Vec<Message>,
}

impl RequestContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            history: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.history.push(message);
        self
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.history.iter().rev().find(|m| m.role == Role::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Working,
    Completed,
    Failed,
    Canceled,
}

/// Status update emitted towards the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub task_id: String,
    pub state: EventState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Message>,
}

impl OutboundEvent {
    fn new(task_id: &str, state: EventState, text: Option<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            state,
            artifact: text.map(Message::agent),
        }
    }

    /// Text of the artifact, if any.
    pub fn text(&self) -> Option<String> {
        self.artifact.as_ref().map(Message::text)
    }
}

/// What the last user message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Status,
    Help,
}

impl Command {
    fn parse(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("run") || text.contains("evaluate") {
            Self::Run
        } else if text.contains("status") {
            Self::Status
        } else {
            Self::Help
        }
    }
}

/// Routes requests to the orchestrator.
pub struct RequestHandler {
    orchestrator: Arc<Orchestrator>,
    active: Mutex<Option<CancellationToken>>,
}

impl RequestHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            active: Mutex::new(None),
        }
    }

    pub async fn handle(&self, ctx: RequestContext) -> Vec<OutboundEvent> {
        let Some(message) = ctx.last_user_message() else {
            return vec![OutboundEvent::new(
                &ctx.task_id,
                EventState::Failed,
                Some("Error: No user message found".to_string()),
            )];
        };

        match Command::parse(&message.text()) {
            Command::Run => self.run(&ctx.task_id).await,
            Command::Status => vec![OutboundEvent::new(
                &ctx.task_id,
                EventState::Completed,
                Some(self.orchestrator.describe()),
            )],
            Command::Help => vec![OutboundEvent::new(
                &ctx.task_id,
                EventState::Completed,
                Some(HELP_TEXT.to_string()),
            )],
        }
    }

    async fn run(&self, task_id: &str) -> Vec<OutboundEvent> {
        let mut events = vec![OutboundEvent::new(task_id, EventState::Working, None)];

        let cancel = CancellationToken::new();
        let accepted = {
            let mut active = self
                .active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if active.is_some() {
                false
            } else {
                *active = Some(cancel.clone());
                true
            }
        };
        if !accepted {
            warn!(request = task_id, "Evaluation already in progress, request rejected");
            events.push(OutboundEvent::new(
                task_id,
                EventState::Failed,
                Some(format!("Error: {}", RunError::AlreadyRunning)),
            ));
            return events;
        }

        info!(request = task_id, "Evaluation requested");
        let outcome = self.orchestrator.run(cancel).await;

        // Only the run that installed the token clears it.
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }

        events.push(match outcome {
            Ok(report) => OutboundEvent::new(
                task_id,
                EventState::Completed,
                Some(format_results(&report)),
            ),
            Err(e) => OutboundEvent::new(task_id, EventState::Failed, Some(format!("Error: {e}"))),
        });
        events
    }

    /// Cancels the evaluation started by this handler, if one is running.
    pub fn cancel(&self, ctx: &RequestContext) -> Vec<OutboundEvent> {
        let token = self.active.lock().ok().and_then(|active| active.clone());
        match token {
            Some(token) => {
                token.cancel();
                vec![OutboundEvent::new(&ctx.task_id, EventState::Canceled, None)]
            }
            None => Vec::new(),
        }
    }
}

/// Renders a report as markdown.
pub fn format_results(report: &BenchmarkReport) -> String {
    let mut lines = vec![
        "# TerminalBench Evaluation Results".to_string(),
        String::new(),
        format!("Dataset: {}", report.dataset),
        format!("Total Tasks: {}", report.total_tasks),
        format!("Passed: {}", report.passed),
        format!("Failed: {}", report.failed),
        format!("Pass Rate: {:.1}%", report.pass_rate * 100.0),
        format!("Avg Turns: {:.1}", report.avg_turns),
        format!("Avg Time: {:.1}s", report.avg_time),
        String::new(),
        "## Task Details".to_string(),
        String::new(),
    ];

    for result in &report.results {
        let mark = if result.passed { "✓" } else { "✗" };
        lines.push(format!(
            "- [{mark}] {}: {} turns, {:.1}s",
            result.task_id, result.turns, result.total_time
        ));
        if let Some(error) = &result.error {
            lines.push(format!("  Error: {error}"));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::EvaluationResult;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("Please RUN the benchmark"), Command::Run);
        assert_eq!(Command::parse("evaluate now"), Command::Run);
        assert_eq!(Command::parse("what's the status?"), Command::Status);
        assert_eq!(Command::parse("hello"), Command::Help);
    }

    #[test]
    fn test_last_user_message() {
        let ctx = RequestContext::new("req-1")
            .with_message(Message::user("status"))
            .with_message(Message::agent("Idle"))
            .with_message(Message::user("run"));
        assert_eq!(ctx.last_user_message().unwrap().text(), "run");

        let ctx = RequestContext::new("req-2").with_message(Message::agent("hi"));
        assert!(ctx.last_user_message().is_none());
    }

    #[test]
    fn test_message_text_skips_data_parts() {
        let message = Message {
            role: Role::User,
            parts: vec![
                Part::Text {
                    text: "run".to_string(),
                },
                Part::Data {
                    data: serde_json::json!({"x": 1}),
                },
                Part::Text {
                    text: "now".to_string(),
                },
            ],
        };
        assert_eq!(message.text(), "run now");
    }

    #[test]
    fn test_format_results() {
        let report = BenchmarkReport {
            dataset: "sample".to_string(),
            total_tasks: 2,
            passed: 1,
            failed: 1,
            pass_rate: 0.5,
            avg_turns: 1.5,
            avg_time: 2.25,
            total_reward: 1.0,
            results: vec![
                EvaluationResult {
                    task_id: "a".to_string(),
                    passed: true,
                    reward: 1.0,
                    turns: 1,
                    total_time: 1.0,
                    error: None,
                },
                EvaluationResult {
                    task_id: "b".to_string(),
                    passed: false,
                    reward: 0.0,
                    turns: 2,
                    total_time: 3.5,
                    error: Some("Task timeout exceeded".to_string()),
                },
            ],
        };

        let text = format_results(&report);
        assert!(text.starts_with("# TerminalBench Evaluation Results"));
        assert!(text.contains("Pass Rate: 50.0%"));
        assert!(text.contains("- [✓] a: 1 turns, 1.0s"));
        assert!(text.contains("- [✗] b: 2 turns, 3.5s"));
        assert!(text.contains("  Error: Task timeout exceeded"));
    }

    #[test]
    fn test_event_serialization() {
        let event = OutboundEvent::new("req-1", EventState::Working, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"], "working");
        assert!(json.get("artifact").is_none());
    }
}
