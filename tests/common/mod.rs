//! Fakes shared by the integration tests.
//!
//! `FakeRuntime` is an in-memory sandbox backend that understands a tiny
//! command language:
//!
//! - `write <path> <content...>`: create a file
//! - `check <path> <content...>`: exit 0 if the file holds exactly `content`
//! - `sleep <secs>`: sleep on the tokio clock
//! - `fail <code>`: exit with `code` and a message on stderr
//! - anything else: echo the command

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use termbench::error::{MessengerError, SandboxError};
use termbench::execution::{ExecOutput, ExecSpec, SandboxRuntime, SandboxSpec};
use termbench::messenger::Messenger;
use termbench::protocol::{AgentAction, CommandRequest, CommandResult, TaskInstruction};
use termbench::runner::{Evaluator, EvaluatorConfig, Orchestrator, SandboxManager};
use termbench::task::{StaticTaskSource, Task};

#[derive(Debug, Default)]
struct FakeSandbox {
    files: HashMap<String, String>,
    started: bool,
}

#[derive(Debug, Default)]
struct RuntimeState {
    next_id: usize,
    sandboxes: HashMap<String, FakeSandbox>,
    created: usize,
    removed: usize,
    stopped: usize,
    commands: Vec<String>,
    terminated: Vec<String>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    missing_images: HashSet<String>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_missing_image(image: &str) -> Arc<Self> {
        let mut runtime = Self::default();
        runtime.missing_images.insert(image.to_string());
        Arc::new(runtime)
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn removed(&self) -> usize {
        self.state.lock().unwrap().removed
    }

    /// Sandboxes that exist in the backend right now.
    pub fn alive(&self) -> usize {
        self.state.lock().unwrap().sandboxes.len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn terminated(&self) -> usize {
        self.state.lock().unwrap().terminated.len()
    }

    fn run(sandbox: &mut FakeSandbox, command: &str) -> ExecOutput {
        let mut words = command.splitn(3, ' ');
        let verb = words.next().unwrap_or_default();
        let arg = words.next().unwrap_or_default();
        let rest = words.next().unwrap_or_default();

        match verb {
            "write" => {
                sandbox.files.insert(arg.to_string(), rest.to_string());
                ok("")
            }
            "check" => match sandbox.files.get(arg) {
                Some(content) if content == rest => ok("OK\n"),
                Some(content) => failed(1, &format!("{arg}: expected '{rest}', found '{content}'\n")),
                None => failed(1, &format!("{arg}: No such file or directory\n")),
            },
            "fail" => failed(arg.parse().unwrap_or(1), "command failed\n"),
            _ => ok(&format!("{command}\n")),
        }
    }
}

fn ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed(code: i64, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.missing_images.contains(image) {
            return Err(SandboxError::ImageUnavailable {
                image: image.to_string(),
                reason: "repository does not exist".to_string(),
            });
        }
        Ok(())
    }

    async fn create(&self, _spec: &SandboxSpec) -> Result<String, SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.created += 1;
        let id = format!("fake-{}", state.next_id);
        state.sandboxes.insert(id.clone(), FakeSandbox::default());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        match state.sandboxes.get_mut(id) {
            Some(sandbox) => {
                sandbox.started = true;
                Ok(())
            }
            None => Err(SandboxError::NotFound { id: id.to_string() }),
        }
    }

    async fn exec(&self, id: &str, exec: &ExecSpec) -> Result<ExecOutput, SandboxError> {
        let sleep_secs = {
            let mut state = self.state.lock().unwrap();
            if !state.sandboxes.contains_key(id) {
                return Err(SandboxError::NotFound { id: id.to_string() });
            }
            state.commands.push(exec.command.clone());
            exec.command
                .strip_prefix("sleep ")
                .and_then(|secs| secs.trim().parse::<u64>().ok())
        };

        if let Some(secs) = sleep_secs {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            return Ok(ok(""));
        }

        let mut state = self.state.lock().unwrap();
        let sandbox = state
            .sandboxes
            .get_mut(id)
            .ok_or_else(|| SandboxError::NotFound { id: id.to_string() })?;
        Ok(Self::run(sandbox, &exec.command))
    }

    async fn terminate_exec(&self, _id: &str, exec_id: &str) -> Result<(), SandboxError> {
        self.state
            .lock()
            .unwrap()
            .terminated
            .push(exec_id.to_string());
        Ok(())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        if !state.sandboxes.contains_key(id) {
            return Err(SandboxError::NotFound { id: id.to_string() });
        }
        state.stopped += 1;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        match state.sandboxes.remove(id) {
            Some(_) => {
                state.removed += 1;
                Ok(())
            }
            None => Err(SandboxError::NotFound { id: id.to_string() }),
        }
    }
}

/// One scripted participant reply.
pub enum Reply {
    Action(AgentAction),
    Error(MessengerError),
    Panic,
}

pub fn execute(command: &str) -> Reply {
    Reply::Action(AgentAction::execute(CommandRequest::new(command)))
}

pub fn execute_with_timeout(command: &str, secs: u64) -> Reply {
    Reply::Action(AgentAction::execute(
        CommandRequest::new(command).with_timeout(secs),
    ))
}

pub fn complete() -> Reply {
    Reply::Action(AgentAction::complete())
}

/// Participant replaying per-task scripts; completes once a script runs out.
#[derive(Default)]
pub struct ScriptedMessenger {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    instructions: Mutex<Vec<TaskInstruction>>,
    results: Mutex<Vec<(String, CommandResult)>>,
}

impl ScriptedMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: &Arc<Self>, task_id: &str, replies: Vec<Reply>) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), replies.into());
        Arc::clone(self)
    }

    pub fn instructions(&self) -> Vec<TaskInstruction> {
        self.instructions.lock().unwrap().clone()
    }

    pub fn results_for(&self, task_id: &str) -> Vec<CommandResult> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, result)| result.clone())
            .collect()
    }

    fn next(&self, task_id: &str) -> Result<AgentAction, MessengerError> {
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Action(action)) => Ok(action),
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::Panic) => panic!("participant fixture exploded"),
            None => Ok(AgentAction::complete()),
        }
    }
}

#[async_trait]
impl Messenger for ScriptedMessenger {
    async fn send_instruction(
        &self,
        instruction: &TaskInstruction,
    ) -> Result<AgentAction, MessengerError> {
        self.instructions.lock().unwrap().push(instruction.clone());
        self.next(&instruction.task_id)
    }

    async fn send_command_result(
        &self,
        task_id: &str,
        result: &CommandResult,
    ) -> Result<AgentAction, MessengerError> {
        self.results
            .lock()
            .unwrap()
            .push((task_id.to_string(), result.clone()));
        self.next(task_id)
    }
}

/// Everything a test needs to drive a run.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub messenger: Arc<ScriptedMessenger>,
    pub sandboxes: Arc<SandboxManager>,
    pub evaluator: Evaluator,
}

pub fn harness(
    runtime: Arc<FakeRuntime>,
    messenger: Arc<ScriptedMessenger>,
    config: &EvaluatorConfig,
) -> Harness {
    let sandboxes = Arc::new(SandboxManager::new(runtime.clone()).with_limits(config.limits.clone()));
    let evaluator = Evaluator::new(Arc::clone(&sandboxes), messenger.clone(), config);
    Harness {
        runtime,
        messenger,
        sandboxes,
        evaluator,
    }
}

pub fn orchestrator(
    runtime: Arc<FakeRuntime>,
    messenger: Arc<ScriptedMessenger>,
    config: &EvaluatorConfig,
    tasks: Vec<Task>,
) -> Orchestrator {
    let harness = harness(runtime, messenger, config);
    Orchestrator::new(
        Arc::new(StaticTaskSource::new("fixtures", tasks)),
        harness.evaluator,
    )
    .with_concurrency(config.concurrency)
}

/// Task whose verification checks `path` holds `content`.
pub fn file_task(id: &str, path: &str, content: &str) -> Task {
    Task::new(
        id,
        format!("Create {path} containing '{content}'"),
        format!("check {path} {content}"),
    )
}
