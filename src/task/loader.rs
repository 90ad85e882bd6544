//! Task dataset loading.
//!
//! A dataset is either a path (a YAML/JSON file or a directory of them) or
//! the name of the built-in sample dataset.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::Task;
use crate::error::TaskLoadError;

/// Supplies the ordered task list for a run.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Dataset name used in reports.
    fn name(&self) -> &str;

    /// Loads all tasks in evaluation order.
    async fn load_tasks(&self) -> Result<Vec<Task>, TaskLoadError>;
}

/// Accepted shapes of a task file.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Document { tasks: Vec<Task> },
    List(Vec<Task>),
    Single(Box<Task>),
}

impl TaskFile {
    fn into_tasks(self) -> Vec<Task> {
        match self {
            TaskFile::Document { tasks } | TaskFile::List(tasks) => tasks,
            TaskFile::Single(task) => vec![*task],
        }
    }
}

/// Loads tasks from a dataset name or path.
pub struct TaskLoader {
    dataset: String,
    tasks: RwLock<Vec<Task>>,
}

impl TaskLoader {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            tasks: RwLock::new(Vec::new()),
        }
    }

    /// Looks up a task from the most recent load.
    pub fn get_task_by_id(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .read()
            .ok()?
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }
}

/// Resolves `dataset` to tasks. Blocking: touches the filesystem.
fn load_dataset(dataset: &str) -> Result<Vec<Task>, TaskLoadError> {
    let path = PathBuf::from(dataset);

    let tasks = if path.is_dir() {
        load_directory(&path)?
    } else if path.is_file() {
        load_file(&path)?
    } else if looks_like_path(dataset) {
        return Err(TaskLoadError::DatasetNotFound(dataset.to_string()));
    } else {
        info!(dataset = %dataset, "No dataset on disk, using built-in sample tasks");
        sample_tasks()
    };

    let mut seen = HashSet::new();
    for task in &tasks {
        task.validate()?;
        if !seen.insert(task.id.as_str()) {
            return Err(TaskLoadError::DuplicateTask(task.id.clone()));
        }
    }

    Ok(tasks)
}

#[async_trait]
impl TaskSource for TaskLoader {
    fn name(&self) -> &str {
        &self.dataset
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, TaskLoadError> {
        let dataset = self.dataset.clone();
        let tasks = tokio::task::spawn_blocking(move || load_dataset(&dataset))
            .await
            .map_err(|e| TaskLoadError::Interrupted(e.to_string()))??;
        info!(dataset = %self.dataset, count = tasks.len(), "Loaded tasks");

        if let Ok(mut cached) = self.tasks.write() {
            *cached = tasks.clone();
        }
        Ok(tasks)
    }
}

/// A fixed, in-memory task list.
pub struct StaticTaskSource {
    name: String,
    tasks: Vec<Task>,
}

impl StaticTaskSource {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }
}

#[async_trait]
impl TaskSource for StaticTaskSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, TaskLoadError> {
        Ok(self.tasks.clone())
    }
}

fn looks_like_path(dataset: &str) -> bool {
    dataset.contains('/')
        || dataset.contains('\\')
        || is_task_file_name(Path::new(dataset))
}

fn is_task_file_name(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}

/// Loads a single YAML or JSON task file.
pub fn load_file(path: &Path) -> Result<Vec<Task>, TaskLoadError> {
    let content = std::fs::read_to_string(path)?;
    let parse_err = |message: String| TaskLoadError::Parse {
        path: path.display().to_string(),
        message,
    };

    let file: TaskFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
    };

    let tasks = file.into_tasks();
    debug!(path = %path.display(), count = tasks.len(), "Parsed task file");
    Ok(tasks)
}

/// Loads every task file under `dir`, in file-name order.
pub fn load_directory(dir: &Path) -> Result<Vec<Task>, TaskLoadError> {
    let mut tasks = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = entry.map_err(|e| TaskLoadError::Io(e.into()))?;
        let path = entry.path();
        if path.is_file() && is_task_file_name(path) {
            tasks.extend(load_file(path)?);
        }
    }

    Ok(tasks)
}

/// Built-in tasks used when no dataset is available on disk.
pub fn sample_tasks() -> Vec<Task> {
    vec![
        Task::new(
            "sample-001",
            "Create a file named 'hello.txt' containing the text 'Hello, World!'",
            r#"test -f /workspace/hello.txt && grep -q "Hello, World!" /workspace/hello.txt"#,
        )
        .with_tag("file-operations")
        .with_tag("basic"),
        Task::new(
            "sample-002",
            r#"Create a directory named 'mydir' and inside it create a file named 'data.json' with valid JSON content: {"key": "value"}"#,
            r#"test -d /workspace/mydir && test -f /workspace/mydir/data.json && python3 -c "import json; json.load(open('/workspace/mydir/data.json'))""#,
        )
        .with_image("python:3.11-slim")
        .with_tag("file-operations")
        .with_tag("json"),
        Task::new(
            "sample-003",
            "Find all .txt files in /workspace and count how many there are. Write the count to a file called 'count.txt'",
            "test -f /workspace/count.txt",
        )
        .with_setup_command("mkdir -p /workspace/subdir")
        .with_setup_command("touch /workspace/a.txt /workspace/b.txt /workspace/subdir/c.txt")
        .with_tag("file-operations")
        .with_tag("find"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unknown_name_falls_back_to_samples() {
        let loader = TaskLoader::new("terminal-bench-core");
        let tasks = loader.load_tasks().await.unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, "sample-001");
        assert_eq!(tasks[1].image, "python:3.11-slim");
        assert_eq!(tasks[2].setup_commands.len(), 2);
        assert!(loader.get_task_by_id("sample-002").is_some());
        assert!(loader.get_task_by_id("missing").is_none());
    }

    #[tokio::test]
    async fn test_missing_path_is_an_error() {
        let loader = TaskLoader::new("./does/not/exist.yaml");
        let err = loader.load_tasks().await.unwrap_err();
        assert!(matches!(err, TaskLoadError::DatasetNotFound(_)));
    }

    #[tokio::test]
    async fn test_load_yaml_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.yaml");
        fs::write(
            &path,
            r#"
tasks:
  - id: a
    instruction: "first"
    verification_script: "true"
  - id: b
    instruction: "second"
    verification_script: "false"
    expected_reward: 2.5
"#,
        )
        .unwrap();

        let loader = TaskLoader::new(path.to_string_lossy().to_string());
        let tasks = loader.load_tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].expected_reward, 2.5);
    }

    #[tokio::test]
    async fn test_load_directory_in_name_order() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("02-second.json"),
            r#"[{"id": "second", "instruction": "x", "verification_script": "true"}]"#,
        )
        .unwrap();
        fs::write(
            temp.path().join("01-first.yml"),
            "id: first\ninstruction: x\nverification_script: \"true\"\n",
        )
        .unwrap();
        fs::write(temp.path().join("README.md"), "ignored").unwrap();

        let loader = TaskLoader::new(temp.path().to_string_lossy().to_string());
        let tasks = loader.load_tasks().await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_from_spawned_task() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("tasks.yaml"),
            "- id: spawned\n  instruction: x\n  verification_script: \"true\"\n",
        )
        .unwrap();

        let loader = std::sync::Arc::new(TaskLoader::new(temp.path().to_string_lossy().to_string()));
        let spawned = std::sync::Arc::clone(&loader);
        let tasks = tokio::spawn(async move { spawned.load_tasks().await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(tasks.len(), 1);
        assert!(loader.get_task_by_id("spawned").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("dup.yaml"),
            r#"
- id: same
  instruction: x
  verification_script: "true"
- id: same
  instruction: y
  verification_script: "true"
"#,
        )
        .unwrap();

        let loader = TaskLoader::new(temp.path().to_string_lossy().to_string());
        let err = loader.load_tasks().await.unwrap_err();
        assert!(matches!(err, TaskLoadError::DuplicateTask(id) if id == "same"));
    }

    #[tokio::test]
    async fn test_parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_file(&path).unwrap_err();
        match err {
            TaskLoadError::Parse { path: p, .. } => assert!(p.ends_with("broken.json")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
