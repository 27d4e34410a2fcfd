// ABOUTME: JSONL step logger: appends each agent step of a run to a log file.
// ABOUTME: Stores logs per workspace in ~/.local/share/baton/sessions/<workspace_hash>/.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::orchestrator::Step;

/// A single JSONL log entry: a timestamp and the step it records.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub step: Step,
}

/// Computes a deterministic hex hash of the workspace directory path.
pub fn workspace_hash(workspace_dir: &Path) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::hash::DefaultHasher::new();
    workspace_dir.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Appends steps as JSONL lines to a session log file.
pub struct StepLogger {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl StepLogger {
    /// Create a logger for the given workspace directory.
    ///
    /// Creates the session directory and opens a new JSONL file named with the
    /// current timestamp.
    pub fn new(workspace_dir: &Path) -> anyhow::Result<Self> {
        let session_dir = Config::sessions_dir().join(workspace_hash(workspace_dir));
        Self::new_in_dir(&session_dir)
    }

    /// Create a logger that writes into a specific directory.
    pub fn new_in_dir(session_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(session_dir)?;
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f").to_string();
        let path = session_dir.join(format!("{timestamp}.jsonl"));
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            step: step.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(agent: &str, output: &str) -> Step {
        Step {
            agent: agent.to_string(),
            input: "Add a flag".to_string(),
            output: output.to_string(),
            reasoning: None,
        }
    }

    #[test]
    fn workspace_hash_is_deterministic() {
        let path = Path::new("/home/user/projects/myapp");
        let hash = workspace_hash(path);
        assert_eq!(hash, workspace_hash(path));
        assert_eq!(hash.len(), 16, "hash should be 16 hex characters");
        assert_ne!(hash, workspace_hash(Path::new("/home/user/projects/other")));
    }

    #[test]
    fn steps_are_written_as_jsonl() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sessions").join("ws");

        let mut logger = StepLogger::new_in_dir(&dir).unwrap();
        logger.log_step(&step("Coder", "wrote it")).unwrap();
        logger.log_step(&step("Reviewer", "[VERIFIED:1]")).unwrap();

        let content = fs::read_to_string(logger.path()).unwrap();
        let entries: Vec<LogEntry> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].step.agent, "Coder");
        assert_eq!(entries[1].step.output, "[VERIFIED:1]");
        assert!(!entries[0].timestamp.is_empty());
    }
}
