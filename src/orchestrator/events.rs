// ABOUTME: Typed events the orchestrator publishes to observers over a broadcast bus.
// ABOUTME: Steps and pause snapshots are plain data so any UI or log can consume them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::history::StatsSnapshot;
use crate::llm::Phase;
use crate::tools::ToolResult;

use super::tasks::Task;

/// One agent's contribution to the current user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub agent: String,
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// What the next turn would run with, frozen while the run is paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PauseSnapshot {
    pub agent: String,
    pub system_prompt: String,
    pub transcript: String,
    pub file_context: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Plan { tasks: Vec<Task> },
    Step(Step),
    ContentDelta { agent: String, delta: String },
    /// The agent's visible output was rewritten, e.g. after loop truncation.
    ContentReplace { agent: String, content: String },
    Stats(StatsSnapshot),
    ActiveAgent { agent: String },
    Paused(PauseSnapshot),
    Resumed,
    Phase { phase: Phase, detail: Option<String> },
    Tool { agent: String, tool: String, result: ToolResult },
    /// System-visible message: interventions and fatal errors.
    Notice { message: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is fine.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
