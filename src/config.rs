// ABOUTME: Configuration loading for baton.
// ABOUTME: Reads ~/.baton/config.toml, falling back to defaults for every missing section.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::approval::AskMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub orchestrator: OrchestratorConfig,
    pub loop_detection: LoopDetectionConfig,
    pub history: HistoryConfig,
    pub tools: ToolsConfig,
    pub approval: ApprovalConfig,
    pub workflow: WorkflowConfig,
}

/// Model request parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
        }
    }
}

/// Whether the router picks agents, or one agent drives the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    #[default]
    Multi,
    Solo,
}

/// Orchestrator loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: WorkflowMode,
    /// Safety fuse on loop iterations per user message.
    pub max_iterations: usize,
    /// Stream silence longer than this is treated as the end of the response.
    pub silence_timeout_seconds: u64,
    /// When false, `[COMPLETED:n]` only moves a task to review.
    pub auto_mark_tasks: bool,
    /// Agent whose checklist output seeds the task list.
    pub planner_agent: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: WorkflowMode::Multi,
            max_iterations: 30,
            silence_timeout_seconds: 90,
            auto_mark_tasks: false,
            planner_agent: "Planner".to_string(),
        }
    }
}

/// Loop detector thresholds and trigger phrases.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopDetectionConfig {
    pub enabled: bool,
    pub window_chars: usize,
    pub phrase_threshold: usize,
    pub suffix_chars: usize,
    pub safe_zone_suffix_chars: usize,
    /// Share of the window kept when phrase oscillation is detected.
    pub keep_ratio: f64,
    /// Phrases that count as a state flip when they start a line.
    pub triggers: Vec<String>,
}

impl Default for LoopDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_chars: 3000,
            phrase_threshold: 5,
            suffix_chars: 150,
            safe_zone_suffix_chars: 400,
            keep_ratio: 0.4,
            triggers: vec![
                "Ready.".to_string(),
                "Wait.".to_string(),
                "Applying.".to_string(),
                "Actually,".to_string(),
                "[COMPLETED".to_string(),
                "Final check".to_string(),
            ],
        }
    }
}

/// Transcript compression and token estimation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub compress_threshold: usize,
    pub keep_recent: usize,
    pub chars_per_token: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            compress_threshold: 6,
            keep_recent: 4,
            chars_per_token: 4,
        }
    }
}

/// Tool execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Apply every change without asking.
    pub auto_apply: bool,
    pub workspace_dir: PathBuf,
    /// How long a background command must survive before it counts as started.
    pub background_grace_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_apply: false,
            workspace_dir: PathBuf::from("."),
            background_grace_ms: 1500,
        }
    }
}

/// Approval gate settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// No timeout when unset; a pending proposal waits for the user indefinitely.
    pub timeout_seconds: Option<u64>,
    /// Glob patterns for commands that run without a proposal.
    pub command_allowlist: Vec<String>,
    /// Per tool-kind ask mode, keyed by kind name (`write_file`, `execute_command`, ...).
    pub ask: BTreeMap<String, AskMode>,
}

/// Agent prompt sources.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Directory holding `<Agent>.md` prompt overrides.
    pub prompt_dir: Option<PathBuf>,
    /// Inline prompt overrides keyed by agent name.
    pub agents: BTreeMap<String, String>,
}

impl Config {
    /// Load config from ~/.baton/config.toml, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Base directory for user-level files.
    pub fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".baton")
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Directory for per-workspace step logs.
    pub fn sessions_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(Self::base_dir)
            .join("baton")
            .join("sessions")
    }
}
