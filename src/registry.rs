// ABOUTME: Workflow registry: which agents exist and the system prompt each one runs with.
// ABOUTME: The prompt library compiles defaults from src/prompts/*.md and layers config and file overrides on top.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::WorkflowConfig;

pub const ROUTER: &str = "Router";
pub const PLANNER: &str = "Planner";
pub const CODER: &str = "Coder";
pub const REVIEWER: &str = "Reviewer";
pub const QA: &str = "QA";
pub const SOLO: &str = "Solo";
/// Pseudo-agent that ends the run.
pub const FINISH: &str = "FINISH";

const DEFAULT_ROUTER: &str = include_str!("prompts/router.md");
const DEFAULT_PLANNER: &str = include_str!("prompts/planner.md");
const DEFAULT_CODER: &str = include_str!("prompts/coder.md");
const DEFAULT_REVIEWER: &str = include_str!("prompts/reviewer.md");
const DEFAULT_QA: &str = include_str!("prompts/qa.md");
const DEFAULT_SOLO: &str = include_str!("prompts/solo.md");
const DEFAULT_TOOLS: &str = include_str!("prompts/tools.md");

/// Agents and prompts, as seen by the orchestrator.
pub trait WorkflowRegistry: Send + Sync {
    /// Names of every agent that can take a turn, excluding the router.
    fn agents(&self) -> Vec<String>;

    /// Fully resolved system prompt for an agent, or `None` if it isn't registered.
    fn agent_prompt(&self, name: &str) -> Option<String>;

    fn router_prompt(&self) -> String;

    /// Canonical name for `name`, matched case-insensitively. `FINISH` always resolves.
    fn resolve(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(FINISH) {
            return Some(FINISH.to_string());
        }
        self.agents().into_iter().find(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Reads a file if it exists, returning None otherwise.
pub fn read_if_exists(path: PathBuf) -> Option<String> {
    if path.exists() {
        fs::read_to_string(&path).ok()
    } else {
        None
    }
}

/// Prompt layers for every agent: the agent's own prompt plus the shared tool reference.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    router: String,
    tools: String,
    agents: BTreeMap<String, String>,
}

impl PromptLibrary {
    /// Creates a library loaded with the compiled-in defaults.
    pub fn new() -> Self {
        let agents = [
            (PLANNER, DEFAULT_PLANNER),
            (CODER, DEFAULT_CODER),
            (REVIEWER, DEFAULT_REVIEWER),
            (QA, DEFAULT_QA),
            (SOLO, DEFAULT_SOLO),
        ]
        .into_iter()
        .map(|(name, prompt)| (name.to_string(), prompt.to_string()))
        .collect();
        Self {
            router: DEFAULT_ROUTER.to_string(),
            tools: DEFAULT_TOOLS.to_string(),
            agents,
        }
    }

    /// Defaults, then inline prompts from config, then `<prompt_dir>/<agent>.md` files.
    pub fn from_config(config: &WorkflowConfig) -> Self {
        let mut library = Self::new();
        for (name, prompt) in &config.agents {
            library.set_prompt(name, prompt.clone());
        }
        if let Some(dir) = &config.prompt_dir {
            library.load_dir(dir);
        }
        library
    }

    /// Replace or add one prompt layer. "Router" and "tools" name the shared layers.
    pub fn set_prompt(&mut self, name: &str, prompt: String) {
        if name.eq_ignore_ascii_case(ROUTER) {
            self.router = prompt;
        } else if name.eq_ignore_ascii_case("tools") {
            self.tools = prompt;
        } else {
            let key = self
                .agents
                .keys()
                .find(|k| k.eq_ignore_ascii_case(name))
                .cloned()
                .unwrap_or_else(|| name.to_string());
            self.agents.insert(key, prompt);
        }
    }

    pub fn with_agent(mut self, name: &str, prompt: impl Into<String>) -> Self {
        self.set_prompt(name, prompt.into());
        self
    }

    /// Apply every `*.md` file in `dir` as an override; the file stem names the agent.
    pub fn load_dir(&mut self, dir: &Path) -> &mut Self {
        let Ok(entries) = fs::read_dir(dir) else {
            debug!(dir = %dir.display(), "prompt directory not found");
            return self;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if let Some(content) = read_if_exists(path) {
                debug!(agent = %stem, "loaded prompt override");
                self.set_prompt(&stem, content);
            }
        }
        self
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry for PromptLibrary {
    fn agents(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    fn agent_prompt(&self, name: &str) -> Option<String> {
        let prompt = self.agents.get(name)?;
        let layers: Vec<&str> = [prompt.as_str(), self.tools.as_str()]
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        Some(layers.join("\n\n"))
    }

    fn router_prompt(&self) -> String {
        let mut names: Vec<&str> = self
            .agents
            .keys()
            .map(String::as_str)
            .filter(|name| *name != SOLO)
            .collect();
        names.push(FINISH);
        format!("{}\n\nAvailable agents: {}", self.router.trim_end(), names.join(", "))
    }
}
