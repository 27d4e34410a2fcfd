// ABOUTME: Entry point for baton, a multi-agent turn orchestrator.
// ABOUTME: Parses CLI args, loads config, and runs the parse, detect, or replay command.

mod app;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use baton::config::{Config, WorkflowMode};
use baton::detector::LoopDetector;
use baton::orchestrator::StopReason;
use baton::parser::{
    contains_finish_sentinel, parse_checklist, parse_router_decision, parse_structured_update,
    parse_task_markers, parse_tool_tags,
};

use crate::app::App;

#[derive(Parser, Debug)]
#[command(name = "baton", version, about = "Multi-agent turn orchestrator")]
struct Cli {
    /// Config file (defaults to ~/.baton/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run a single Solo agent instead of the routed team.
    #[arg(long, global = true)]
    solo: bool,

    /// Apply every tool action without asking.
    #[arg(long, global = true)]
    auto_apply: bool,

    /// Directory tools operate in.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the tool tags, task markers, checklist, and JSON found in a file.
    Parse { file: PathBuf },
    /// Run the loop detector over a file.
    Detect { file: PathBuf },
    /// Run one message through the orchestrator against a scripted model.
    Replay {
        script: PathBuf,
        #[arg(long, short)]
        message: String,
        /// Workspace file to include as context; repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if cli.solo {
        config.orchestrator.mode = WorkflowMode::Solo;
    }
    if cli.auto_apply {
        config.tools.auto_apply = true;
    }
    if let Some(workspace) = &cli.workspace {
        config.tools.workspace_dir = workspace.clone();
    }
    Ok(config)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("baton=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Parse { file } => {
            let text = read_input(file)?;
            let tags: Vec<_> = parse_tool_tags(&text).into_iter().map(|m| m.tag).collect();
            let report = json!({
                "tags": tags,
                "markers": parse_task_markers(&text),
                "checklist": parse_checklist(&text),
                "router_decision": parse_router_decision(&text),
                "structured_update": parse_structured_update(&text),
                "finish": contains_finish_sentinel(&text),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Detect { file } => {
            let text = read_input(file)?;
            let verdict = LoopDetector::new(config.loop_detection.clone()).check(&text);
            let report = json!({
                "is_looping": verdict.is_looping,
                "trim_index": verdict.trim_index,
                "kind": verdict.kind,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Replay {
            script,
            message,
            files,
        } => {
            let outcome = App::new(config).replay(script, message, files).await?;
            println!(
                "\n\nstopped: {:?} after {} iteration(s), next agent {}",
                outcome.stop, outcome.iterations, outcome.next_agent
            );
            if let StopReason::Failed(e) = outcome.stop {
                return Err(e.into());
            }
        }
    }
    Ok(())
}
