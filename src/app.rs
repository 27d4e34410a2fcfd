// ABOUTME: App wiring: builds the file service, approvals, tools, prompts, and orchestrator from config.
// ABOUTME: Drives one message through the orchestrator and renders its events on the terminal.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use baton::approval::{
    ApprovalDecision, ApprovalEngine, ApprovalRequest, ApprovalService, AutoApprove,
    ChannelApprovalService,
};
use baton::config::Config;
use baton::fs::{FileService, LocalFileService};
use baton::llm::{Script, ScriptedClient};
use baton::orchestrator::{FileSnapshot, Orchestrator, OrchestratorEvent, TurnOutcome};
use baton::registry::PromptLibrary;
use baton::session::StepLogger;
use baton::tools::{ProcessManager, ToolDispatcher};

/// Top-level application: configuration plus the wiring of every subsystem.
pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn workspace(&self) -> anyhow::Result<PathBuf> {
        let dir = &self.config.tools.workspace_dir;
        dir.canonicalize()
            .with_context(|| format!("workspace {} is not accessible", dir.display()))
    }

    /// Run `message` against a scripted model, approving proposals on stdin unless auto-apply is on.
    pub async fn replay(&self, script_path: &Path, message: &str, files: &[PathBuf]) -> anyhow::Result<TurnOutcome> {
        let raw = std::fs::read_to_string(script_path)
            .with_context(|| format!("reading script {}", script_path.display()))?;
        let script: Script = serde_json::from_str(&raw)
            .with_context(|| format!("parsing script {}", script_path.display()))?;

        let workspace = self.workspace()?;
        let file_service = Arc::new(LocalFileService::new(&workspace));
        let user_files = load_user_files(file_service.as_ref(), files).await?;

        let auto_apply = self.config.tools.auto_apply;
        let mut prompter = None;
        let service: Arc<dyn ApprovalService> = if auto_apply {
            Arc::new(AutoApprove)
        } else {
            let (service, rx) = ChannelApprovalService::new(8);
            prompter = Some(tokio::spawn(prompt_approvals(rx)));
            Arc::new(service)
        };
        let approvals = Arc::new(ApprovalEngine::new(&self.config.approval, auto_apply, service));
        let processes = ProcessManager::new(
            &workspace,
            Duration::from_millis(self.config.tools.background_grace_ms),
        );
        let tools = Arc::new(ToolDispatcher::new(file_service, approvals, processes));
        let registry = Arc::new(PromptLibrary::from_config(&self.config.workflow));
        let client = Arc::new(ScriptedClient::from_script(script));

        let mut orchestrator = Orchestrator::new(self.config.clone(), client, registry, tools.clone());
        match StepLogger::new(&workspace) {
            Ok(logger) => {
                info!(path = %logger.path().display(), "logging steps");
                orchestrator = orchestrator.with_step_log(logger);
            }
            Err(e) => warn!(error = %e, "failed to create step log"),
        }

        let printer = tokio::spawn(render_events(orchestrator.subscribe()));
        let control = orchestrator.control();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                control.cancel();
            }
        });

        let outcome = orchestrator.handle_message(message, &user_files).await;

        interrupt.abort();
        if let Some(stopped) = tools.processes().stop().await {
            info!(command = %stopped.command, "stopped background process");
        }
        drop(orchestrator);
        let _ = printer.await;
        if let Some(prompter) = prompter {
            prompter.abort();
        }
        Ok(outcome)
    }
}

/// Read user-supplied files relative to the workspace.
async fn load_user_files(files: &dyn FileService, paths: &[PathBuf]) -> anyhow::Result<Vec<FileSnapshot>> {
    let mut snapshots = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.to_string_lossy();
        let content = files
            .read_to_string(&path)
            .await
            .with_context(|| format!("reading {path}"))?;
        snapshots.push(FileSnapshot::new(path.as_ref(), content));
    }
    Ok(snapshots)
}

/// Ask on the terminal for each proposal: yes, always, no, or no with a reason.
async fn prompt_approvals(mut rx: mpsc::Receiver<ApprovalRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(request) = rx.recv().await {
        println!("\n--- approval needed: {}", request.proposal.describe());
        if !request.proposal.modified.is_empty() {
            let preview: String = request.proposal.modified.chars().take(2000).collect();
            println!("{preview}");
        }
        print!("[y]es / [a]lways / [n]o (reason): ");
        let _ = std::io::stdout().flush();

        let answer = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => {
                request.respond(ApprovalDecision::reject("no reviewer on stdin"));
                continue;
            }
        };
        let answer = answer.trim();
        let decision = match answer.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('y') => ApprovalDecision::accept(),
            Some('a') => ApprovalDecision::AcceptAlways,
            _ => {
                let reason = answer.trim_start_matches(['n', 'N']).trim();
                ApprovalDecision::Reject {
                    reason: (!reason.is_empty()).then(|| reason.to_string()),
                }
            }
        };
        request.respond(decision);
    }
}

/// Print orchestrator events until the bus closes.
async fn render_events(mut rx: broadcast::Receiver<OrchestratorEvent>) {
    let mut stdout = std::io::stdout();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            OrchestratorEvent::ActiveAgent { agent } => println!("\n== {agent} =="),
            OrchestratorEvent::ContentDelta { delta, .. } => {
                print!("{delta}");
                let _ = stdout.flush();
            }
            OrchestratorEvent::ContentReplace { content, .. } => {
                println!("\n-- output rewritten --\n{content}");
            }
            OrchestratorEvent::Tool { tool, result, .. } => {
                let marker = if result.is_error { "!" } else { ">" };
                println!("\n{marker} [{tool}] {}", result.user_output);
            }
            OrchestratorEvent::Plan { tasks } => {
                println!("\n-- plan --");
                for task in tasks {
                    println!("  {} [{:?}] {}", task.id, task.status, task.description);
                }
            }
            OrchestratorEvent::Notice { message } => println!("\n** {message}"),
            OrchestratorEvent::Paused(snapshot) => println!("\n-- paused before {} --", snapshot.agent),
            OrchestratorEvent::Resumed => println!("\n-- resumed --"),
            OrchestratorEvent::Step(_)
            | OrchestratorEvent::Stats(_)
            | OrchestratorEvent::Phase { .. } => {}
        }
    }
}
