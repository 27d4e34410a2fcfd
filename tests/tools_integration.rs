// ABOUTME: Integration tests for the tool dispatcher behind the approval gate.
// ABOUTME: Uses a channel reviewer to exercise accept, edit, reject, and always-allow flows on a temp workspace.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use baton::approval::{
    ApprovalDecision, ApprovalEngine, ApprovalRequest, AskMode, AutoApprove,
    ChannelApprovalService, ProposalKind,
};
use baton::config::ApprovalConfig;
use baton::fs::LocalFileService;
use baton::tools::{ProcessManager, StructuredAction, ToolDispatcher};

fn dispatcher(root: &Path, config: &ApprovalConfig) -> (ToolDispatcher, mpsc::Receiver<ApprovalRequest>) {
    let (service, rx) = ChannelApprovalService::new(4);
    let approvals = ApprovalEngine::new(config, false, Arc::new(service));
    let tools = ToolDispatcher::new(
        Arc::new(LocalFileService::new(root)),
        Arc::new(approvals),
        ProcessManager::new(root, Duration::from_millis(300)),
    );
    (tools, rx)
}

/// Answer the next `count` proposals with `decisions` in order, returning what was asked.
fn reviewer(
    mut rx: mpsc::Receiver<ApprovalRequest>,
    decisions: Vec<ApprovalDecision>,
) -> tokio::task::JoinHandle<Vec<(ProposalKind, String)>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        for decision in decisions {
            let Some(request) = rx.recv().await else {
                break;
            };
            seen.push((request.proposal.kind, request.proposal.modified.clone()));
            request.respond(decision);
        }
        seen
    })
}

#[tokio::test]
async fn accepted_write_reaches_disk_with_original_in_proposal() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.txt"), "old\n").unwrap();
    let (tools, rx) = dispatcher(tmp.path(), &ApprovalConfig::default());
    let review = reviewer(rx, vec![ApprovalDecision::accept()]);

    let result = tools.write_file("a.txt", "new\n").await;

    assert!(!result.is_error, "{}", result.llm_output);
    assert_eq!(std::fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "new\n");
    let seen = review.await.unwrap();
    assert_eq!(seen, vec![(ProposalKind::WriteFile, "new\n".to_string())]);
}

#[tokio::test]
async fn reviewer_edits_replace_the_proposed_content() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("lib.rs"), "fn a() {}\n").unwrap();
    let (tools, rx) = dispatcher(tmp.path(), &ApprovalConfig::default());
    let review = reviewer(
        rx,
        vec![ApprovalDecision::Accept {
            edited: Some("fn reviewed() {}\n".into()),
        }],
    );

    let result = tools.replace_in_file("lib.rs", "fn a() {}", "fn b() {}").await;

    assert!(!result.is_error);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("lib.rs")).unwrap(),
        "fn reviewed() {}\n"
    );
    match result.action {
        Some(StructuredAction::FileWritten { content, .. }) => assert_eq!(content, "fn reviewed() {}\n"),
        other => panic!("expected file_written, got {other:?}"),
    }
    review.await.unwrap();
}

#[tokio::test]
async fn rejection_is_reported_with_reason() {
    let tmp = tempfile::tempdir().unwrap();
    let (tools, rx) = dispatcher(tmp.path(), &ApprovalConfig::default());
    let review = reviewer(rx, vec![ApprovalDecision::reject("not this file")]);

    let result = tools.write_file("secret.txt", "x").await;

    assert!(result.is_error);
    assert!(result.llm_output.starts_with("[write_file] failed"));
    assert!(result.llm_output.contains("not this file"));
    assert!(!tmp.path().join("secret.txt").exists());
    review.await.unwrap();
}

#[tokio::test]
async fn accept_always_allowlists_the_exact_command() {
    let tmp = tempfile::tempdir().unwrap();
    let (tools, rx) = dispatcher(tmp.path(), &ApprovalConfig::default());
    let review = reviewer(rx, vec![ApprovalDecision::AcceptAlways]);

    let first = tools.execute_command("echo hi", false).await;
    let second = tools.execute_command("echo hi", false).await;

    assert!(first.llm_output.contains("hi"));
    assert!(second.llm_output.contains("hi"));
    let seen = review.await.unwrap();
    assert_eq!(seen.len(), 1, "second run should not ask");
}

#[tokio::test]
async fn configured_allowlist_and_ask_modes() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("notes.md"), "# Notes\n").unwrap();
    let mut config = ApprovalConfig {
        command_allowlist: vec!["echo *".into()],
        ..Default::default()
    };
    config.ask.insert("write_file".into(), AskMode::Off);
    config.ask.insert("read_file".into(), AskMode::Always);
    let (tools, rx) = dispatcher(tmp.path(), &config);
    let review = reviewer(rx, vec![ApprovalDecision::accept()]);

    assert!(!tools.execute_command("echo allowed", false).await.is_error);
    assert!(!tools.write_file("out.txt", "ok").await.is_error);
    assert!(!tools.read_file("notes.md").await.is_error);

    let seen = review.await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, ProposalKind::ReadFile);
}

#[tokio::test]
async fn paths_outside_the_workspace_are_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let approvals = ApprovalEngine::new(&ApprovalConfig::default(), true, Arc::new(AutoApprove));
    let tools = ToolDispatcher::new(
        Arc::new(LocalFileService::new(tmp.path())),
        Arc::new(approvals),
        ProcessManager::new(tmp.path(), Duration::from_millis(300)),
    );

    let result = tools.write_file("../escape.txt", "x").await;

    assert!(result.is_error);
    assert!(!tmp.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn background_process_is_tracked_and_stopped() {
    let tmp = tempfile::tempdir().unwrap();
    let approvals = ApprovalEngine::new(&ApprovalConfig::default(), true, Arc::new(AutoApprove));
    let tools = ToolDispatcher::new(
        Arc::new(LocalFileService::new(tmp.path())),
        Arc::new(approvals),
        ProcessManager::new(tmp.path(), Duration::from_millis(300)),
    );

    let started = tools
        .execute_command("echo booting; sleep 30", true)
        .await;
    assert!(matches!(started.action, Some(StructuredAction::ProcessStarted { .. })));
    assert_eq!(
        tools.processes().active_command().await.as_deref(),
        Some("echo booting; sleep 30")
    );

    let stopped = tools.stop_process().await;
    assert!(matches!(stopped.action, Some(StructuredAction::ProcessStopped { .. })));
    assert!(stopped.llm_output.contains("booting"));
    assert!(tools.processes().active_command().await.is_none());
}

#[tokio::test]
async fn quick_background_command_reports_like_foreground() {
    let tmp = tempfile::tempdir().unwrap();
    let approvals = ApprovalEngine::new(&ApprovalConfig::default(), true, Arc::new(AutoApprove));
    let tools = ToolDispatcher::new(
        Arc::new(LocalFileService::new(tmp.path())),
        Arc::new(approvals),
        ProcessManager::new(tmp.path(), Duration::from_millis(2000)),
    );

    let result = tools.execute_command("exit 3", true).await;

    assert!(matches!(
        result.action,
        Some(StructuredAction::CommandFinished {
            exit_code: Some(3),
            ..
        })
    ));
    assert!(tools.processes().active_command().await.is_none());
}
