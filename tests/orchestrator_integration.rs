// ABOUTME: Integration tests for the orchestrator loop against a scripted model.
// ABOUTME: Covers routing overrides, mid-stream tools, loop intervention, pause/resume, cancellation, and failures.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use baton::approval::{ApprovalEngine, AutoApprove};
use baton::config::{ApprovalConfig, Config, OrchestratorConfig, WorkflowMode};
use baton::detector::INTERVENTION_NOTICE;
use baton::error::{LlmError, OrchestratorError};
use baton::fs::LocalFileService;
use baton::history::Role;
use baton::llm::{ScriptedClient, Usage};
use baton::orchestrator::{
    FileSnapshot, Orchestrator, OrchestratorEvent, StopReason, TaskStatus,
};
use baton::registry::PromptLibrary;
use baton::session::StepLogger;
use baton::tools::{ProcessManager, ToolDispatcher};

fn config(mode: WorkflowMode) -> Config {
    Config {
        orchestrator: OrchestratorConfig {
            mode,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build(client: ScriptedClient, config: Config, root: &Path) -> (Orchestrator, Arc<ScriptedClient>) {
    let client = Arc::new(client);
    let approvals = ApprovalEngine::new(&ApprovalConfig::default(), true, Arc::new(AutoApprove));
    let tools = ToolDispatcher::new(
        Arc::new(LocalFileService::new(root)),
        Arc::new(approvals),
        ProcessManager::new(root, Duration::from_millis(200)),
    );
    let orchestrator = Orchestrator::new(
        config,
        client.clone(),
        Arc::new(PromptLibrary::new()),
        Arc::new(tools),
    );
    (orchestrator, client)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn step_agents(orchestrator: &Orchestrator) -> Vec<String> {
    orchestrator.steps().iter().map(|s| s.agent.clone()).collect()
}

const PLAN_TWO: &str = "Here is the plan.\n- [ ] **Task 1:** Parse the config file\n- [ ] **Task 2:** Wire the CLI flags\n";

#[tokio::test]
async fn solo_finish_sentinel_ends_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new().with_stream("Everything is in place. [FINISH]");
    let (mut orch, client) = build(client, config(WorkflowMode::Solo), tmp.path());

    let outcome = orch.handle_message("Check the project", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(outcome.next_agent, "FINISH");
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.steps[0].agent, "Solo");
    assert_eq!(client.remaining_streams(), 0);
}

#[tokio::test]
async fn finish_sentinel_inside_a_written_file_does_not_end_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_stream("<write_file path=\"NOTES.md\">Agents print [FINISH] when done.\n</write_file>\nWrote notes, continuing.")
        .with_stream("Notes are in place. [FINISH]");
    let (mut orch, client) = build(client, config(WorkflowMode::Solo), tmp.path());

    let outcome = orch.handle_message("Write contributor notes", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(step_agents(&orch), vec!["Solo", "Solo"]);
    assert_eq!(client.remaining_streams(), 0);
    let notes = std::fs::read_to_string(tmp.path().join("NOTES.md")).unwrap();
    assert!(notes.contains("[FINISH]"));
}

#[tokio::test]
async fn markers_inside_a_written_file_leave_tasks_open() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_completion(r#"{"next_agent": "Planner", "reasoning": "plan first"}"#)
        .with_stream("- [ ] **Task 1:** Document the review process\n")
        .with_completion(r#"{"next_agent": "Coder", "reasoning": "write it"}"#)
        .with_stream("<write_file path=\"CONTRIBUTING.md\">Reviewers mark work with [VERIFIED:1].\n```json\n{\"task_updates\":[{\"id\":\"1\",\"status\":\"completed\"}]}\n```\n</write_file>\nWrote the guide.")
        .with_completion(r#"{"next_agent": "FINISH", "reasoning": "guide written"}"#)
        .with_stream("Checked CONTRIBUTING.md. [VERIFIED:1]\n[FINISH]");
    let (mut orch, _) = build(client, config(WorkflowMode::Multi), tmp.path());

    let outcome = orch.handle_message("Document reviews", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(
        step_agents(&orch),
        vec!["Router", "Planner", "Router", "Coder", "Router", "QA"]
    );
    assert!(
        orch.history()
            .iter()
            .any(|e| e.role == Role::System && e.content.contains("still open"))
    );
    assert_eq!(orch.tasks().get("1").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn silent_stream_counts_as_complete() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(WorkflowMode::Solo);
    config.orchestrator.silence_timeout_seconds = 1;
    let client = ScriptedClient::new()
        .with_stalled_stream("Half of the answer")
        .with_stream("The rest. [FINISH]");
    let (mut orch, client) = build(client, config, tmp.path());

    let outcome = orch.handle_message("Explain the loader", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.steps[0].output, "Half of the answer");
    assert!(
        orch.history()
            .iter()
            .any(|e| e.role == Role::Agent("Solo".into()) && e.content == "Half of the answer")
    );
    assert_eq!(client.remaining_streams(), 0);
}

#[tokio::test]
async fn router_finish_with_open_tasks_goes_to_qa() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_completion(r#"{"next_agent": "Planner", "reasoning": "needs a plan"}"#)
        .with_stream(PLAN_TWO)
        .with_completion(r#"{"next_agent": "FINISH", "reasoning": "looks done"}"#)
        .with_stream("Both verified. [VERIFIED:1, 2]\n[FINISH]");
    let (mut orch, _) = build(client, config(WorkflowMode::Multi), tmp.path());

    let outcome = orch.handle_message("Add a config loader", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(step_agents(&orch), vec!["Router", "Planner", "Router", "QA"]);
    let note = orch
        .history()
        .iter()
        .find(|e| e.role == Role::System)
        .expect("override note");
    assert!(note.content.contains("still open"));
    assert!(note.content.contains("1, 2"));
    assert!(orch.tasks().tasks().iter().all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn review_pending_routes_to_reviewer_without_asking() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_completion(r#"{"next_agent": "Planner", "reasoning": "plan first"}"#)
        .with_stream("- [ ] **Task 1:** Create the config loader\n")
        .with_completion(r#"{"next_agent": "Coder", "reasoning": "implement", "task_id": "Task 1"}"#)
        .with_stream("Writing it.\n<write_file path=\"src/config.rs\">pub fn load() {}\n</write_file>\nDone. [COMPLETED:1]")
        .with_stream("Reviewed the loader. [VERIFIED:1]")
        .with_completion(r#"{"next_agent": "FINISH", "reasoning": "all verified"}"#);
    let (mut orch, client) = build(client, config(WorkflowMode::Multi), tmp.path());

    let outcome = orch.handle_message("Add a config loader", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(
        step_agents(&orch),
        vec!["Router", "Planner", "Router", "Coder", "Reviewer", "Router"]
    );
    // Three router calls and three streams; the reviewer override costs no router call.
    assert_eq!(client.requests().len(), 6);

    let task = orch.tasks().get("task-1").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.assigned_agent.as_deref(), Some("Coder"));
    assert_eq!(task.last_modified_files, vec!["src/config.rs"]);

    let written = std::fs::read_to_string(tmp.path().join("src/config.rs")).unwrap();
    assert_eq!(written, "pub fn load() {}\n");
    assert_eq!(orch.working_set().get("src/config.rs"), Some("pub fn load() {}\n"));
}

#[tokio::test]
async fn tools_run_mid_stream_and_results_are_spliced() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_stream("Writing it.\n<write_file path=\"notes.txt\">hello\n</write_file>\nAll done. [FINISH]")
        .chunk_chars(1);
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());
    let mut rx = orch.subscribe();

    let outcome = orch.handle_message("Write notes", &[]).await;
    assert_eq!(outcome.stop, StopReason::Finished);

    let roles: Vec<&Role> = orch.history().iter().map(|e| &e.role).collect();
    assert_eq!(
        roles,
        vec![
            &Role::User,
            &Role::Agent("Solo".into()),
            &Role::Tool,
            &Role::Agent("Solo".into()),
        ]
    );
    let history = orch.history();
    assert!(history[1].content.ends_with("</write_file>"));
    assert!(history[2].content.starts_with("[write_file] wrote notes.txt"));
    assert!(history[3].content.contains("All done."));

    let events = drain(&mut rx);
    let tool_event = events.iter().find_map(|e| match e {
        OrchestratorEvent::Tool { tool, result, .. } => Some((tool.clone(), result.is_error)),
        _ => None,
    });
    assert_eq!(tool_event, Some(("write_file".to_string(), false)));
    assert!(tmp.path().join("notes.txt").exists());
}

#[tokio::test]
async fn failing_tool_is_reported_to_the_model_and_the_loop_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_stream("<read_file>missing.txt</read_file>")
        .with_stream("The file is missing, creating nothing. [FINISH]");
    let (mut orch, client) = build(client, config(WorkflowMode::Solo), tmp.path());

    let outcome = orch.handle_message("Read missing.txt", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(outcome.iterations, 2);
    let tool = orch.history().iter().find(|e| e.role == Role::Tool).unwrap();
    assert!(tool.content.starts_with("[read_file] failed"));
    // The second turn sees the failure in its transcript.
    let requests = client.requests();
    assert!(requests[1].prompt.contains("[read_file] failed"));
}

#[tokio::test]
async fn repetition_is_cut_short_and_the_session_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_stream("Wait.\n".repeat(8))
        .with_stream("Recovered. [FINISH]");
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());
    let mut rx = orch.subscribe();

    let outcome = orch.handle_message("Go", &[]).await;

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(outcome.steps.len(), 2);
    let first = &outcome.steps[0].output;
    assert!(first.starts_with("Wait.\n"));
    assert!(first.ends_with(INTERVENTION_NOTICE));
    assert!(first.matches("Wait.").count() < 5);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, OrchestratorEvent::ContentReplace { .. })));
    assert!(events.iter().any(|e| matches!(e, OrchestratorEvent::Notice { .. })));
}

#[tokio::test]
async fn pause_publishes_snapshot_and_resume_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new().with_stream("Done. [FINISH]");
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());
    let control = orch.control();
    let mut rx = orch.subscribe();
    assert!(control.pause());

    let watcher = tokio::spawn(async move {
        loop {
            if let OrchestratorEvent::Paused(snapshot) = rx.recv().await.unwrap() {
                control.resume();
                return snapshot;
            }
        }
    });

    let files = vec![FileSnapshot::new("README.md", "# Project\n")];
    let outcome = orch.handle_message("hello there", &files).await;
    let snapshot = watcher.await.unwrap();

    assert_eq!(outcome.stop, StopReason::Finished);
    assert_eq!(snapshot.agent, "Solo");
    assert!(snapshot.system_prompt.contains("# Solo"));
    assert!(snapshot.transcript.contains("[User]: hello there"));
    assert!(snapshot.file_context.contains("### README.md"));
}

#[tokio::test]
async fn cancel_while_paused_stops_before_any_model_call() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new().with_stream("never streamed");
    let (mut orch, client) = build(client, config(WorkflowMode::Solo), tmp.path());
    let control = orch.control();
    let mut rx = orch.subscribe();
    control.pause();

    let watcher = tokio::spawn(async move {
        loop {
            if let OrchestratorEvent::Paused(_) = rx.recv().await.unwrap() {
                control.cancel();
                return;
            }
        }
    });

    let outcome = orch.handle_message("hello", &[]).await;
    watcher.await.unwrap();

    assert_eq!(outcome.stop, StopReason::Cancelled);
    assert!(client.requests().is_empty());
    assert_eq!(orch.history().last().unwrap().role, Role::System);
}

#[tokio::test]
async fn cancel_mid_stream_skips_pending_tools() {
    let tmp = tempfile::tempdir().unwrap();
    let prose: String = (0..100).map(|i| format!("{i:03} ")).collect();
    let text = format!("{prose}<write_file path=\"late.txt\">never</write_file>");
    let client = ScriptedClient::new()
        .with_stream(text)
        .chunk_chars(1)
        .chunk_delay(Duration::from_millis(10));
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());

    let control = orch.control();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.cancel();
    });

    let outcome = orch.handle_message("Count slowly", &[]).await;

    assert_eq!(outcome.stop, StopReason::Cancelled);
    assert!(!tmp.path().join("late.txt").exists());
    let last = orch.history().last().unwrap();
    assert_eq!(last.role, Role::System);
    assert_eq!(last.content, "Run cancelled.");
}

#[tokio::test]
async fn iteration_cap_stops_a_runaway_session() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(WorkflowMode::Solo);
    config.orchestrator.max_iterations = 3;
    let client = ScriptedClient::new()
        .with_stream("Still working on part one.")
        .with_stream("Still working on part two.")
        .with_stream("Still working on part three.")
        .with_stream("never reached");
    let (mut orch, client) = build(client, config, tmp.path());

    let outcome = orch.handle_message("Do everything", &[]).await;

    assert_eq!(outcome.stop, StopReason::IterationCap);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.next_agent, "Solo");
    assert_eq!(client.remaining_streams(), 1);
    assert!(orch.history().last().unwrap().content.contains("Stopped after 3 iterations"));
}

#[tokio::test]
async fn unparseable_router_decision_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new().with_completion("I think the coder should go next.");
    let (mut orch, _) = build(client, config(WorkflowMode::Multi), tmp.path());

    let outcome = orch.handle_message("Fix the bug", &[]).await;

    assert!(matches!(outcome.stop, StopReason::Failed(OrchestratorError::RouterDecision(_))));
    let last = orch.history().last().unwrap();
    assert_eq!(last.role, Role::System);
    assert!(last.content.starts_with("Error:"));
}

#[tokio::test]
async fn unknown_agent_and_router_errors_are_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new()
        .with_completion(r#"{"next_agent": "Designer", "reasoning": "style"}"#)
        .with_completion_error(LlmError::Request("connection reset".into()));
    let (mut orch, _) = build(client, config(WorkflowMode::Multi), tmp.path());

    let outcome = orch.handle_message("Make it pretty", &[]).await;
    assert_eq!(
        outcome.stop,
        StopReason::Failed(OrchestratorError::AgentNotFound("Designer".into()))
    );

    let outcome = orch.handle_message("Try again", &[]).await;
    assert!(matches!(outcome.stop, StopReason::Failed(OrchestratorError::RouterCall(_))));
}

#[tokio::test]
async fn stream_error_is_fatal_for_the_turn() {
    let tmp = tempfile::tempdir().unwrap();
    let client = ScriptedClient::new().with_stream_error(LlmError::Stream("reset by peer".into()));
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());

    let outcome = orch.handle_message("Go", &[]).await;

    match outcome.stop {
        StopReason::Failed(OrchestratorError::Stream { agent, .. }) => assert_eq!(agent, "Solo"),
        other => panic!("expected stream failure, got {other:?}"),
    }
}

#[tokio::test]
async fn provider_usage_replaces_the_streamed_estimate() {
    let tmp = tempfile::tempdir().unwrap();
    let usage = Usage {
        input_tokens: 100,
        output_tokens: 80,
    };
    let prose: String = (0..100).map(|i| format!("{i:03} ")).collect();
    let output = format!("{prose}[FINISH]");
    let client = ScriptedClient::new().with_stream_usage(output, usage);
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());

    orch.handle_message("Go", &[]).await;

    let stats = orch.stats();
    assert_eq!(stats.total_input, 100);
    assert_eq!(stats.total_output, 80);
    assert_eq!(stats.agents["Solo"].output, 80);
}

#[tokio::test]
async fn long_history_is_compressed_before_the_next_message() {
    let tmp = tempfile::tempdir().unwrap();
    let mut client = ScriptedClient::new();
    for i in 0..5 {
        client = client.with_stream(format!("Turn {i} complete. [FINISH]"));
    }
    let client = client.with_completion("Topic: earlier turns finished.");
    let (mut orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());

    for i in 0..4 {
        orch.handle_message(&format!("message {i}"), &[]).await;
    }
    // Four messages produce eight entries; the fourth call saw six and did not compress.
    assert_eq!(orch.history().len(), 8);

    orch.handle_message("message 4", &[]).await;
    let history = orch.history();
    assert_eq!(history[0].role, Role::Summary);
    assert_eq!(history[0].content, "Topic: earlier turns finished.");
    assert_eq!(history[1].content, "message 2");
}

#[tokio::test]
async fn steps_are_written_to_the_step_log() {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("sessions");
    let logger = StepLogger::new_in_dir(&log_dir).unwrap();
    let log_path = logger.path().to_path_buf();
    let client = ScriptedClient::new().with_stream("Done. [FINISH]");
    let (orch, _) = build(client, config(WorkflowMode::Solo), tmp.path());
    let mut orch = orch.with_step_log(logger);

    orch.handle_message("Go", &[]).await;

    let content = std::fs::read_to_string(log_path).unwrap();
    let line: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(line["step"]["agent"], "Solo");
    assert_eq!(line["step"]["input"], "Go");
}
