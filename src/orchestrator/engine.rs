// ABOUTME: The orchestrator loop: routes between agents, streams their output, and runs tools mid-stream.
// ABOUTME: Applies task updates after each turn and stops on FINISH, cancellation, fatal errors, or the iteration cap.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WorkflowMode};
use crate::detector::{INTERVENTION_NOTICE, LoopDetector, LoopKind};
use crate::error::{LlmError, OrchestratorError, Result};
use crate::history::{
    HistoryEntry, StatsSnapshot, UsageTracker, compress_history, format_transcript,
    needs_compression,
};
use crate::llm::{EventStream, LlmClient, Phase, Request, StreamEvent};
use crate::parser::{
    MarkerKind, TagScanner, ToolTag, contains_finish_sentinel, parse_checklist,
    parse_router_decision, parse_structured_update, parse_task_markers, strip_tool_tags,
};
use crate::registry::{FINISH, QA, REVIEWER, ROUTER, SOLO, WorkflowRegistry};
use crate::session::StepLogger;
use crate::tools::{StructuredAction, ToolDispatcher, ToolResult};

use super::context::{ContextBuilder, PlainContextBuilder};
use super::control::{RunControl, RunState};
use super::events::{EventBus, OrchestratorEvent, PauseSnapshot, Step};
use super::tasks::{TaskBoard, TaskChange, TaskStatus};
use super::working_set::{FileSnapshot, WorkingSet};

/// Why a call to [`Orchestrator::handle_message`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// An agent emitted the completion sentinel or the router chose FINISH.
    Finished,
    IterationCap,
    Cancelled,
    Failed(OrchestratorError),
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub stop: StopReason,
    /// The agent that would have acted next; `FINISH` after a normal finish.
    pub next_agent: String,
    pub iterations: usize,
    pub steps: Vec<Step>,
}

/// Output of one agent turn as it streams in.
struct TurnBuffer {
    agent: String,
    output: String,
    reasoning: String,
    /// Start of the output not yet committed to history.
    segment_start: usize,
    written_files: Vec<String>,
}

impl TurnBuffer {
    fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            output: String::new(),
            reasoning: String::new(),
            segment_start: 0,
            written_files: Vec::new(),
        }
    }

    /// Output since the last tool call, marking it committed.
    fn take_segment(&mut self) -> Option<String> {
        let segment = &self.output[self.segment_start..];
        self.segment_start = self.output.len();
        if segment.trim().is_empty() {
            None
        } else {
            Some(segment.to_string())
        }
    }
}

pub struct Orchestrator {
    config: Config,
    client: Arc<dyn LlmClient>,
    registry: Arc<dyn WorkflowRegistry>,
    tools: Arc<ToolDispatcher>,
    context_builder: Box<dyn ContextBuilder>,
    detector: LoopDetector,
    events: EventBus,
    control: RunControl,
    tasks: TaskBoard,
    working_set: WorkingSet,
    history: Vec<HistoryEntry>,
    steps: Vec<Step>,
    usage: UsageTracker,
    step_log: Option<StepLogger>,
    message: String,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        client: Arc<dyn LlmClient>,
        registry: Arc<dyn WorkflowRegistry>,
        tools: Arc<ToolDispatcher>,
    ) -> Self {
        let detector = LoopDetector::new(config.loop_detection.clone());
        let usage = UsageTracker::new(config.history.chars_per_token);
        Self {
            config,
            client,
            registry,
            tools,
            context_builder: Box::new(PlainContextBuilder::new()),
            detector,
            events: EventBus::new(),
            control: RunControl::new(),
            tasks: TaskBoard::new(),
            working_set: WorkingSet::new(),
            history: Vec::new(),
            steps: Vec::new(),
            usage,
            step_log: None,
            message: String::new(),
        }
    }

    pub fn with_context_builder(mut self, builder: Box<dyn ContextBuilder>) -> Self {
        self.context_builder = builder;
        self
    }

    pub fn with_step_log(mut self, logger: StepLogger) -> Self {
        self.step_log = Some(logger);
        self
    }

    /// Handle for pausing, resuming, and cancelling from another task.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn tasks(&self) -> &TaskBoard {
        &self.tasks
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Session totals merged with the live estimate of any turn in flight.
    pub fn stats(&self) -> StatsSnapshot {
        self.usage.merged()
    }

    /// Forget everything from the session: tasks, files, history, steps, usage.
    pub fn reset(&mut self) {
        self.tasks.clear();
        self.working_set.clear();
        self.history.clear();
        self.steps.clear();
        self.usage.reset();
        self.events.publish(OrchestratorEvent::Plan { tasks: Vec::new() });
        self.events.publish(OrchestratorEvent::Stats(self.usage.merged()));
        info!("session reset");
    }

    /// Run the agent loop for one user message until it finishes, fails, is cancelled,
    /// or hits the iteration cap. Not reentrant: callers serialize messages.
    pub async fn handle_message(&mut self, message: &str, user_files: &[FileSnapshot]) -> TurnOutcome {
        self.control.begin_run();
        self.steps.clear();
        self.message = message.to_string();

        if needs_compression(&self.history, &self.config.history) {
            self.publish_phase(Phase::Analyzing, Some("compressing history"));
            let history = std::mem::take(&mut self.history);
            self.history =
                compress_history(self.client.as_ref(), &self.config.llm, history, &self.config.history)
                    .await;
        }
        self.history.push(HistoryEntry::user(message));

        let mut current = match self.config.orchestrator.mode {
            WorkflowMode::Multi => ROUTER.to_string(),
            WorkflowMode::Solo => SOLO.to_string(),
        };
        let max_iterations = self.config.orchestrator.max_iterations;
        let mut iterations = 0;

        let stop = loop {
            if self.control.is_cancelled() {
                break self.fail(OrchestratorError::Cancelled);
            }
            if iterations >= max_iterations {
                warn!(iterations, "iteration cap reached");
                let notice = format!("Stopped after {iterations} iterations without finishing.");
                self.history.push(HistoryEntry::system(&notice));
                self.events.publish(OrchestratorEvent::Notice { message: notice });
                break StopReason::IterationCap;
            }
            iterations += 1;
            debug!(iteration = iterations, agent = %current, "loop iteration");

            if let Err(e) = self.checkpoint(&current, user_files).await {
                break self.fail(e);
            }

            if current == ROUTER {
                match self.route(user_files).await {
                    Ok(next) if next == FINISH => {
                        current = next;
                        break StopReason::Finished;
                    }
                    Ok(next) => current = next,
                    Err(e) => break self.fail(e),
                }
                if let Err(e) = self.checkpoint(&current, user_files).await {
                    break self.fail(e);
                }
            }

            match self.run_agent(&current, user_files).await {
                Ok(next) if next == FINISH => {
                    current = next;
                    break StopReason::Finished;
                }
                Ok(next) => current = next,
                Err(e) => break self.fail(e),
            }
        };

        info!(stop = ?stop, iterations, "message handled");
        TurnOutcome {
            stop,
            next_agent: current,
            iterations,
            steps: self.steps.clone(),
        }
    }

    /// Turn a fatal error into a visible system message.
    fn fail(&mut self, error: OrchestratorError) -> StopReason {
        let message = match &error {
            OrchestratorError::Cancelled => {
                info!("run cancelled");
                "Run cancelled.".to_string()
            }
            other => {
                error!(error = %other, "turn failed");
                format!("Error: {other}")
            }
        };
        self.history.push(HistoryEntry::system(&message));
        self.events.publish(OrchestratorEvent::Notice { message });
        match error {
            OrchestratorError::Cancelled => StopReason::Cancelled,
            other => StopReason::Failed(other),
        }
    }

    fn publish_phase(&self, phase: Phase, detail: Option<&str>) {
        self.events.publish(OrchestratorEvent::Phase {
            phase,
            detail: detail.map(str::to_string),
        });
    }

    fn file_context(&self, user_files: &[FileSnapshot]) -> String {
        let files = self.working_set.merged(user_files);
        self.context_builder.build(&files, &self.tasks)
    }

    fn estimate_tokens(&self, chars: usize) -> u64 {
        (chars / self.config.history.chars_per_token.max(1)) as u64
    }

    /// Block here while paused, publishing what the next turn would run with.
    async fn checkpoint(&mut self, agent: &str, user_files: &[FileSnapshot]) -> Result<()> {
        match self.control.state() {
            RunState::Running => return Ok(()),
            RunState::Cancelled => return Err(OrchestratorError::Cancelled),
            RunState::Paused => {}
        }
        let system_prompt = if agent == ROUTER {
            self.registry.router_prompt()
        } else {
            self.registry.agent_prompt(agent).unwrap_or_default()
        };
        info!(agent = %agent, "paused");
        self.events.publish(OrchestratorEvent::Paused(PauseSnapshot {
            agent: agent.to_string(),
            system_prompt,
            transcript: format_transcript(&self.history),
            file_context: self.file_context(user_files),
        }));
        match self.control.wait_while_paused().await {
            RunState::Cancelled => Err(OrchestratorError::Cancelled),
            _ => {
                info!("resumed");
                self.events.publish(OrchestratorEvent::Resumed);
                Ok(())
            }
        }
    }

    fn resolve_agent(&self, name: &str) -> Result<String> {
        self.registry
            .resolve(name)
            .ok_or_else(|| OrchestratorError::AgentNotFound(name.to_string()))
    }

    /// Pick the next agent: review override first, then the router model.
    async fn route(&mut self, user_files: &[FileSnapshot]) -> Result<String> {
        if self.config.orchestrator.mode == WorkflowMode::Multi && self.tasks.has_review_pending() {
            info!("tasks awaiting review, routing to reviewer");
            return self.resolve_agent(REVIEWER);
        }

        self.events.publish(OrchestratorEvent::ActiveAgent {
            agent: ROUTER.to_string(),
        });
        self.publish_phase(Phase::PreparingContext, None);
        let system = self.registry.router_prompt();
        let transcript = format_transcript(&self.history);
        let context = self.file_context(user_files);
        let request = Request::new(&self.config.llm.model)
            .max_tokens(self.config.llm.max_tokens)
            .system(system.as_str())
            .prompt(transcript.as_str())
            .context(context.as_str());

        let input_tokens = self.estimate_tokens(system.len() + transcript.len() + context.len());
        self.usage
            .begin_turn(ROUTER, input_tokens, self.estimate_tokens(context.len()));

        self.publish_phase(Phase::WaitingForApi, None);
        let response = self
            .client
            .create_message(&request)
            .await
            .map_err(OrchestratorError::RouterCall)?;
        self.usage.record_stream_chars(response.text.chars().count());
        if let Some(usage) = response.usage {
            self.usage.record_usage(usage);
        }
        self.usage.commit_turn();
        self.events.publish(OrchestratorEvent::Stats(self.usage.merged()));

        self.publish_phase(Phase::Analyzing, Some("routing"));
        let decision = parse_router_decision(&response.text).ok_or_else(|| {
            let excerpt: String = response.text.chars().take(200).collect();
            OrchestratorError::RouterDecision(excerpt)
        })?;
        let mut next = self.resolve_agent(&decision.next_agent)?;

        if next == FINISH && self.tasks.has_open() {
            let open: Vec<String> = self.tasks.open_tasks().map(|t| t.id.clone()).collect();
            warn!(open = ?open, "router chose FINISH with open tasks, sending to QA");
            next = self.resolve_agent(QA)?;
            self.history.push(HistoryEntry::system(format!(
                "The router tried to finish, but tasks {} are still open. {next}: verify each open task \
                 against the workspace and mark it [VERIFIED:n] or [REJECTED:n].",
                open.join(", ")
            )));
        } else if let Some(task_id) = decision.task_id.as_deref().filter(|_| next != FINISH) {
            let changed = self.tasks.apply(TaskChange::SetStatus {
                id: task_id.to_string(),
                status: TaskStatus::InProgress,
                agent: Some(next.clone()),
            });
            if changed {
                self.publish_plan();
            }
        }

        info!(next = %next, reasoning = %decision.reasoning, "router decision");
        self.record_step(Step {
            agent: ROUTER.to_string(),
            input: self.message.clone(),
            output: response.text,
            reasoning: Some(decision.reasoning).filter(|r| !r.is_empty()),
        });
        Ok(next)
    }

    /// Stream one agent turn, then apply its task updates. Returns the next agent.
    async fn run_agent(&mut self, agent: &str, user_files: &[FileSnapshot]) -> Result<String> {
        let system = self
            .registry
            .agent_prompt(agent)
            .ok_or_else(|| OrchestratorError::AgentNotFound(agent.to_string()))?;

        self.events.publish(OrchestratorEvent::ActiveAgent {
            agent: agent.to_string(),
        });
        self.publish_phase(Phase::PreparingContext, None);
        let transcript = format_transcript(&self.history);
        let context = self.file_context(user_files);
        let request = Request::new(&self.config.llm.model)
            .max_tokens(self.config.llm.max_tokens)
            .system(system.as_str())
            .prompt(transcript.as_str())
            .context(context.as_str());
        let input_tokens = self.estimate_tokens(system.len() + transcript.len() + context.len());
        self.usage
            .begin_turn(agent, input_tokens, self.estimate_tokens(context.len()));

        self.publish_phase(Phase::WaitingForApi, None);
        let token = self.control.token();
        let stream = self.client.create_message_stream(&request, token.clone());

        let mut buffer = TurnBuffer::new(agent);
        let streamed = self.consume_stream(&mut buffer, stream, token).await;
        if let Some(segment) = buffer.take_segment() {
            self.history.push(HistoryEntry::agent(agent, segment));
        }
        self.usage.commit_turn();
        self.events.publish(OrchestratorEvent::Stats(self.usage.merged()));
        streamed?;

        self.publish_phase(Phase::Analyzing, None);
        // Tool bodies are file content, not the agent speaking.
        let prose = strip_tool_tags(&buffer.output);
        if self.apply_task_updates(agent, &prose, &buffer.written_files) {
            self.publish_plan();
        }

        self.record_step(Step {
            agent: agent.to_string(),
            input: self.message.clone(),
            output: buffer.output.clone(),
            reasoning: Some(buffer.reasoning).filter(|r| !r.is_empty()),
        });

        let next = if contains_finish_sentinel(&prose) {
            FINISH
        } else if self.config.orchestrator.mode == WorkflowMode::Solo {
            SOLO
        } else {
            ROUTER
        };
        Ok(next.to_string())
    }

    /// Drain the model stream into `buffer`, dispatching tools as their tags complete.
    async fn consume_stream(
        &mut self,
        buffer: &mut TurnBuffer,
        mut stream: EventStream,
        token: CancellationToken,
    ) -> Result<()> {
        let silence = Duration::from_secs(self.config.orchestrator.silence_timeout_seconds);
        let mut scanner = TagScanner::new();
        let mut streaming = false;

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Err(OrchestratorError::Cancelled),
                next = tokio::time::timeout(silence, stream.next()) => next,
            };
            let event = match next {
                Err(_) => {
                    warn!(agent = %buffer.agent, "stream went silent, treating it as complete");
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(LlmError::Cancelled))) => return Err(OrchestratorError::Cancelled),
                Ok(Some(Err(source))) => {
                    return Err(OrchestratorError::Stream {
                        agent: buffer.agent.clone(),
                        source,
                    });
                }
                Ok(Some(Ok(event))) => event,
            };
            if self.control.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            match event {
                StreamEvent::TextDelta(delta) => {
                    if !streaming {
                        streaming = true;
                        self.publish_phase(Phase::Streaming, None);
                    }
                    buffer.output.push_str(&delta);
                    self.usage.record_stream_chars(delta.chars().count());
                    self.events.publish(OrchestratorEvent::ContentDelta {
                        agent: buffer.agent.clone(),
                        delta: delta.clone(),
                    });

                    let verdict = self.detector.check(&buffer.output);
                    if verdict.is_looping {
                        let trim = verdict
                            .trim_index
                            .unwrap_or(buffer.output.len())
                            .max(buffer.segment_start);
                        self.intervene(buffer, trim, verdict.kind);
                        return Ok(());
                    }

                    scanner.push(&delta);
                    while let Some(tag) = scanner.next_tag() {
                        if self.control.is_cancelled() {
                            return Err(OrchestratorError::Cancelled);
                        }
                        self.run_tool(buffer, tag).await;
                    }
                }
                StreamEvent::ReasoningDelta(delta) => buffer.reasoning.push_str(&delta),
                StreamEvent::Usage(usage) => self.usage.record_usage(usage),
                StreamEvent::Phase { phase, detail } => {
                    self.events.publish(OrchestratorEvent::Phase { phase, detail })
                }
            }
        }
    }

    /// Cut looping output at `trim` and mark the turn as interrupted.
    fn intervene(&mut self, buffer: &mut TurnBuffer, trim: usize, kind: Option<LoopKind>) {
        warn!(agent = %buffer.agent, kind = ?kind, trim, "repetition detected, stopping generation");
        buffer.output.truncate(trim);
        buffer.output.push_str(INTERVENTION_NOTICE);
        self.events.publish(OrchestratorEvent::ContentReplace {
            agent: buffer.agent.clone(),
            content: buffer.output.clone(),
        });
        self.events.publish(OrchestratorEvent::Notice {
            message: format!("{} was repeating itself; its turn was cut short.", buffer.agent),
        });
    }

    /// Dispatch one tool and splice its result into the transcript.
    async fn run_tool(&mut self, buffer: &mut TurnBuffer, tag: ToolTag) {
        let tool = tag.name().to_string();
        self.publish_phase(Phase::ExecutingTool, Some(&tool));
        let result = self.tools.dispatch(&tag).await;
        self.track_action(buffer, &result);

        if let Some(segment) = buffer.take_segment() {
            self.history.push(HistoryEntry::agent(&buffer.agent, segment));
        }
        self.history.push(HistoryEntry::tool(result.llm_output.as_str()));
        self.events.publish(OrchestratorEvent::Tool {
            agent: buffer.agent.clone(),
            tool,
            result,
        });
        self.events.publish(OrchestratorEvent::Stats(self.usage.merged()));
        self.publish_phase(Phase::Streaming, None);
    }

    fn track_action(&mut self, buffer: &mut TurnBuffer, result: &ToolResult) {
        match &result.action {
            Some(StructuredAction::FileWritten { path, content }) => {
                self.working_set.record(path, content);
                if !buffer.written_files.contains(path) {
                    buffer.written_files.push(path.clone());
                }
            }
            Some(StructuredAction::FileRead { path, content }) => {
                self.working_set.record(path, content);
            }
            _ => {}
        }
    }

    /// Fold checklists, JSON updates, and inline markers from `output` into the task board.
    ///
    /// `output` is the agent's prose with tool tags already removed.
    fn apply_task_updates(&mut self, agent: &str, output: &str, written_files: &[String]) -> bool {
        let mode = self.config.orchestrator.mode;
        // Nobody reviews in solo mode, so completion claims stand.
        let auto_mark = self.config.orchestrator.auto_mark_tasks || mode == WorkflowMode::Solo;
        let checker = self.is_checker(agent);
        let plans = agent.eq_ignore_ascii_case(&self.config.orchestrator.planner_agent)
            || (mode == WorkflowMode::Solo && self.tasks.is_empty());

        let mut changes = Vec::new();
        if plans {
            changes.extend(parse_checklist(output).iter().map(TaskChange::from_checklist));
        }
        if let Some(update) = parse_structured_update(output) {
            changes.extend(update.tasks.into_iter().map(|task| TaskChange::Add {
                id: task.id,
                description: task.description,
                verify_by: None,
            }));
            for update in update.task_updates {
                let Some(status) = TaskStatus::parse(&update.status) else {
                    debug!(id = %update.id, status = %update.status, "ignoring unknown task status");
                    continue;
                };
                let status = match status {
                    TaskStatus::Completed if !auto_mark && !checker => TaskStatus::ReviewPending,
                    TaskStatus::Rejected if !auto_mark && !checker => {
                        debug!(id = %update.id, agent, "ignoring rejection from a non-checker");
                        continue;
                    }
                    other => other,
                };
                changes.push(TaskChange::SetStatus {
                    id: update.id,
                    status,
                    agent: update.agent.or_else(|| Some(agent.to_string())),
                });
            }
        }
        for marker in parse_task_markers(output) {
            for id in &marker.ids {
                let Some(change) = TaskChange::from_marker(marker.kind, id, auto_mark, checker) else {
                    debug!(id = %id, agent, "ignoring rejection from a non-checker");
                    continue;
                };
                changes.push(change);
                if marker.kind == MarkerKind::Completed && !written_files.is_empty() {
                    changes.push(TaskChange::RecordFiles {
                        id: id.clone(),
                        files: written_files.to_vec(),
                    });
                }
            }
        }

        let mut changed = false;
        for change in changes {
            changed |= self.tasks.apply(change);
        }
        changed
    }

    /// Reviewer and QA may close tasks outright; everyone else only claims completion.
    fn is_checker(&self, agent: &str) -> bool {
        agent.eq_ignore_ascii_case(REVIEWER) || agent.eq_ignore_ascii_case(QA)
    }

    fn publish_plan(&self) {
        self.events.publish(OrchestratorEvent::Plan {
            tasks: self.tasks.tasks().to_vec(),
        });
    }

    fn record_step(&mut self, step: Step) {
        if let Some(log) = self.step_log.as_mut() {
            if let Err(e) = log.log_step(&step) {
                warn!(error = %e, "failed to log step");
            }
        }
        self.events.publish(OrchestratorEvent::Step(step.clone()));
        self.steps.push(step);
    }
}
