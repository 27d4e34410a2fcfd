// ABOUTME: Session token accounting with a live per-turn accumulator.
// ABOUTME: Streamed output is estimated from characters until the provider reports real usage.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::llm::Usage;

/// Per-agent totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentUsage {
    pub input: u64,
    pub output: u64,
    pub context_size: u64,
}

/// Committed totals merged with the uncommitted current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_input: u64,
    pub total_output: u64,
    pub agents: BTreeMap<String, AgentUsage>,
}

#[derive(Debug, Clone, Default)]
struct TurnUsage {
    agent: String,
    input: u64,
    streamed_chars: u64,
    context_size: u64,
    reported: Option<Usage>,
}

impl TurnUsage {
    fn counts(&self, chars_per_token: u64) -> (u64, u64) {
        match self.reported {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
            None => (self.input, self.streamed_chars / chars_per_token.max(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsageTracker {
    chars_per_token: u64,
    committed: StatsSnapshot,
    current: Option<TurnUsage>,
}

impl UsageTracker {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token as u64,
            committed: StatsSnapshot::default(),
            current: None,
        }
    }

    /// Start accounting for a turn. Any uncommitted turn is committed first.
    pub fn begin_turn(&mut self, agent: &str, input_tokens: u64, context_size: u64) {
        self.commit_turn();
        self.current = Some(TurnUsage {
            agent: agent.to_string(),
            input: input_tokens,
            context_size,
            ..Default::default()
        });
    }

    pub fn record_stream_chars(&mut self, chars: usize) {
        if let Some(turn) = self.current.as_mut() {
            turn.streamed_chars += chars as u64;
        }
    }

    /// Authoritative counts from the provider replace the estimate.
    pub fn record_usage(&mut self, usage: Usage) {
        if let Some(turn) = self.current.as_mut() {
            turn.reported = Some(usage);
        }
    }

    /// Fold the current turn into the session totals.
    pub fn commit_turn(&mut self) {
        let Some(turn) = self.current.take() else {
            return;
        };
        let (input, output) = turn.counts(self.chars_per_token);
        add_usage(&mut self.committed, &turn.agent, input, output, turn.context_size);
    }

    pub fn committed(&self) -> &StatsSnapshot {
        &self.committed
    }

    /// Session totals plus the live estimate of the uncommitted turn.
    pub fn merged(&self) -> StatsSnapshot {
        let mut snapshot = self.committed.clone();
        if let Some(turn) = &self.current {
            let (input, output) = turn.counts(self.chars_per_token);
            add_usage(&mut snapshot, &turn.agent, input, output, turn.context_size);
        }
        snapshot
    }

    pub fn reset(&mut self) {
        self.committed = StatsSnapshot::default();
        self.current = None;
    }
}

fn add_usage(snapshot: &mut StatsSnapshot, agent: &str, input: u64, output: u64, context_size: u64) {
    snapshot.total_input += input;
    snapshot.total_output += output;
    let entry = snapshot.agents.entry(agent.to_string()).or_default();
    entry.input += input;
    entry.output += output;
    entry.context_size = context_size;
}
