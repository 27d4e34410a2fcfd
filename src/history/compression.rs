// ABOUTME: History compression: summarizes all but the most recent entries into one Summary entry.
// ABOUTME: Any failure leaves the history untouched, so compression can never fail a turn.

use tracing::{debug, warn};

use crate::config::{HistoryConfig, LlmConfig};
use crate::llm::{LlmClient, Request};

use super::transcript::{HistoryEntry, format_transcript};

pub const SUMMARIZATION_PROMPT: &str = "You are compressing the earlier part of a multi-agent coding session so later agents can continue without the full transcript.\n\nGroup the conversation below into short topic blocks. For each topic record:\n- What the user asked for\n- Decisions made and files touched\n- Task progress and anything still open\n\nWrite only the topic blocks, concise and factual.";

pub fn needs_compression(history: &[HistoryEntry], config: &HistoryConfig) -> bool {
    history.len() > config.compress_threshold
}

/// Compress `history` when it exceeds the threshold.
///
/// The newest `keep_recent` entries are kept verbatim; everything older is replaced by a
/// single `Summary` entry produced by one auxiliary completion.
pub async fn compress_history(
    client: &dyn LlmClient,
    llm: &LlmConfig,
    history: Vec<HistoryEntry>,
    config: &HistoryConfig,
) -> Vec<HistoryEntry> {
    if !needs_compression(&history, config) {
        return history;
    }
    let split = history.len().saturating_sub(config.keep_recent);
    if split == 0 {
        return history;
    }

    let request = Request::new(&llm.model)
        .max_tokens(llm.max_tokens)
        .system(SUMMARIZATION_PROMPT)
        .prompt(format_transcript(&history[..split]));

    let summary = match client.create_message(&request).await {
        Ok(response) if !response.text.trim().is_empty() => response.text,
        Ok(_) => {
            warn!("history compression returned an empty summary, keeping full history");
            return history;
        }
        Err(e) => {
            warn!(error = %e, "history compression failed, keeping full history");
            return history;
        }
    };

    debug!(compressed = split, kept = history.len() - split, "compressed history");
    let mut compressed = Vec::with_capacity(config.keep_recent + 1);
    compressed.push(HistoryEntry::summary(summary.trim()));
    compressed.extend(history.into_iter().skip(split));
    compressed
}
