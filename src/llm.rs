// ABOUTME: Model client contract: cancellable streaming and one-shot completions with usage.
// ABOUTME: Includes a scripted client that replays canned responses for tests and offline replay.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;

/// Coarse progress phase reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreparingContext,
    WaitingForApi,
    Streaming,
    ExecutingTool,
    Analyzing,
}

/// Token counts reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One event from a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// Authoritative usage; supersedes any live estimate for the turn.
    Usage(Usage),
    Phase {
        phase: Phase,
        detail: Option<String>,
    },
}

/// A completion request. `prompt` carries the conversation so far, `context` the file context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub context: String,
    pub max_tokens: u32,
}

impl Request {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A non-streaming completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub text: String,
    pub usage: Option<Usage>,
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, LlmError>>;

/// The model provider, as seen by the orchestrator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a streaming completion. The stream ends early once `cancel` fires.
    fn create_message_stream(&self, request: &Request, cancel: CancellationToken) -> EventStream;

    /// Run a one-shot completion.
    async fn create_message(&self, request: &Request) -> Result<Response, LlmError>;
}

/// One canned streamed response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedTurn {
    pub text: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Keep the stream open and silent after the text instead of ending it.
    #[serde(default)]
    pub stall: bool,
}

/// A replay script: streamed responses in order, then one-shot completions in order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub streams: Vec<ScriptedTurn>,
    #[serde(default)]
    pub completions: Vec<String>,
}

/// Deterministic client that replays a script and records every request it receives.
pub struct ScriptedClient {
    streams: Mutex<VecDeque<Result<ScriptedTurn, LlmError>>>,
    completions: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Request>>,
    chunk_chars: usize,
    chunk_delay: Option<Duration>,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: 16,
            chunk_delay: None,
        }
    }

    pub fn from_script(script: Script) -> Self {
        let mut client = Self::new();
        for turn in script.streams {
            client = client.with_turn(turn);
        }
        for text in script.completions {
            client = client.with_completion(text);
        }
        client
    }

    /// Queue a streamed response.
    pub fn with_stream(self, text: impl Into<String>) -> Self {
        self.with_turn(ScriptedTurn {
            text: text.into(),
            usage: None,
            stall: false,
        })
    }

    /// Queue a streamed response that goes quiet after its text without ever finishing.
    pub fn with_stalled_stream(self, text: impl Into<String>) -> Self {
        self.with_turn(ScriptedTurn {
            text: text.into(),
            usage: None,
            stall: true,
        })
    }

    /// Queue a streamed response that ends with an authoritative usage report.
    pub fn with_stream_usage(self, text: impl Into<String>, usage: Usage) -> Self {
        self.with_turn(ScriptedTurn {
            text: text.into(),
            usage: Some(usage),
            stall: false,
        })
    }

    pub fn with_turn(self, turn: ScriptedTurn) -> Self {
        self.streams.lock().expect("script lock poisoned").push_back(Ok(turn));
        self
    }

    /// Queue a stream that fails immediately.
    pub fn with_stream_error(self, error: LlmError) -> Self {
        self.streams.lock().expect("script lock poisoned").push_back(Err(error));
        self
    }

    /// Queue a one-shot completion.
    pub fn with_completion(self, text: impl Into<String>) -> Self {
        self.completions
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(text.into()));
        self
    }

    pub fn with_completion_error(self, error: LlmError) -> Self {
        self.completions
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(error));
        self
    }

    /// Size of each streamed text delta, in characters.
    pub fn chunk_chars(mut self, chars: usize) -> Self {
        self.chunk_chars = chars.max(1);
        self
    }

    /// Pause between streamed deltas.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Every request received so far, streaming and one-shot, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("script lock poisoned").clone()
    }

    /// Number of queued streamed responses not yet consumed.
    pub fn remaining_streams(&self) -> usize {
        self.streams.lock().expect("script lock poisoned").len()
    }

    fn record(&self, request: &Request) {
        self.requests
            .lock()
            .expect("script lock poisoned")
            .push(request.clone());
    }
}

/// Split text into deltas of at most `size` characters.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn create_message_stream(&self, request: &Request, cancel: CancellationToken) -> EventStream {
        self.record(request);
        let next = self
            .streams
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("script exhausted".to_string())));

        let turn = match next {
            Ok(turn) => turn,
            Err(e) => return futures::stream::iter(vec![Err(e)]).boxed(),
        };

        let mut events: Vec<Result<StreamEvent, LlmError>> = split_chunks(&turn.text, self.chunk_chars)
            .into_iter()
            .map(|chunk| Ok(StreamEvent::TextDelta(chunk)))
            .collect();
        if let Some(usage) = turn.usage {
            events.push(Ok(StreamEvent::Usage(usage)));
        }

        let delay = self.chunk_delay;
        if delay.is_none() && !turn.stall {
            return futures::stream::iter(events)
                .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
                .boxed();
        }

        let stall = turn.stall;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in events {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if stall {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tx.closed() => {}
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }

    async fn create_message(&self, request: &Request) -> Result<Response, LlmError> {
        self.record(request);
        let next = self
            .completions
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Request("script exhausted".to_string())));
        next.map(|text| Response { text, usage: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_text(stream: EventStream) -> String {
        let events: Vec<_> = stream.collect().await;
        events
            .into_iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::TextDelta(t)) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn request_builder_sets_fields() {
        let req = Request::new("m")
            .system("sys")
            .prompt("conv")
            .context("files")
            .max_tokens(10);
        assert_eq!(req.model, "m");
        assert_eq!(req.system, "sys");
        assert_eq!(req.prompt, "conv");
        assert_eq!(req.context, "files");
        assert_eq!(req.max_tokens, 10);
    }

    #[test]
    fn split_chunks_respects_char_boundaries() {
        let chunks = split_chunks("héllo wörld", 3);
        assert_eq!(chunks.concat(), "héllo wörld");
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
    }

    #[tokio::test]
    async fn scripted_stream_replays_text_in_chunks() {
        let client = ScriptedClient::new().with_stream("hello world").chunk_chars(4);
        let stream = client.create_message_stream(&Request::new("m"), CancellationToken::new());
        assert_eq!(collect_text(stream).await, "hello world");
        assert_eq!(client.requests().len(), 1);
        assert_eq!(client.remaining_streams(), 0);
    }

    #[tokio::test]
    async fn scripted_stream_reports_usage_last() {
        let usage = Usage {
            input_tokens: 5,
            output_tokens: 2,
        };
        let client = ScriptedClient::new().with_stream_usage("hi", usage);
        let events: Vec<_> = client
            .create_message_stream(&Request::new("m"), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.last(), Some(&Ok(StreamEvent::Usage(usage))));
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let client = ScriptedClient::new();
        let events: Vec<_> = client
            .create_message_stream(&Request::new("m"), CancellationToken::new())
            .collect()
            .await;
        assert!(matches!(events[0], Err(LlmError::Request(_))));
        assert!(client.create_message(&Request::new("m")).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_stream_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = ScriptedClient::new().with_stream("abcdefgh").chunk_chars(1);
        let stream = client.create_message_stream(&Request::new("m"), cancel);
        assert_eq!(collect_text(stream).await, "");
    }

    #[tokio::test]
    async fn delayed_stream_delivers_all_chunks() {
        let client = ScriptedClient::new()
            .with_stream("abc")
            .chunk_chars(1)
            .chunk_delay(Duration::from_millis(1));
        let stream = client.create_message_stream(&Request::new("m"), CancellationToken::new());
        assert_eq!(collect_text(stream).await, "abc");
    }

    #[tokio::test]
    async fn stalled_stream_sends_text_then_stays_open() {
        let client = ScriptedClient::new().with_stalled_stream("half");
        let mut stream = client.create_message_stream(&Request::new("m"), CancellationToken::new());
        assert_eq!(
            stream.next().await.and_then(Result::ok),
            Some(StreamEvent::TextDelta("half".to_string()))
        );
        let silent = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(silent.is_err());
    }

    #[test]
    fn script_deserializes_from_json() {
        let json = r#"{"streams":[{"text":"a"},{"text":"b","usage":{"input_tokens":1,"output_tokens":2}}],"completions":["{}"]}"#;
        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.streams.len(), 2);
        assert_eq!(script.completions.len(), 1);
        let client = ScriptedClient::from_script(script);
        assert_eq!(client.remaining_streams(), 2);
    }
}
