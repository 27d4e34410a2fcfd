// ABOUTME: Generation loop detector: flags phrase oscillation and literal repetition in streamed output.
// ABOUTME: Code fences and open tool tags are safe zones where triggers are ignored and repeats need longer evidence.

use regex::Regex;
use serde::Serialize;

use crate::config::LoopDetectionConfig;

/// Appended to an agent's output when generation is cut short.
pub const INTERVENTION_NOTICE: &str =
    "\n\n[System: repetitive output detected, generation was stopped early.]\n";

/// Tags whose bodies are treated like code: content there legitimately repeats.
const BODY_TAGS: [&str; 5] = ["write_file", "patch", "replace", "read_file", "execute_command"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    PhraseOscillation,
    LiteralRepetition,
}

/// Result of one detector pass. `trim_index` is a byte offset into the checked text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopVerdict {
    pub is_looping: bool,
    pub trim_index: Option<usize>,
    pub kind: Option<LoopKind>,
}

impl LoopVerdict {
    fn looping(kind: LoopKind, trim_index: usize) -> Self {
        Self {
            is_looping: true,
            trim_index: Some(trim_index),
            kind: Some(kind),
        }
    }
}

/// Spans of code fences and tool-tag bodies, plus whether the text ends inside one.
struct SafeZones {
    spans: Vec<(usize, usize)>,
    open_at_end: bool,
}

impl SafeZones {
    fn contains(&self, pos: usize) -> bool {
        self.spans.iter().any(|(start, end)| pos >= *start && pos < *end)
    }
}

enum ZoneState {
    Outside,
    Fence(usize),
    Tag { start: usize, close: String },
}

fn find_tag_open(text: &str, from: usize) -> Option<(usize, &'static str)> {
    BODY_TAGS
        .iter()
        .filter_map(|name| {
            let open = format!("<{name}");
            let mut offset = from;
            while let Some(found) = text[offset..].find(&open) {
                let pos = offset + found;
                match text[pos + open.len()..].chars().next() {
                    Some(c) if c.is_whitespace() || c == '>' => return Some((pos, *name)),
                    _ => offset = pos + open.len(),
                }
            }
            None
        })
        .min_by_key(|(pos, _)| *pos)
}

fn safe_zones(text: &str) -> SafeZones {
    let mut spans = Vec::new();
    let mut state = ZoneState::Outside;
    let mut pos = 0;
    loop {
        match state {
            ZoneState::Outside => {
                let fence = text[pos..].find("```").map(|i| pos + i);
                let tag = find_tag_open(text, pos);
                match (fence, tag) {
                    (None, None) => break,
                    (Some(f), Some((t, _))) if f < t => {
                        state = ZoneState::Fence(f);
                        pos = f + 3;
                    }
                    (Some(f), None) => {
                        state = ZoneState::Fence(f);
                        pos = f + 3;
                    }
                    (_, Some((t, name))) => {
                        state = ZoneState::Tag {
                            start: t,
                            close: format!("</{name}>"),
                        };
                        pos = t + name.len() + 1;
                    }
                }
            }
            ZoneState::Fence(start) => match text[pos..].find("```") {
                Some(i) => {
                    spans.push((start, pos + i + 3));
                    pos += i + 3;
                    state = ZoneState::Outside;
                }
                None => {
                    spans.push((start, text.len()));
                    return SafeZones {
                        spans,
                        open_at_end: true,
                    };
                }
            },
            ZoneState::Tag { start, ref close } => match text[pos..].find(close.as_str()) {
                Some(i) => {
                    let end = pos + i + close.len();
                    spans.push((start, end));
                    pos = end;
                    state = ZoneState::Outside;
                }
                None => {
                    spans.push((start, text.len()));
                    return SafeZones {
                        spans,
                        open_at_end: true,
                    };
                }
            },
        }
    }
    SafeZones {
        spans,
        open_at_end: false,
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Stateless detector over an agent's accumulated output for the current turn.
pub struct LoopDetector {
    config: LoopDetectionConfig,
    triggers: Option<Regex>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectionConfig) -> Self {
        let triggers = if config.triggers.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = config.triggers.iter().map(|t| regex::escape(t)).collect();
            Regex::new(&format!(r"(?m)^[ \t]*(?:{})", alternatives.join("|"))).ok()
        };
        Self { config, triggers }
    }

    /// Check the full accumulated output. Only the trailing window is analyzed.
    pub fn check(&self, text: &str) -> LoopVerdict {
        if !self.config.enabled || text.is_empty() {
            return LoopVerdict::default();
        }
        let window_start =
            floor_char_boundary(text, text.len().saturating_sub(self.config.window_chars));
        let window = &text[window_start..];
        let zones = safe_zones(text);

        if let Some(triggers) = &self.triggers {
            let hits = triggers
                .find_iter(window)
                .filter(|m| !zones.contains(window_start + m.start()))
                .count();
            if hits >= self.config.phrase_threshold {
                let keep = (window.len() as f64 * self.config.keep_ratio) as usize;
                let trim = floor_char_boundary(text, window_start + keep);
                return LoopVerdict::looping(LoopKind::PhraseOscillation, trim);
            }
        }

        let suffix_len = if zones.open_at_end {
            self.config.safe_zone_suffix_chars
        } else {
            self.config.suffix_chars
        };
        if suffix_len == 0 || window.len() < suffix_len * 2 {
            return LoopVerdict::default();
        }
        let split = floor_char_boundary(text, text.len() - suffix_len);
        let suffix = &text[split..];
        if suffix.trim().is_empty() {
            return LoopVerdict::default();
        }
        match text[window_start..split].find(suffix) {
            Some(pos) => LoopVerdict::looping(LoopKind::LiteralRepetition, window_start + pos),
            None => LoopVerdict::default(),
        }
    }
}
