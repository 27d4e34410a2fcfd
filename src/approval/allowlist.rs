// ABOUTME: Command allowlist with glob pattern matching.
// ABOUTME: Patterns come from config; "accept always" decisions add exact commands at runtime.

use chrono::{DateTime, Utc};
use glob::Pattern;
use tracing::warn;

/// A single allowlist entry recording a permitted pattern and usage metadata.
#[derive(Debug, Clone)]
pub struct AllowlistEntry {
    pub pattern: Pattern,
    pub added_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Glob patterns matched against the full, trimmed command line.
#[derive(Debug, Clone, Default)]
pub struct CommandAllowlist {
    entries: Vec<AllowlistEntry>,
}

impl CommandAllowlist {
    /// Build from config patterns. Invalid globs are logged and skipped.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut list = Self::default();
        for raw in patterns {
            match Pattern::new(raw.as_ref()) {
                Ok(pattern) => list.push(pattern),
                Err(e) => warn!(pattern = raw.as_ref(), error = %e, "ignoring invalid allowlist pattern"),
            }
        }
        list
    }

    fn push(&mut self, pattern: Pattern) {
        if self.entries.iter().any(|e| e.pattern == pattern) {
            return;
        }
        self.entries.push(AllowlistEntry {
            pattern,
            added_at: Utc::now(),
            last_used_at: None,
        });
    }

    /// Allow this exact command from now on. Glob metacharacters in it are escaped.
    pub fn allow_exact(&mut self, command: &str) {
        if let Ok(pattern) = Pattern::new(&Pattern::escape(command.trim())) {
            self.push(pattern);
        }
    }

    /// Check a command and stamp the matching entry's last use.
    pub fn check(&mut self, command: &str) -> bool {
        let command = command.trim();
        match self.entries.iter_mut().find(|e| e.pattern.matches(command)) {
            Some(entry) => {
                entry.last_used_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        let command = command.trim();
        self.entries.iter().any(|e| e.pattern.matches(command))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
