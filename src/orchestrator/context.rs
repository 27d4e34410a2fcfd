// ABOUTME: File-context assembly for agent requests, behind a trait so hosts can swap in their own.
// ABOUTME: The default builder renders the task board and each file in a fenced block.

use super::tasks::TaskBoard;
use super::working_set::FileSnapshot;

pub trait ContextBuilder: Send + Sync {
    fn build(&self, files: &[FileSnapshot], tasks: &TaskBoard) -> String;
}

/// Task board, then every file verbatim. Files past `max_chars` are listed by path only.
#[derive(Debug, Clone, Default)]
pub struct PlainContextBuilder {
    max_chars: Option<usize>,
}

impl PlainContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chars(max_chars: usize) -> Self {
        Self {
            max_chars: Some(max_chars),
        }
    }
}

impl ContextBuilder for PlainContextBuilder {
    fn build(&self, files: &[FileSnapshot], tasks: &TaskBoard) -> String {
        let mut sections = Vec::new();
        if !tasks.is_empty() {
            sections.push(format!("## Task board\n{}", tasks.render()));
        }

        let mut used = 0usize;
        let mut omitted = Vec::new();
        let mut rendered = Vec::new();
        for file in files {
            let block = format!("### {}\n```\n{}\n```", file.path, file.content.trim_end_matches('\n'));
            if self.max_chars.is_some_and(|max| used + block.len() > max) {
                omitted.push(file.path.as_str());
                continue;
            }
            used += block.len();
            rendered.push(block);
        }
        if !rendered.is_empty() {
            sections.push(format!("## Files\n{}", rendered.join("\n\n")));
        }
        if !omitted.is_empty() {
            sections.push(format!("## Files not shown (read them if needed)\n{}", omitted.join("\n")));
        }
        sections.join("\n\n")
    }
}
