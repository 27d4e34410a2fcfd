// ABOUTME: Working set: latest known content of every file a tool read or wrote this session.
// ABOUTME: Insertion ordered; it supersedes stale user-supplied snapshots of the same path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A file path with its content, as supplied by the user or tracked by tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

impl FileSnapshot {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

fn path_key(path: &str) -> String {
    path.trim().trim_start_matches("./").to_string()
}

#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    files: Vec<FileSnapshot>,
    index: HashMap<String, usize>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest content for `path`, keeping its original position.
    pub fn record(&mut self, path: &str, content: &str) {
        let key = path_key(path);
        match self.index.get(&key) {
            Some(&i) => self.files[i].content = content.to_string(),
            None => {
                self.index.insert(key, self.files.len());
                self.files.push(FileSnapshot::new(path, content));
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.index
            .get(&path_key(path))
            .map(|&i| self.files[i].content.as_str())
    }

    pub fn files(&self) -> &[FileSnapshot] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.index.clear();
    }

    /// User files in their order with tracked content substituted, then files only tools have seen.
    pub fn merged(&self, user_files: &[FileSnapshot]) -> Vec<FileSnapshot> {
        let mut seen = Vec::with_capacity(user_files.len());
        let mut merged: Vec<FileSnapshot> = user_files
            .iter()
            .map(|file| {
                let key = path_key(&file.path);
                let content = self.get(&key).unwrap_or(&file.content).to_string();
                seen.push(key);
                FileSnapshot::new(file.path.clone(), content)
            })
            .collect();
        merged.extend(
            self.files
                .iter()
                .filter(|f| !seen.contains(&path_key(&f.path)))
                .cloned(),
        );
        merged
    }
}
