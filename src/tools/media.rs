// ABOUTME: Contracts for image generation, image resizing, and web search collaborators.
// ABOUTME: The dispatcher reports these tools as unavailable when no implementation is wired in.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

#[async_trait]
pub trait MediaService: Send + Sync {
    /// Generate an image and return the workspace-relative path it was saved to.
    async fn generate_image(&self, prompt: &str, aspect_ratio: Option<&str>) -> Result<String, ToolError>;

    /// Resize an image in place or into a new file; returns the output path.
    async fn resize_image(
        &self,
        path: &Path,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<&str>,
    ) -> Result<String, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str, kind: Option<&str>) -> Result<Vec<SearchHit>, ToolError>;
}

/// Render hits as a numbered list for the transcript.
pub fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results.".to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            if hit.snippet.is_empty() {
                format!("{}. {} <{}>", i + 1, hit.title, hit.url)
            } else {
                format!("{}. {} <{}>\n   {}", i + 1, hit.title, hit.url, hit.snippet)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
