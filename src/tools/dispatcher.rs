// ABOUTME: Tool dispatcher: runs parsed tool tags behind the approval gate and returns dual-audience results.
// ABOUTME: Exposes one atomic operation per tool plus the legacy batch mode over a completed response.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, ApprovalEngine, Proposal, ProposalKind};
use crate::error::ToolError;
use crate::fs::FileService;
use crate::parser::{TagScanner, ToolTag};

use super::fuzzy::replace_once;
use super::media::{MediaService, SearchService, render_hits};
use super::patch::{apply_patch, parse_patch};
use super::process::{BackgroundStart, CommandOutput, ProcessManager};
use super::types::{StructuredAction, ToolResult};

/// Command output beyond this many characters is cut from the front.
const MAX_OUTPUT_CHARS: usize = 16_000;

fn truncate_front(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...[{} characters truncated]...\n{tail}", count - max_chars)
}

fn line_count(text: &str) -> usize {
    text.lines().count()
}

pub struct ToolDispatcher {
    files: Arc<dyn FileService>,
    approvals: Arc<ApprovalEngine>,
    processes: ProcessManager,
    media: Option<Arc<dyn MediaService>>,
    search: Option<Arc<dyn SearchService>>,
}

impl ToolDispatcher {
    pub fn new(files: Arc<dyn FileService>, approvals: Arc<ApprovalEngine>, processes: ProcessManager) -> Self {
        Self {
            files,
            approvals,
            processes,
            media: None,
            search: None,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaService>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    /// Put a proposal through the approval engine. Returns reviewer-edited content, if any.
    async fn gate(&self, proposal: Proposal) -> Result<Option<String>, ToolError> {
        match self.approvals.review(proposal).await {
            ApprovalDecision::Accept { edited } => Ok(edited),
            ApprovalDecision::AcceptAlways => Ok(None),
            ApprovalDecision::Reject { reason } => Err(ToolError::Rejected(reason)),
        }
    }

    /// Execute one parsed tag.
    pub async fn dispatch(&self, tag: &ToolTag) -> ToolResult {
        debug!(tool = tag.name(), "dispatching tool");
        match tag {
            ToolTag::WriteFile { path, content } => self.write_file(path, content).await,
            ToolTag::Patch { path, body } => self.patch_file(path, body).await,
            ToolTag::Replace { path, old, new } => self.replace_in_file(path, old, new).await,
            ToolTag::ReadFile { path } => self.read_file(path).await,
            ToolTag::ExecuteCommand {
                command,
                background,
            } => self.execute_command(command, *background).await,
            ToolTag::GenerateImage {
                prompt,
                aspect_ratio,
            } => self.generate_image(prompt, aspect_ratio.as_deref()).await,
            ToolTag::ResizeImage {
                path,
                width,
                height,
                format,
            } => self.resize_image(path, *width, *height, format.as_deref()).await,
            ToolTag::SaveAsset { src, dest } => self.save_asset(src, dest).await,
            ToolTag::Search { query, kind } => self.search(query, kind.as_deref()).await,
            ToolTag::Malformed { tag, reason } => {
                warn!(tag = %tag, reason = %reason, "malformed tool tag");
                ToolResult::error(
                    tag,
                    &ToolError::Malformed {
                        tag: tag.clone(),
                        reason: reason.clone(),
                    },
                )
            }
        }
    }

    /// Legacy mode: run every tag in a completed response, in order.
    pub async fn execute_batch(&self, text: &str) -> Vec<ToolResult> {
        let mut scanner = TagScanner::new();
        scanner.push(text);
        let mut results = Vec::new();
        for tag in scanner.drain_tags() {
            results.push(self.dispatch(&tag).await);
        }
        results
    }

    pub async fn write_file(&self, path: &str, content: &str) -> ToolResult {
        self.try_write_file(path, content)
            .await
            .unwrap_or_else(|e| ToolResult::error("write_file", &e))
    }

    async fn try_write_file(&self, path: &str, content: &str) -> Result<ToolResult, ToolError> {
        let original = if self.files.exists(path).await {
            self.files.read_to_string(path).await?
        } else {
            String::new()
        };
        let proposal = Proposal::new(ProposalKind::WriteFile, Some(path.to_string()), original, content);
        let content = self.gate(proposal).await?.unwrap_or_else(|| content.to_string());
        self.files.write(path, &content).await?;
        info!(path, bytes = content.len(), "wrote file");
        Ok(ToolResult::ok(
            format!("[write_file] wrote {path} ({} lines)", line_count(&content)),
            format!("Wrote {path}"),
        )
        .with_action(StructuredAction::FileWritten {
            path: path.to_string(),
            content,
        }))
    }

    pub async fn replace_in_file(&self, path: &str, old: &str, new: &str) -> ToolResult {
        self.try_replace(path, old, new)
            .await
            .unwrap_or_else(|e| ToolResult::error("replace", &e))
    }

    async fn try_replace(&self, path: &str, old: &str, new: &str) -> Result<ToolResult, ToolError> {
        let current = self.files.read_to_string(path).await?;
        let updated = replace_once(&current, old, new).ok_or_else(|| ToolError::NoMatch(path.to_string()))?;
        self.commit_edit(ProposalKind::Replace, path, current, updated, "replace")
            .await
    }

    pub async fn patch_file(&self, path: &str, body: &str) -> ToolResult {
        self.try_patch(path, body)
            .await
            .unwrap_or_else(|e| ToolResult::error("patch", &e))
    }

    async fn try_patch(&self, path: &str, body: &str) -> Result<ToolResult, ToolError> {
        let blocks = parse_patch(body).map_err(|reason| ToolError::Malformed {
            tag: "patch".to_string(),
            reason,
        })?;
        let current = self.files.read_to_string(path).await?;
        let updated = apply_patch(&current, &blocks)
            .map_err(|block| ToolError::NoMatch(format!("{path} (block {block})")))?;
        self.commit_edit(ProposalKind::Patch, path, current, updated, "patch")
            .await
    }

    /// Shared tail of replace and patch: approve the edited file and write it.
    async fn commit_edit(
        &self,
        kind: ProposalKind,
        path: &str,
        original: String,
        updated: String,
        tool: &str,
    ) -> Result<ToolResult, ToolError> {
        let proposal = Proposal::new(kind, Some(path.to_string()), original, updated.clone());
        let content = self.gate(proposal).await?.unwrap_or(updated);
        self.files.write(path, &content).await?;
        info!(path, tool, "edited file");
        Ok(ToolResult::ok(format!("[{tool}] updated {path}"), format!("Updated {path}"))
            .with_action(StructuredAction::FileWritten {
                path: path.to_string(),
                content,
            }))
    }

    pub async fn read_file(&self, path: &str) -> ToolResult {
        self.try_read_file(path)
            .await
            .unwrap_or_else(|e| ToolResult::error("read_file", &e))
    }

    async fn try_read_file(&self, path: &str) -> Result<ToolResult, ToolError> {
        self.gate(Proposal::new(ProposalKind::ReadFile, Some(path.to_string()), "", ""))
            .await?;
        let content = self.files.read_to_string(path).await?;
        Ok(ToolResult::ok(
            format!("[read_file] {path}:\n```\n{content}\n```"),
            format!("Read {path} ({} lines)", line_count(&content)),
        )
        .with_action(StructuredAction::FileRead {
            path: path.to_string(),
            content,
        }))
    }

    pub async fn execute_command(&self, command: &str, background: bool) -> ToolResult {
        self.try_execute(command, background)
            .await
            .unwrap_or_else(|e| ToolResult::error("execute_command", &e))
    }

    async fn try_execute(&self, command: &str, background: bool) -> Result<ToolResult, ToolError> {
        let proposal = Proposal::new(ProposalKind::ExecuteCommand, None, "", command);
        let command = self.gate(proposal).await?.unwrap_or_else(|| command.to_string());

        if !background {
            let output = self.processes.run_foreground(&command).await?;
            return Ok(finished_result(&command, &output));
        }
        match self.processes.start_background(&command).await? {
            BackgroundStart::Running { pid } => Ok(ToolResult::ok(
                format!("[execute_command] `{command}` is running in the background"),
                format!("Started `{command}` in the background"),
            )
            .with_action(StructuredAction::ProcessStarted { command, pid })),
            BackgroundStart::Exited(output) => Ok(finished_result(&command, &output)),
        }
    }

    /// Kill the tracked background process, if one is running.
    pub async fn stop_process(&self) -> ToolResult {
        match self.processes.stop().await {
            Some(stopped) => ToolResult::ok(
                format!(
                    "[stop_process] stopped `{}`. Last output:\n{}",
                    stopped.command,
                    truncate_front(&stopped.output_tail, MAX_OUTPUT_CHARS)
                ),
                format!("Stopped `{}`", stopped.command),
            )
            .with_action(StructuredAction::ProcessStopped {
                command: stopped.command,
            }),
            None => ToolResult::ok(
                "[stop_process] no background process is running",
                "No background process is running",
            ),
        }
    }

    pub async fn generate_image(&self, prompt: &str, aspect_ratio: Option<&str>) -> ToolResult {
        self.try_generate_image(prompt, aspect_ratio)
            .await
            .unwrap_or_else(|e| ToolResult::error("generate_image", &e))
    }

    async fn try_generate_image(&self, prompt: &str, aspect_ratio: Option<&str>) -> Result<ToolResult, ToolError> {
        let media = self.media.as_ref().ok_or(ToolError::Unavailable("image generation"))?;
        let proposal = Proposal::new(ProposalKind::GenerateImage, None, "", prompt);
        let prompt = self.gate(proposal).await?.unwrap_or_else(|| prompt.to_string());
        let path = media.generate_image(&prompt, aspect_ratio).await?;
        info!(path = %path, "generated image");
        Ok(ToolResult::ok(
            format!("[generate_image] saved image to {path}"),
            format!("Generated image {path}"),
        )
        .with_action(StructuredAction::ImageGenerated { path }))
    }

    pub async fn resize_image(
        &self,
        path: &str,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<&str>,
    ) -> ToolResult {
        self.try_resize_image(path, width, height, format)
            .await
            .unwrap_or_else(|e| ToolResult::error("resize_image", &e))
    }

    async fn try_resize_image(
        &self,
        path: &str,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<&str>,
    ) -> Result<ToolResult, ToolError> {
        let media = self.media.as_ref().ok_or(ToolError::Unavailable("image resizing"))?;
        let target = format!(
            "{}x{}{}",
            width.map(|w| w.to_string()).unwrap_or_else(|| "auto".into()),
            height.map(|h| h.to_string()).unwrap_or_else(|| "auto".into()),
            format.map(|f| format!(" {f}")).unwrap_or_default()
        );
        self.gate(Proposal::new(ProposalKind::ResizeImage, Some(path.to_string()), "", target))
            .await?;
        let full = self.files.resolve(path)?;
        let output = media.resize_image(&full, width, height, format).await?;
        Ok(ToolResult::ok(
            format!("[resize_image] resized {path} to {output}"),
            format!("Resized {path}"),
        )
        .with_action(StructuredAction::ImageResized { path: output }))
    }

    pub async fn save_asset(&self, src: &str, dest: &str) -> ToolResult {
        self.try_save_asset(src, dest)
            .await
            .unwrap_or_else(|e| ToolResult::error("save_asset", &e))
    }

    async fn try_save_asset(&self, src: &str, dest: &str) -> Result<ToolResult, ToolError> {
        let proposal = Proposal::new(ProposalKind::SaveAsset, Some(dest.to_string()), src, dest);
        let dest = self.gate(proposal).await?.unwrap_or_else(|| dest.to_string());
        self.files.copy(src, &dest).await?;
        Ok(ToolResult::ok(
            format!("[save_asset] copied {src} to {dest}"),
            format!("Saved {dest}"),
        )
        .with_action(StructuredAction::AssetSaved { dest }))
    }

    pub async fn search(&self, query: &str, kind: Option<&str>) -> ToolResult {
        self.try_search(query, kind)
            .await
            .unwrap_or_else(|e| ToolResult::error("search", &e))
    }

    async fn try_search(&self, query: &str, kind: Option<&str>) -> Result<ToolResult, ToolError> {
        let search = self.search.as_ref().ok_or(ToolError::Unavailable("web search"))?;
        self.gate(Proposal::new(ProposalKind::Search, None, "", query))
            .await?;
        let hits = search.search(query, kind).await?;
        Ok(ToolResult::ok(
            format!("[search] results for \"{query}\":\n{}", render_hits(&hits)),
            format!("Searched \"{query}\" ({} results)", hits.len()),
        )
        .with_action(StructuredAction::SearchCompleted {
            query: query.to_string(),
            results: hits.len(),
        }))
    }
}

fn finished_result(command: &str, output: &CommandOutput) -> ToolResult {
    let code = output
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string());
    let combined = truncate_front(&output.combined(), MAX_OUTPUT_CHARS);
    let mut result = ToolResult::ok(
        format!("[execute_command] `{command}` exited with code {code}:\n{combined}"),
        format!("`{command}` exited with code {code}"),
    )
    .with_action(StructuredAction::CommandFinished {
        command: command.to_string(),
        exit_code: output.exit_code,
    });
    result.is_error = !output.success();
    result
}
