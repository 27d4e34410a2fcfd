// ABOUTME: Tool-tag grammar: <write_file>, <patch>, <replace>, <read_file>, <execute_command>, and media tags.
// ABOUTME: Provides a one-shot extractor and an incremental scanner that only rescans the unconsumed tail.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Attribute syntax: name="value", name='value', or a bare token like width=640.
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'/>]+))"#)
        .expect("attribute regex")
});

/// The fixed set of tool grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    WriteFile,
    Patch,
    Replace,
    ReadFile,
    ExecuteCommand,
    GenerateImage,
    ResizeImage,
    SaveAsset,
    Search,
}

impl TagKind {
    pub const ALL: [TagKind; 9] = [
        TagKind::WriteFile,
        TagKind::Patch,
        TagKind::Replace,
        TagKind::ReadFile,
        TagKind::ExecuteCommand,
        TagKind::GenerateImage,
        TagKind::ResizeImage,
        TagKind::SaveAsset,
        TagKind::Search,
    ];

    /// The tag name as written by agents.
    pub fn name(self) -> &'static str {
        match self {
            TagKind::WriteFile => "write_file",
            TagKind::Patch => "patch",
            TagKind::Replace => "replace",
            TagKind::ReadFile => "read_file",
            TagKind::ExecuteCommand => "execute_command",
            TagKind::GenerateImage => "generate_image",
            TagKind::ResizeImage => "resize_image",
            TagKind::SaveAsset => "save_asset",
            TagKind::Search => "search",
        }
    }

    /// Attribute-only tags close with `/>`; the rest carry a body and a closing tag.
    pub fn is_self_closing(self) -> bool {
        matches!(
            self,
            TagKind::GenerateImage | TagKind::ResizeImage | TagKind::SaveAsset | TagKind::Search
        )
    }

    fn open_delimiter(self) -> String {
        format!("<{}", self.name())
    }

    fn close_delimiter(self) -> String {
        format!("</{}>", self.name())
    }
}

/// Length of the longest opening delimiter, used to keep partial tags at the end of a chunk.
const MAX_OPEN_LEN: usize = "<execute_command".len() + 1;

/// A fully parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolTag {
    WriteFile {
        path: String,
        content: String,
    },
    Patch {
        path: String,
        body: String,
    },
    Replace {
        path: String,
        old: String,
        new: String,
    },
    ReadFile {
        path: String,
    },
    ExecuteCommand {
        command: String,
        background: bool,
    },
    GenerateImage {
        prompt: String,
        aspect_ratio: Option<String>,
    },
    ResizeImage {
        path: String,
        width: Option<u32>,
        height: Option<u32>,
        format: Option<String>,
    },
    SaveAsset {
        src: String,
        dest: String,
    },
    Search {
        query: String,
        kind: Option<String>,
    },
    /// A complete tag whose attributes or body could not be understood.
    Malformed {
        tag: String,
        reason: String,
    },
}

impl ToolTag {
    /// The tag name this invocation was written as.
    pub fn name(&self) -> &str {
        match self {
            ToolTag::WriteFile { .. } => TagKind::WriteFile.name(),
            ToolTag::Patch { .. } => TagKind::Patch.name(),
            ToolTag::Replace { .. } => TagKind::Replace.name(),
            ToolTag::ReadFile { .. } => TagKind::ReadFile.name(),
            ToolTag::ExecuteCommand { .. } => TagKind::ExecuteCommand.name(),
            ToolTag::GenerateImage { .. } => TagKind::GenerateImage.name(),
            ToolTag::ResizeImage { .. } => TagKind::ResizeImage.name(),
            ToolTag::SaveAsset { .. } => TagKind::SaveAsset.name(),
            ToolTag::Search { .. } => TagKind::Search.name(),
            ToolTag::Malformed { tag, .. } => tag,
        }
    }
}

/// A tag found in a buffer, with the byte range of its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub tag: ToolTag,
    pub start: usize,
    pub end: usize,
}

enum MatchState {
    Complete(TagMatch),
    Incomplete,
    /// The delimiter appeared in prose; no tag starts here.
    NotATag,
}

enum OpenEnd {
    At(usize),
    Pending,
    Broken,
}

/// Find the next opening delimiter of `kind` at or after `from`.
///
/// The delimiter must be followed by whitespace, `>`, `/`, or the end of the buffer
/// (a tag still being streamed), so `<patch` never matches `<patches`.
fn find_open(text: &str, kind: TagKind, from: usize) -> Option<usize> {
    let open = kind.open_delimiter();
    let mut offset = from;
    while let Some(found) = text[offset..].find(&open) {
        let pos = offset + found;
        match text[pos + open.len()..].chars().next() {
            None => return Some(pos),
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(pos),
            Some(_) => offset = pos + open.len(),
        }
    }
    None
}

/// Locate the `>` ending the opening tag that starts at `start`, skipping quoted values.
///
/// An unquoted `<` or newline before it means the delimiter was prose, not a tag.
fn find_open_end(text: &str, start: usize) -> OpenEnd {
    let mut in_quotes = false;
    for (i, c) in text[start..].char_indices().skip(1) {
        match c {
            '"' => in_quotes = !in_quotes,
            '>' if !in_quotes => return OpenEnd::At(start + i),
            '<' | '\n' if !in_quotes => return OpenEnd::Broken,
            _ => {}
        }
    }
    OpenEnd::Pending
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str())
                .unwrap_or("");
            (caps[1].to_lowercase(), value.to_string())
        })
        .collect()
}

/// Drop the single newline agents put right after an opening tag.
fn strip_leading_newline(body: &str) -> &str {
    body.strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body)
}

/// Drop one newline on each side of an `<old>`/`<new>` block.
fn strip_block(body: &str) -> String {
    let body = strip_leading_newline(body);
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
        .to_string()
}

fn inner_block<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = start + body[start..].find(&close)?;
    Some(&body[start..end])
}

fn malformed(kind: TagKind, reason: impl Into<String>) -> ToolTag {
    ToolTag::Malformed {
        tag: kind.name().to_string(),
        reason: reason.into(),
    }
}

fn required(attrs: &HashMap<String, String>, kind: TagKind, name: &str) -> Result<String, ToolTag> {
    match attrs.get(name).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(malformed(kind, format!("missing required attribute '{name}'"))),
    }
}

fn optional(attrs: &HashMap<String, String>, name: &str) -> Option<String> {
    attrs
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn dimension(attrs: &HashMap<String, String>, kind: TagKind, name: &str) -> Result<Option<u32>, ToolTag> {
    match optional(attrs, name) {
        None => Ok(None),
        Some(v) => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| malformed(kind, format!("attribute '{name}' must be a positive integer, got '{v}'"))),
    }
}

/// Build the typed invocation from raw attributes and body.
fn build_tag(kind: TagKind, attrs: &HashMap<String, String>, body: &str) -> ToolTag {
    try_build_tag(kind, attrs, body).unwrap_or_else(|malformed| malformed)
}

fn try_build_tag(kind: TagKind, attrs: &HashMap<String, String>, body: &str) -> Result<ToolTag, ToolTag> {
    Ok(match kind {
        TagKind::WriteFile => ToolTag::WriteFile {
            path: required(attrs, kind, "path")?,
            content: strip_leading_newline(body).to_string(),
        },
        TagKind::Patch => ToolTag::Patch {
            path: required(attrs, kind, "path")?,
            body: strip_leading_newline(body).to_string(),
        },
        TagKind::Replace => {
            let path = required(attrs, kind, "path")?;
            let old = inner_block(body, "old")
                .ok_or_else(|| malformed(kind, "missing <old>...</old> block"))?;
            let new = inner_block(body, "new")
                .ok_or_else(|| malformed(kind, "missing <new>...</new> block"))?;
            if old.trim().is_empty() {
                return Err(malformed(kind, "<old> block is empty"));
            }
            ToolTag::Replace {
                path,
                old: strip_block(old),
                new: strip_block(new),
            }
        }
        TagKind::ReadFile => {
            let path = optional(attrs, "path").unwrap_or_else(|| body.trim().to_string());
            if path.is_empty() {
                return Err(malformed(kind, "no path given"));
            }
            ToolTag::ReadFile { path }
        }
        TagKind::ExecuteCommand => {
            let command = body.trim().to_string();
            if command.is_empty() {
                return Err(malformed(kind, "no command given"));
            }
            let background = optional(attrs, "background")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            ToolTag::ExecuteCommand {
                command,
                background,
            }
        }
        TagKind::GenerateImage => ToolTag::GenerateImage {
            prompt: required(attrs, kind, "prompt")?,
            aspect_ratio: optional(attrs, "aspect_ratio"),
        },
        TagKind::ResizeImage => ToolTag::ResizeImage {
            path: required(attrs, kind, "path")?,
            width: dimension(attrs, kind, "width")?,
            height: dimension(attrs, kind, "height")?,
            format: optional(attrs, "format"),
        },
        TagKind::SaveAsset => ToolTag::SaveAsset {
            src: required(attrs, kind, "src")?,
            dest: required(attrs, kind, "dest")?,
        },
        TagKind::Search => ToolTag::Search {
            query: required(attrs, kind, "query")?,
            kind: optional(attrs, "type"),
        },
    })
}

/// Try to complete the tag of `kind` whose opening delimiter is at `start`.
fn match_at(text: &str, kind: TagKind, start: usize) -> MatchState {
    let open_end = match find_open_end(text, start) {
        OpenEnd::At(end) => end,
        OpenEnd::Pending => return MatchState::Incomplete,
        OpenEnd::Broken => return MatchState::NotATag,
    };
    let attr_start = start + kind.open_delimiter().len();
    let raw_attrs = text[attr_start..open_end].trim_end_matches('/');
    let attrs = parse_attributes(raw_attrs);
    let self_closed = text[..open_end].ends_with('/');

    if kind.is_self_closing() {
        let mut end = open_end + 1;
        // Tolerate an explicit closing tag right after the opening one.
        let close = kind.close_delimiter();
        let rest = &text[end..];
        let trimmed = rest.trim_start();
        if !self_closed && trimmed.starts_with(&close) {
            end += (rest.len() - trimmed.len()) + close.len();
        }
        return MatchState::Complete(TagMatch {
            tag: build_tag(kind, &attrs, ""),
            start,
            end,
        });
    }

    if self_closed {
        return MatchState::Complete(TagMatch {
            tag: malformed(kind, "tag has no body"),
            start,
            end: open_end + 1,
        });
    }

    let body_start = open_end + 1;
    let close = kind.close_delimiter();
    let Some(close_rel) = text[body_start..].find(&close) else {
        return MatchState::Incomplete;
    };
    let body_end = body_start + close_rel;
    MatchState::Complete(TagMatch {
        tag: build_tag(kind, &attrs, &text[body_start..body_end]),
        start,
        end: body_end + close.len(),
    })
}

/// Find the first complete tag of one grammar anywhere in `text`.
///
/// A tag whose closing delimiter has not arrived yet does not match.
pub fn find_tag(text: &str, kind: TagKind) -> Option<TagMatch> {
    let mut from = 0;
    while let Some(start) = find_open(text, kind, from) {
        match match_at(text, kind, start) {
            MatchState::Complete(m) => return Some(m),
            MatchState::Incomplete => return None,
            MatchState::NotATag => from = start + 1,
        }
    }
    None
}

/// Extract at most one match per grammar, ordered by position.
///
/// Tags nested inside an earlier match (for example a `<read_file>` quoted inside a
/// `<write_file>` body) are part of that match and are not reported separately.
pub fn parse_tool_tags(text: &str) -> Vec<TagMatch> {
    let mut found: Vec<TagMatch> = TagKind::ALL
        .iter()
        .filter_map(|kind| find_tag(text, *kind))
        .collect();
    found.sort_by_key(|m| m.start);

    let mut result: Vec<TagMatch> = Vec::with_capacity(found.len());
    for m in found {
        let nested = result.iter().any(|outer| m.start >= outer.start && m.end <= outer.end);
        if !nested {
            result.push(m);
        }
    }
    result
}

/// Incremental tag scanner over a streamed buffer.
///
/// Text before the scan cursor is known to hold no tag start and is dropped, so each
/// chunk only rescans from the earliest still-open tag (or a partial delimiter).
#[derive(Debug, Default)]
pub struct TagScanner {
    buffer: String,
    cursor: usize,
    /// Text already scanned past that belongs to no tag.
    prose: String,
}

impl TagScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Pop the next complete tag, removing its text from the buffer.
    pub fn next_tag(&mut self) -> Option<ToolTag> {
        loop {
            let earliest = TagKind::ALL
                .iter()
                .filter_map(|kind| find_open(&self.buffer, *kind, self.cursor).map(|pos| (pos, *kind)))
                .min_by_key(|(pos, _)| *pos);

            let Some((pos, kind)) = earliest else {
                self.cursor = self.resume_point();
                self.compact();
                return None;
            };

            match match_at(&self.buffer, kind, pos) {
                MatchState::Complete(m) => {
                    self.buffer.replace_range(m.start..m.end, "");
                    self.cursor = m.start;
                    self.compact();
                    // Keep text on either side of a removed tag from fusing into a marker.
                    self.prose.push('\n');
                    return Some(m.tag);
                }
                MatchState::Incomplete => {
                    self.cursor = pos;
                    self.compact();
                    return None;
                }
                MatchState::NotATag => self.cursor = pos + 1,
            }
        }
    }

    /// Drain every complete tag currently in the buffer.
    pub fn drain_tags(&mut self) -> Vec<ToolTag> {
        std::iter::from_fn(|| self.next_tag()).collect()
    }

    /// Text still held for future matching.
    pub fn pending(&self) -> &str {
        &self.buffer[self.cursor..]
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.prose.clear();
    }

    /// Everything pushed so far minus complete tags and any tag still left open.
    pub fn into_prose(mut self) -> String {
        let rest = &self.buffer[self.cursor..];
        let opens_tag = TagKind::ALL
            .iter()
            .any(|kind| find_open(rest, *kind, 0) == Some(0));
        let held = if opens_tag { &self.buffer[..self.cursor] } else { &self.buffer[..] };
        self.prose.push_str(held);
        self.prose
    }

    /// Keep a trailing `<` that could still grow into an opening delimiter.
    fn resume_point(&self) -> usize {
        match self.buffer[self.cursor..].rfind('<') {
            Some(rel) if self.buffer.len() - (self.cursor + rel) <= MAX_OPEN_LEN => {
                self.cursor + rel
            }
            _ => self.buffer.len(),
        }
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.prose.extend(self.buffer.drain(..self.cursor));
            self.cursor = 0;
        }
    }
}

/// The text of `text` outside tool tags: what the agent said, not what it wrote to files.
pub fn strip_tool_tags(text: &str) -> String {
    let mut scanner = TagScanner::new();
    scanner.push(text);
    scanner.drain_tags();
    scanner.into_prose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_with_body() {
        let text = "Creating it now.\n<write_file path=\"src/lib.rs\">\npub fn a() {}\n</write_file>\nDone.";
        let m = find_tag(text, TagKind::WriteFile).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::WriteFile {
                path: "src/lib.rs".to_string(),
                content: "pub fn a() {}\n".to_string(),
            }
        );
        assert_eq!(&text[m.start..m.end], "<write_file path=\"src/lib.rs\">\npub fn a() {}\n</write_file>");
    }

    #[test]
    fn incomplete_tag_does_not_match() {
        let text = "<write_file path=\"a.txt\">partial content";
        assert!(find_tag(text, TagKind::WriteFile).is_none());
        assert!(find_tag("<write_file path=\"a.t", TagKind::WriteFile).is_none());
    }

    #[test]
    fn replace_extracts_old_and_new() {
        let text = "<replace path=\"a.rs\">\n<old>\nlet x = 1;\n</old>\n<new>\nlet x = 2;\n</new>\n</replace>";
        let m = find_tag(text, TagKind::Replace).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::Replace {
                path: "a.rs".to_string(),
                old: "let x = 1;".to_string(),
                new: "let x = 2;".to_string(),
            }
        );
    }

    #[test]
    fn replace_without_old_block_is_malformed() {
        let text = "<replace path=\"a.rs\"><new>x</new></replace>";
        let m = find_tag(text, TagKind::Replace).unwrap();
        assert!(matches!(m.tag, ToolTag::Malformed { ref tag, .. } if tag == "replace"));
    }

    #[test]
    fn read_file_body_is_path() {
        let m = find_tag("<read_file> src/main.rs </read_file>", TagKind::ReadFile).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::ReadFile {
                path: "src/main.rs".to_string()
            }
        );
    }

    #[test]
    fn execute_command_background_flag() {
        let m = find_tag(
            "<execute_command background=\"true\">npm run dev</execute_command>",
            TagKind::ExecuteCommand,
        )
        .unwrap();
        assert_eq!(
            m.tag,
            ToolTag::ExecuteCommand {
                command: "npm run dev".to_string(),
                background: true,
            }
        );

        let m = find_tag("<execute_command>ls -la</execute_command>", TagKind::ExecuteCommand).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::ExecuteCommand {
                command: "ls -la".to_string(),
                background: false,
            }
        );
    }

    #[test]
    fn self_closing_media_tags() {
        let m = find_tag(
            "<generate_image prompt=\"a red fox\" aspect_ratio=\"16:9\" />",
            TagKind::GenerateImage,
        )
        .unwrap();
        assert_eq!(
            m.tag,
            ToolTag::GenerateImage {
                prompt: "a red fox".to_string(),
                aspect_ratio: Some("16:9".to_string()),
            }
        );

        let m = find_tag(
            "<resize_image path=\"img/fox.png\" width=640 height=360 format=\"webp\" />",
            TagKind::ResizeImage,
        )
        .unwrap();
        assert_eq!(
            m.tag,
            ToolTag::ResizeImage {
                path: "img/fox.png".to_string(),
                width: Some(640),
                height: Some(360),
                format: Some("webp".to_string()),
            }
        );

        let m = find_tag("<save_asset src=\"tmp/a.png\" dest=\"public/a.png\" />", TagKind::SaveAsset).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::SaveAsset {
                src: "tmp/a.png".to_string(),
                dest: "public/a.png".to_string(),
            }
        );

        let m = find_tag("<search query=\"tokio select\" type=\"web\" />", TagKind::Search).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::Search {
                query: "tokio select".to_string(),
                kind: Some("web".to_string()),
            }
        );
    }

    #[test]
    fn bad_dimension_is_malformed() {
        let m = find_tag("<resize_image path=\"a.png\" width=big />", TagKind::ResizeImage).unwrap();
        assert!(matches!(m.tag, ToolTag::Malformed { .. }));
    }

    #[test]
    fn open_delimiter_needs_boundary() {
        assert!(find_tag("<patches>x</patches>", TagKind::Patch).is_none());
    }

    #[test]
    fn parse_tool_tags_one_per_kind_in_order() {
        let text = "<read_file>b.rs</read_file> then <write_file path=\"a.rs\">x</write_file> and <read_file>c.rs</read_file>";
        let found = parse_tool_tags(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].tag, ToolTag::ReadFile { path: "b.rs".to_string() });
        assert!(matches!(found[1].tag, ToolTag::WriteFile { .. }));
    }

    #[test]
    fn parse_tool_tags_skips_nested_tags() {
        let text = "<write_file path=\"doc.md\">Use <read_file>x</read_file> to read.</write_file>";
        let found = parse_tool_tags(text);
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0].tag, ToolTag::WriteFile { .. }));
    }

    #[test]
    fn scanner_matches_across_chunks() {
        let mut scanner = TagScanner::new();
        scanner.push("Let me look. <read_");
        assert!(scanner.next_tag().is_none());
        scanner.push("file>src/ma");
        assert!(scanner.next_tag().is_none());
        scanner.push("in.rs</read_file> ok");
        assert_eq!(
            scanner.next_tag(),
            Some(ToolTag::ReadFile {
                path: "src/main.rs".to_string()
            })
        );
        assert!(scanner.next_tag().is_none());
    }

    #[test]
    fn scanner_yields_multiple_tags_in_order() {
        let mut scanner = TagScanner::new();
        scanner.push("<read_file>a</read_file><execute_command>ls</execute_command><read_file>b</read_file>");
        let tags = scanner.drain_tags();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], ToolTag::ReadFile { path: "a".to_string() });
        assert!(matches!(tags[1], ToolTag::ExecuteCommand { .. }));
        assert_eq!(tags[2], ToolTag::ReadFile { path: "b".to_string() });
    }

    #[test]
    fn scanner_drops_text_without_tags() {
        let mut scanner = TagScanner::new();
        scanner.push(&"plain prose ".repeat(100));
        assert!(scanner.next_tag().is_none());
        assert!(scanner.pending().is_empty());
    }

    #[test]
    fn scanner_keeps_partial_delimiter() {
        let mut scanner = TagScanner::new();
        scanner.push("some prose <exec");
        assert!(scanner.next_tag().is_none());
        assert_eq!(scanner.pending(), "<exec");
        scanner.push("ute_command>pwd</execute_command>");
        assert_eq!(
            scanner.next_tag(),
            Some(ToolTag::ExecuteCommand {
                command: "pwd".to_string(),
                background: false,
            })
        );
    }

    #[test]
    fn stray_opener_in_prose_does_not_swallow_the_next_tag() {
        let text = "Results look odd; x <search for more. <read_file>src/main.rs</read_file>";
        let mut scanner = TagScanner::new();
        scanner.push(text);
        assert_eq!(
            scanner.drain_tags(),
            vec![ToolTag::ReadFile {
                path: "src/main.rs".to_string()
            }]
        );

        let found = parse_tool_tags(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag.name(), "read_file");
    }

    #[test]
    fn stray_opener_then_real_tag_of_same_kind() {
        let text = "a <search\nthen <search query=\"tokio\" />";
        let m = find_tag(text, TagKind::Search).unwrap();
        assert_eq!(
            m.tag,
            ToolTag::Search {
                query: "tokio".to_string(),
                kind: None,
            }
        );
    }

    #[test]
    fn stray_opener_split_across_chunks() {
        let mut scanner = TagScanner::new();
        scanner.push("odd <search");
        assert!(scanner.next_tag().is_none());
        scanner.push(" for more. <read_file>a.rs</read_file>");
        assert_eq!(scanner.next_tag(), Some(ToolTag::ReadFile { path: "a.rs".to_string() }));
    }

    #[test]
    fn strip_tool_tags_keeps_only_prose() {
        let text = "Writing notes.\n<write_file path=\"NOTES.md\">Say [FINISH] when done.\n</write_file>\nWrote notes.";
        let prose = strip_tool_tags(text);
        assert!(!prose.contains("[FINISH]"));
        assert!(prose.contains("Writing notes."));
        assert!(prose.contains("Wrote notes."));
    }

    #[test]
    fn strip_tool_tags_drops_unclosed_tag_but_keeps_stray_text() {
        let prose = strip_tool_tags("Done <search for more. <write_file path=\"a\">[VERIFIED:1]");
        assert!(prose.starts_with("Done <search for more. "));
        assert!(!prose.contains("VERIFIED"));

        assert_eq!(strip_tool_tags("plain [COMPLETED:2]"), "plain [COMPLETED:2]");
    }

    #[test]
    fn scanner_holds_open_body_tag() {
        let mut scanner = TagScanner::new();
        scanner.push("intro <write_file path=\"a\">line one\n");
        assert!(scanner.next_tag().is_none());
        assert!(scanner.pending().starts_with("<write_file"));
        scanner.push("line two\n</write_file>");
        assert_eq!(
            scanner.next_tag(),
            Some(ToolTag::WriteFile {
                path: "a".to_string(),
                content: "line one\nline two\n".to_string(),
            })
        );
    }
}
