// ABOUTME: SEARCH/REPLACE patch bodies: parsing and in-order application with the anchor matcher.
// ABOUTME: Text outside the block markers is ignored so agents can annotate their patches.

use super::fuzzy::replace_once;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchBlock {
    pub search: String,
    pub replace: String,
}

enum State {
    Outside,
    Search(Vec<String>),
    Replace(String, Vec<String>),
}

fn is_search_marker(line: &str) -> bool {
    line.starts_with("<<<<<<<") && line.contains("SEARCH")
}

fn is_replace_marker(line: &str) -> bool {
    line.starts_with(">>>>>>>") && line.contains("REPLACE")
}

/// Parse every `<<<<<<< SEARCH / ======= / >>>>>>> REPLACE` block in a patch body.
pub fn parse_patch(body: &str) -> Result<Vec<PatchBlock>, String> {
    let mut blocks = Vec::new();
    let mut state = State::Outside;
    for line in body.lines() {
        let marker = line.trim();
        state = match state {
            State::Outside if is_search_marker(marker) => State::Search(Vec::new()),
            State::Outside => State::Outside,
            State::Search(lines) if marker == "=======" => State::Replace(lines.join("\n"), Vec::new()),
            State::Search(mut lines) => {
                lines.push(line.to_string());
                State::Search(lines)
            }
            State::Replace(search, lines) if is_replace_marker(marker) => {
                if search.trim().is_empty() {
                    return Err(format!("block {} has an empty SEARCH section", blocks.len() + 1));
                }
                blocks.push(PatchBlock {
                    search,
                    replace: lines.join("\n"),
                });
                State::Outside
            }
            State::Replace(search, mut lines) => {
                lines.push(line.to_string());
                State::Replace(search, lines)
            }
        };
    }
    match state {
        State::Outside if blocks.is_empty() => Err("no SEARCH/REPLACE blocks found".to_string()),
        State::Outside => Ok(blocks),
        _ => Err(format!("block {} is not terminated", blocks.len() + 1)),
    }
}

/// Apply blocks in order. On failure returns the 1-based number of the block that missed.
pub fn apply_patch(content: &str, blocks: &[PatchBlock]) -> Result<String, usize> {
    let mut current = content.to_string();
    for (i, block) in blocks.iter().enumerate() {
        current = replace_once(&current, &block.search, &block.replace).ok_or(i + 1)?;
    }
    Ok(current)
}
