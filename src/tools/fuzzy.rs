// ABOUTME: Anchor matching for replace and patch: exact substring first, then a whitespace-tolerant line match.
// ABOUTME: The fuzzy match returns the original file text so the substitution keeps surrounding layout.

struct Line<'a> {
    start: usize,
    end: usize,
    trimmed: &'a str,
}

fn lines_with_offsets(content: &str) -> Vec<Line<'_>> {
    let mut offset = 0;
    content
        .split_inclusive('\n')
        .map(|raw| {
            let start = offset;
            offset += raw.len();
            let body = raw.strip_suffix('\n').unwrap_or(raw);
            let body = body.strip_suffix('\r').unwrap_or(body);
            Line {
                start,
                end: start + body.len(),
                trimmed: body.trim(),
            }
        })
        .collect()
}

/// Find `search` in `content`, comparing trimmed lines and skipping blank file lines.
///
/// Returns the byte range of the matched block, from the start of its first line to the
/// end of its last line (newline excluded).
pub fn fuzzy_find_range(content: &str, search: &str) -> Option<(usize, usize)> {
    let wanted: Vec<&str> = search
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let first = *wanted.first()?;
    let lines = lines_with_offsets(content);

    for (i, line) in lines.iter().enumerate() {
        if line.trimmed != first {
            continue;
        }
        let mut matched = 1;
        let mut last = i;
        let mut j = i + 1;
        while matched < wanted.len() && j < lines.len() {
            if lines[j].trimmed.is_empty() {
                j += 1;
                continue;
            }
            if lines[j].trimmed != wanted[matched] {
                break;
            }
            matched += 1;
            last = j;
            j += 1;
        }
        if matched == wanted.len() {
            return Some((line.start, lines[last].end));
        }
    }
    None
}

/// The original substring of `content` that fuzzily matches `search`.
pub fn fuzzy_find<'a>(content: &'a str, search: &str) -> Option<&'a str> {
    fuzzy_find_range(content, search).map(|(start, end)| &content[start..end])
}

/// Replace the first occurrence of `old` with `new`, falling back to the fuzzy matcher.
pub fn replace_once(content: &str, old: &str, new: &str) -> Option<String> {
    let (start, end) = match content.find(old) {
        Some(pos) if !old.is_empty() => (pos, pos + old.len()),
        _ => fuzzy_find_range(content, old)?,
    };
    let mut out = String::with_capacity(content.len() + new.len());
    out.push_str(&content[..start]);
    out.push_str(new);
    out.push_str(&content[end..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_keeps_original_layout() {
        let content = "  foo\n\nbar  ";
        assert_eq!(fuzzy_find(content, "foo\nbar"), Some("  foo\n\nbar  "));
    }

    #[test]
    fn fuzzy_ignores_indentation_differences() {
        let content = "fn main() {\n        let x = 1;\n        let y = 2;\n}\n";
        let found = fuzzy_find(content, "let x = 1;\nlet y = 2;").unwrap();
        assert_eq!(found, "        let x = 1;\n        let y = 2;");
    }

    #[test]
    fn fuzzy_fails_on_different_text() {
        assert_eq!(fuzzy_find("alpha\nbeta\n", "alpha\ngamma"), None);
        assert_eq!(fuzzy_find("alpha\n", "   \n"), None);
    }

    #[test]
    fn fuzzy_retries_later_anchor() {
        let content = "a\nx\na\nb\n";
        assert_eq!(fuzzy_find_range(content, "a\nb"), Some((4, 7)));
    }

    #[test]
    fn replace_prefers_exact_match() {
        let out = replace_once("let a = 1;\nlet a = 1;\n", "let a = 1;", "let a = 2;").unwrap();
        assert_eq!(out, "let a = 2;\nlet a = 1;\n");
    }

    #[test]
    fn replace_falls_back_to_fuzzy() {
        let content = "impl A {\n    fn f() {}\n}\n";
        let out = replace_once(content, "fn f() {}\n  }", "    fn g() {}\n}").unwrap();
        assert_eq!(out, "impl A {\n    fn g() {}\n}\n");
    }

    #[test]
    fn replace_without_match_is_none() {
        assert_eq!(replace_once("abc", "xyz", "q"), None);
    }
}
