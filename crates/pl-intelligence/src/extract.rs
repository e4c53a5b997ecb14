//! Pulling structured payloads out of free-form model output.
//!
//! Models wrap their answers in markdown fences, lead with prose, or
//! trail off with commentary. These extractors are forgiving on the
//! outside and strict on the inside: they locate the payload anywhere in
//! the text, then hand back only clean content.

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Extract the first JSON object from a completion.
///
/// A ```` ```json ```` fence wins; otherwise the first balanced `{...}`
/// in the text is taken, tracking string literals so braces inside them
/// do not confuse the scan. Returns `None` when no object is found. The
/// result is extracted, not validated; the caller still parses it.
pub fn extract_first_json(text: &str) -> Option<String> {
    if let Some(fenced) = fenced_block(text, &["json"]) {
        let trimmed = fenced.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    balanced_json_object(text)
}

fn balanced_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Unified diffs
// ---------------------------------------------------------------------------

/// Extract and sanitise a unified diff from a completion.
///
/// A ```` ```diff ```` or ```` ```patch ```` fence is preferred; failing
/// that, the scan starts at the first `diff --git` line (or a bare
/// `---`/`+++` pair). Carriage returns are stripped, prose lines between
/// and after file blocks are dropped, and the result always ends with a
/// newline. Returns `None` when nothing diff-shaped is present.
pub fn extract_unified_diff(text: &str) -> Option<String> {
    let candidate = fenced_block(text, &["diff", "patch"]).unwrap_or_else(|| text.to_string());
    let candidate = candidate.replace('\r', "");
    let kept = keep_diff_blocks(&candidate)?;
    Some(ensure_trailing_newline(kept))
}

/// Keep only the lines that belong to unified diff file blocks.
fn keep_diff_blocks(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut in_block = false;

    let has_git_header = lines.iter().any(|l| l.starts_with("diff --git "));
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let starts_block = if has_git_header {
            line.starts_with("diff --git ")
        } else {
            line.starts_with("--- ")
                && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "))
        };

        if starts_block {
            in_block = true;
            kept.push(line);
        } else if in_block {
            if is_diff_body_line(line) {
                kept.push(line);
            } else {
                in_block = false;
            }
        }
        i += 1;
    }

    // trailing blank lines are fence artifacts, not context
    while kept.last().is_some_and(|l| l.is_empty()) {
        kept.pop();
    }

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

fn is_diff_body_line(line: &str) -> bool {
    line.is_empty()
        || line.starts_with("index ")
        || line.starts_with("@@")
        || line.starts_with('+')
        || line.starts_with('-')
        || line.starts_with(' ')
        || line.starts_with('\\')
        || line.starts_with("new file mode")
        || line.starts_with("deleted file mode")
        || line.starts_with("old mode")
        || line.starts_with("new mode")
        || line.starts_with("similarity index")
        || line.starts_with("dissimilarity index")
        || line.starts_with("rename from")
        || line.starts_with("rename to")
        || line.starts_with("copy from")
        || line.starts_with("copy to")
        || line.starts_with("Binary files")
        || line.starts_with("GIT binary patch")
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Content of the first fence whose info string matches one of `tags`.
fn fenced_block(text: &str, tags: &[&str]) -> Option<String> {
    let mut content: Vec<&str> = Vec::new();
    let mut open = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if open {
            if trimmed.starts_with("```") {
                return Some(content.join("\n"));
            }
            content.push(line);
        } else if let Some(info) = trimmed.strip_prefix("```") {
            if tags.contains(&info.trim()) {
                open = true;
            }
        }
    }
    // an unterminated fence still counts; models forget to close them
    if open && !content.is_empty() {
        return Some(content.join("\n"));
    }
    None
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
