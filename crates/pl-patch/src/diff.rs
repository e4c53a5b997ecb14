//! Unified diff model and parser.
//!
//! The parser accepts what `git diff` emits plus the slightly sloppy
//! variants language models produce: missing hunk counts, header counts
//! that disagree with the body, stripped trailing whitespace on empty
//! context lines, and prose before the first file block. Body content is
//! authoritative: when header counts and body disagree, the counts are
//! recomputed from the body.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed patch at line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("binary patch at line {line} is not supported")]
    Binary { line: usize },

    #[error("no file changes found in patch text")]
    Empty,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One line of a hunk body. The stored string has the leading marker
/// character already removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl HunkLine {
    /// The line as it appears on the old side, if it does.
    pub fn old(&self) -> Option<&str> {
        match self {
            HunkLine::Context(s) | HunkLine::Remove(s) => Some(s),
            HunkLine::Add(_) => None,
        }
    }

    /// The line as it appears on the new side, if it does.
    pub fn new(&self) -> Option<&str> {
        match self {
            HunkLine::Context(s) | HunkLine::Add(s) => Some(s),
            HunkLine::Remove(_) => None,
        }
    }
}

/// One `@@` hunk. Starts are 1-based line numbers as in the wire format;
/// a start of 0 with count 0 denotes the position before the first line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    /// Trailing text after the closing `@@`, usually a function name.
    pub section: String,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    pub fn header(&self) -> String {
        let mut h = format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        );
        if !self.section.is_empty() {
            h.push(' ');
            h.push_str(&self.section);
        }
        h
    }

    pub fn old_lines(&self) -> Vec<&str> {
        self.lines.iter().filter_map(HunkLine::old).collect()
    }

    pub fn new_lines(&self) -> Vec<&str> {
        self.lines.iter().filter_map(HunkLine::new).collect()
    }

    pub fn additions(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, HunkLine::Add(_)))
            .count()
    }

    pub fn deletions(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, HunkLine::Remove(_)))
            .count()
    }
}

/// All changes to one file. `old_path` is `None` for created files,
/// `new_path` is `None` for deleted ones; both set but different means a
/// rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
    /// The old side's last line has no trailing newline.
    pub old_missing_newline: bool,
    /// The new side's last line has no trailing newline.
    pub new_missing_newline: bool,
}

impl FilePatch {
    pub fn is_create(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn is_delete(&self) -> bool {
        self.new_path.is_none()
    }

    pub fn is_rename(&self) -> bool {
        match (&self.old_path, &self.new_path) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        }
    }

    /// The path to report for this change: the new path when one exists.
    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("?")
    }
}

/// A parsed patch across any number of files, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub files: Vec<FilePatch>,
}

impl Patch {
    pub fn parse(text: &str) -> Result<Patch, ParseError> {
        Parser::new(text).run()
    }

    pub fn additions(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.hunks)
            .map(Hunk::additions)
            .sum()
    }

    pub fn deletions(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.hunks)
            .map(Hunk::deletions)
            .sum()
    }

    pub fn touched_paths(&self) -> Vec<&str> {
        self.files.iter().map(FilePatch::display_path).collect()
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
        }
    }

    fn run(mut self) -> Result<Patch, ParseError> {
        let mut files = Vec::new();
        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];
            if line.starts_with("diff --git ") {
                files.push(self.parse_file_block(true)?);
            } else if line.starts_with("--- ") && self.peek_is_new_file_header() {
                files.push(self.parse_file_block(false)?);
            } else {
                // Prose or junk between blocks; the sanitizer upstream
                // removes most of it, the parser skips the rest.
                self.pos += 1;
            }
        }
        if files.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(Patch { files })
    }

    fn peek_is_new_file_header(&self) -> bool {
        self.lines
            .get(self.pos + 1)
            .is_some_and(|l| l.starts_with("+++ "))
    }

    fn parse_file_block(&mut self, has_git_header: bool) -> Result<FilePatch, ParseError> {
        let mut old_path: Option<String> = None;
        let mut new_path: Option<String> = None;
        let mut create = false;
        let mut delete = false;
        let mut rename_from: Option<String> = None;
        let mut rename_to: Option<String> = None;

        if has_git_header {
            if let Some((old, new)) = split_diff_git_paths(self.lines[self.pos]) {
                old_path = Some(old);
                new_path = Some(new);
            }
            self.pos += 1;

            // extended header lines
            while self.pos < self.lines.len() {
                let line = self.lines[self.pos];
                if line.starts_with("new file mode") {
                    create = true;
                } else if line.starts_with("deleted file mode") {
                    delete = true;
                } else if let Some(p) = line.strip_prefix("rename from ") {
                    rename_from = Some(p.to_string());
                } else if let Some(p) = line.strip_prefix("rename to ") {
                    rename_to = Some(p.to_string());
                } else if line.starts_with("index ")
                    || line.starts_with("old mode")
                    || line.starts_with("new mode")
                    || line.starts_with("similarity index")
                    || line.starts_with("dissimilarity index")
                    || line.starts_with("copy from")
                    || line.starts_with("copy to")
                {
                    // metadata the engine does not act on
                } else if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
                    return Err(ParseError::Binary { line: self.pos + 1 });
                } else {
                    break;
                }
                self.pos += 1;
            }
        }

        // ---/+++ headers are authoritative for paths when present
        if self
            .lines
            .get(self.pos)
            .is_some_and(|l| l.starts_with("--- "))
        {
            let old_raw = clean_header_path(&self.lines[self.pos][4..]);
            if !self.peek_is_new_file_header() {
                return Err(ParseError::Malformed {
                    line: self.pos + 1,
                    message: "'---' header without matching '+++'".to_string(),
                });
            }
            let new_raw = clean_header_path(&self.lines[self.pos + 1][4..]);
            self.pos += 2;

            old_path = match old_raw.as_str() {
                "/dev/null" => None,
                p => Some(strip_prefix_component(p).to_string()),
            };
            new_path = match new_raw.as_str() {
                "/dev/null" => None,
                p => Some(strip_prefix_component(p).to_string()),
            };
        }

        if let Some(from) = rename_from {
            old_path = Some(from);
        }
        if let Some(to) = rename_to {
            new_path = Some(to);
        }
        if create {
            old_path = None;
        }
        if delete {
            new_path = None;
        }

        if old_path.is_none() && new_path.is_none() {
            return Err(ParseError::Malformed {
                line: self.pos,
                message: "file block with neither source nor target path".to_string(),
            });
        }

        let mut file = FilePatch {
            old_path,
            new_path,
            hunks: Vec::new(),
            old_missing_newline: false,
            new_missing_newline: false,
        };

        while self
            .lines
            .get(self.pos)
            .is_some_and(|l| l.starts_with("@@"))
        {
            let hunk = self.parse_hunk(&mut file)?;
            file.hunks.push(hunk);
        }

        Ok(file)
    }

    fn parse_hunk(&mut self, file: &mut FilePatch) -> Result<Hunk, ParseError> {
        let header_line_no = self.pos + 1;
        let header = self.lines[self.pos];
        let (old_start, header_old_count, new_start, header_new_count, section) =
            parse_hunk_header(header).ok_or_else(|| ParseError::Malformed {
                line: header_line_no,
                message: format!("unparseable hunk header '{header}'"),
            })?;
        self.pos += 1;

        let mut lines: Vec<HunkLine> = Vec::new();
        let mut old_seen = 0usize;
        let mut new_seen = 0usize;

        while self.pos < self.lines.len() {
            let raw = self.lines[self.pos];

            if let Some(rest) = raw.strip_prefix('\\') {
                // "\ No newline at end of file" refers to the preceding line
                let _ = rest;
                match lines.last() {
                    Some(HunkLine::Remove(_)) => file.old_missing_newline = true,
                    Some(HunkLine::Add(_)) => file.new_missing_newline = true,
                    Some(HunkLine::Context(_)) => {
                        file.old_missing_newline = true;
                        file.new_missing_newline = true;
                    }
                    None => {}
                }
                self.pos += 1;
                continue;
            }

            let counts_satisfied = old_seen >= header_old_count && new_seen >= header_new_count;
            if counts_satisfied && (raw.starts_with("@@") || raw.starts_with("diff --git")) {
                break;
            }

            let parsed = if let Some(rest) = raw.strip_prefix('+') {
                Some(HunkLine::Add(rest.to_string()))
            } else if let Some(rest) = raw.strip_prefix('-') {
                Some(HunkLine::Remove(rest.to_string()))
            } else if let Some(rest) = raw.strip_prefix(' ') {
                Some(HunkLine::Context(rest.to_string()))
            } else if raw.is_empty() {
                // models strip the single space from blank context lines
                Some(HunkLine::Context(String::new()))
            } else {
                None
            };

            let Some(line) = parsed else { break };
            if counts_satisfied {
                break;
            }
            match &line {
                HunkLine::Add(_) => new_seen += 1,
                HunkLine::Remove(_) => old_seen += 1,
                HunkLine::Context(_) => {
                    old_seen += 1;
                    new_seen += 1;
                }
            }
            lines.push(line);
            self.pos += 1;
        }

        if lines.is_empty() {
            return Err(ParseError::Malformed {
                line: header_line_no,
                message: "hunk has no body".to_string(),
            });
        }

        // the body is authoritative
        Ok(Hunk {
            old_start,
            old_count: old_seen,
            new_start,
            new_count: new_seen,
            section,
            lines,
        })
    }
}

// ---- internal helpers ----

/// Split `diff --git a/X b/Y` into the two paths. Quoted or
/// space-containing paths make this ambiguous; the `---`/`+++` headers
/// that follow override whatever this returns.
fn split_diff_git_paths(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("diff --git ")?;
    let idx = rest.find(" b/")?;
    let old_raw = unquote(&rest[..idx]);
    let new_raw = unquote(&rest[idx + 1..]);
    Some((
        strip_prefix_component(&old_raw).to_string(),
        strip_prefix_component(&new_raw).to_string(),
    ))
}

/// Strip the `a/` or `b/` prefix git puts on header paths.
fn strip_prefix_component(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Drop a traditional-diff timestamp (`\t2024-01-01 ...`) and quoting.
fn clean_header_path(raw: &str) -> String {
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    unquote(raw)
}

fn unquote(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        trimmed.to_string()
    }
}

/// Parse `@@ -l[,c] +l[,c] @@[ section]`. Counts default to 1.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize, String)> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let ranges = &rest[..end];
    let section = rest[end + 3..].trim_start().to_string();

    let mut parts = ranges.split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    if parts.next().is_some() {
        return None;
    }

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count, section))
}

fn parse_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1234567..89abcde 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn main() {
-    println!(\"hello\");
+    println!(\"hello, world\");
+    println!(\"bye\");
 }
";

    #[test]
    fn parse_simple_modify() {
        let patch = Patch::parse(SIMPLE).unwrap();
        assert_eq!(patch.files.len(), 1);
        let file = &patch.files[0];
        assert_eq!(file.old_path.as_deref(), Some("src/lib.rs"));
        assert_eq!(file.new_path.as_deref(), Some("src/lib.rs"));
        assert!(!file.is_create());
        assert!(!file.is_delete());
        assert_eq!(file.hunks.len(), 1);

        let hunk = &file.hunks[0];
        assert_eq!(hunk.old_start, 1);
        assert_eq!(hunk.old_count, 3);
        assert_eq!(hunk.new_start, 1);
        assert_eq!(hunk.new_count, 4);
        assert_eq!(hunk.additions(), 2);
        assert_eq!(hunk.deletions(), 1);
        assert_eq!(hunk.old_lines(), vec!["fn main() {", "    println!(\"hello\");", "}"]);
    }

    #[test]
    fn parse_create_via_dev_null() {
        let text = "\
diff --git a/NEW.md b/NEW.md
new file mode 100644
index 0000000..e69de29
--- /dev/null
+++ b/NEW.md
@@ -0,0 +1,2 @@
+# New
+content
";
        let patch = Patch::parse(text).unwrap();
        let file = &patch.files[0];
        assert!(file.is_create());
        assert_eq!(file.new_path.as_deref(), Some("NEW.md"));
        assert_eq!(file.hunks[0].new_lines(), vec!["# New", "content"]);
    }

    #[test]
    fn parse_delete() {
        let text = "\
diff --git a/old.txt b/old.txt
deleted file mode 100644
index e69de29..0000000
--- a/old.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-line one
-line two
";
        let patch = Patch::parse(text).unwrap();
        let file = &patch.files[0];
        assert!(file.is_delete());
        assert_eq!(file.old_path.as_deref(), Some("old.txt"));
        assert_eq!(file.hunks[0].old_lines(), vec!["line one", "line two"]);
    }

    #[test]
    fn parse_rename_with_content() {
        let text = "\
diff --git a/src/old_name.rs b/src/new_name.rs
similarity index 90%
rename from src/old_name.rs
rename to src/new_name.rs
--- a/src/old_name.rs
+++ b/src/new_name.rs
@@ -1,2 +1,2 @@
 fn f() {
-    1
+    2
";
        let patch = Patch::parse(text).unwrap();
        let file = &patch.files[0];
        assert!(file.is_rename());
        assert_eq!(file.old_path.as_deref(), Some("src/old_name.rs"));
        assert_eq!(file.new_path.as_deref(), Some("src/new_name.rs"));
    }

    #[test]
    fn parse_multiple_files() {
        let text = format!(
            "{}diff --git a/b.txt b/b.txt\n--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-x\n+y\n",
            SIMPLE
        );
        let patch = Patch::parse(&text).unwrap();
        assert_eq!(patch.files.len(), 2);
        assert_eq!(patch.touched_paths(), vec!["src/lib.rs", "b.txt"]);
        assert_eq!(patch.additions(), 3);
        assert_eq!(patch.deletions(), 2);
    }

    #[test]
    fn parse_without_git_header() {
        let text = "\
--- a/just.txt
+++ b/just.txt
@@ -1 +1 @@
-old
+new
";
        let patch = Patch::parse(text).unwrap();
        assert_eq!(patch.files[0].old_path.as_deref(), Some("just.txt"));
    }

    #[test]
    fn parse_counts_default_to_one() {
        let text = "\
--- a/x
+++ b/x
@@ -3 +3 @@
-a
+b
";
        let patch = Patch::parse(text).unwrap();
        let hunk = &patch.files[0].hunks[0];
        assert_eq!(hunk.old_start, 3);
        assert_eq!(hunk.old_count, 1);
        assert_eq!(hunk.new_count, 1);
    }

    #[test]
    fn body_overrides_lying_header_counts() {
        let text = "\
--- a/x
+++ b/x
@@ -1,9 +1,9 @@
 ctx
-a
+b
 ctx2
";
        let patch = Patch::parse(text).unwrap();
        let hunk = &patch.files[0].hunks[0];
        assert_eq!(hunk.old_count, 3);
        assert_eq!(hunk.new_count, 3);
    }

    #[test]
    fn blank_body_line_is_empty_context() {
        let text = "\
--- a/x
+++ b/x
@@ -1,3 +1,3 @@
 a

-b
+c
";
        let patch = Patch::parse(text).unwrap();
        let hunk = &patch.files[0].hunks[0];
        assert_eq!(hunk.lines[1], HunkLine::Context(String::new()));
    }

    #[test]
    fn no_newline_marker_sets_flags() {
        let text = "\
--- a/x
+++ b/x
@@ -1 +1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let patch = Patch::parse(text).unwrap();
        let file = &patch.files[0];
        assert!(file.old_missing_newline);
        assert!(file.new_missing_newline);
    }

    #[test]
    fn section_heading_survives_round_trip() {
        let text = "\
--- a/x
+++ b/x
@@ -10,2 +10,2 @@ fn compute()
 a
-b
+c
";
        let patch = Patch::parse(text).unwrap();
        let hunk = &patch.files[0].hunks[0];
        assert_eq!(hunk.section, "fn compute()");
        assert_eq!(hunk.header(), "@@ -10,2 +10,2 @@ fn compute()");
    }

    #[test]
    fn prose_around_blocks_is_skipped() {
        let text = format!("Here is the patch you asked for:\n\n{}\nHope that helps!\n", SIMPLE);
        let patch = Patch::parse(&text).unwrap();
        assert_eq!(patch.files.len(), 1);
    }

    #[test]
    fn timestamps_after_tab_are_stripped() {
        let text = "\
--- a/x.txt\t2024-01-01 10:00:00
+++ b/x.txt\t2024-01-02 10:00:00
@@ -1 +1 @@
-a
+b
";
        let patch = Patch::parse(text).unwrap();
        assert_eq!(patch.files[0].old_path.as_deref(), Some("x.txt"));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(Patch::parse(""), Err(ParseError::Empty)));
        assert!(matches!(Patch::parse("no diff here"), Err(ParseError::Empty)));
    }

    #[test]
    fn rejects_binary_patch() {
        let text = "\
diff --git a/logo.png b/logo.png
Binary files a/logo.png and b/logo.png differ
";
        assert!(matches!(Patch::parse(text), Err(ParseError::Binary { .. })));
    }

    #[test]
    fn rejects_hunk_without_body() {
        let text = "\
--- a/x
+++ b/x
@@ -1,2 +1,2 @@
";
        assert!(matches!(Patch::parse(text), Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn rejects_dangling_old_header() {
        let text = "diff --git a/x b/x\n--- a/x\nnot a header\n";
        assert!(matches!(Patch::parse(text), Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn quoted_paths_are_unquoted() {
        let text = "\
--- \"a/with space.txt\"
+++ \"b/with space.txt\"
@@ -1 +1 @@
-a
+b
";
        let patch = Patch::parse(text).unwrap();
        assert_eq!(patch.files[0].old_path.as_deref(), Some("with space.txt"));
    }
}
