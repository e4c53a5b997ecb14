//! Prompt text for the Code Agent's two calls and the Reviewer's one.
//!
//! Pure string builders so tests can assert exactly what the models see.
//! Response shapes are pinned in the system prompts: file selection and
//! review judgment reply with a single JSON object, patch generation with
//! a single fenced diff; `pl-intelligence::extract` does the fishing-out.

// ---------------------------------------------------------------------------
// File selection
// ---------------------------------------------------------------------------

pub const SELECTION_SYSTEM: &str = "\
You select which files a code change needs to touch.

Given a change request and a listing of repository file paths, pick the
files most relevant to implementing the change. Prefer source files over
generated or vendored ones.

Respond with a single JSON object and nothing else:
{\"files\": [\"path/one\", \"path/two\"]}";

pub fn selection_prompt(requirement: &str, files: &[String], max_files: usize) -> String {
    let mut out = String::new();
    out.push_str("## Change request\n\n");
    out.push_str(requirement.trim());
    out.push_str("\n\n## Repository files\n\n");
    for file in files {
        out.push_str(file);
        out.push('\n');
    }
    out.push_str(&format!(
        "\nPick at most {max_files} files. Respond with the JSON object only.\n"
    ));
    out
}

// ---------------------------------------------------------------------------
// Patch generation
// ---------------------------------------------------------------------------

pub const PATCH_SYSTEM: &str = "\
You write minimal, focused code changes as unified diffs.

Rules:
1. Output exactly one fenced ```diff block containing a valid git-style
   unified diff (diff --git headers, ---/+++ file lines, @@ hunks).
2. Context lines must match the file contents you were shown, byte for
   byte. Do not invent surrounding code.
3. Keep the change as small as the request allows. No drive-by edits.
4. New files use /dev/null as the old side; deletions use it as the new.
5. Before the fence, write one line summarizing the change (this becomes
   the commit message). No other prose.";

pub fn patch_prompt(
    requirement: &str,
    selected: &[(String, String)],
    fixes: &[String],
    review_summary: Option<&str>,
    conflict_report: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str("## Change request\n\n");
    out.push_str(requirement.trim());
    out.push('\n');

    if !fixes.is_empty() {
        out.push_str("\n## Required fixes from the last review\n\n");
        for (i, fix) in fixes.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, fix));
        }
    }

    if let Some(summary) = review_summary {
        if !summary.trim().is_empty() {
            out.push_str("\n## Review summary\n\n");
            out.push_str(summary.trim());
            out.push('\n');
        }
    }

    if let Some(report) = conflict_report {
        out.push_str("\n## Your previous diff failed to apply\n\n");
        out.push_str(
            "The hunks below did not match the working tree. Regenerate the \
             whole diff against the file contents shown in this prompt.\n\n```\n",
        );
        out.push_str(report.trim_end());
        out.push_str("\n```\n");
    }

    if !selected.is_empty() {
        out.push_str("\n## Relevant files\n");
        for (path, content) in selected {
            out.push_str(&format!("\n### {path}\n\n```\n"));
            out.push_str(content.trim_end_matches('\n'));
            out.push_str("\n```\n");
        }
    }

    out.push_str("\nRespond with the one-line summary and the fenced diff.\n");
    out
}

// ---------------------------------------------------------------------------
// Review judgment
// ---------------------------------------------------------------------------

pub const REVIEW_SYSTEM: &str = "\
You review a proposed code change against its change request and its CI
result.

Judge whether the diff actually satisfies the request. A failing CI check
always requires changes, whatever the diff looks like. Be concrete: every
action item must name what to change and where.

Respond with a single JSON object and nothing else:
{
  \"needs_changes\": true or false,
  \"summary_md\": \"one-paragraph summary of the change\",
  \"review_md\": \"full review, markdown\",
  \"action_items\": [\"concrete fix, one per item\"],
  \"confidence\": 0.0 to 1.0
}";

pub fn review_prompt(requirement: &str, diff: &str, ci_summary: &str) -> String {
    let mut out = String::new();
    out.push_str("## Change request\n\n");
    out.push_str(requirement.trim());
    out.push_str("\n\n## CI result\n\n");
    out.push_str(ci_summary.trim_end());
    out.push_str("\n\n## Diff under review\n\n```diff\n");
    out.push_str(diff.trim_end_matches('\n'));
    out.push_str("\n```\n\nRespond with the JSON object only.\n");
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prompt_embeds_requirement_and_paths() {
        let files = vec!["src/lib.rs".to_string(), "src/config.rs".to_string()];
        let prompt = selection_prompt("Add a retry flag", &files, 8);
        assert!(prompt.contains("Add a retry flag"));
        assert!(prompt.contains("src/lib.rs"));
        assert!(prompt.contains("src/config.rs"));
        assert!(prompt.contains("at most 8 files"));
    }

    #[test]
    fn patch_prompt_embeds_fix_list_in_order() {
        let fixes = vec![
            "Handle empty input".to_string(),
            "Fix the failing unit test".to_string(),
        ];
        let prompt = patch_prompt("Original request", &[], &fixes, Some("Mostly fine."), None);
        assert!(prompt.contains("1. Handle empty input"));
        assert!(prompt.contains("2. Fix the failing unit test"));
        assert!(prompt.contains("Mostly fine."));
        let a = prompt.find("Handle empty input").unwrap();
        let b = prompt.find("Fix the failing unit test").unwrap();
        assert!(a < b);
    }

    #[test]
    fn patch_prompt_surfaces_conflict_report_verbatim() {
        let report = "src/main.rs @@ -3,4 +3,5 @@: context mismatch at line 3";
        let prompt = patch_prompt("req", &[], &[], None, Some(report));
        assert!(prompt.contains(report));
        assert!(prompt.contains("failed to apply"));
    }

    #[test]
    fn patch_prompt_inlines_selected_files() {
        let selected = vec![(
            "src/config.rs".to_string(),
            "pub struct Config;\n".to_string(),
        )];
        let prompt = patch_prompt("req", &selected, &[], None, None);
        assert!(prompt.contains("### src/config.rs"));
        assert!(prompt.contains("pub struct Config;"));
    }

    #[test]
    fn review_prompt_embeds_diff_and_ci() {
        let prompt = review_prompt(
            "Make it faster",
            "diff --git a/x b/x\n--- a/x\n+++ b/x\n",
            "| test | fail |",
        );
        assert!(prompt.contains("Make it faster"));
        assert!(prompt.contains("diff --git a/x b/x"));
        assert!(prompt.contains("| test | fail |"));
    }
}
