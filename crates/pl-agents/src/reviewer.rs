//! The Reviewer Agent: one model pass over a diff, its change request and
//! its CI result, normalized into a [`ReviewVerdict`].
//!
//! The CI outcome is ground truth. The model's judgment can tighten the
//! verdict but never loosen it: an approval over a red gate is overruled
//! with one required fix per failing check.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use pl_core::types::{CiOutcome, ReviewVerdict};
use pl_intelligence::extract::extract_first_json;
use pl_intelligence::llm::{LlmConfig, LlmError, LlmMessage, LlmProvider};

use crate::prompts;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The completion did not contain the JSON object the prompt demands.
    #[error("malformed review response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

/// Shape the reviewer model is instructed to emit.
#[derive(Debug, Deserialize)]
struct ReviewJudgment {
    needs_changes: bool,
    #[serde(default)]
    summary_md: String,
    #[serde(default)]
    review_md: String,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

pub struct Reviewer {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
}

impl Reviewer {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    pub async fn review(
        &self,
        requirement: &str,
        diff: &str,
        ci: &CiOutcome,
    ) -> Result<ReviewVerdict> {
        let ci_summary = ci.summary_md();
        let messages = [
            LlmMessage::system(prompts::REVIEW_SYSTEM),
            LlmMessage::user(prompts::review_prompt(requirement, diff, &ci_summary)),
        ];
        let response = self.provider.complete(&messages, &self.llm).await?;

        let json = extract_first_json(&response.content)
            .ok_or_else(|| ReviewError::Malformed("no JSON object in completion".to_string()))?;
        let judgment: ReviewJudgment =
            serde_json::from_str(&json).map_err(|e| ReviewError::Malformed(e.to_string()))?;

        let verdict = reconcile(judgment, ci, ci_summary);
        info!(
            verdict = %verdict.verdict,
            fixes = verdict.required_fixes.len(),
            "review complete"
        );
        Ok(verdict)
    }
}

/// Fold the model's judgment and the CI result into one verdict.
fn reconcile(judgment: ReviewJudgment, ci: &CiOutcome, ci_summary: String) -> ReviewVerdict {
    let summary = if judgment.review_md.trim().is_empty() {
        judgment.summary_md
    } else {
        judgment.review_md
    };

    if judgment.needs_changes {
        return ReviewVerdict::request_changes(
            judgment.action_items,
            summary,
            ci_summary,
            judgment.confidence,
        );
    }
    if ci.passed() {
        return ReviewVerdict::approve(summary, ci_summary, judgment.confidence);
    }

    warn!(
        failing = ci.failing().len(),
        "approval overruled by failing CI"
    );
    let mut fixes: Vec<String> = ci
        .failing()
        .iter()
        .map(|check| {
            format!(
                "Make the `{}` CI check pass (currently exit {}).",
                check.name, check.exit_code
            )
        })
        .collect();
    fixes.extend(judgment.action_items);
    ReviewVerdict::request_changes(fixes, summary, ci_summary, judgment.confidence)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::types::{CiCheck, Verdict};
    use pl_intelligence::llm::MockProvider;

    const DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1 +1 @@
-old
+new
";

    fn check(name: &str, exit_code: i32) -> CiCheck {
        CiCheck {
            name: name.to_string(),
            exit_code,
            log_tail: String::new(),
        }
    }

    fn green_ci() -> CiOutcome {
        CiOutcome::new("a".repeat(40), vec![check("test", 0)])
    }

    fn reviewer_with(provider: MockProvider) -> Reviewer {
        Reviewer::new(Arc::new(provider), LlmConfig::default())
    }

    #[tokio::test]
    async fn approves_when_model_approves_and_ci_is_green() {
        let provider = MockProvider::new().with_response(
            r#"{"needs_changes": false, "summary_md": "Looks right.", "review_md": "Clean change.", "action_items": [], "confidence": 0.9}"#,
        );
        let reviewer = reviewer_with(provider);

        let verdict = reviewer.review("rename old to new", DIFF, &green_ci()).await.unwrap();
        assert_eq!(verdict.verdict, Verdict::Approve);
        assert!(verdict.required_fixes.is_empty());
        assert_eq!(verdict.summary, "Clean change.");
        assert!((verdict.confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn passes_action_items_through_on_request_changes() {
        let provider = MockProvider::new().with_response(
            r#"{"needs_changes": true, "summary_md": "s", "review_md": "Needs work.", "action_items": ["Handle the empty case in src/lib.rs", "Add a test for it"], "confidence": 0.7}"#,
        );
        let reviewer = reviewer_with(provider);

        let verdict = reviewer.review("req", DIFF, &green_ci()).await.unwrap();
        assert_eq!(verdict.verdict, Verdict::RequestChanges);
        assert_eq!(verdict.required_fixes.len(), 2);
        assert_eq!(verdict.required_fixes[0], "Handle the empty case in src/lib.rs");
    }

    #[tokio::test]
    async fn red_ci_overrules_an_approval() {
        let provider = MockProvider::new().with_response(
            r#"{"needs_changes": false, "summary_md": "Fine by me.", "review_md": "", "action_items": [], "confidence": 0.8}"#,
        );
        let reviewer = reviewer_with(provider);
        let ci = CiOutcome::new("b".repeat(40), vec![check("lint", 0), check("test", 2)]);

        let verdict = reviewer.review("req", DIFF, &ci).await.unwrap();
        assert_eq!(verdict.verdict, Verdict::RequestChanges);
        assert_eq!(verdict.required_fixes.len(), 1);
        assert!(verdict.required_fixes[0].contains("`test`"));
        assert!(verdict.required_fixes[0].contains("exit 2"));
        // review_md was empty, so the summary falls back to summary_md.
        assert_eq!(verdict.summary, "Fine by me.");
    }

    #[tokio::test]
    async fn model_rejection_over_red_ci_uses_model_fixes() {
        let provider = MockProvider::new().with_response(
            r#"{"needs_changes": true, "summary_md": "s", "review_md": "r", "action_items": ["Fix the failing assertion"], "confidence": 0.6}"#,
        );
        let reviewer = reviewer_with(provider);
        let ci = CiOutcome::new("c".repeat(40), vec![check("test", 1)]);

        let verdict = reviewer.review("req", DIFF, &ci).await.unwrap();
        assert_eq!(verdict.verdict, Verdict::RequestChanges);
        // needs_changes came from the model, so its items stand alone.
        assert_eq!(verdict.required_fixes, vec!["Fix the failing assertion"]);
        assert!(verdict.ci_summary.contains("fail (exit 1)"));
    }

    #[tokio::test]
    async fn prompt_carries_request_diff_and_ci_table() {
        let provider = MockProvider::new().with_response(
            r#"{"needs_changes": false, "summary_md": "ok", "review_md": "ok", "action_items": [], "confidence": 1.0}"#,
        );
        let handle = provider.clone();
        let reviewer = reviewer_with(provider);

        reviewer.review("rename old to new", DIFF, &green_ci()).await.unwrap();

        let captured = handle.captured_requests();
        assert_eq!(captured.len(), 1);
        let prompt = &captured[0].0[1].content;
        assert!(prompt.contains("rename old to new"));
        assert!(prompt.contains("-old"));
        assert!(prompt.contains("| test | pass |"));
    }

    #[tokio::test]
    async fn completion_without_json_is_malformed() {
        let provider = MockProvider::new().with_response("I approve of this change wholeheartedly.");
        let reviewer = reviewer_with(provider);

        let err = reviewer.review("req", DIFF, &green_ci()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Malformed(_)));
    }

    #[tokio::test]
    async fn json_missing_the_decision_is_malformed() {
        let provider =
            MockProvider::new().with_response(r#"{"summary_md": "no decision in here"}"#);
        let reviewer = reviewer_with(provider);

        let err = reviewer.review("req", DIFF, &green_ci()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Malformed(_)));
    }

    #[tokio::test]
    async fn provider_errors_pass_through() {
        let provider = MockProvider::new().with_error(LlmError::Timeout);
        let reviewer = reviewer_with(provider);

        let err = reviewer.review("req", DIFF, &green_ci()).await.unwrap_err();
        assert!(matches!(err, ReviewError::Llm(LlmError::Timeout)));
    }

    #[tokio::test]
    async fn omitted_optional_fields_default() {
        let provider = MockProvider::new().with_response(r#"{"needs_changes": true}"#);
        let reviewer = reviewer_with(provider);

        let verdict = reviewer.review("req", DIFF, &green_ci()).await.unwrap();
        assert_eq!(verdict.verdict, Verdict::RequestChanges);
        // An empty item list is backfilled with a generic one.
        assert_eq!(verdict.required_fixes.len(), 1);
        assert!((verdict.confidence - 0.5).abs() < 1e-6);
    }
}
