//! Structured decision parsing for LLM filter responses.
//!
//! The model is asked for `{"match": bool, "explanation": string}`. Parsing
//! degrades in well-defined steps rather than failing, and the reserved
//! `ERROR:` / `WARNING:` explanation prefixes partition the result space for
//! downstream SQL filters.

use serde::Deserialize;

use crate::store::{ERROR_PREFIX, WARNING_PREFIX};

use super::llm::LlmError;

/// Keyword-fallback and excerpt cap for unparseable content.
const EXCERPT_CHARS: usize = 200;

/// One parsed filter decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the record matched.
    pub match_result: bool,
    /// Explanation text, possibly carrying a reserved prefix.
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
struct DecisionJson {
    #[serde(rename = "match")]
    match_result: bool,
    explanation: Option<String>,
}

/// Parses raw model output into a decision.
///
/// 1. Strict JSON: take `match` and the trimmed `explanation`.
/// 2. Empty explanation after step 1: replace with the missing-explanation
///    warning.
/// 3. Unparseable non-empty content: keyword heuristic (`"true"` and
///    `"match"` both present, case-insensitive) plus a 200-character excerpt.
/// 4. Unparseable empty content: warning as in step 2, with `match=false`.
#[must_use]
pub fn parse_decision(content: &str) -> Decision {
    let trimmed = content.trim();

    if let Ok(parsed) = serde_json::from_str::<DecisionJson>(trimmed) {
        let explanation = parsed
            .explanation
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        return Decision {
            match_result: parsed.match_result,
            explanation: if explanation.is_empty() {
                missing_explanation_warning(parsed.match_result)
            } else {
                explanation
            },
        };
    }

    if trimmed.is_empty() {
        return Decision {
            match_result: false,
            explanation: missing_explanation_warning(false),
        };
    }

    let lowered = trimmed.to_lowercase();
    Decision {
        match_result: lowered.contains("true") && lowered.contains("match"),
        explanation: trimmed.chars().take(EXCERPT_CHARS).collect(),
    }
}

/// Builds the decision for a model call that failed after every retry.
#[must_use]
pub fn decision_from_error(error: &LlmError) -> Decision {
    Decision {
        match_result: false,
        explanation: format!("{ERROR_PREFIX} {}: {error}", error.kind()),
    }
}

fn missing_explanation_warning(match_result: bool) -> String {
    format!("{WARNING_PREFIX} LLM returned match={match_result} without explanation")
}

/// Returns true for `ERROR:`-prefixed explanations.
#[must_use]
pub fn is_error_explanation(explanation: &str) -> bool {
    explanation.starts_with(ERROR_PREFIX)
}

/// Returns true for `WARNING:`-prefixed explanations.
#[must_use]
pub fn is_warning_explanation(explanation: &str) -> bool {
    explanation.starts_with(WARNING_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Strict JSON Tests ====================

    #[test]
    fn test_parse_clean_json() {
        let decision = parse_decision(r#"{"match": true, "explanation": "matches because x"}"#);
        assert!(decision.match_result);
        assert_eq!(decision.explanation, "matches because x");
    }

    #[test]
    fn test_parse_trims_explanation() {
        let decision = parse_decision(r#"{"match": false, "explanation": "  nope  "}"#);
        assert!(!decision.match_result);
        assert_eq!(decision.explanation, "nope");
    }

    #[test]
    fn test_parse_missing_explanation_warns() {
        let decision = parse_decision(r#"{"match": true}"#);
        assert!(decision.match_result);
        assert_eq!(
            decision.explanation,
            "WARNING: LLM returned match=true without explanation"
        );
    }

    #[test]
    fn test_parse_empty_explanation_warns() {
        let decision = parse_decision(r#"{"match": false, "explanation": "   "}"#);
        assert!(!decision.match_result);
        assert_eq!(
            decision.explanation,
            "WARNING: LLM returned match=false without explanation"
        );
    }

    #[test]
    fn test_parse_tolerates_extra_keys() {
        let decision =
            parse_decision(r#"{"match": true, "explanation": "ok", "confidence": 0.93}"#);
        assert!(decision.match_result);
        assert_eq!(decision.explanation, "ok");
    }

    // ==================== Fallback Tests ====================

    #[test]
    fn test_parse_prose_with_keywords_matches() {
        let decision = parse_decision("This is TRUE, the article is a clear match for the query.");
        assert!(decision.match_result);
        assert!(decision.explanation.starts_with("This is TRUE"));
    }

    #[test]
    fn test_parse_prose_without_keywords_rejects() {
        let decision = parse_decision("The article is about unrelated topics.");
        assert!(!decision.match_result);
    }

    #[test]
    fn test_parse_prose_excerpt_capped_at_200_chars() {
        let long = "match is true ".repeat(40);
        let decision = parse_decision(&long);
        assert!(decision.match_result);
        assert_eq!(decision.explanation.chars().count(), 200);
    }

    #[test]
    fn test_parse_empty_content_warns() {
        let decision = parse_decision("   ");
        assert!(!decision.match_result);
        assert_eq!(
            decision.explanation,
            "WARNING: LLM returned match=false without explanation"
        );
    }

    #[test]
    fn test_parse_missing_match_key_falls_back() {
        // Step 1 requires the match key; without it the heuristic runs.
        let decision = parse_decision(r#"{"explanation": "matches, true enough"}"#);
        assert!(decision.match_result, "heuristic sees 'true' and 'match'");
    }

    // ==================== Error Decision Tests ====================

    #[test]
    fn test_decision_from_error_shape() {
        let error = LlmError::Api {
            status: 429,
            message: "rate limited".to_string(),
        };
        let decision = decision_from_error(&error);
        assert!(!decision.match_result);
        assert!(decision.explanation.starts_with("ERROR: LlmApiError:"));
        assert!(decision.explanation.contains("429"));
    }

    #[test]
    fn test_prefix_predicates() {
        assert!(is_error_explanation("ERROR: LlmApiError: boom"));
        assert!(is_warning_explanation("WARNING: degraded"));
        assert!(!is_error_explanation("matches because"));
        assert!(!is_warning_explanation("matches because"));
    }
}
