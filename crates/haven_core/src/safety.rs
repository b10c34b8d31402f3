//! Bidirectional content safety screening
//!
//! Both the raw user message and the raw model completion pass
//! through a [`SafetyScreen`] before either is persisted verbatim or
//! shown to the other side. The verdict type carries the fail-closed
//! policy in its shape: `ClassifierUnavailable` exists as a verdict so
//! the routing layer can treat it exactly like `Crisis`, never like
//! `Clear`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which side of the exchange a span of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Raw user input, before any model call.
    Input,
    /// Raw model completion, before delivery.
    Output,
}

/// Category attached to non-clear verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    SelfHarm,
    Harassment,
    Distress,
    Unspecified,
}

/// Classification result for one span of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "category", rename_all = "snake_case")]
pub enum SafetyVerdict {
    /// Nothing concerning; the turn proceeds normally.
    Clear,
    /// Sensitive but non-crisis content; logged, turn proceeds.
    Flagged(SafetyCategory),
    /// Crisis signal; short-circuits to the fixed resource reply.
    Crisis(SafetyCategory),
    /// The classifier could not be reached after retries. Routed
    /// identically to `Crisis` (fail closed).
    ClassifierUnavailable,
}

impl SafetyVerdict {
    /// Whether the turn must take the crisis path instead of normal
    /// delivery. `ClassifierUnavailable` counts: an unevaluated span
    /// is never treated as safe.
    pub fn routes_to_crisis(&self) -> bool {
        matches!(
            self,
            SafetyVerdict::Crisis(_) | SafetyVerdict::ClassifierUnavailable
        )
    }

    pub fn category(&self) -> Option<SafetyCategory> {
        match self {
            SafetyVerdict::Flagged(c) | SafetyVerdict::Crisis(c) => Some(*c),
            _ => None,
        }
    }
}

/// Fixed resource-directory reply used whenever a turn is
/// crisis-routed, regardless of which direction the signal came from.
/// Never model-generated.
pub const CRISIS_RESOURCE_REPLY: &str = "I understand you might be going through a \
difficult time. Please consider talking to a trusted adult, or reach out right now: \
call or text 988 (Suicide & Crisis Lifeline), or text HOME to 741741 (Crisis Text \
Line). I'm still here if you want to keep writing.";

/// Content classifier over a single span of text.
///
/// Implementations may be rule-based, a local classifier, or a remote
/// moderation API, but the interface is pure: a fixed input yields the
/// same verdict. Errors are for transport failures only; the caller
/// converts them to `ClassifierUnavailable` after bounded retry.
#[async_trait]
pub trait SafetyScreen: Send + Sync {
    async fn classify(&self, text: &str, direction: Direction) -> Result<SafetyVerdict>;
}

/// Deterministic keyword classifier.
///
/// Carries the crisis phrase list the product shipped with, plus a
/// small distress list that flags without blocking. Matching is
/// case-insensitive substring, same on both directions.
#[derive(Debug, Default, Clone)]
pub struct KeywordScreen;

const CRISIS_PHRASES: &[&str] = &[
    "kill myself",
    "end it all",
    "hurt myself",
    "self harm",
    "self-harm",
    "suicide",
    "want to die",
    "cutting",
    "overdose",
];

const DISTRESS_PHRASES: &[&str] = &[
    "hopeless",
    "worthless",
    "hate myself",
    "so alone",
    "depressed",
    "panic attack",
];

const HARASSMENT_PHRASES: &[&str] = &["bullied", "bullying me", "threatening me"];

impl KeywordScreen {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SafetyScreen for KeywordScreen {
    async fn classify(&self, text: &str, direction: Direction) -> Result<SafetyVerdict> {
        let lowered = text.to_lowercase();

        if CRISIS_PHRASES.iter().any(|p| lowered.contains(p)) {
            tracing::warn!(?direction, "crisis signal detected");
            return Ok(SafetyVerdict::Crisis(SafetyCategory::SelfHarm));
        }
        if HARASSMENT_PHRASES.iter().any(|p| lowered.contains(p)) {
            tracing::debug!(?direction, "harassment signal flagged");
            return Ok(SafetyVerdict::Flagged(SafetyCategory::Harassment));
        }
        if DISTRESS_PHRASES.iter().any(|p| lowered.contains(p)) {
            tracing::debug!(?direction, "distress signal flagged");
            return Ok(SafetyVerdict::Flagged(SafetyCategory::Distress));
        }

        Ok(SafetyVerdict::Clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crisis_literal_is_crisis() {
        let screen = KeywordScreen::new();
        let verdict = screen
            .classify("I want to kill myself", Direction::Input)
            .await
            .unwrap();
        assert_eq!(verdict, SafetyVerdict::Crisis(SafetyCategory::SelfHarm));
        assert!(verdict.routes_to_crisis());
    }

    #[tokio::test]
    async fn ordinary_text_is_clear() {
        let screen = KeywordScreen::new();
        let verdict = screen
            .classify("had a pretty good day at school", Direction::Input)
            .await
            .unwrap();
        assert_eq!(verdict, SafetyVerdict::Clear);
        assert!(!verdict.routes_to_crisis());
    }

    #[tokio::test]
    async fn distress_flags_without_blocking() {
        let screen = KeywordScreen::new();
        let verdict = screen
            .classify("I feel hopeless about the exam", Direction::Input)
            .await
            .unwrap();
        assert_eq!(verdict, SafetyVerdict::Flagged(SafetyCategory::Distress));
        assert!(!verdict.routes_to_crisis());
    }

    #[tokio::test]
    async fn same_rules_apply_to_model_output() {
        let screen = KeywordScreen::new();
        let verdict = screen
            .classify("maybe you should hurt yourself less... self harm", Direction::Output)
            .await
            .unwrap();
        assert!(verdict.routes_to_crisis());
    }

    #[test]
    fn classifier_unavailable_never_routes_as_clear() {
        assert!(SafetyVerdict::ClassifierUnavailable.routes_to_crisis());
    }

    #[test]
    fn verdict_is_deterministic() {
        // Pure interface guarantee: same input, same verdict.
        let screen = KeywordScreen::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let a = rt
            .block_on(screen.classify("suicide", Direction::Input))
            .unwrap();
        let b = rt
            .block_on(screen.classify("suicide", Direction::Input))
            .unwrap();
        assert_eq!(a, b);
    }
}
