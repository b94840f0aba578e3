//! Disease profile: the numbered fact list produced by the evidence stage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Target fact-count range for a well-formed profile.
pub const TARGET_FACTS_MIN: usize = 20;
/// Upper end of the target fact-count range.
pub const TARGET_FACTS_MAX: usize = 60;

/// A population-level disease profile: an ordered, numbered list of
/// evidence-grounded clinical facts (or explicit "not available" markers).
///
/// The profile is kept as raw text. Evidence provenance of individual facts
/// is a policy enforced by the generating stage's instructions, not a
/// property this type can verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseProfile {
    text: String,
}

impl DiseaseProfile {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Count lines that look like numbered facts ("1. ...", "2. ...").
    pub fn fact_count(&self) -> usize {
        self.text
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                let digits: &str = trimmed
                    .split('.')
                    .next()
                    .unwrap_or("");
                !digits.is_empty()
                    && digits.chars().all(|c| c.is_ascii_digit())
                    && trimmed.contains('.')
            })
            .count()
    }

    /// Whether the fact count falls inside the 20-60 target range.
    pub fn within_target_cardinality(&self) -> bool {
        (TARGET_FACTS_MIN..=TARGET_FACTS_MAX).contains(&self.fact_count())
    }

    /// Whether a terminology code appears verbatim anywhere in the profile.
    /// This is the provenance check for generated module codes.
    pub fn contains_code(&self, code: &str) -> bool {
        !code.is_empty() && self.text.contains(code)
    }
}

impl fmt::Display for DiseaseProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
