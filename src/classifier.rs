//! Submission response classifier
//!
//! The puzzle site answers a submission with an HTML page whose `<main>`
//! element holds one paragraph of prose. This module reduces that prose to a
//! [`SubmissionOutcome`].
//!
//! The classifier does NOT:
//! - Talk to the network
//! - Update persisted puzzle state

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Element holding the human-readable result
pub const DEFAULT_CONTENT_SELECTOR: &str = "main";

const CORRECT_PATTERN: &str = r"(?i)that's the right answer";
const INCORRECT_PATTERN: &str = r"(?i)that's not the right answer";
const WRONG_LEVEL_PATTERN: &str =
    r"(?i)you don't seem to be solving the right level|already complete it";
const RATE_LIMITED_PATTERN: &str = r"(?i)you gave an answer too recently|too many requests";
const WAIT_PATTERN: &str =
    r"(?i)you have\s+(?:(\d+)h\s*)?(?:(\d+)m\s*)?(?:(\d+)s\s*)?left to wait";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Unparseable response: {reason}")]
    UnparseableResponse { reason: String },
}

/// Meaning of a submission response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Correct { message: String },
    Incorrect { message: String },
    AlreadySolvedOrLocked { message: String },
    RateLimited {
        message: String,
        wait_until: DateTime<Utc>,
    },
    /// Recognized structure but unrecognized prose; callers treat this as an error
    Unparseable { raw_message: String },
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionOutcome::Correct { .. } => "correct",
            SubmissionOutcome::Incorrect { .. } => "incorrect",
            SubmissionOutcome::AlreadySolvedOrLocked { .. } => "already_solved_or_locked",
            SubmissionOutcome::RateLimited { .. } => "rate_limited",
            SubmissionOutcome::Unparseable { .. } => "unparseable",
        };
        write!(f, "{}", s)
    }
}

/// Raw TOML form of a cleanup rule
#[derive(Debug, Clone, Deserialize)]
pub struct RawCleanupRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

/// Find/replace applied to the extracted text
#[derive(Debug, Clone)]
pub struct CleanupRule {
    pattern: Regex,
    replacement: String,
}

impl CleanupRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Invalid cleanup pattern: {}", pattern))?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }

    fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

impl TryFrom<&RawCleanupRule> for CleanupRule {
    type Error = anyhow::Error;

    fn try_from(raw: &RawCleanupRule) -> Result<Self> {
        CleanupRule::new(&raw.pattern, raw.replacement.clone())
    }
}

/// Boilerplate stripped from every response, in order
pub fn default_cleanup_rules() -> Vec<RawCleanupRule> {
    [
        (r"\[Return to Day \d+\]", ""),
        (r"\[Return to Your Advent Calendar\]", ""),
        (r"\(You guessed .*?\.\)", ""),
        (r"\s+", " "),
    ]
    .into_iter()
    .map(|(pattern, replacement)| RawCleanupRule {
        pattern: pattern.to_string(),
        replacement: replacement.to_string(),
    })
    .collect()
}

struct OutcomePatterns {
    correct: Regex,
    incorrect: Regex,
    wrong_level: Regex,
    rate_limited: Regex,
    wait: Regex,
}

impl OutcomePatterns {
    fn compile() -> Result<Self> {
        Ok(Self {
            correct: Regex::new(CORRECT_PATTERN)?,
            incorrect: Regex::new(INCORRECT_PATTERN)?,
            wrong_level: Regex::new(WRONG_LEVEL_PATTERN)?,
            rate_limited: Regex::new(RATE_LIMITED_PATTERN)?,
            wait: Regex::new(WAIT_PATTERN)?,
        })
    }
}

/// Stateless classifier; the same body always yields the same outcome for a given `now`
pub struct ResponseClassifier {
    content: Selector,
    cleanup: Vec<CleanupRule>,
    patterns: OutcomePatterns,
}

impl ResponseClassifier {
    pub fn new(content_selector: &str, cleanup: Vec<CleanupRule>) -> Result<Self> {
        let content = Selector::parse(content_selector)
            .map_err(|e| anyhow!("Invalid content selector {}: {:?}", content_selector, e))?;
        Ok(Self {
            content,
            cleanup,
            patterns: OutcomePatterns::compile()?,
        })
    }

    pub fn with_default_rules() -> Result<Self> {
        let rules = default_cleanup_rules()
            .iter()
            .map(CleanupRule::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::new(DEFAULT_CONTENT_SELECTOR, rules)
    }

    pub fn classify(&self, response_body: &str) -> Result<SubmissionOutcome, ClassifyError> {
        self.classify_at(response_body, Utc::now())
    }

    /// Classify relative to `now`, which anchors rate-limit expirations
    pub fn classify_at(
        &self,
        response_body: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, ClassifyError> {
        let extracted = self.extract_text(response_body)?;
        let message = self.sanitize(&extracted);
        debug!("Sanitized submission response: {}", message);

        let patterns = &self.patterns;
        let outcome = if patterns.correct.is_match(&message) {
            SubmissionOutcome::Correct { message }
        } else if patterns.incorrect.is_match(&message) {
            SubmissionOutcome::Incorrect { message }
        } else if patterns.wrong_level.is_match(&message) {
            SubmissionOutcome::AlreadySolvedOrLocked { message }
        } else if patterns.rate_limited.is_match(&message) {
            let wait = self.parse_wait(&message).unwrap_or_else(TimeDelta::zero);
            SubmissionOutcome::RateLimited {
                wait_until: now + wait,
                message,
            }
        } else {
            SubmissionOutcome::Unparseable {
                raw_message: message,
            }
        };

        Ok(outcome)
    }

    /// Flattened text of the first content element
    fn extract_text(&self, response_body: &str) -> Result<String, ClassifyError> {
        let document = Html::parse_document(response_body);
        let element = document.select(&self.content).next().ok_or_else(|| {
            ClassifyError::UnparseableResponse {
                reason: "response has no primary content element".to_string(),
            }
        })?;

        let text = element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");

        if text.is_empty() {
            return Err(ClassifyError::UnparseableResponse {
                reason: "primary content element is empty".to_string(),
            });
        }
        Ok(text)
    }

    fn sanitize(&self, text: &str) -> String {
        self.cleanup
            .iter()
            .fold(text.to_string(), |acc, rule| rule.apply(&acc))
            .trim()
            .to_string()
    }

    fn parse_wait(&self, message: &str) -> Option<TimeDelta> {
        let captures = self.patterns.wait.captures(message)?;
        let unit = |idx: usize| -> Option<i64> {
            match captures.get(idx) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };
        let seconds = unit(1)?
            .checked_mul(3600)?
            .checked_add(unit(2)?.checked_mul(60)?)?
            .checked_add(unit(3)?)?;
        TimeDelta::try_seconds(seconds)
    }
}
