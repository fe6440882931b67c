//! Answer normalization
//!
//! Turns whatever a user solution returned into the canonical string that
//! gets submitted. Only finite numbers and strings are answers.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnswerError {
    #[error("Answer must be a finite number or a string, got {answer_type}")]
    TypeInvalid { answer_type: String },
    #[error("Answer is empty")]
    Empty,
}

/// Value returned by a solution function, as seen from outside the engine
#[derive(Debug, Clone, PartialEq)]
pub enum RawAnswer {
    Number(f64),
    Text(String),
    /// Any other runtime type, carrying its type name
    Unsupported(String),
}

impl RawAnswer {
    pub fn type_name(&self) -> String {
        match self {
            RawAnswer::Number(n) if n.is_nan() => "number (NaN)".to_string(),
            RawAnswer::Number(n) if n.is_infinite() => "number (Infinity)".to_string(),
            RawAnswer::Number(_) => "number".to_string(),
            RawAnswer::Text(_) => "string".to_string(),
            RawAnswer::Unsupported(name) => name.clone(),
        }
    }

    /// Type check only; emptiness is left to [`Answer::normalize`].
    pub fn into_answer(self) -> Result<Answer, AnswerError> {
        match self {
            RawAnswer::Number(n) if n.is_finite() => Ok(Answer::Number(n)),
            RawAnswer::Text(s) => Ok(Answer::Text(s)),
            other => Err(AnswerError::TypeInvalid {
                answer_type: other.type_name(),
            }),
        }
    }
}

/// An answer of valid type, as carried across the worker boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Number(f64),
    Text(String),
}

impl Answer {
    pub fn normalize(&self) -> Result<String, AnswerError> {
        match self {
            Answer::Number(n) => Ok(format_number(*n)),
            Answer::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Err(AnswerError::Empty)
                } else {
                    Ok(trimmed.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Number(n) => write!(f, "{}", format_number(*n)),
            Answer::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<Answer> for RawAnswer {
    fn from(answer: Answer) -> Self {
        match answer {
            Answer::Number(n) => RawAnswer::Number(n),
            Answer::Text(s) => RawAnswer::Text(s),
        }
    }
}

/// Validate a returned value and produce the submittable string
pub fn validate_and_normalize(raw: RawAnswer) -> Result<String, AnswerError> {
    raw.into_answer()?.normalize()
}

/// Decimal form matching how the puzzle site expects numbers (JavaScript `toString`)
fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let formatted = format!("{:e}", n);
        match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        }
    } else {
        n.to_string()
    }
}
