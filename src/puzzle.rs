//! Puzzle identity types
//!
//! A puzzle attempt is identified by year, day and level. The record id
//! (`YYYYDDPP`) is the key under which submission history is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Days run from 1 to 25 every event
pub const FIRST_DAY: u8 = 1;
pub const LAST_DAY: u8 = 25;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PuzzleError {
    #[error("Day must be between {FIRST_DAY} and {LAST_DAY}, got {0}")]
    InvalidDay(u8),
    #[error("Level must be 1 or 2, got {0}")]
    InvalidLevel(u8),
}

/// Which half of a day's puzzle is being solved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Level {
    One,
    Two,
}

impl Level {
    pub const ALL: [Level; 2] = [Level::One, Level::Two];

    pub fn number(self) -> u8 {
        match self {
            Level::One => 1,
            Level::Two => 2,
        }
    }
}

impl TryFrom<u8> for Level {
    type Error = PuzzleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Level::One),
            2 => Ok(Level::Two),
            other => Err(PuzzleError::InvalidLevel(other)),
        }
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.number()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Immutable identity of a single puzzle attempt context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PuzzleCoordinate {
    pub year: u16,
    pub day: u8,
    pub level: Level,
}

impl PuzzleCoordinate {
    pub fn new(year: u16, day: u8, level: Level) -> Result<Self, PuzzleError> {
        validate_day(day)?;
        Ok(Self { year, day, level })
    }

    /// Composite persistence key: 4-digit year, 2-digit day, 2-digit part
    pub fn record_id(&self) -> String {
        format!("{:04}{:02}{:02}", self.year, self.day, self.level.number())
    }
}

impl fmt::Display for PuzzleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} day {} level {}", self.year, self.day, self.level)
    }
}

pub fn validate_day(day: u8) -> Result<u8, PuzzleError> {
    if (FIRST_DAY..=LAST_DAY).contains(&day) {
        Ok(day)
    } else {
        Err(PuzzleError::InvalidDay(day))
    }
}
