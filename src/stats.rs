//! Progress table for one event year

use std::collections::HashMap;
use std::fmt::Write;

use crate::puzzle::{Level, PuzzleCoordinate, FIRST_DAY, LAST_DAY};
use crate::store::PersistedPuzzleRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelStatus {
    Solved,
    /// Only incorrect answers so far
    Attempted,
    Untouched,
}

impl LevelStatus {
    pub fn of(record: Option<&PersistedPuzzleRecord>) -> Self {
        match record {
            Some(r) if r.is_solved() => LevelStatus::Solved,
            Some(r) if !r.incorrect_answers.is_empty() => LevelStatus::Attempted,
            _ => LevelStatus::Untouched,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            LevelStatus::Solved => "*",
            LevelStatus::Attempted => "x",
            LevelStatus::Untouched => ".",
        }
    }
}

/// Human-readable duration with three significant digits
pub fn format_duration(ns: u64) -> String {
    let value = ns as f64;
    if ns < 1_000 {
        format!("{} ns", ns)
    } else if ns < 1_000_000 {
        format!("{:.2} µs", value / 1e3)
    } else if ns < 1_000_000_000 {
        format!("{:.2} ms", value / 1e6)
    } else {
        format!("{:.2} s", value / 1e9)
    }
}

/// Render the completion table for `year` from all known records
pub fn render(year: u16, records: &[PersistedPuzzleRecord]) -> String {
    let by_id: HashMap<&str, &PersistedPuzzleRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut out = String::new();
    let _ = writeln!(out, "Advent of Code {}", year);
    let _ = writeln!(
        out,
        "{:>3}  {:^5} {:>10}  {:^5} {:>10}",
        "Day", "L1", "Time", "L2", "Time"
    );

    let mut solved = 0;
    for day in FIRST_DAY..=LAST_DAY {
        let mut row = format!("{:>3}", day);
        for level in Level::ALL {
            let record = PuzzleCoordinate::new(year, day, level)
                .ok()
                .and_then(|c| by_id.get(c.record_id().as_str()).copied());
            let status = LevelStatus::of(record);
            if status == LevelStatus::Solved {
                solved += 1;
            }
            let time = record
                .and_then(|r| r.fastest_execution_time_ns)
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string());
            let _ = write!(row, "  {:^5} {:>10}", status.symbol(), time);
        }
        let _ = writeln!(out, "{}", row);
    }

    let total = usize::from(LAST_DAY - FIRST_DAY + 1) * Level::ALL.len();
    let _ = writeln!(out, "Solved {}/{} levels", solved, total);
    out
}
