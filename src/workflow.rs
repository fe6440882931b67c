//! Command workflows
//!
//! Sequences input resolution, solution execution, submission and the
//! bookkeeping of submission history.
//!
//! This module does NOT:
//! - Retry submissions or wait out rate limits
//! - Re-download inputs that are already cached

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::answer::{validate_and_normalize, RawAnswer};
use crate::classifier::{ResponseClassifier, SubmissionOutcome};
use crate::client::PuzzleSite;
use crate::config::SESSION_TOKEN_ENV;
use crate::puzzle::{Level, PuzzleCoordinate};
use crate::runner::{ExecutionResult, SolutionRunner, WorkerSpawner};
use crate::store::{input_key, DataStore, PersistedPuzzleRecord, PuzzleRepository};

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub coordinate: PuzzleCoordinate,
    pub answer: String,
    pub execution_time_ns: u64,
    /// `None` until the level has been solved
    pub matches_correct: Option<bool>,
    pub new_fastest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitStatus {
    /// Not submitted; the level was solved before
    AlreadySolved { correct_answer: String },
    /// Not submitted; this answer was rejected before
    DuplicateIncorrect,
    Correct { message: String },
    Incorrect { message: String },
    Locked { message: String },
    RateLimited {
        message: String,
        wait_until: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub coordinate: PuzzleCoordinate,
    pub answer: String,
    pub execution_time_ns: u64,
    pub status: SubmitStatus,
}

pub struct Workflow<S: WorkerSpawner> {
    year: u16,
    runner: SolutionRunner<S>,
    site: Option<Box<dyn PuzzleSite>>,
    classifier: ResponseClassifier,
    store: DataStore,
}

impl<S: WorkerSpawner> Workflow<S> {
    pub fn new(
        year: u16,
        runner: SolutionRunner<S>,
        site: Option<Box<dyn PuzzleSite>>,
        classifier: ResponseClassifier,
        store: DataStore,
    ) -> Self {
        Self {
            year,
            runner,
            site,
            classifier,
            store,
        }
    }

    fn site(&self) -> Result<&dyn PuzzleSite> {
        self.site.as_deref().with_context(|| {
            format!(
                "{} is not set. It is required to download inputs and submit answers.",
                SESSION_TOKEN_ENV
            )
        })
    }

    /// Cached input for `day`, downloading it on first use
    pub async fn resolve_input(&mut self, day: u8) -> Result<String> {
        let key = input_key(self.year, day);
        if self.store.has_value(&key) {
            let input: String = self.store.get(&key)?.unwrap_or_default();
            if !input.is_empty() {
                debug!("Using cached input {}", key);
                return Ok(input);
            }
        }

        let input = self.site()?.fetch_input(self.year, day).await?;
        self.store
            .set(&key, &input)
            .context("Failed to cache puzzle input")?;
        Ok(input)
    }

    async fn execute(&mut self, coordinate: &PuzzleCoordinate) -> Result<(ExecutionResult, String)> {
        let input = self.resolve_input(coordinate.day).await?;
        let result = self
            .runner
            .execute(coordinate.day, coordinate.level, &input)
            .await?;
        let answer = validate_and_normalize(RawAnswer::from(result.answer.clone()))?;
        Ok((result, answer))
    }

    fn record(&self, coordinate: &PuzzleCoordinate) -> Result<PersistedPuzzleRecord> {
        let id = coordinate.record_id();
        Ok(self
            .store
            .find(&id)?
            .unwrap_or_else(|| PersistedPuzzleRecord::new(id)))
    }

    pub async fn run(&mut self, day: u8, level: Level) -> Result<RunReport> {
        let coordinate = PuzzleCoordinate::new(self.year, day, level)?;
        let (result, answer) = self.execute(&coordinate).await?;

        let mut record = self.record(&coordinate)?;
        let matches_correct = record.correct_answer.as_ref().map(|c| *c == answer);
        let new_fastest = matches_correct == Some(true) && record.record_time(result.execution_time_ns);
        if new_fastest {
            info!("New fastest time for {}", coordinate);
            self.store.save(&record)?;
        }

        Ok(RunReport {
            coordinate,
            answer,
            execution_time_ns: result.execution_time_ns,
            matches_correct,
            new_fastest,
        })
    }

    pub async fn submit(&mut self, day: u8, level: Level) -> Result<SubmitReport> {
        let coordinate = PuzzleCoordinate::new(self.year, day, level)?;
        let (result, answer) = self.execute(&coordinate).await?;
        let mut record = self.record(&coordinate)?;

        let status = if let Some(correct_answer) = record.correct_answer.clone() {
            if correct_answer == answer && record.record_time(result.execution_time_ns) {
                self.store.save(&record)?;
            }
            SubmitStatus::AlreadySolved { correct_answer }
        } else if record.incorrect_answers.contains(&answer) {
            SubmitStatus::DuplicateIncorrect
        } else {
            let body = self.site()?.submit_answer(&coordinate, &answer).await?;
            match self.classifier.classify(&body)? {
                SubmissionOutcome::Correct { message } => {
                    record.correct_answer = Some(answer.clone());
                    record.record_time(result.execution_time_ns);
                    self.store.save(&record)?;
                    SubmitStatus::Correct { message }
                }
                SubmissionOutcome::Incorrect { message } => {
                    record.incorrect_answers.insert(answer.clone());
                    self.store.save(&record)?;
                    SubmitStatus::Incorrect { message }
                }
                SubmissionOutcome::AlreadySolvedOrLocked { message } => {
                    SubmitStatus::Locked { message }
                }
                SubmissionOutcome::RateLimited {
                    message,
                    wait_until,
                } => SubmitStatus::RateLimited {
                    message,
                    wait_until,
                },
                SubmissionOutcome::Unparseable { raw_message } => {
                    bail!("Could not interpret the submission response: {}", raw_message)
                }
            }
        };

        Ok(SubmitReport {
            coordinate,
            answer,
            execution_time_ns: result.execution_time_ns,
            status,
        })
    }
}
