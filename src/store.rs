//! Local data store
//!
//! A JSON file cached in memory for the lifetime of the process. Every `set`
//! writes the whole file back. This process is assumed to be the only writer;
//! edits made by others while it runs are overwritten.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const PUZZLE_KEY_PREFIX: &str = "puzzle:";

/// Store key for a downloaded puzzle input
pub fn input_key(year: u16, day: u8) -> String {
    format!("input:{}:{}", year, day)
}

/// Single-owner key-value cache over a JSON file
pub struct DataStore {
    path: PathBuf,
    data: Map<String, Value>,
}

impl DataStore {
    /// Load the store, starting empty if the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read data file {}", path.display()))?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Data file {} is not a JSON object", path.display()))?
            }
        } else {
            Map::new()
        };

        debug!("Opened data store {} ({} keys)", path.display(), data.len());
        Ok(Self { path, data })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("Malformed value for key {}", key))
            })
            .transpose()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.to_string(), value);
        self.flush()
    }

    /// True when the key holds something other than null
    pub fn has_value(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(|v| !v.is_null())
    }

    fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.data.keys().filter(move |k| k.starts_with(prefix))
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Submission history for one puzzle level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPuzzleRecord {
    /// `YYYYDDPP`
    pub id: String,
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub incorrect_answers: BTreeSet<String>,
    pub fastest_execution_time_ns: Option<u64>,
}

impl PersistedPuzzleRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            correct_answer: None,
            incorrect_answers: BTreeSet::new(),
            fastest_execution_time_ns: None,
        }
    }

    pub fn is_solved(&self) -> bool {
        self.correct_answer.is_some()
    }

    /// Keep `execution_time_ns` if it beats the stored time; returns whether it did
    pub fn record_time(&mut self, execution_time_ns: u64) -> bool {
        match self.fastest_execution_time_ns {
            Some(fastest) if fastest <= execution_time_ns => false,
            _ => {
                self.fastest_execution_time_ns = Some(execution_time_ns);
                true
            }
        }
    }
}

pub trait PuzzleRepository {
    fn find(&self, id: &str) -> Result<Option<PersistedPuzzleRecord>>;
    fn save(&mut self, record: &PersistedPuzzleRecord) -> Result<()>;
    fn all(&self) -> Result<Vec<PersistedPuzzleRecord>>;
}

impl PuzzleRepository for DataStore {
    fn find(&self, id: &str) -> Result<Option<PersistedPuzzleRecord>> {
        self.get(&format!("{}{}", PUZZLE_KEY_PREFIX, id))
    }

    fn save(&mut self, record: &PersistedPuzzleRecord) -> Result<()> {
        self.set(&format!("{}{}", PUZZLE_KEY_PREFIX, record.id), record)
    }

    fn all(&self) -> Result<Vec<PersistedPuzzleRecord>> {
        self.keys_with_prefix(PUZZLE_KEY_PREFIX)
            .map(|key| {
                let value = self.data.get(key).cloned().unwrap_or(Value::Null);
                serde_json::from_value(value)
                    .with_context(|| format!("Malformed puzzle record {}", key))
            })
            .collect()
    }
}
