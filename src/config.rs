//! Tool configuration
//!
//! Loaded from environment variables (optionally via `.env`) and an optional
//! TOML file describing the solution layout and response cleanup rules.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Datelike;
use serde::Deserialize;

use crate::classifier::{default_cleanup_rules, CleanupRule, RawCleanupRule, ResponseClassifier};
use crate::puzzle::Level;

/// Environment variable holding the session token; never visible to workers
pub const SESSION_TOKEN_ENV: &str = "AOC_SESSION_TOKEN";

const DEFAULT_BASE_URL: &str = "https://adventofcode.com";
const DEFAULT_USER_AGENT: &str = "aoc-runner (solution runner and submitter)";
const DEFAULT_SOLUTIONS_DIR: &str = "./solutions";
const DEFAULT_DATA_FILE: &str = "./aoc-data.json";
const DEFAULT_CONFIG_FILE: &str = "./aoc.toml";
const DEFAULT_FILE_PATTERN: &str = "day{day}.js";

/// Where solutions live and what they must export
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionLayout {
    pub solutions_dir: PathBuf,
    /// File name with `{day}` replaced by the zero-padded day
    pub file_pattern: String,
    pub level_one_function: String,
    pub level_two_function: String,
}

impl SolutionLayout {
    pub fn new(solutions_dir: impl Into<PathBuf>) -> Self {
        Self {
            solutions_dir: solutions_dir.into(),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            level_one_function: "levelOne".to_string(),
            level_two_function: "levelTwo".to_string(),
        }
    }

    pub fn solution_path(&self, day: u8) -> PathBuf {
        let file_name = self.file_pattern.replace("{day}", &format!("{:02}", day));
        self.solutions_dir.join(file_name)
    }

    pub fn function_name(&self, level: Level) -> &str {
        match level {
            Level::One => &self.level_one_function,
            Level::Two => &self.level_two_function,
        }
    }
}

/// Full runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub session_token: Option<String>,
    pub year: u16,
    pub base_url: String,
    pub user_agent: String,
    pub data_file: PathBuf,
    pub layout: SolutionLayout,
    /// Environment variables removed before starting a worker
    pub redacted_env: Vec<String>,
    pub cleanup_rules: Vec<RawCleanupRule>,
}

/// Raw TOML configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfigFile {
    solution_file_pattern: Option<String>,
    #[serde(default)]
    functions: HashMap<String, String>,
    #[serde(default)]
    redact_env: Vec<String>,
    response_cleanup: Option<Vec<RawCleanupRule>>,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let year = match std::env::var("AOC_YEAR") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("Invalid AOC_YEAR: {}", value))?,
            Err(_) => default_year(),
        };
        let solutions_dir =
            std::env::var("AOC_SOLUTIONS_DIR").unwrap_or_else(|_| DEFAULT_SOLUTIONS_DIR.into());

        let mut config = Self {
            session_token: std::env::var(SESSION_TOKEN_ENV)
                .ok()
                .filter(|t| !t.trim().is_empty()),
            year,
            base_url: std::env::var("AOC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            user_agent: std::env::var("AOC_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.into()),
            data_file: std::env::var("AOC_DATA_FILE")
                .unwrap_or_else(|_| DEFAULT_DATA_FILE.into())
                .into(),
            layout: SolutionLayout::new(solutions_dir),
            redacted_env: vec![SESSION_TOKEN_ENV.to_string()],
            cleanup_rules: default_cleanup_rules(),
        };

        let config_path =
            std::env::var("AOC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let config_path = Path::new(&config_path);
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            config
                .apply_file(&content)
                .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        }

        Ok(config)
    }

    /// Overlay settings from a TOML configuration file
    fn apply_file(&mut self, content: &str) -> Result<()> {
        let raw: RawConfigFile = toml::from_str(content)?;

        if let Some(pattern) = raw.solution_file_pattern {
            if !pattern.contains("{day}") {
                anyhow::bail!("solution_file_pattern must contain {{day}}: {}", pattern);
            }
            self.layout.file_pattern = pattern;
        }

        for (level, function) in raw.functions {
            let level = level
                .parse::<u8>()
                .ok()
                .and_then(|n| Level::try_from(n).ok())
                .with_context(|| format!("Unknown level in [functions]: {}", level))?;
            match level {
                Level::One => self.layout.level_one_function = function,
                Level::Two => self.layout.level_two_function = function,
            }
        }

        for name in raw.redact_env {
            if !self.redacted_env.contains(&name) {
                self.redacted_env.push(name);
            }
        }

        if let Some(rules) = raw.response_cleanup {
            self.cleanup_rules = rules;
        }

        // Surface bad patterns at startup rather than on first submission
        self.classifier()?;
        Ok(())
    }

    pub fn require_session_token(&self) -> Result<&str> {
        self.session_token.as_deref().with_context(|| {
            format!(
                "{} is not set. Copy the session cookie from the puzzle site into your .env file.",
                SESSION_TOKEN_ENV
            )
        })
    }

    pub fn classifier(&self) -> Result<ResponseClassifier> {
        let rules = self
            .cleanup_rules
            .iter()
            .map(CleanupRule::try_from)
            .collect::<Result<Vec<_>>>()?;
        ResponseClassifier::new(crate::classifier::DEFAULT_CONTENT_SELECTOR, rules)
    }
}

/// Events start in December; before that, the latest event is last year's
fn default_year() -> u16 {
    let today = chrono::Local::now().date_naive();
    let year = if today.month() == 12 {
        today.year()
    } else {
        today.year() - 1
    };
    u16::try_from(year).unwrap_or(2015)
}
