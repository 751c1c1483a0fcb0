use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "grader", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the judge configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Path to the problem definition (JSON)
    #[arg(long = "problem", short = 'p')]
    pub problem_path: String,

    /// Path to the candidate source code
    #[arg(long = "submission", short = 's')]
    pub submission_path: String,

    /// Run every case independently instead of grading the submission
    #[arg(long = "per-case", default_value_t = false)]
    pub per_case: bool,

    /// Cases to run in per-case mode, defaults to the problem's own cases
    #[arg(long = "cases")]
    pub cases_path: Option<String>,

    /// Override the maximum number of log entries kept per execution
    #[arg(long = "max-log-entries")]
    pub max_log_entries: Option<usize>,

    /// Override the execution time limit in milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

impl CliArgs {
    /// Load the configuration from the specified file and apply overrides
    pub fn to_config(&self) -> Result<JudgeConfig> {
        let mut config = JudgeConfig::from_file(&self.config_path)?;
        if let Some(entries) = self.max_log_entries {
            config.max_log_entries = entries;
        }
        if let Some(millis) = self.timeout_ms {
            config.execution_timeout_millis = millis;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Limits applied to every sandboxed execution.
///
/// Read once at startup and shared by every grading run; nothing mutates it
/// while a run is in flight.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JudgeConfig {
    pub max_log_entries: usize,
    pub execution_timeout_millis: u64,
    /// Modules candidate code may import. Everything else is refused.
    #[serde(default)]
    pub allowed_modules: Vec<String>,
}

impl JudgeConfig {
    pub fn new(max_log_entries: usize, execution_timeout_millis: u64) -> Result<Self> {
        let config = Self {
            max_log_entries,
            execution_timeout_millis,
            allowed_modules: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open configuration file {path}"))?;
        let reader = std::io::BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)
            .with_context(|| format!("Invalid configuration file {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_log_entries == 0 {
            bail!("max_log_entries must be a positive integer");
        }
        if self.execution_timeout_millis == 0 {
            bail!("execution_timeout_millis must be a positive integer");
        }
        Ok(())
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_millis)
    }
}
