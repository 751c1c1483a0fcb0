mod log_sink;
mod party;
mod python_runner;
mod runner;
mod value;

pub use log_sink::LogSink;
pub use python_runner::PythonRunner;
pub use runner::{Driver, SandboxRunner, Session};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::JudgeConfig;

/// Everything one execution context needs besides the driver
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Code under test
    pub untrusted_source: String,
    /// Reference solution, evaluated in its own namespace
    pub trusted_source: String,
    /// Function both sources are expected to define
    pub entry_point: String,
    pub time_limit: Duration,
    pub max_log_entries: usize,
}

/// How an execution context ended
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Completed,
    TimedOut,
    Faulted(Fault),
}

/// Result of one isolated execution
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub logs: Vec<String>,
    pub elapsed_millis: u64,
    pub terminal: Terminal,
    /// Cases the driver recorded before the context ended
    pub cases: Vec<CaseResult>,
}

impl ExecutionOutcome {
    /// Outcome for a context that could not run at all
    pub fn faulted(fault: Fault) -> Self {
        Self {
            logs: Vec::new(),
            elapsed_millis: 0,
            terminal: Terminal::Faulted(fault),
            cases: Vec::new(),
        }
    }
}

/// Outcome of comparing reference and candidate on a single test case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    /// Zero-based position in the test-case sequence
    pub case_index: usize,
    pub reference_value: Value,
    pub candidate_value: Value,
    pub matched: bool,
    /// Set when the candidate faulted or never returned on this case
    pub error_detail: Option<String>,
}

/// Records `case`, replacing an earlier record for the same index
pub(crate) fn upsert_case(cases: &mut Vec<CaseResult>, case: CaseResult) {
    match cases.iter_mut().find(|c| c.case_index == case.case_index) {
        Some(existing) => *existing = case,
        None => cases.push(case),
    }
}

/// A failure raised while evaluating reference or candidate code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub trace: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: String::new(),
        }
    }

    pub fn with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// Adds the failing party in front of the message
    pub fn prefixed(self, context: &str) -> Self {
        Self {
            message: format!("{context}: {}", self.message),
            trace: self.trace,
        }
    }

    /// Message followed by the trace, as shown to the submitter
    pub fn detail(&self) -> String {
        if self.trace.is_empty() {
            self.message.clone()
        } else {
            format!("{}\n{}", self.message, self.trace)
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fault {}

/// Elapsed time reported for an execution cancelled at `time_limit`
pub fn timeout_sentinel_millis(time_limit: Duration) -> u64 {
    time_limit.as_millis() as u64 + 1
}

/// Creates the sandbox runner used for grading
pub fn create_sandbox_runner(config: &JudgeConfig) -> Arc<dyn SandboxRunner> {
    log::info!(
        "Creating PythonRunner (time limit {}ms, {} log entries, {} importable modules)",
        config.execution_timeout_millis,
        config.max_log_entries,
        config.allowed_modules.len()
    );
    Arc::new(PythonRunner::new(config.allowed_modules.iter().cloned()))
}
