mod batch;
mod per_case;
#[cfg(test)]
mod testing;

pub use batch::{FailedCase, SubmissionGrade, SubmissionReport};
pub use per_case::{CaseRun, RunReport};

use std::sync::Arc;

use serde_json::Value;

use crate::compare::structurally_equal;
use crate::config::JudgeConfig;
use crate::problem::{Problem, Submission};
use crate::sandbox::{
    CaseResult, ExecutionRequest, Fault, SandboxRunner, Session, create_sandbox_runner,
};

const UNFINISHED: &str = "Candidate did not return";

/// Entry point for grading: owns the limits and the sandbox backend
///
/// Cheap to clone; every clone shares the same configuration and runner.
#[derive(Clone)]
pub struct Grader {
    config: Arc<JudgeConfig>,
    sandbox: Arc<dyn SandboxRunner>,
}

impl Grader {
    pub fn new(config: JudgeConfig) -> Self {
        let sandbox = create_sandbox_runner(&config);
        Self::with_sandbox(config, sandbox)
    }

    pub fn with_sandbox(config: JudgeConfig, sandbox: Arc<dyn SandboxRunner>) -> Self {
        Self {
            config: Arc::new(config),
            sandbox,
        }
    }

    fn request(&self, problem: &Problem, submission: &Submission) -> ExecutionRequest {
        ExecutionRequest {
            untrusted_source: submission.source_code.clone(),
            trusted_source: problem.reference_source.clone(),
            entry_point: problem.entry_point.clone(),
            time_limit: self.config.time_limit(),
            max_log_entries: self.config.max_log_entries,
        }
    }
}

/// Evaluates one case and records it; returns whether both sides agreed
///
/// The reference value is recorded before the candidate runs, so it survives
/// a candidate fault or timeout.
fn run_case(session: &mut dyn Session, case_index: usize, args: &[Value]) -> Result<bool, Fault> {
    let reference_value = session.call_reference(args)?;
    session.record(CaseResult {
        case_index,
        reference_value: reference_value.clone(),
        candidate_value: Value::Null,
        matched: false,
        error_detail: Some(UNFINISHED.to_string()),
    });

    match session.call_candidate(args) {
        Ok(candidate_value) => {
            let matched = structurally_equal(&reference_value, &candidate_value);
            session.record(CaseResult {
                case_index,
                reference_value,
                candidate_value,
                matched,
                error_detail: None,
            });
            Ok(matched)
        }
        Err(fault) => {
            session.record(CaseResult {
                case_index,
                reference_value,
                candidate_value: Value::Null,
                matched: false,
                error_detail: Some(fault.detail()),
            });
            Err(fault)
        }
    }
}
