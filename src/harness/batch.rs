use serde::Serialize;
use serde_json::Value;

use super::{Grader, run_case};
use crate::problem::{Problem, Submission};
use crate::sandbox::{CaseResult, Driver, Fault, Session, Terminal};
use crate::verdict::Verdict;

/// Result of grading one submission against every test case
#[derive(Debug, Clone)]
pub struct SubmissionGrade {
    pub verdict: Verdict,
    /// Evaluated cases, a prefix of the problem's cases. A case the candidate
    /// faulted on or never finished carries its error detail.
    pub case_results: Vec<CaseResult>,
    /// Whole batch, or the timeout sentinel
    pub total_elapsed_millis: u64,
    /// Logs of the last evaluated case
    pub logs: Vec<String>,
    pub fault: Option<Fault>,
}

/// First case where the candidate disagreed with the reference
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedCase {
    /// One-based
    pub test_case: usize,
    pub expected: Value,
    pub received: Value,
}

/// Batch result in the shape handed back to the caller
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    pub success: bool,
    pub verdict: Verdict,
    pub logs: Vec<String>,
    pub failed: Option<FailedCase>,
    pub time: u64,
    pub limit_exceeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmissionGrade {
    pub fn failed_case(&self) -> Option<FailedCase> {
        self.case_results
            .iter()
            .find(|case| !case.matched && case.error_detail.is_none())
            .map(|case| FailedCase {
                test_case: case.case_index + 1,
                expected: case.reference_value.clone(),
                received: case.candidate_value.clone(),
            })
    }

    pub fn report(&self) -> SubmissionReport {
        SubmissionReport {
            success: self.verdict == Verdict::Accepted,
            verdict: self.verdict,
            logs: self.logs.clone(),
            failed: self.failed_case(),
            time: self.total_elapsed_millis,
            limit_exceeded: self.verdict == Verdict::TimeLimitExceeded,
            error: self.fault.as_ref().map(Fault::detail),
        }
    }
}

impl Grader {
    /// Grades a submission in a single execution context
    ///
    /// Cases run in ascending order and stop at the first mismatch. Logs are
    /// cleared before each case, while the elapsed time covers the whole
    /// batch.
    pub async fn grade_submission(
        &self,
        problem: &Problem,
        submission: &Submission,
    ) -> SubmissionGrade {
        let request = self.request(problem, submission);
        let cases = problem.test_cases.clone();
        let total = cases.len();

        let driver: Driver = Box::new(move |session: &mut dyn Session| {
            for (case_index, args) in cases.iter().enumerate() {
                session.clear_logs();
                if !run_case(session, case_index, args)? {
                    break;
                }
            }
            Ok(())
        });

        let outcome = self.sandbox.execute(request, driver).await;
        let verdict = Verdict::compose(&outcome);
        log::info!(
            "Graded {} ({} of {total} cases evaluated): {verdict} in {}ms",
            problem.entry_point,
            outcome.cases.len(),
            outcome.elapsed_millis
        );

        let fault = match outcome.terminal {
            Terminal::Faulted(fault) => Some(fault),
            Terminal::Completed | Terminal::TimedOut => None,
        };

        SubmissionGrade {
            verdict,
            case_results: outcome.cases,
            total_elapsed_millis: outcome.elapsed_millis,
            logs: outcome.logs,
            fault,
        }
    }
}
