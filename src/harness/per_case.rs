use serde::Serialize;
use serde_json::Value;

use super::{Grader, run_case};
use crate::problem::{Problem, Submission, TestCase};
use crate::sandbox::{Driver, ExecutionOutcome, Session, Terminal};

const TIMEOUT_MESSAGE: &str = "Time limit exceeded";

/// Diagnostics for one independently executed case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRun {
    pub logs: Vec<String>,
    pub time: u64,
    /// Candidate value, `null` when it never produced one
    pub result: Value,
    /// Reference value, `null` only when the reference itself failed
    pub expected: Value,
    /// Empty when the case ran to completion
    pub error: String,
}

/// Per-case results as parallel sequences, index-aligned with the input cases
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub logs: Vec<Vec<String>>,
    pub times: Vec<u64>,
    pub results: Vec<Value>,
    pub errors: Vec<String>,
    pub expecteds: Vec<Value>,
}

impl FromIterator<CaseRun> for RunReport {
    fn from_iter<I: IntoIterator<Item = CaseRun>>(runs: I) -> Self {
        let mut report = Self::default();
        for run in runs {
            report.logs.push(run.logs);
            report.times.push(run.time);
            report.results.push(run.result);
            report.errors.push(run.error);
            report.expecteds.push(run.expected);
        }
        report
    }
}

impl CaseRun {
    fn from_outcome(outcome: ExecutionOutcome) -> Self {
        let ExecutionOutcome {
            logs,
            elapsed_millis,
            terminal,
            cases,
        } = outcome;
        let case = cases.into_iter().next();
        let recorded = case.is_some();
        let (expected, result) = case.map_or((Value::Null, Value::Null), |case| {
            (case.reference_value, case.candidate_value)
        });

        let error = match terminal {
            Terminal::Completed if recorded => String::new(),
            Terminal::Completed => "Execution finished without a result".to_string(),
            Terminal::TimedOut => TIMEOUT_MESSAGE.to_string(),
            Terminal::Faulted(fault) => fault.detail(),
        };

        Self {
            logs,
            time: elapsed_millis,
            result,
            expected,
            error,
        }
    }
}

impl Grader {
    /// Runs every case in its own execution context, all at once
    ///
    /// A fault or timeout in one case never touches the others, and the
    /// report lists cases in input order whatever order they finish in.
    pub async fn grade_each_case(
        &self,
        problem: &Problem,
        submission: &Submission,
        cases: &[TestCase],
    ) -> RunReport {
        let mut handles = Vec::with_capacity(cases.len());
        for (case_index, args) in cases.iter().enumerate() {
            let grader = self.clone();
            let request = self.request(problem, submission);
            let args = args.clone();

            let driver: Driver = Box::new(move |session: &mut dyn Session| {
                run_case(session, case_index, &args).map(|_| ())
            });

            handles.push(tokio::spawn(async move {
                grader.sandbox.execute(request, driver).await
            }));
        }

        let mut runs = Vec::with_capacity(handles.len());
        for (case_index, handle) in handles.into_iter().enumerate() {
            let run = match handle.await {
                Ok(outcome) => CaseRun::from_outcome(outcome),
                Err(e) => {
                    log::error!("Case {} task failed: {e:?}", case_index + 1);
                    CaseRun {
                        logs: Vec::new(),
                        time: 0,
                        result: Value::Null,
                        expected: Value::Null,
                        error: format!("Case task failed: {e}"),
                    }
                }
            };
            if !run.error.is_empty() {
                log::debug!("Case {} failed: {}", case_index + 1, run.error);
            }
            runs.push(run);
        }

        log::info!(
            "Ran {} cases of {} independently",
            runs.len(),
            problem.entry_point
        );
        runs.into_iter().collect()
    }
}
