use std::fmt;

use serde::Serialize;

use crate::sandbox::{ExecutionOutcome, Terminal};

/// Closed set of outcomes for a graded submission
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeFault,
}

impl Verdict {
    /// Maps a finished batch execution to its verdict
    pub fn compose(outcome: &ExecutionOutcome) -> Self {
        match &outcome.terminal {
            Terminal::TimedOut => Self::TimeLimitExceeded,
            Terminal::Faulted(_) => Self::RuntimeFault,
            Terminal::Completed if outcome.cases.iter().any(|case| !case.matched) => {
                Self::WrongAnswer
            }
            Terminal::Completed => Self::Accepted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::RuntimeFault => "Runtime Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{CaseResult, Fault};
    use serde_json::json;

    fn outcome(terminal: Terminal, matched: &[bool]) -> ExecutionOutcome {
        ExecutionOutcome {
            logs: Vec::new(),
            elapsed_millis: 3,
            terminal,
            cases: matched
                .iter()
                .enumerate()
                .map(|(case_index, &matched)| CaseResult {
                    case_index,
                    reference_value: json!(1),
                    candidate_value: json!(if matched { 1 } else { 0 }),
                    matched,
                    error_detail: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_compose() {
        assert_eq!(
            Verdict::compose(&outcome(Terminal::Completed, &[true, true])),
            Verdict::Accepted
        );
        assert_eq!(
            Verdict::compose(&outcome(Terminal::Completed, &[true, false])),
            Verdict::WrongAnswer
        );
        assert_eq!(
            Verdict::compose(&outcome(Terminal::TimedOut, &[true])),
            Verdict::TimeLimitExceeded
        );
        assert_eq!(
            Verdict::compose(&outcome(Terminal::Faulted(Fault::new("boom")), &[])),
            Verdict::RuntimeFault
        );
    }

    #[test]
    fn test_completed_without_cases_is_accepted() {
        assert_eq!(
            Verdict::compose(&outcome(Terminal::Completed, &[])),
            Verdict::Accepted
        );
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_value(Verdict::TimeLimitExceeded).unwrap(),
            json!("Time Limit Exceeded")
        );
        assert_eq!(Verdict::RuntimeFault.to_string(), "Runtime Error");
    }
}
