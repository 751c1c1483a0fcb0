use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;

/// Positional arguments for one invocation of the entry point
pub type TestCase = Vec<Value>;

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Problem definition as handed over by the storage collaborator
#[derive(Deserialize, Debug, Clone)]
pub struct ProblemConfig {
    pub entry_point: String,
    pub reference_source: String,
    pub test_cases: RawTestCases,
}

/// Test cases arrive either already parsed or as serialized JSON text
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawTestCases {
    Inline(Vec<Value>),
    Serialized(String),
}

/// A validated problem, immutable for the duration of a grading run
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub entry_point: String,
    pub reference_source: String,
    pub test_cases: Vec<TestCase>,
}

/// Untrusted candidate code. Never persisted by the grader.
#[derive(Debug, Clone)]
pub struct Submission {
    pub source_code: String,
}

impl Submission {
    pub fn new(source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
        }
    }
}

impl Problem {
    pub fn new(
        entry_point: impl Into<String>,
        reference_source: impl Into<String>,
        test_cases: Vec<TestCase>,
    ) -> Result<Self> {
        let entry_point = entry_point.into();
        if !is_identifier(&entry_point) {
            bail!("Entry point {entry_point:?} is not a valid identifier");
        }
        Ok(Self {
            entry_point,
            reference_source: reference_source.into(),
            test_cases,
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open problem file {path}"))?;
        let reader = std::io::BufReader::new(file);
        let config: ProblemConfig = serde_json::from_reader(reader)
            .with_context(|| format!("Invalid problem file {path}"))?;
        Self::try_from(config)
    }
}

impl TryFrom<ProblemConfig> for Problem {
    type Error = anyhow::Error;

    fn try_from(config: ProblemConfig) -> Result<Self> {
        let test_cases = parse_test_cases(config.test_cases)?;
        Self::new(config.entry_point, config.reference_source, test_cases)
    }
}

/// Turns raw test cases into argument tuples, rejecting anything that is not an array
pub fn parse_test_cases(raw: RawTestCases) -> Result<Vec<TestCase>> {
    let cases = match raw {
        RawTestCases::Inline(cases) => cases,
        RawTestCases::Serialized(text) => {
            serde_json::from_str::<Vec<Value>>(&text).context("Test cases are not a JSON array")?
        }
    };

    cases
        .into_iter()
        .enumerate()
        .map(|(idx, case)| match case {
            Value::Array(args) => Ok(args),
            other => Err(anyhow!(
                "Test case {} must be an array of arguments, got {other}",
                idx + 1
            )),
        })
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && !PYTHON_KEYWORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_problem_file_with_serialized_cases() {
        let problem = Problem::from_file("data/add.json").unwrap();
        assert_eq!(problem.entry_point, "add");
        assert_eq!(
            problem.test_cases,
            vec![vec![json!(1), json!(2)], vec![json!(2), json!(2)]]
        );
    }

    #[test]
    fn test_inline_cases() {
        let config: ProblemConfig = serde_json::from_value(json!({
            "entry_point": "solve",
            "reference_source": "def solve(xs):\n    return sorted(xs)\n",
            "test_cases": [[[3, 1, 2]], [[]]]
        }))
        .unwrap();
        let problem = Problem::try_from(config).unwrap();
        assert_eq!(problem.test_cases.len(), 2);
        assert_eq!(problem.test_cases[0], vec![json!([3, 1, 2])]);
    }

    #[test]
    fn test_non_array_case_is_rejected() {
        let err = parse_test_cases(RawTestCases::Inline(vec![json!([1]), json!(5)])).unwrap_err();
        assert!(err.to_string().contains("Test case 2"));
    }

    #[test]
    fn test_malformed_serialized_cases() {
        assert!(parse_test_cases(RawTestCases::Serialized("[[1,".to_string())).is_err());
    }

    #[test]
    fn test_entry_point_must_be_identifier() {
        assert!(Problem::new("add", "", vec![]).is_ok());
        assert!(Problem::new("_helper2", "", vec![]).is_ok());
        assert!(Problem::new("2fast", "", vec![]).is_err());
        assert!(Problem::new("add(1)", "", vec![]).is_err());
        assert!(Problem::new("lambda", "", vec![]).is_err());
        assert!(Problem::new("", "", vec![]).is_err());
    }
}
