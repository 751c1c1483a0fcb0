use anyhow::{Context, Result};
use clap::Parser;

use grader::Grader;
use grader::config::CliArgs;
use grader::problem::{Problem, RawTestCases, Submission, parse_test_cases};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;
    let problem = Problem::from_file(&cli.problem_path)?;
    let source_code = std::fs::read_to_string(&cli.submission_path)
        .with_context(|| format!("Failed to read submission {}", cli.submission_path))?;
    let submission = Submission::new(source_code);

    let grader = Grader::new(config);

    let output = if cli.per_case {
        let cases = match &cli.cases_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read cases {path}"))?;
                parse_test_cases(RawTestCases::Serialized(text))?
            }
            None => problem.test_cases.clone(),
        };
        let report = grader.grade_each_case(&problem, &submission, &cases).await;
        serde_json::to_string_pretty(&report)?
    } else {
        let grade = grader.grade_submission(&problem, &submission).await;
        serde_json::to_string_pretty(&grade.report())?
    };

    println!("{output}");
    Ok(())
}
