//! In-memory sandbox for exercising harness logic without an interpreter.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::problem::Problem;
use crate::sandbox::{
    CaseResult, Driver, ExecutionOutcome, ExecutionRequest, Fault, LogSink, SandboxRunner,
    Session, Terminal, timeout_sentinel_millis, upsert_case,
};

pub(crate) enum Stub {
    Fault(&'static str),
    Hang,
}

pub(crate) type StubFn = fn(&[Value]) -> Result<Value, Stub>;

pub(crate) fn add(args: &[Value]) -> Result<Value, Stub> {
    let sum = args.iter().filter_map(Value::as_i64).sum::<i64>();
    Ok(json!(sum))
}

pub(crate) fn add_problem() -> Problem {
    Problem::new(
        "add",
        "def add(a, b):\n    return a + b\n",
        vec![
            vec![json!(1), json!(2)],
            vec![json!(2), json!(2)],
            vec![json!(3), json!(4)],
        ],
    )
    .unwrap()
}

/// Runs the driver synchronously against plain Rust functions
pub(crate) struct StubSandbox {
    reference: StubFn,
    candidate: StubFn,
    pub candidate_calls: AtomicUsize,
}

impl StubSandbox {
    pub fn new(reference: StubFn, candidate: StubFn) -> Self {
        Self {
            reference,
            candidate,
            candidate_calls: AtomicUsize::new(0),
        }
    }
}

struct StubSession<'a> {
    sandbox: &'a StubSandbox,
    sink: LogSink,
    cases: Vec<CaseResult>,
    hung: bool,
}

fn resolve(result: Result<Value, Stub>, hung: &mut bool) -> Result<Value, Fault> {
    match result {
        Ok(value) => Ok(value),
        Err(Stub::Fault(message)) => Err(Fault::new(message)),
        Err(Stub::Hang) => {
            *hung = true;
            Err(Fault::new("hung"))
        }
    }
}

impl Session for StubSession<'_> {
    fn call_reference(&mut self, args: &[Value]) -> Result<Value, Fault> {
        resolve((self.sandbox.reference)(args), &mut self.hung)
    }

    fn call_candidate(&mut self, args: &[Value]) -> Result<Value, Fault> {
        self.sandbox.candidate_calls.fetch_add(1, Ordering::SeqCst);
        self.sink
            .append(format!("candidate {}", Value::Array(args.to_vec())));
        resolve((self.sandbox.candidate)(args), &mut self.hung)
    }

    fn clear_logs(&mut self) {
        self.sink.clear();
    }

    fn record(&mut self, case: CaseResult) {
        upsert_case(&mut self.cases, case);
    }
}

#[async_trait]
impl SandboxRunner for StubSandbox {
    async fn execute(&self, request: ExecutionRequest, driver: Driver) -> ExecutionOutcome {
        let mut session = StubSession {
            sandbox: self,
            sink: LogSink::new(request.max_log_entries),
            cases: Vec::new(),
            hung: false,
        };
        let result = driver(&mut session);

        let (elapsed_millis, terminal) = match result {
            _ if session.hung => (timeout_sentinel_millis(request.time_limit), Terminal::TimedOut),
            Ok(()) => (1, Terminal::Completed),
            Err(fault) => (1, Terminal::Faulted(fault)),
        };
        ExecutionOutcome {
            logs: session.sink.snapshot(),
            elapsed_millis,
            terminal,
            cases: session.cases,
        }
    }
}
