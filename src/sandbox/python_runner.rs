use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;

use super::party::{CANCELLED, Party, PartyContext, PartyControl, PartyHandle, Role};
use super::{
    CaseResult, Driver, ExecutionOutcome, ExecutionRequest, Fault, LogSink, SandboxRunner,
    Session, Terminal, timeout_sentinel_millis, upsert_case,
};

const INTERRUPT_INTERVAL: Duration = Duration::from_millis(10);

/// State shared by both interpreters of one execution and the caller
pub(super) struct SharedState {
    pub sink: Mutex<LogSink>,
    cases: Mutex<Vec<CaseResult>>,
    expired: AtomicBool,
}

impl SharedState {
    pub fn new(max_log_entries: usize) -> Self {
        Self {
            sink: Mutex::new(LogSink::new(max_log_entries)),
            cases: Mutex::new(Vec::new()),
            expired: AtomicBool::new(false),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    fn expire(&self) {
        self.expired.store(true, Ordering::Release);
    }

    fn outcome(&self, elapsed_millis: u64, terminal: Terminal) -> ExecutionOutcome {
        ExecutionOutcome {
            logs: self.sink.lock().snapshot(),
            elapsed_millis,
            terminal,
            cases: self.cases.lock().clone(),
        }
    }
}

/// Runs Python code inside embedded RustPython interpreters
///
/// The reference and the candidate each get a brand-new interpreter on a
/// thread of their own, so neither can reach the other's globals, builtins
/// or classes. Values cross between them only as JSON read by the host. The
/// driver runs on a third thread; the caller awaits it under the wall-clock
/// limit and interrupts both interpreters when the limit expires.
pub struct PythonRunner {
    allowed_modules: Arc<HashSet<String>>,
}

impl PythonRunner {
    pub fn new(allowed_modules: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_modules: Arc::new(allowed_modules.into_iter().collect()),
        }
    }

    fn spawn_party(
        &self,
        role: Role,
        source: &str,
        request: &ExecutionRequest,
        shared: &Arc<SharedState>,
    ) -> Result<Party, Fault> {
        Party::spawn(PartyContext {
            role,
            source: source.to_owned(),
            entry_point: request.entry_point.clone(),
            shared: Arc::clone(shared),
            allowed_modules: Arc::clone(&self.allowed_modules),
        })
    }
}

#[async_trait]
impl SandboxRunner for PythonRunner {
    async fn execute(&self, request: ExecutionRequest, driver: Driver) -> ExecutionOutcome {
        let shared = Arc::new(SharedState::new(request.max_log_entries));
        let time_limit = request.time_limit;

        // Step 1: Bring both interpreters up. Only host-side setup runs here.
        let reference =
            match self.spawn_party(Role::Reference, &request.trusted_source, &request, &shared) {
                Ok(party) => party,
                Err(fault) => return setup_failed(fault),
            };
        let candidate =
            match self.spawn_party(Role::Candidate, &request.untrusted_source, &request, &shared) {
                Ok(party) => party,
                Err(fault) => return setup_failed(fault),
            };
        if let Err(fault) = wait_ready(reference.ready).await {
            return setup_failed(fault);
        }
        if let Err(fault) = wait_ready(candidate.ready).await {
            return setup_failed(fault);
        }
        log::debug!("Execution contexts ready");

        // Step 2: Load both sources and drive the cases under the wall-clock limit
        let controls = vec![reference.control, candidate.control];
        let (done_tx, done_rx) = oneshot::channel();
        let mut session = PythonSession {
            reference: reference.handle,
            candidate: candidate.handle,
            shared: Arc::clone(&shared),
        };
        let spawned = std::thread::Builder::new()
            .name("grader-driver".to_string())
            .spawn(move || {
                let result = session.load().and_then(|()| driver(&mut session));
                // The receiver is gone when the caller already gave up
                let _ = done_tx.send(result);
            });
        if let Err(e) = spawned {
            return setup_failed(Fault::new(format!("Failed to start driver: {e}")));
        }

        let start = Instant::now();
        let (elapsed_millis, terminal) = match timeout(time_limit, done_rx).await {
            Ok(Ok(Ok(()))) => (elapsed_since(start), Terminal::Completed),
            Ok(Ok(Err(fault))) => {
                log::debug!("Execution faulted: {fault}");
                (elapsed_since(start), Terminal::Faulted(fault))
            }
            Ok(Err(_)) => {
                log::error!("Driver thread exited without reporting");
                let fault = Fault::new("Execution context terminated unexpectedly");
                (elapsed_since(start), Terminal::Faulted(fault))
            }
            Err(_) => {
                shared.expire();
                log::warn!(
                    "Execution exceeded {}ms, interrupting interpreters",
                    time_limit.as_millis()
                );
                cancel(controls);
                (timeout_sentinel_millis(time_limit), Terminal::TimedOut)
            }
        };

        shared.outcome(elapsed_millis, terminal)
    }
}

fn setup_failed(fault: Fault) -> ExecutionOutcome {
    log::error!("Failed to prepare execution context: {fault}");
    ExecutionOutcome::faulted(fault)
}

async fn wait_ready(ready: oneshot::Receiver<Result<(), Fault>>) -> Result<(), Fault> {
    match ready.await {
        Ok(result) => result,
        Err(_) => Err(Fault::new("Execution context terminated during setup")),
    }
}

fn elapsed_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Keeps interrupting the interpreters until their threads have exited.
///
/// User code may swallow an interrupt, so it is resent on every tick.
fn cancel(mut controls: Vec<PartyControl>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(INTERRUPT_INTERVAL);
        loop {
            ticker.tick().await;
            controls.retain(|control| !control.is_finished());
            if controls.is_empty() {
                break;
            }
            for control in &controls {
                control.interrupt();
            }
        }
        log::debug!("Cancelled execution contexts exited");
    });
}

/// Session talking to both interpreters from the driver thread
struct PythonSession {
    reference: PartyHandle,
    candidate: PartyHandle,
    shared: Arc<SharedState>,
}

impl PythonSession {
    fn load(&mut self) -> Result<(), Fault> {
        self.reference
            .load()
            .map_err(|fault| fault.prefixed("Reference solution failed"))?;
        self.candidate.load()
    }

    fn check_expired(&self) -> Result<(), Fault> {
        if self.shared.is_expired() {
            return Err(Fault::new(CANCELLED));
        }
        Ok(())
    }
}

impl Session for PythonSession {
    fn call_reference(&mut self, args: &[Value]) -> Result<Value, Fault> {
        self.check_expired()?;
        self.reference
            .call(args)
            .map_err(|fault| fault.prefixed("Reference solution failed"))
    }

    fn call_candidate(&mut self, args: &[Value]) -> Result<Value, Fault> {
        self.check_expired()?;
        self.candidate.call(args)
    }

    fn clear_logs(&mut self) {
        self.shared.sink.lock().clear();
    }

    fn record(&mut self, case: CaseResult) {
        if !self.shared.is_expired() {
            upsert_case(&mut self.shared.cases.lock(), case);
        }
    }
}
