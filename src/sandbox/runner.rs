use async_trait::async_trait;
use serde_json::Value;

use super::{CaseResult, ExecutionOutcome, ExecutionRequest, Fault};

/// Harness logic executed inside an execution context
///
/// The driver runs on a dedicated thread once both sources have been loaded,
/// so its calls may block. Returning an error ends the execution as `Faulted`.
pub type Driver = Box<dyn FnOnce(&mut dyn Session) -> Result<(), Fault> + Send>;

/// Trait for isolated execution backends
///
/// A runner builds a fresh context for every call, binds the reference and
/// the candidate into separate namespaces and enforces the wall-clock limit.
/// Faults and timeouts are always reported through the outcome, never raised.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Runs `driver` against a fresh context built from `request`
    ///
    /// Resolves after the context setup plus at most `request.time_limit`.
    async fn execute(&self, request: ExecutionRequest, driver: Driver) -> ExecutionOutcome;
}

/// Capabilities a driver holds while a context is live
pub trait Session {
    /// Invokes the reference entry point with `args`
    fn call_reference(&mut self, args: &[Value]) -> Result<Value, Fault>;

    /// Invokes the candidate entry point with `args`
    fn call_candidate(&mut self, args: &[Value]) -> Result<Value, Fault>;

    /// Drops every log entry captured so far
    fn clear_logs(&mut self);

    /// Records a case in the outcome, replacing an earlier record with the same
    /// index. Recorded cases survive timeouts and faults.
    fn record(&mut self, case: CaseResult);
}
