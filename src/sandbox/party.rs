use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use rustpython_vm::{
    AsObject, Interpreter, PyObjectRef, PyResult, Settings, VirtualMachine,
    builtins::{PyBaseExceptionRef, PyList},
    compiler::Mode,
    function::FuncArgs,
    scope::Scope,
    signal::{UserSignalReceiver, UserSignalSender, user_signal_channel},
};
use serde_json::Value;
use tokio::sync::oneshot;

use super::Fault;
use super::python_runner::SharedState;
use super::value::{argument_list, to_json};
use crate::compare::structurally_equal;

// Deep recursion must hit RecursionError before it exhausts the native stack
const SANDBOX_STACK_SIZE: usize = 256 * 1024 * 1024;

const DENIED_BUILTINS: &[&str] = &["open", "input", "breakpoint", "exit", "quit", "help"];

pub(super) const CANCELLED: &str = "Execution cancelled after exceeding the time limit";

/// Which of the two sources an interpreter holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Role {
    Reference,
    Candidate,
}

impl Role {
    /// `__name__` of the module scope. Never `__main__`, so guarded script
    /// sections stay dormant.
    fn module_name(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Candidate => "submission",
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Reference => "<reference>",
            Self::Candidate => "<submission>",
        }
    }
}

enum Command {
    /// Run the source and resolve the entry point
    Load,
    Call(Vec<Value>),
}

/// Driver-side end of a party: blocking request/reply over channels
pub(super) struct PartyHandle {
    commands: mpsc::Sender<Command>,
    replies: mpsc::Receiver<Result<Value, Fault>>,
}

impl PartyHandle {
    fn request(&self, command: Command) -> Result<Value, Fault> {
        self.commands.send(command).map_err(|_| terminated())?;
        self.replies.recv().map_err(|_| terminated())?
    }

    pub fn load(&self) -> Result<(), Fault> {
        self.request(Command::Load).map(|_| ())
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, Fault> {
        self.request(Command::Call(args.to_vec()))
    }
}

/// Runner-side end of a party, used to stop it after a timeout
pub(super) struct PartyControl {
    interrupts: UserSignalSender,
    thread: JoinHandle<()>,
}

impl PartyControl {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Raises `KeyboardInterrupt` at the next instruction the interpreter runs
    pub fn interrupt(&self) {
        // Fails once the interpreter is gone, which is what we want
        let _ = self.interrupts.send(Box::new(|vm: &VirtualMachine| {
            Err(vm.new_exception_msg(
                vm.ctx.exceptions.keyboard_interrupt.to_owned(),
                CANCELLED.to_owned(),
            ))
        }));
    }
}

/// One interpreter on its own thread, holding either the reference or the candidate
pub(super) struct Party {
    pub handle: PartyHandle,
    pub control: PartyControl,
    /// Resolves once capabilities are bound and the party accepts commands
    pub ready: oneshot::Receiver<Result<(), Fault>>,
}

/// Everything the party thread owns
pub(super) struct PartyContext {
    pub role: Role,
    pub source: String,
    pub entry_point: String,
    pub shared: Arc<SharedState>,
    pub allowed_modules: Arc<HashSet<String>>,
}

impl Party {
    pub fn spawn(context: PartyContext) -> Result<Self, Fault> {
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (interrupts, signals) = user_signal_channel();

        let thread = std::thread::Builder::new()
            .name(format!("python-{}", context.role.module_name()))
            .stack_size(SANDBOX_STACK_SIZE)
            .spawn(move || run_party(context, signals, ready_tx, command_rx, reply_tx))
            .map_err(|e| Fault::new(format!("Failed to start execution context: {e}")))?;

        Ok(Self {
            handle: PartyHandle {
                commands: command_tx,
                replies: reply_rx,
            },
            control: PartyControl { interrupts, thread },
            ready: ready_rx,
        })
    }
}

fn terminated() -> Fault {
    Fault::new("Execution context terminated unexpectedly")
}

/// Body of a party thread; exits when the driver drops its handle
fn run_party(
    context: PartyContext,
    signals: UserSignalReceiver,
    ready: oneshot::Sender<Result<(), Fault>>,
    commands: mpsc::Receiver<Command>,
    replies: mpsc::Sender<Result<Value, Fault>>,
) {
    let interpreter = Interpreter::with_init(Settings::default(), move |vm| {
        vm.set_user_signal_channel(signals);
    });

    interpreter.enter(|vm| {
        let prepared = bind_capabilities(vm, &context.shared, &context.allowed_modules)
            .and_then(|()| module_scope(vm, context.role.module_name()));
        let module = match prepared {
            Ok(scope) => scope,
            Err(fault) => {
                let _ = ready.send(Err(fault));
                return;
            }
        };
        // Argument lists are built here, out of reach of user code
        let harness = vm.new_scope_with_builtins();

        if ready.send(Ok(())).is_err() {
            return;
        }

        let mut entry: Option<PyObjectRef> = None;
        while let Ok(command) = commands.recv() {
            let reply = match command {
                Command::Load => load(vm, &context, &module).map(|target| {
                    entry = Some(target);
                    Value::Null
                }),
                Command::Call(args) => match &entry {
                    Some(target) => invoke(vm, target, &args, &harness, &context.shared),
                    None => Err(Fault::new("Entry point called before the source was loaded")),
                },
            };
            if replies.send(reply).is_err() {
                break;
            }
        }
    });
    log::trace!("Python {:?} context exited", context.role);
}

/// Binds `print`, `deep_equal` and the import hook, and strips ambient builtins
fn bind_capabilities(
    vm: &VirtualMachine,
    shared: &Arc<SharedState>,
    allowed_modules: &Arc<HashSet<String>>,
) -> Result<(), Fault> {
    let mut bindings: Vec<(&'static str, PyObjectRef)> = vec![
        ("print", log_capability(vm, shared)),
        ("deep_equal", equality_capability(vm, shared)),
        ("__import__", import_hook(vm, allowed_modules)?),
    ];
    for &name in DENIED_BUILTINS {
        let denied = vm.new_function(
            name,
            move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
                Err(vm.new_runtime_error(format!("{name}() is not available in the sandbox")))
            },
        );
        bindings.push((name, denied.into()));
    }

    for (name, value) in bindings {
        vm.builtins
            .set_attr(name, value, vm)
            .map_err(|exc| fault_from_exception(vm, exc))?;
    }
    Ok(())
}

/// `print(*values, sep=' ')` appending one entry to the log sink
fn log_capability(vm: &VirtualMachine, shared: &Arc<SharedState>) -> PyObjectRef {
    let shared = Arc::clone(shared);
    vm.new_function(
        "print",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            if shared.is_expired() {
                return Err(vm.new_runtime_error(CANCELLED.to_owned()));
            }

            let sep = match args.kwargs.get("sep") {
                Some(sep) if !vm.is_none(sep) => sep.str(vm)?.as_str().to_owned(),
                _ => " ".to_owned(),
            };
            let mut parts = Vec::with_capacity(args.args.len());
            for arg in &args.args {
                parts.push(arg.str(vm)?.as_str().to_owned());
            }

            shared.sink.lock().append(parts.join(&sep));
            Ok(vm.ctx.none())
        },
    )
    .into()
}

/// `deep_equal(left, right)` backed by the structural comparator
fn equality_capability(vm: &VirtualMachine, shared: &Arc<SharedState>) -> PyObjectRef {
    let shared = Arc::clone(shared);
    vm.new_function(
        "deep_equal",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            if shared.is_expired() {
                return Err(vm.new_runtime_error(CANCELLED.to_owned()));
            }

            let [left, right] = args.args.as_slice() else {
                return Err(vm.new_type_error("deep_equal() takes exactly 2 arguments".to_owned()));
            };
            let left = to_json(vm, left)?;
            let right = to_json(vm, right)?;
            Ok(vm.ctx.new_bool(structurally_equal(&left, &right)).into())
        },
    )
    .into()
}

/// `__import__` replacement admitting only allow-listed top-level modules
fn import_hook(
    vm: &VirtualMachine,
    allowed_modules: &Arc<HashSet<String>>,
) -> Result<PyObjectRef, Fault> {
    let original_import = vm
        .builtins
        .get_attr("__import__", vm)
        .map_err(|exc| fault_from_exception(vm, exc))?;
    let allowed_modules = Arc::clone(allowed_modules);

    let hook = vm.new_function(
        "__import__",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let module_name = match args.args.first() {
                Some(name) => name.str(vm)?.as_str().to_owned(),
                None => String::new(),
            };
            let top_level = module_name.split('.').next().unwrap_or_default();

            if !allowed_modules.contains(top_level) {
                return Err(vm.new_exception_msg(
                    vm.ctx.exceptions.import_error.to_owned(),
                    format!("Import of module '{module_name}' is not allowed"),
                ));
            }
            original_import.call(args, vm)
        },
    );
    Ok(hook.into())
}

/// Fresh module globals with `__name__` set
fn module_scope(vm: &VirtualMachine, name: &str) -> Result<Scope, Fault> {
    let scope = vm.new_scope_with_builtins();
    scope
        .globals
        .set_item("__name__", vm.ctx.new_str(name).into(), vm)
        .map_err(|exc| fault_from_exception(vm, exc))?;
    Ok(scope)
}

/// Compiles `source` and runs it in `scope`
fn run(
    vm: &VirtualMachine,
    source: &str,
    mode: Mode,
    path: &str,
    scope: &Scope,
) -> Result<PyObjectRef, Fault> {
    let code = vm
        .compile(source, mode, path.to_owned())
        .map_err(|err| Fault::new(format!("SyntaxError: {err}")))?;
    vm.run_code_obj(code, scope.clone())
        .map_err(|exc| fault_from_exception(vm, exc))
}

/// Runs the party's source, then looks up the entry point by name
fn load(vm: &VirtualMachine, context: &PartyContext, module: &Scope) -> Result<PyObjectRef, Fault> {
    let path = context.role.path();
    run(vm, &context.source, Mode::Exec, path, module)?;
    run(vm, &context.entry_point, Mode::Eval, path, module)
}

/// Calls the entry point directly from the host and reads the result back
fn invoke(
    vm: &VirtualMachine,
    target: &PyObjectRef,
    args: &[Value],
    harness: &Scope,
    shared: &SharedState,
) -> Result<Value, Fault> {
    if shared.is_expired() {
        return Err(Fault::new(CANCELLED));
    }

    let evaluated = run(vm, &argument_list(args), Mode::Eval, "<arguments>", harness)?;
    let Some(list) = evaluated.downcast_ref::<PyList>() else {
        return Err(Fault::new("Arguments did not evaluate to a list"));
    };
    let args = list.borrow_vec().to_vec();

    let returned = target
        .call(FuncArgs::from(args), vm)
        .map_err(|exc| fault_from_exception(vm, exc))?;
    to_json(vm, &returned).map_err(|exc| fault_from_exception(vm, exc))
}

fn fault_from_exception(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> Fault {
    let mut trace = String::new();
    let _ = vm.write_exception(&mut trace, &exc);

    // Last traceback line reads "ExcType: message"
    let message = trace
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            exc.as_object()
                .str(vm)
                .ok()
                .map(|s| s.as_str().to_owned())
        })
        .unwrap_or_else(|| "Unknown runtime error".to_owned());

    Fault::with_trace(message, trace.trim_end())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn spawn(role: Role, source: &str, entry_point: &str) -> Party {
        Party::spawn(PartyContext {
            role,
            source: source.to_string(),
            entry_point: entry_point.to_string(),
            shared: Arc::new(SharedState::new(10)),
            allowed_modules: Arc::default(),
        })
        .unwrap()
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_load_and_call() {
        let party = spawn(Role::Candidate, "def add(a, b):\n    return a + b\n", "add");
        party.ready.blocking_recv().unwrap().unwrap();

        party.handle.load().unwrap();
        assert_eq!(party.handle.call(&[json!(2), json!(3)]).unwrap(), json!(5));
        assert_eq!(
            party.handle.call(&[json!("a"), json!("b")]).unwrap(),
            json!("ab")
        );
    }

    #[test]
    fn test_call_before_load_faults() {
        let party = spawn(Role::Reference, "def f():\n    return 1\n", "f");
        party.ready.blocking_recv().unwrap().unwrap();
        assert!(party.handle.call(&[]).is_err());
    }

    #[test]
    fn test_interrupt_stops_busy_loop() {
        // Catching `Exception` does not swallow the interrupt
        let source = "while True:\n    try:\n        while True:\n            pass\n    except Exception:\n        pass\n";
        let party = spawn(Role::Candidate, source, "f");
        party.ready.blocking_recv().unwrap().unwrap();

        let handle = party.handle;
        let loader = std::thread::spawn(move || handle.load());
        wait_until(|| {
            party.control.interrupt();
            loader.is_finished()
        });

        let fault = loader.join().unwrap().unwrap_err();
        assert!(fault.message.contains("KeyboardInterrupt"), "{}", fault.message);
        // The handle was dropped with the loader, so the interpreter exits
        wait_until(|| party.control.is_finished());
    }
}
