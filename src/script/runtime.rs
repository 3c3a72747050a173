//! Embedded script runtime
//!
//! Every invocation gets a fresh [`Engine`] configured with the limits from
//! [`ScriptConfig`], the host types (`Job`, `Page`) and the capability modules resolved for
//! the job. Evaluation happens on tokio's blocking pool; host functions that need the
//! async runtime re-enter it through [`bridge`].
//!
//! Each evaluation belongs to a [`Cancellation`]. Once it is cancelled the engine stops at
//! its next operation and every pending or later [`bridge`] call fails, so an abandoned
//! attempt can neither keep running nor touch the job after it was settled.

use crate::capability::ModuleSet;
use crate::config::ScriptConfig;
use crate::document::Callable;
use crate::error::JobError;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Position, Scope, AST};
use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Result of a host function called from a script.
pub type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

const CANCELLED: &str = "cancelled";

/// Stop signal shared by every script evaluation of one job attempt.
#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`Cancellation::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Cancellation>> = const { RefCell::new(None) };
}

/// Marks the cancellation of the evaluation running on this thread until dropped.
struct CurrentCancellation(Option<Cancellation>);

impl CurrentCancellation {
    fn enter(cancel: &Cancellation) -> Self {
        Self(CURRENT.with(|current| current.replace(Some(cancel.clone()))))
    }
}

impl Drop for CurrentCancellation {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Compiled code plus the capability set it was compiled against.
///
/// Closures returned by a script (custom browser actions, for instance) can only be
/// called against the AST that defined them, so both travel together. Calls through the
/// unit stay under the cancellation of the invocation that produced it.
#[derive(Clone)]
pub struct ScriptUnit {
    pub ast: Arc<AST>,
    pub modules: ModuleSet,
    pub cancel: Cancellation,
}

pub struct ScriptRuntime {
    config: ScriptConfig,
}

impl ScriptRuntime {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Engine with limits applied and no host types or capability modules.
    pub fn bare_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.config.max_operations);
        engine.set_max_call_levels(self.config.max_call_levels);
        engine.set_max_expr_depths(self.config.max_expr_depth, self.config.max_expr_depth);
        engine.set_max_string_size(self.config.max_string_size);
        engine.set_max_array_size(self.config.max_array_size);
        engine.set_max_map_size(self.config.max_map_size);
        // `import` is disabled; script modules are only reachable through `modules`.
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.on_print(|text| info!(target: "docket::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            debug!(target: "docket::script", source = ?source, position = %pos, "{}", text)
        });
        engine
    }

    /// Engine for running job code: limits, host types and capability namespaces.
    pub fn engine(&self, modules: &ModuleSet, cancel: &Cancellation) -> Engine {
        let mut engine = self.bare_engine();
        let cancel = cancel.clone();
        engine.on_progress(move |_| {
            cancel
                .is_cancelled()
                .then(|| Dynamic::from(CANCELLED.to_string()))
        });
        crate::script::handle::register_job_api(&mut engine);
        crate::browser::handle::register_page_api(&mut engine);
        for module in modules.iter() {
            engine.register_static_module(module.name.as_str(), module.module.clone());
        }
        engine
    }

    /// Invoke a callable with positional arguments.
    ///
    /// Missing arguments are passed as `()`; extra arguments are dropped.
    pub async fn invoke(
        self: &Arc<Self>,
        callable: &Callable,
        modules: &ModuleSet,
        cancel: &Cancellation,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, JobError> {
        self.invoke_unit(callable, modules, cancel, args)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`ScriptRuntime::invoke`], also returning the compiled unit so closures in the
    /// result can be called later.
    pub async fn invoke_unit(
        self: &Arc<Self>,
        callable: &Callable,
        modules: &ModuleSet,
        cancel: &Cancellation,
        args: Vec<Dynamic>,
    ) -> Result<(Dynamic, ScriptUnit), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let runtime = Arc::clone(self);
        let callable = callable.clone();
        let modules = modules.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || runtime.invoke_blocking(&callable, modules, cancel, args))
            .await
            .map_err(|e| JobError::Script(format!("script task aborted: {}", e)))?
    }

    fn invoke_blocking(
        &self,
        callable: &Callable,
        modules: ModuleSet,
        cancel: Cancellation,
        mut args: Vec<Dynamic>,
    ) -> Result<(Dynamic, ScriptUnit), JobError> {
        let _current = CurrentCancellation::enter(&cancel);
        let engine = self.engine(&modules, &cancel);
        let ast = engine
            .compile(callable.script_definition())
            .map_err(|e| JobError::Script(e.to_string()))?;
        args.resize(callable.arity(), Dynamic::UNIT);
        let value = engine
            .call_fn::<Dynamic>(&mut Scope::new(), &ast, Callable::ENTRY, args)
            .map_err(|e| script_error(*e))?;
        Ok((
            value,
            ScriptUnit {
                ast: Arc::new(ast),
                modules,
                cancel,
            },
        ))
    }

    /// Call a function pointer (typically a closure) produced by an earlier invocation.
    ///
    /// Arguments are trimmed from the end until the pointer accepts them, so `|page| ..`
    /// and `|page, arg| ..` are both accepted where two arguments are offered.
    pub async fn call_pointer(
        self: &Arc<Self>,
        pointer: &FnPtr,
        unit: &ScriptUnit,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, JobError> {
        if unit.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let runtime = Arc::clone(self);
        let pointer = pointer.clone();
        let unit = unit.clone();
        tokio::task::spawn_blocking(move || {
            let _current = CurrentCancellation::enter(&unit.cancel);
            let engine = runtime.engine(&unit.modules, &unit.cancel);
            let mut args = args;
            loop {
                match pointer.call::<Dynamic>(&engine, &unit.ast, args.clone()) {
                    Err(err)
                        if !args.is_empty()
                            && matches!(&*err, EvalAltResult::ErrorFunctionNotFound(signature, _)
                                if signature.starts_with(pointer.fn_name())) =>
                    {
                        args.pop();
                    }
                    result => return result.map_err(|e| script_error(*e)),
                }
            }
        })
        .await
        .map_err(|e| JobError::Script(format!("script task aborted: {}", e)))?
    }
}

/// Map an evaluation error to a job error. `throw` becomes [`JobError::Thrown`].
pub fn script_error(err: EvalAltResult) -> JobError {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => script_error(*inner),
        EvalAltResult::ErrorRuntime(value, _) => JobError::Thrown(thrown_message(&value)),
        EvalAltResult::ErrorTerminated(..) => JobError::Cancelled,
        other => JobError::Script(other.to_string()),
    }
}

fn thrown_message(value: &Dynamic) -> String {
    if let Some(map) = value.read_lock::<rhai::Map>() {
        if let Some(message) = map.get("message") {
            return message.to_string();
        }
    }
    value.to_string()
}

/// Error raised to a script from a host function.
pub fn host_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

fn cancelled_error() -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorTerminated(
        Dynamic::from(CANCELLED.to_string()),
        Position::NONE,
    ))
}

/// Run a future to completion from inside a script host function.
///
/// Script evaluation runs on the blocking pool, where blocking on the runtime handle is
/// permitted. Under a cancelled evaluation the future is not started, or is dropped
/// as soon as the cancellation arrives.
pub fn bridge<F: Future>(future: F) -> ScriptResult<F::Output> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| host_error(format!("no async runtime available: {}", e)))?;
    let Some(cancel) = CURRENT.with(|current| current.borrow().clone()) else {
        return Ok(handle.block_on(future));
    };
    if cancel.is_cancelled() {
        return Err(cancelled_error());
    }
    handle.block_on(async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled_error()),
            output = future => Ok(output),
        }
    })
}
