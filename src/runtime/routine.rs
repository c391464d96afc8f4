//! `start(fn, args...)`: run a callable on its own thread.
//!
//! Compiled functions get a shallow clone of the calling VM; builtins and
//! host functions are called directly. Either way the routine runs under
//! a child of the caller's abort token, and the spawning VM does not
//! finish its run until every routine it started has ended.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, bounded};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::abort::AbortToken;
use super::runtime_error::ErrorKind;
use super::vm::CallContext;
use crate::lang::{MapData, Object, UserFunction};

type Outcome = Result<Object, ErrorKind>;

/// Shared between the routine thread and the handle returned to scripts.
#[derive(Debug)]
struct Routine {
    token: AbortToken,
    outcome: Mutex<Option<Outcome>>,
    /// Disconnects when the routine thread has stored its outcome.
    done: Receiver<()>,
}

impl Routine {
    fn is_done(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Block until the routine ends, the caller is aborted, or `timeout`
    /// passes. Returns whether the routine ended.
    fn wait(&self, caller: &AbortToken, timeout: Option<Duration>) -> Result<bool, ErrorKind> {
        if self.is_done() {
            return Ok(true);
        }
        let timer = timeout.map_or_else(crossbeam::channel::never, crossbeam::channel::after);
        select! {
            recv(self.done) -> _ => Ok(true),
            recv(caller.receiver()) -> _ => Err(ErrorKind::Aborted),
            recv(timer) -> _ => Ok(self.is_done()),
        }
    }
}

pub(crate) fn builtin_start(ctx: &CallContext<'_>, args: &[Object]) -> Result<Object, ErrorKind> {
    let Some((callee, rest)) = args.split_first() else {
        return Err(ErrorKind::wrong_args(">=1", 0));
    };
    if !callee.is_callable() {
        return Err(ErrorKind::invalid_arg("first", "callable", &callee.type_name()));
    }
    let rest = rest.to_vec();

    let (done_tx, done_rx) = bounded::<()>(0);
    let (body, token, guard): (Box<dyn FnOnce() -> Outcome + Send>, _, _) = match (callee, ctx.vm()) {
        (Object::CompiledFunction(func), Some(vm)) => {
            let mut child = vm.shallow_clone();
            let token = child.abort_token().clone();
            let func = func.clone();
            let body = Box::new(move || child.run_compiled(func, rest).map_err(|err| err.kind));
            (body, token, Some(vm.routine_guard()))
        }
        (Object::CompiledFunction(_), None) => {
            return Err(ErrorKind::custom("start: compiled functions need a running VM"));
        }
        (callable, vm) => {
            let token = ctx.abort_token().child();
            let callable = callable.clone();
            let inner = token.clone();
            let body = Box::new(move || call_direct(&callable, &inner, &rest));
            (body, token, vm.map(|vm| vm.routine_guard()))
        }
    };

    let routine = Arc::new(Routine {
        token,
        outcome: Mutex::new(None),
        done: done_rx,
    });

    let shared = routine.clone();
    let spawned = thread::Builder::new().name("vvc-routine".to_string()).spawn(move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%message, "routine panicked");
                Err(ErrorKind::Panic {
                    message,
                    backtrace: Backtrace::force_capture().to_string(),
                })
            }
        };
        debug!(ok = outcome.is_ok(), "routine finished");
        *shared.outcome.lock() = Some(outcome);
        drop(done_tx);
        drop(guard);
    });
    if let Err(err) = spawned {
        return Err(ErrorKind::custom(format!("start: cannot spawn routine: {}", err)));
    }
    debug!("routine started");

    Ok(routine_handle(routine))
}

fn call_direct(callable: &Object, token: &AbortToken, args: &[Object]) -> Outcome {
    let ctx = CallContext::detached(token);
    match callable {
        Object::BuiltinFunction(f) => f.call(&ctx, args),
        Object::UserFunction(f) => f.call(&ctx, args),
        other => Err(ErrorKind::NotCallable(other.type_name())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `{result, wait, abort}` over one routine.
fn routine_handle(routine: Arc<Routine>) -> Object {
    let mut attrs = MapData::new();

    let r = routine.clone();
    attrs.insert(
        "result".to_string(),
        UserFunction::object("result", move |ctx, args| {
            if !args.is_empty() {
                return Err(ErrorKind::wrong_args("0", args.len()));
            }
            r.wait(ctx.abort_token(), None)?;
            Ok(match r.outcome.lock().clone() {
                Some(Ok(value)) => value,
                Some(Err(kind)) => Object::error_message(kind.to_string()),
                None => Object::Undefined,
            })
        }),
    );

    let r = routine.clone();
    attrs.insert(
        "wait".to_string(),
        UserFunction::object("wait", move |ctx, args| {
            let timeout = match args {
                [] => None,
                [seconds] => timeout_of(seconds_arg(seconds)?),
                _ => return Err(ErrorKind::wrong_args("0 or 1", args.len())),
            };
            r.wait(ctx.abort_token(), timeout).map(Object::Bool)
        }),
    );

    let r = routine;
    attrs.insert(
        "abort".to_string(),
        UserFunction::object("abort", move |_, args| {
            if !args.is_empty() {
                return Err(ErrorKind::wrong_args("0", args.len()));
            }
            r.token.abort();
            Ok(Object::Undefined)
        }),
    );

    Object::immutable_map(attrs)
}

/// A seconds argument as int or float; negative means no limit.
fn seconds_arg(value: &Object) -> Result<f64, ErrorKind> {
    match value {
        Object::Int(i) => Ok(*i as f64),
        Object::Float(f) => Ok(*f),
        other => Err(ErrorKind::invalid_arg("first", "int(compatible)", &other.type_name())),
    }
}

/// `None` (no limit) for negative, NaN, infinite, or too large for a
/// `Duration`.
fn timeout_of(seconds: f64) -> Option<Duration> {
    if seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// `sleep(seconds)`: wakes early with an abort error if the caller is
/// aborted. Non-positive values return at once; values beyond the
/// `Duration` range sleep until aborted.
pub(crate) fn builtin_sleep(ctx: &CallContext<'_>, args: &[Object]) -> Result<Object, ErrorKind> {
    let [seconds] = args else {
        return Err(ErrorKind::wrong_args("1", args.len()));
    };
    let seconds = seconds_arg(seconds)?;
    if seconds.is_nan() || seconds <= 0.0 {
        return Ok(Object::Undefined);
    }
    match timeout_of(seconds) {
        Some(duration) => select! {
            recv(ctx.abort_token().receiver()) -> _ => Err(ErrorKind::Aborted),
            default(duration) => Ok(Object::Undefined),
        },
        None => {
            let _ = ctx.abort_token().receiver().recv();
            Err(ErrorKind::Aborted)
        }
    }
}
