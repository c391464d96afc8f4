//! External cancellation for a VM run.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvError, at, bounded, never};
use crossbeam::select;
use tracing::debug;

use super::abort::AbortToken;
use super::runtime_error::{ErrorKind, RuntimeError};
use super::vm::Vm;
use crate::Error;

/// A cancellation source with an optional deadline. Contexts derived from
/// a parent are cancelled with it and never outlive its deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: AbortToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled on its own.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(&self) -> Context {
        Context {
            token: self.token.child(),
            deadline: self.deadline,
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Context {
        Context {
            token: self.token.child(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.abort();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Ready once the context is cancelled. Deadlines are not reflected
    /// here; select on [`Context::deadline`] as well.
    pub fn done(&self) -> &Receiver<()> {
        self.token.receiver()
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Why the context ended, or `None` while it is live.
    pub fn err(&self) -> Option<Error> {
        if self.expired() {
            Some(Error::DeadlineExceeded)
        } else if self.token.is_aborted() {
            Some(Error::Cancelled)
        } else {
            None
        }
    }
}

/// Run `vm` until it finishes or `ctx` ends. When the context wins, the VM
/// is aborted and this still waits for it to unwind before returning.
pub fn run_with_context(vm: &mut Vm, ctx: &Context) -> Result<(), Error> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    let token = vm.abort_token().clone();
    let timer = ctx.deadline.map_or_else(never, at);

    thread::scope(|scope| {
        let (tx, rx) = bounded(1);
        scope.spawn(move || {
            let _ = tx.send(vm.run());
        });

        let finished = |result: Result<Result<(), RuntimeError>, RecvError>| match result {
            Ok(run) => run.map_err(Error::Runtime),
            Err(_) => Err(Error::Runtime(ErrorKind::custom("vm thread exited without a result").into())),
        };

        select! {
            recv(rx) -> result => finished(result),
            recv(ctx.done()) -> _ => {
                debug!("context cancelled; aborting vm");
                token.abort();
                let _ = rx.recv();
                Err(Error::Cancelled)
            }
            recv(timer) -> _ => {
                debug!("context deadline passed; aborting vm");
                token.abort();
                let _ = rx.recv();
                Err(Error::DeadlineExceeded)
            }
        }
    })
}
