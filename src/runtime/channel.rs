//! `makechan(size)`: a bounded channel exposed as `{send, recv, close}`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{Receiver, Sender, bounded};
use crossbeam::select;
use parking_lot::Mutex;

use super::runtime_error::ErrorKind;
use super::vm::CallContext;
use crate::lang::{MapData, Object, UserFunction};

#[derive(Debug)]
struct Channel {
    tx: Sender<Object>,
    rx: Receiver<Object>,
    closed: AtomicBool,
    /// Dropped on close so blocked senders and receivers wake up.
    close_signal: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        let (signal_tx, signal_rx) = bounded(0);
        Channel {
            tx,
            rx,
            closed: AtomicBool::new(false),
            close_signal: Mutex::new(Some(signal_tx)),
            closed_rx: signal_rx,
        }
    }

    fn send(&self, ctx: &CallContext<'_>, value: Object) -> Result<(), ErrorKind> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ErrorKind::SendOnClosedChannel);
        }
        select! {
            send(self.tx, value) -> res => res.map_err(|_| ErrorKind::SendOnClosedChannel),
            recv(self.closed_rx) -> _ => Err(ErrorKind::SendOnClosedChannel),
            recv(ctx.abort_token().receiver()) -> _ => Err(ErrorKind::Aborted),
        }
    }

    fn recv(&self, ctx: &CallContext<'_>) -> Result<Object, ErrorKind> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(Object::Undefined);
        }
        select! {
            recv(self.rx) -> msg => Ok(msg.unwrap_or_default()),
            recv(self.closed_rx) -> _ => Ok(Object::Undefined),
            recv(ctx.abort_token().receiver()) -> _ => Err(ErrorKind::Aborted),
        }
    }

    fn close(&self) -> Result<(), ErrorKind> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ErrorKind::CloseOfClosedChannel);
        }
        self.close_signal.lock().take();
        Ok(())
    }
}

pub(crate) fn builtin_makechan(_: &CallContext<'_>, args: &[Object]) -> Result<Object, ErrorKind> {
    let capacity = match args {
        [] => 0,
        [Object::Int(n)] if *n >= 0 => *n as usize,
        [Object::Int(n)] => return Err(ErrorKind::custom(format!("makechan: negative buffer size {}", n))),
        [other] => return Err(ErrorKind::invalid_arg("first", "int", &other.type_name())),
        _ => return Err(ErrorKind::wrong_args("0 or 1", args.len())),
    };
    let chan = Arc::new(Channel::new(capacity));
    let mut attrs = MapData::new();

    let c = chan.clone();
    attrs.insert(
        "send".to_string(),
        UserFunction::object("send", move |ctx, args| {
            let [value] = args else {
                return Err(ErrorKind::wrong_args("1", args.len()));
            };
            c.send(ctx, value.clone())?;
            Ok(Object::Undefined)
        }),
    );

    let c = chan.clone();
    attrs.insert(
        "recv".to_string(),
        UserFunction::object("recv", move |ctx, args| {
            if !args.is_empty() {
                return Err(ErrorKind::wrong_args("0", args.len()));
            }
            c.recv(ctx)
        }),
    );

    let c = chan;
    attrs.insert(
        "close".to_string(),
        UserFunction::object("close", move |_, args| {
            if !args.is_empty() {
                return Err(ErrorKind::wrong_args("0", args.len()));
            }
            c.close()?;
            Ok(Object::Undefined)
        }),
    );

    Ok(Object::immutable_map(attrs))
}
