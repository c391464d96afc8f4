use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use tracing::debug;

/// One node of the cancellation tree.
///
/// Aborting a token aborts every live descendant, depth first. A token
/// also exposes a receiver that disconnects on abort, so blocking
/// operations can `select!` on it next to their own channel.
#[derive(Debug, Clone)]
pub struct AbortToken(Arc<Node>);

#[derive(Debug)]
struct Node {
    aborted: AtomicBool,
    signal: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
    children: Mutex<Vec<Weak<Node>>>,
}

impl Default for AbortToken {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortToken {
    /// A root token.
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        AbortToken(Arc::new(Node {
            aborted: AtomicBool::new(false),
            signal: Mutex::new(Some(tx)),
            done: rx,
            children: Mutex::new(Vec::new()),
        }))
    }

    /// A token that is aborted together with `self`. A child of an
    /// already aborted token starts out aborted.
    pub fn child(&self) -> AbortToken {
        let child = AbortToken::new();
        {
            let mut children = self.0.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.0));
        }
        if self.is_aborted() {
            child.abort();
        }
        child
    }

    pub fn abort(&self) {
        if self.0.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.0.signal.lock().take();
        let cascaded = self.abort_children();
        if cascaded > 0 {
            debug!(children = cascaded, "abort cascaded");
        }
    }

    /// Abort the descendants only; returns how many direct children were
    /// still alive.
    pub fn abort_children(&self) -> usize {
        let children: Vec<_> = self.0.children.lock().drain(..).filter_map(|c| c.upgrade()).collect();
        for child in &children {
            AbortToken(child.clone()).abort();
        }
        children.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::SeqCst)
    }

    /// Becomes ready (disconnected) once the token is aborted.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.0.done
    }

    pub fn ptr_eq(&self, other: &AbortToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
