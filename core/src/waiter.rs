//! FIFO rendezvous between writes and the replies they eventually produce.
//!
//! tor answers commands strictly in the order it received them. The registry
//! enforces the corresponding invariant on this side: a write and the waiter that
//! will receive its reply must be pushed as one atomic step, or a second writer
//! could interleave between another writer's write and its push.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use futures::channel::oneshot;
use torctl_helper::asynch::InfallibleOneshotReceiver;
use torctl_wire::ReplyBatch;

use crate::error::TorError;

struct Inner {
    queue: VecDeque<oneshot::Sender<Option<ReplyBatch>>>,
    destroyed: bool,
}

/// The registry shared by the dispatcher (which creates waiters and, on destroy,
/// drains them) and the reader loop (which resolves the head waiter on every
/// complete reply batch).
#[derive(Clone)]
pub(crate) struct WaiterRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl Default for WaiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WaiterRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                destroyed: false,
            })),
        }
    }

    /// Atomically: run `write`, then push a fresh waiter. `write` runs under the
    /// registry lock, which is the pivotal invariant (see module docs) — it must be
    /// non-async and must not itself take the registry lock.
    pub(crate) fn create(
        &self,
        write: impl FnOnce() -> Result<(), TorError>,
    ) -> Result<InfallibleOneshotReceiver<Option<ReplyBatch>>, TorError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return Err(TorError::IllegalState("waiter registry destroyed".to_owned()));
        }
        write()?;
        let (tx, rx) = oneshot::channel();
        inner.queue.push_back(tx);
        Ok(rx.into())
    }

    /// Deliver a reply batch to the oldest outstanding waiter. A batch with no
    /// matching waiter (registry empty) is a dangling reply; callers should log and
    /// drop it rather than treat it as fatal.
    pub(crate) fn respond_next(&self, batch: ReplyBatch) -> bool {
        let waiter = self.inner.lock().unwrap().queue.pop_front();
        match waiter {
            Some(tx) => {
                drop(tx.send(Some(batch)));
                true
            }
            None => false,
        }
    }

    /// Mark destroyed and resolve every outstanding waiter with `None`, which the
    /// job layer reads as "stream ended".
    pub(crate) fn destroy(&self) {
        let mut waiters = {
            let mut inner = self.inner.lock().unwrap();
            inner.destroyed = true;
            std::mem::take(&mut inner.queue)
        };
        for tx in waiters.drain(..) {
            drop(tx.send(None));
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_resolve_in_fifo_order() {
        let registry = WaiterRegistry::new();
        let first = registry.create(|| Ok(())).unwrap();
        let second = registry.create(|| Ok(())).unwrap();

        let mut batch_a = ReplyBatch::default();
        batch_a.push(torctl_wire::ReplyLine {
            code: 250,
            message: "a".to_owned(),
            kind: torctl_wire::ReplyLineKind::End,
            data: None,
        });
        let mut batch_b = ReplyBatch::default();
        batch_b.push(torctl_wire::ReplyLine {
            code: 250,
            message: "b".to_owned(),
            kind: torctl_wire::ReplyLineKind::End,
            data: None,
        });

        assert!(registry.respond_next(batch_a.clone()));
        assert!(registry.respond_next(batch_b.clone()));

        assert_eq!(first.await, Some(batch_a));
        assert_eq!(second.await, Some(batch_b));
    }

    #[tokio::test]
    async fn destroy_resolves_outstanding_with_none() {
        let registry = WaiterRegistry::new();
        let waiter = registry.create(|| Ok(())).unwrap();
        registry.destroy();
        assert_eq!(waiter.await, None);
        assert!(registry.create(|| Ok(())).is_err());
    }

    #[test]
    fn write_failure_does_not_push_a_waiter() {
        let registry = WaiterRegistry::new();
        let result = registry.create(|| Err(TorError::Cancelled));
        assert!(result.is_err());
        assert_eq!(registry.outstanding(), 0);
    }
}
