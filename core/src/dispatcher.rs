//! Pulls the next job off the [`CommandQueue`], hands it to the writer task, and
//! spawns a per-job task that completes it once its reply batch arrives.

use std::sync::Arc;

use tokio::sync::mpsc;
use torctl_wire::Command;

use crate::{
    error::TorError,
    handles::ControllerGuard,
    queue::CommandQueue,
    waiter::WaiterRegistry,
};

/// Runs until the guard's token is cancelled or the queue is destroyed. Every
/// dequeued job either gets written (and a completion task spawned for it) or is
/// errored immediately if the waiter registry has already been torn down.
pub(crate) async fn run(
    queue: Arc<CommandQueue>,
    waiters: WaiterRegistry,
    writer_tx: mpsc::UnboundedSender<Command>,
    guard: ControllerGuard,
) {
    loop {
        tokio::select! {
            () = guard.cancelled() => return,
            () = queue.notified() => {}
        }

        while let Some(job) = queue.dequeue_next() {
            if guard.should_shutdown() {
                job.error(TorError::Interrupted("controller destroyed".to_owned()));
                continue;
            }

            let Some(command) = job.take_command() else {
                job.error(TorError::IllegalState("job had no command to dispatch".to_owned()));
                continue;
            };

            let writer_tx = writer_tx.clone();
            let waiter = waiters.create(move || {
                writer_tx
                    .send(command)
                    .map_err(|_| TorError::Interrupted("writer task gone".to_owned()))
            });

            match waiter {
                Ok(waiter) => {
                    tokio::spawn(async move {
                        let reply = waiter.await;
                        job.respond(reply, "Stream Ended");
                    });
                }
                Err(err) => job.error(err),
            }
        }

        if queue.is_destroyed() {
            return;
        }
    }
}
