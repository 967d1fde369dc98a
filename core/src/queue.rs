//! The command queue: an ordered pending-job list plus an interrupt stack used by
//! `SIGNAL SHUTDOWN`/`SIGNAL HALT` to preempt everything queued ahead of them.

use std::{collections::VecDeque, sync::Mutex};

use tokio::sync::Notify;
use torctl_wire::Command;

use crate::{
    error::TorError,
    job::{Job, JobOutput},
};

struct Inner {
    execute: VecDeque<Job>,
    interrupt: Vec<(Vec<Job>, String)>,
    destroyed: bool,
}

/// Owned by the [`crate::Controller`]; the dispatcher is the sole reader of
/// [`CommandQueue::dequeue_next`].
pub(crate) struct CommandQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                execute: VecDeque::new(),
                interrupt: Vec::new(),
                destroyed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a command. If the controller is already destroyed, returns a job
    /// that is already in the `Error` state — this never fails loudly, per the
    /// "enqueue never throws" guarantee.
    pub(crate) fn enqueue(
        &self,
        name: impl Into<String>,
        command: Command,
        on_success: impl FnOnce(JobOutput) + Send + 'static,
        on_failure: impl FnOnce(TorError) + Send + 'static,
    ) -> Job {
        let name = name.into();

        if self.is_destroyed() {
            return Job::failed(
                name,
                command,
                TorError::IllegalState("isDestroyed".to_owned()),
                on_failure,
            );
        }

        let preempt_reason = match &command {
            Command::Signal(signal) if signal.is_preempting() => {
                Some(format!("{} {}", command.keyword(), signal.as_str()))
            }
            _ => None,
        };

        let job = Job::new(name, command, on_success, on_failure);

        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(reason) = preempt_reason {
                if !inner.execute.is_empty() {
                    let snapshot: Vec<Job> = inner.execute.drain(..).collect();
                    inner.interrupt.push((snapshot, reason));
                }
            }
            inner.execute.push_back(job.clone());
        }

        self.notify.notify_one();
        job
    }

    /// Wait until there is work to do, or until woken spuriously (the dispatcher
    /// re-checks `dequeue_next` regardless).
    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Drain the interrupt stack, then pop jobs off the execute queue until one
    /// successfully transitions to `Executing` (skipping any that were cancelled
    /// while still queued).
    pub(crate) fn dequeue_next(&self) -> Option<Job> {
        self.drain_interrupts();
        let mut inner = self.inner.lock().unwrap();
        while let Some(job) = inner.execute.pop_front() {
            if job.executing().is_ok() {
                return Some(job);
            }
        }
        None
    }

    fn drain_interrupts(&self) {
        let batch = std::mem::take(&mut self.inner.lock().unwrap().interrupt);
        for (jobs, reason) in batch {
            for job in jobs {
                job.error(TorError::Interrupted(reason.clone()));
            }
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.inner.lock().unwrap().destroyed
    }

    /// Drain the interrupt stack, then error every still-pending job and mark the
    /// queue destroyed so further enqueues fail immediately.
    pub(crate) fn destroy(&self) {
        self.drain_interrupts();
        let jobs = {
            let mut inner = self.inner.lock().unwrap();
            inner.destroyed = true;
            std::mem::take(&mut inner.execute)
        };
        for job in jobs {
            job.error(TorError::Interrupted("onDestroy".to_owned()));
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().execute.len()
    }

    /// Push an already-constructed job straight onto the execute stack, for the
    /// [`crate::temp_queue::TempCommandQueue`] transferring its buffered jobs on
    /// attach. Unlike [`Self::enqueue`] this never triggers preemption: every job
    /// a temp queue buffers is unprivileged by construction, so it can never be a
    /// `SIGNAL SHUTDOWN`/`HALT`.
    pub(crate) fn attach_existing(&self, job: Job) {
        if self.is_destroyed() {
            job.error(TorError::IllegalState("isDestroyed".to_owned()));
            return;
        }
        self.inner.lock().unwrap().execute.push_back(job);
        self.notify.notify_one();
    }
}
