//! Buffers unprivileged commands submitted before a [`Controller`] exists (e.g.
//! while a host process is still launching tor), then transfers them onto the
//! controller's execute stack the moment one attaches.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use torctl_wire::Command;

use crate::{
    controller::Controller,
    error::TorError,
    job::{Job, JobOutput},
};

enum State {
    Buffering(VecDeque<Job>),
    Attached(Arc<crate::queue::CommandQueue>),
}

/// Cheaply cloneable so `attach` can hand a clone to the controller's `on_destroy`
/// hook without the controller needing to know this type exists.
#[derive(Clone)]
pub struct TempCommandQueue {
    state: Arc<Mutex<State>>,
}

impl Default for TempCommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TempCommandQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Buffering(VecDeque::new()))),
        }
    }

    /// Enqueue an unprivileged command. A privileged command (`AUTHENTICATE`,
    /// `SIGNAL SHUTDOWN`/`HALT`, ownership) is rejected synchronously: there is no
    /// controller yet for it to be privileged *on*.
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        command: Command,
        on_success: impl FnOnce(JobOutput) + Send + 'static,
        on_failure: impl FnOnce(TorError) + Send + 'static,
    ) -> Job {
        let name = name.into();
        if command.is_privileged() {
            return Job::failed(
                name,
                command,
                TorError::IllegalState("privileged command before controller attach".to_owned()),
                on_failure,
            );
        }

        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Attached(queue) => queue.enqueue(name, command, on_success, on_failure),
            State::Buffering(buffered) => {
                let job = Job::new(name, command, on_success, on_failure);
                buffered.push_back(job.clone());
                job
            }
        }
    }

    /// Transfer every buffered job onto `controller`'s execute stack, switch to
    /// direct delegation, and arrange for [`Self::destroy`] to run when `controller`
    /// is destroyed. A second call on an already-attached queue is a no-op.
    pub fn attach(&self, controller: &Controller) {
        let queue = controller.queue_handle();
        let mut state = self.state.lock().unwrap();
        if matches!(&*state, State::Attached(_)) {
            return;
        }
        let State::Buffering(buffered) = std::mem::replace(&mut *state, State::Attached(queue.clone())) else {
            unreachable!("just checked for Attached above")
        };
        drop(state);

        for job in buffered {
            queue.attach_existing(job);
        }

        let this = self.clone();
        controller.on_destroy(move || this.destroy());
    }

    /// Cancel every job still buffered (a no-op once attached, since ownership of
    /// pending jobs has moved to the controller's own queue by then).
    pub fn destroy(&self) {
        if let State::Buffering(buffered) = &mut *self.state.lock().unwrap() {
            for job in buffered.drain(..) {
                job.cancel(TorError::Cancelled);
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Attached(_))
    }
}
