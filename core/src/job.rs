//! Job state machine: one user-submitted command from enqueue through its terminal
//! state, including the at-most-once completion callback invocation.

use std::sync::{Arc, Mutex};

use torctl_wire::{Command, OnionKey, Reply, ReplyBatch, ReplyLine};
use zeroize::Zeroize;

use crate::{error::TorError, event::EventKind};

/// The parsed, command-specific result of a successful job.
#[derive(Debug, Clone)]
pub enum JobOutput {
    /// A bare `250 OK` with nothing else of interest.
    Ok,
    /// `GETINFO`/`GETCONF`-shaped `key=value` lines.
    KeyValues(Vec<(String, String)>),
    /// `ADD_ONION`'s success lines.
    OnionAdded {
        service_id: String,
        private_key_b64: Option<String>,
    },
    /// Every line of the batch, unparsed, for commands with no typed output here yet.
    Raw(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enqueued,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl JobState {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

type SuccessCallback = Box<dyn FnOnce(JobOutput) + Send + 'static>;
type FailureCallback = Box<dyn FnOnce(TorError) + Send + 'static>;

struct Callbacks {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

/// A handle to one submitted command's lifecycle.
///
/// Cheaply cloneable; every clone observes the same state. The command queue holds
/// one clone while it is pending, the dispatcher's await-task holds one while
/// waiting on a reply, and the caller holds one to inspect/cancel it.
#[derive(Clone)]
pub struct Job {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    name: String,
    command: Option<Command>,
    state: JobState,
    callbacks: Option<Callbacks>,
    /// Key material to zero once this job reaches a terminal state, carried
    /// separately from `command` since `take_command` consumes the command itself
    /// before the job ever completes.
    pending_key_zero: Option<String>,
    /// Which reply shape to parse a success batch into, captured at construction
    /// since `take_command` empties `command` before the reply ever arrives.
    response_shape: ResponseShape,
}

/// The reply shape a command's success batch should be parsed into. A snapshot of
/// `Command`'s discriminant, kept independently of the command itself.
#[derive(Clone, Copy)]
enum ResponseShape {
    KeyValues,
    AddOnion,
    OnionClientAuthView,
    Raw,
}

fn response_shape(command: &Command) -> ResponseShape {
    match command {
        Command::GetInfo(_) | Command::ConfigGet(_) => ResponseShape::KeyValues,
        Command::AddOnion { .. } => ResponseShape::AddOnion,
        Command::OnionClientAuthView(_) => ResponseShape::OnionClientAuthView,
        Command::Authenticate(_)
        | Command::ConfigLoad(_)
        | Command::ConfigReset(_)
        | Command::ConfigSave
        | Command::ConfigSet(_)
        | Command::DropGuards
        | Command::HsFetch { .. }
        | Command::DelOnion(_)
        | Command::MapAddress(_)
        | Command::OnionClientAuthAdd { .. }
        | Command::OnionClientAuthRemove(_)
        | Command::TakeOwnership
        | Command::DropOwnership
        | Command::Resolve { .. }
        | Command::SetEvents(_)
        | Command::Signal(_) => ResponseShape::Raw,
    }
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        mut command: Command,
        on_success: impl FnOnce(JobOutput) + Send + 'static,
        on_failure: impl FnOnce(TorError) + Send + 'static,
    ) -> Self {
        if let Command::SetEvents(events) = &mut command {
            union_required_events(events);
        }
        let pending_key_zero = key_material_to_destroy(&command);
        let response_shape = response_shape(&command);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                name: name.into(),
                command: Some(command),
                state: JobState::Enqueued,
                callbacks: Some(Callbacks {
                    on_success: Some(Box::new(on_success)),
                    on_failure: Some(Box::new(on_failure)),
                }),
                pending_key_zero,
                response_shape,
            })),
        }
    }

    /// Build an already-failed job, for call sites (e.g. enqueue-after-destroy) that
    /// must hand back a handle without ever touching the transport.
    pub fn failed(
        name: impl Into<String>,
        command: Command,
        cause: TorError,
        on_failure: impl FnOnce(TorError) + Send + 'static,
    ) -> Self {
        let job = Self::new(name, command, |_| {}, on_failure);
        job.error(cause);
        job
    }

    pub fn name(&self) -> String {
        self.inner.lock().unwrap().name.clone()
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().unwrap().state
    }

    /// Take the command out so the dispatcher can encode it. Leaves `None` behind;
    /// a job's command is consumed exactly once.
    pub fn take_command(&self) -> Option<Command> {
        self.inner.lock().unwrap().command.take()
    }

    /// Enqueued -> Executing. Fails if the job isn't Enqueued (already cancelled).
    pub fn executing(&self) -> Result<(), TorError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != JobState::Enqueued {
            return Err(TorError::IllegalState(format!(
                "cannot start executing job in state {:?}",
                inner.state
            )));
        }
        inner.state = JobState::Executing;
        Ok(())
    }

    /// Any non-terminal -> Cancelled. No-op if already terminal (the wire protocol
    /// has no cancel message, so an in-flight job cannot actually be aborted).
    pub fn cancel(&self, cause: TorError) {
        let should_fire = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                false
            } else {
                inner.state = JobState::Cancelled;
                true
            }
        };
        if should_fire {
            self.fire_failure(cause);
        }
    }

    /// Executing -> Success.
    pub fn complete(&self, output: JobOutput) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = JobState::Success;
        }
        self.fire_success(output);
    }

    /// Any non-terminal -> Error.
    pub fn error(&self, cause: TorError) {
        let should_fire = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_terminal() {
                false
            } else {
                inner.state = JobState::Error;
                true
            }
        };
        if should_fire {
            self.fire_failure(cause);
        }
    }

    /// Interpret a reply batch (or `None` for stream-ended) against this job's
    /// command and drive the state machine to its terminal state.
    pub fn respond(&self, batch: Option<ReplyBatch>, interrupt_reason: &str) {
        let Some(batch) = batch else {
            self.error(TorError::Interrupted(interrupt_reason.to_owned()));
            return;
        };
        if batch.is_empty() {
            self.error(TorError::Interrupted(interrupt_reason.to_owned()));
            return;
        }

        let shape = self.inner.lock().unwrap().response_shape;
        match batch.into_reply() {
            Reply::Ok => self.complete(JobOutput::Ok),
            Reply::Success { lines, .. } => match parse_success(shape, &lines) {
                Ok(output) => self.complete(output),
                Err(err) => self.error(err),
            },
            Reply::Error { code, message } => self.error(TorError::ReplyError { code, message }),
        }
    }

    fn fire_success(&self, output: JobOutput) {
        let callback = self
            .inner
            .lock()
            .unwrap()
            .callbacks
            .as_mut()
            .and_then(|c| c.on_success.take());
        if let Some(callback) = callback {
            callback(output);
        }
        self.destroy_pending_key();
        self.release_callbacks();
    }

    fn fire_failure(&self, cause: TorError) {
        let callback = self
            .inner
            .lock()
            .unwrap()
            .callbacks
            .as_mut()
            .and_then(|c| c.on_failure.take());
        if let Some(callback) = callback {
            callback(cause);
        }
        self.destroy_pending_key();
        self.release_callbacks();
    }

    /// Zero this job's carried private key, if it had one and was asked to destroy
    /// it on completion. Runs once per job, at whichever terminal state it reaches.
    fn destroy_pending_key(&self) {
        if let Some(mut key) = self.inner.lock().unwrap().pending_key_zero.take() {
            key.zeroize();
        }
    }

    /// Drop the callback slot entirely once a terminal state is reached, so any key
    /// material captured by a closure is released deterministically.
    fn release_callbacks(&self) {
        self.inner.lock().unwrap().callbacks = None;
    }
}

/// Pull out the private key string this command carries, if `destroy_key_on_job_completion`
/// asks for it to be zeroed once the job finishes.
fn key_material_to_destroy(command: &Command) -> Option<String> {
    match command {
        Command::AddOnion {
            key,
            destroy_key_on_job_completion,
            ..
        } => match key {
            OnionKey::Existing { key_b64, .. } if *destroy_key_on_job_completion => Some(key_b64.clone()),
            OnionKey::Existing { .. } | OnionKey::New { .. } => None,
        },
        Command::OnionClientAuthAdd {
            private_key_x25519_b64,
            destroy_key_on_job_completion,
            ..
        } => destroy_key_on_job_completion.then(|| private_key_x25519_b64.clone()),
        Command::Authenticate(_)
        | Command::ConfigGet(_)
        | Command::ConfigLoad(_)
        | Command::ConfigReset(_)
        | Command::ConfigSave
        | Command::ConfigSet(_)
        | Command::DropGuards
        | Command::HsFetch { .. }
        | Command::DelOnion(_)
        | Command::GetInfo(_)
        | Command::MapAddress(_)
        | Command::OnionClientAuthRemove(_)
        | Command::OnionClientAuthView(_)
        | Command::TakeOwnership
        | Command::DropOwnership
        | Command::Resolve { .. }
        | Command::SetEvents(_)
        | Command::Signal(_) => None,
    }
}

/// Every `SETEVENTS` is rewritten to also carry the always-subscribed events, so a
/// caller asking for one event kind never accidentally drops tor state tracking.
fn union_required_events(events: &mut Vec<String>) {
    for kind in EventKind::REQUIRED {
        let name = kind.wire_name();
        if !events.iter().any(|existing| existing == name) {
            events.push(name.to_owned());
        }
    }
}

fn parse_success(shape: ResponseShape, lines: &[ReplyLine]) -> Result<JobOutput, TorError> {
    match shape {
        ResponseShape::KeyValues => Ok(JobOutput::KeyValues(
            lines
                .iter()
                .filter_map(|line| line.message.split_once('='))
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .collect(),
        )),
        ResponseShape::AddOnion => {
            let mut service_id = None;
            let mut private_key_b64 = None;
            for line in lines {
                if let Some((key, value)) = line.message.split_once('=') {
                    match key {
                        "ServiceID" => service_id = Some(value.to_owned()),
                        "PrivateKey" => private_key_b64 = Some(value.to_owned()),
                        _ => {}
                    }
                }
            }
            let service_id = service_id.ok_or_else(|| {
                TorError::Protocol(torctl_wire::ProtocolError::MalformedStatusLine(
                    "ADD_ONION reply missing ServiceID".to_owned(),
                ))
            })?;
            Ok(JobOutput::OnionAdded {
                service_id,
                private_key_b64,
            })
        }
        ResponseShape::OnionClientAuthView => {
            Err(TorError::NotImplemented("ONION_CLIENT_AUTH_VIEW reply parsing".to_owned()))
        }
        ResponseShape::Raw => Ok(JobOutput::Raw(lines.iter().map(|l| l.message.clone()).collect())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use torctl_wire::ReplyLineKind;

    fn make_job(command: Command) -> (Job, mpsc::Receiver<Result<JobOutput, TorError>>) {
        let (tx, rx) = mpsc::channel();
        let tx_ok = tx.clone();
        let job = Job::new(
            "test",
            command,
            move |out| tx_ok.send(Ok(out)).unwrap(),
            move |err| tx.send(Err(err)).unwrap(),
        );
        (job, rx)
    }

    #[test]
    fn success_callback_fires_exactly_once() {
        let (job, rx) = make_job(Command::GetInfo(vec!["version".to_owned()]));
        job.executing().unwrap();
        let mut batch = ReplyBatch::default();
        batch.push(ReplyLine {
            code: 250,
            message: "version=0.4.8.10".to_owned(),
            kind: ReplyLineKind::Continue,
            data: None,
        });
        batch.push(ReplyLine {
            code: 250,
            message: "OK".to_owned(),
            kind: ReplyLineKind::End,
            data: None,
        });
        job.respond(Some(batch), "n/a");
        assert_eq!(job.state(), JobState::Success);
        let Ok(JobOutput::KeyValues(map)) = rx.try_recv().unwrap() else {
            panic!("expected KeyValues")
        };
        assert_eq!(map, vec![("version".to_owned(), "0.4.8.10".to_owned())]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn response_shape_survives_take_command() {
        let (job, _rx) = make_job(Command::GetInfo(vec!["version".to_owned()]));
        job.executing().unwrap();
        assert!(job.take_command().is_some());

        let mut batch = ReplyBatch::default();
        batch.push(ReplyLine {
            code: 250,
            message: "version=0.4.8.10".to_owned(),
            kind: ReplyLineKind::End,
            data: None,
        });
        job.respond(Some(batch), "n/a");
        assert_eq!(job.state(), JobState::Success);
    }

    #[test]
    fn add_onion_key_is_zeroed_on_completion_when_flagged() {
        let (job, _rx) = make_job(Command::AddOnion {
            key: OnionKey::Existing {
                algorithm: "ED25519-V3".to_owned(),
                key_b64: "super-secret-key-material".to_owned(),
            },
            flags: torctl_wire::OnionAddFlags::default(),
            max_streams: None,
            ports: vec![(80, "127.0.0.1:8080".to_owned())],
            client_auth_v3: Vec::new(),
            destroy_key_on_job_completion: true,
        });
        job.executing().unwrap();
        assert!(job.inner.lock().unwrap().pending_key_zero.is_some());

        let mut batch = ReplyBatch::default();
        batch.push(ReplyLine {
            code: 250,
            message: "ServiceID=abc".to_owned(),
            kind: ReplyLineKind::End,
            data: None,
        });
        job.respond(Some(batch), "n/a");
        assert_eq!(job.state(), JobState::Success);
        assert!(job.inner.lock().unwrap().pending_key_zero.is_none());
    }

    #[test]
    fn cancel_before_executing_fires_failure_once() {
        let (job, rx) = make_job(Command::Signal(torctl_wire::SignalKind::NewNym));
        job.cancel(TorError::Cancelled);
        assert_eq!(job.state(), JobState::Cancelled);
        assert!(matches!(rx.try_recv().unwrap(), Err(TorError::Cancelled)));
        // Second cancel is a no-op: no second callback fire.
        job.cancel(TorError::Cancelled);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_batch_is_interrupted() {
        let (job, rx) = make_job(Command::Signal(torctl_wire::SignalKind::NewNym));
        job.executing().unwrap();
        job.respond(None, "Stream Ended");
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(TorError::Interrupted(reason)) if reason == "Stream Ended"
        ));
    }

    #[test]
    fn set_events_is_rewritten_to_union_required_events() {
        let (job, _rx) = make_job(Command::SetEvents(vec!["BW".to_owned()]));
        let command = job.take_command().unwrap();
        assert_eq!(
            command.encode(),
            &b"SETEVENTS BW NOTICE CONF_CHANGED\r\n"[..]
        );
    }

    #[test]
    fn reply_error_carries_code_and_message() {
        let (job, rx) = make_job(Command::GetInfo(vec!["does-not-exist".to_owned()]));
        job.executing().unwrap();
        let mut batch = ReplyBatch::default();
        batch.push(ReplyLine {
            code: 552,
            message: "Unrecognized key \"does-not-exist\"".to_owned(),
            kind: ReplyLineKind::End,
            data: None,
        });
        job.respond(Some(batch), "n/a");
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(TorError::ReplyError { code: 552, .. })
        ));
    }
}
