//! The [`Controller`]: owns the live connection, the command queue, the event
//! router, and the runtime state manager; drives the `AUTHENTICATE` handshake and
//! the orderly, idempotent `destroy()` teardown.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use tokio::sync::mpsc;
use torctl_wire::{Command, ControlLine, ReplyBatch, ReplyLineKind};

use crate::{
    auth::ConnectAuth,
    dispatcher,
    error::{SharedError, SuppressionScope, TorError},
    event::{Event, EventKind, EventRouter, ObserverId},
    handles::{ControllerGuard, ControllerHandle, HandleBuilder},
    job::{Job, JobOutput},
    queue::CommandQueue,
    state::{DaemonState, NetworkState, RuntimeStateManager, TorListeners, TorState},
    transports::{Endpoint, Transport},
    waiter::WaiterRegistry,
};

type ObserverCallback = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Collects the handshake, endpoint, and initial observer set for a [`Controller`].
///
/// Every runtime knob here is a plain Rust value supplied by the host; nothing is
/// read from disk or the environment.
pub struct ControllerBuilder {
    endpoint: Endpoint,
    auth: ConnectAuth,
    log_debug_dispatch: bool,
    observers: Vec<(EventKind, ObserverCallback)>,
}

impl ControllerBuilder {
    pub fn new(endpoint: Endpoint, auth: ConnectAuth) -> Self {
        Self {
            endpoint,
            auth,
            log_debug_dispatch: false,
            observers: Vec::new(),
        }
    }

    /// Enable `tracing::debug!`-level logging of redacted protocol traffic. Trace-level
    /// queue/waiter bookkeeping logs are unaffected by this flag.
    pub fn log_debug_dispatch(mut self, enabled: bool) -> Self {
        self.log_debug_dispatch = enabled;
        self
    }

    /// Register an observer before the connection is even opened, so it never misses
    /// an event emitted between connect and the caller's first `subscribe` call.
    pub fn observe(mut self, kind: EventKind, callback: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.observers.push((kind, Arc::new(callback)));
        self
    }

    /// Open the transport, authenticate, and spawn the controller's task tree.
    ///
    /// On any failure after the transport is open, the transport is closed and no
    /// half-initialized `Controller` is ever returned to the caller.
    pub async fn connect(self) -> Result<Controller, TorError> {
        let mut transport = Transport::connect(&self.endpoint).await?;

        let method = match self.auth.into_wire() {
            Ok(method) => method,
            Err(err) => {
                drop(transport.close().await);
                return Err(err);
            }
        };

        if let Err(err) = transport.write_command(&Command::Authenticate(method)).await {
            drop(transport.close().await);
            return Err(err.into());
        }

        match read_one_batch(&mut transport).await {
            Ok(batch) if batch_is_success(&batch) => {}
            Ok(batch) => {
                let (code, message) = last_code_and_message(&batch);
                drop(transport.close().await);
                return Err(TorError::AuthenticationFailed { code, message });
            }
            Err(err) => {
                drop(transport.close().await);
                return Err(err);
            }
        }

        let queue = Arc::new(CommandQueue::new());
        let waiters = WaiterRegistry::new();
        let events = Arc::new(EventRouter::new());
        let state = Arc::new(RuntimeStateManager::new());

        for (kind, callback) in self.observers {
            let callback = callback;
            events.subscribe(kind, Vec::new(), None, move |event| callback(event));
        }

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (guard, handle) = HandleBuilder::build();
        let close_error = SharedError::new();

        tokio::spawn(run_connection(
            transport,
            writer_rx,
            waiters.clone(),
            events.clone(),
            state.clone(),
            guard,
            self.log_debug_dispatch,
            close_error.clone(),
        ));
        tokio::spawn(dispatcher::run(queue.clone(), waiters.clone(), writer_tx, handle.guard()));

        state.apply_daemon_state(DaemonState::Starting);

        Ok(Controller {
            queue,
            waiters,
            events,
            state,
            handle,
            destroyed: AtomicBool::new(false),
            destroy_callbacks: Mutex::new(Some(Vec::new())),
            close_error,
        })
    }
}

/// A live control connection: the only way to submit commands and observe events
/// once `ControllerBuilder::connect` has succeeded.
pub struct Controller {
    queue: Arc<CommandQueue>,
    waiters: WaiterRegistry,
    events: Arc<EventRouter>,
    state: Arc<RuntimeStateManager>,
    handle: ControllerHandle,
    destroyed: AtomicBool,
    destroy_callbacks: Mutex<Option<Vec<Box<dyn FnOnce() + Send>>>>,
    close_error: SharedError<std::io::Error>,
}

impl Controller {
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        command: Command,
        on_success: impl FnOnce(JobOutput) + Send + 'static,
        on_failure: impl FnOnce(TorError) + Send + 'static,
    ) -> Job {
        self.queue.enqueue(name, command, on_success, on_failure)
    }

    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&Event) + Send + Sync + 'static) -> ObserverId {
        self.events.subscribe(kind, Vec::new(), None, callback)
    }

    /// Subscribe with a tag beginning with the router's static sentinel, so this
    /// observer survives `clear_observers`.
    pub fn subscribe_static(&self, kind: EventKind, callback: impl Fn(&Event) + Send + Sync + 'static) -> ObserverId {
        self.events.subscribe(kind, self.events.static_tag(), None, callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.events.unsubscribe(id);
    }

    pub fn clear_observers(&self) {
        self.events.clear_observers();
    }

    pub fn state(&self) -> TorState {
        self.state.state()
    }

    pub fn listeners(&self) -> TorListeners {
        self.state.listeners()
    }

    /// Register a callback run exactly once, during `destroy()`'s step 5. No-op if
    /// the controller is already destroyed.
    pub fn on_destroy(&self, callback: impl FnOnce() + Send + 'static) {
        if let Some(callbacks) = self.destroy_callbacks.lock().unwrap().as_mut() {
            callbacks.push(Box::new(callback));
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// The I/O error the transport close hit while tearing down the connection, if
    /// any. Only meaningful after the connection actor has observed cancellation;
    /// `None` both before that and on a clean close.
    pub fn close_error(&self) -> Option<&std::io::Error> {
        self.close_error.try_get()
    }

    /// The controller's execute queue, for [`crate::temp_queue::TempCommandQueue`]
    /// to transfer its buffered jobs onto at attach time.
    pub(crate) fn queue_handle(&self) -> Arc<CommandQueue> {
        self.queue.clone()
    }

    /// Idempotent teardown: closing the transport, destroying the waiter registry,
    /// cancelling the task tree, draining the queue, and firing `on_destroy`
    /// callbacks are each individually fallible; failures are aggregated rather than
    /// aborting the sequence partway through.
    pub fn destroy(&self) -> Result<(), TorError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut scope = SuppressionScope::new();
        // Step 1 (transport close) happens inside the connection actor once it
        // observes cancellation below; there is no separate handle to close here.
        scope.run(|| {
            self.waiters.destroy();
            Ok(())
        });
        self.handle.send_close_signal();
        scope.run(|| {
            self.queue.destroy();
            Ok(())
        });
        if let Some(callbacks) = self.destroy_callbacks.lock().unwrap().take() {
            for callback in callbacks {
                callback();
            }
        }
        scope.finish()
    }
}

async fn run_connection(
    mut transport: Transport,
    mut writer_rx: mpsc::UnboundedReceiver<Command>,
    waiters: WaiterRegistry,
    events: Arc<EventRouter>,
    state: Arc<RuntimeStateManager>,
    guard: ControllerGuard,
    log_debug_dispatch: bool,
    close_error: SharedError<std::io::Error>,
) {
    let mut batch = ReplyBatch::default();
    loop {
        tokio::select! {
            () = guard.cancelled() => break,
            sent = writer_rx.recv() => {
                match sent {
                    Some(command) => {
                        if log_debug_dispatch {
                            tracing::debug!(command = %command.redacted_debug(), "writing command");
                        }
                        if transport.write_command(&command).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            line = transport.next_line() => {
                match line {
                    Some(Ok(ControlLine::Reply(reply_line))) => {
                        let is_end = reply_line.kind == ReplyLineKind::End;
                        batch.push(reply_line);
                        if is_end {
                            waiters.respond_next(std::mem::take(&mut batch));
                        }
                    }
                    Some(Ok(ControlLine::Event { keyword, message, data })) => {
                        handle_event(&events, &state, keyword, message, data, log_debug_dispatch);
                    }
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "protocol error on control connection");
                    }
                    None => break,
                }
            }
        }
    }
    waiters.destroy();
    if let Err(err) = transport.close().await {
        close_error.try_insert(err);
    }
}

fn handle_event(
    events: &EventRouter,
    state: &RuntimeStateManager,
    keyword: String,
    message: String,
    data: Option<Vec<String>>,
    log_debug_dispatch: bool,
) {
    let kind = EventKind::from_keyword(&keyword);
    if log_debug_dispatch {
        tracing::debug!(%keyword, %message, "received event");
    }
    events.dispatch(Event {
        kind,
        raw_keyword: keyword,
        message: message.clone(),
        data,
    });

    match kind {
        EventKind::Notice => {
            if let Some(percent) = parse_bootstrap_percent(&message) {
                state.apply_daemon_state(DaemonState::On(percent));
            }
            state.observe_notice(&message);
        }
        EventKind::ConfChanged => {
            for line in message.lines() {
                match line.trim() {
                    "DisableNetwork=1" => state.apply_network_state(NetworkState::Disabled),
                    "DisableNetwork=0" => state.apply_network_state(NetworkState::Enabled),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn parse_bootstrap_percent(message: &str) -> Option<u8> {
    let rest = message.strip_prefix("Bootstrapped ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

async fn read_one_batch(transport: &mut Transport) -> Result<ReplyBatch, TorError> {
    let mut batch = ReplyBatch::default();
    loop {
        match transport.next_line().await {
            Some(Ok(ControlLine::Reply(line))) => {
                let is_end = line.kind == ReplyLineKind::End;
                batch.push(line);
                if is_end {
                    return Ok(batch);
                }
            }
            Some(Ok(ControlLine::Event { .. })) => continue,
            Some(Err(err)) => return Err(err.into()),
            None => return Err(TorError::Interrupted("Stream Ended".to_owned())),
        }
    }
}

fn batch_is_success(batch: &ReplyBatch) -> bool {
    batch.lines.last().is_some_and(|line| line.code / 100 == 2)
}

fn last_code_and_message(batch: &ReplyBatch) -> (u16, String) {
    batch
        .lines
        .last()
        .map(|line| (line.code, line.message.clone()))
        .unwrap_or((0, String::new()))
}
