//! Tor control-port runtime core: command queue, dispatcher, event router, and
//! runtime state manager built on top of [`torctl_wire`]'s line codec.
//!
//! The entry point is [`ControllerBuilder`]: it opens a transport, performs the
//! `AUTHENTICATE` handshake, and hands back a live [`Controller`] or fails cleanly
//! before one is ever constructed.

mod auth;
mod controller;
mod dispatcher;
mod encoding;
mod error;
mod event;
mod handles;
mod job;
mod queue;
mod state;
mod temp_queue;
mod transports;
mod waiter;

pub use auth::ConnectAuth;
pub use controller::{Controller, ControllerBuilder};
pub use encoding::{key_from_base64, key_to_base64, service_id_from_base32, service_id_to_base32};
pub use error::{SharedError, SuppressionScope, TorError, UncaughtException};
pub use event::{Event, EventKind, ObserverId};
pub use job::{Job, JobOutput, JobState};
pub use state::{DaemonState, ListenerKind, NetworkState, TorListeners, TorState};
pub use temp_queue::TempCommandQueue;
pub use transports::Endpoint;

pub use torctl_wire::{AuthMethod, Command, OnionAddFlags, OnionKey, SignalKind};
