//! Wire format for the Tor control-port protocol.
//!
//! This crate only knows about bytes and lines: it has no notion of jobs,
//! waiters, or a dispatcher. [`ControlCodec`] turns a [`bytes::BytesMut`]
//! buffer into a stream of [`ControlLine`]s and turns a [`Command`] into the
//! bytes tor expects on the wire.

mod codec;
mod command;
mod error;
mod reply;

pub use codec::ControlCodec;
pub use command::{AuthMethod, Command, OnionAddFlags, OnionKey, SignalKind};
pub use error::ProtocolError;
pub use reply::{ControlLine, Reply, ReplyBatch, ReplyLine, ReplyLineKind};
