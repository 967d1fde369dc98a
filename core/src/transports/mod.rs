//! The abstract [`Transport`]: a bidirectional, line-oriented byte stream to the
//! daemon, backed by either [`tcp`] or [`unix`]. Both endpoint modules produce the
//! same boxed reader/writer pair so everything above this layer is endpoint-agnostic.

pub(crate) mod tcp;
#[cfg(unix)]
pub(crate) mod unix;

use std::{net::SocketAddr, path::PathBuf};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;

use torctl_wire::{Command, ControlCodec, ControlLine, ProtocolError};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) struct RawHalves {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

/// Where to find the daemon's control port.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

/// A live connection to the daemon. Reads are framed through [`ControlCodec`];
/// writes go through the raw writer half so the dispatcher can zero the encoded
/// bytes immediately after the write completes (see [`crate::dispatcher`]).
pub(crate) struct Transport {
    reader: FramedRead<BoxedReader, ControlCodec>,
    writer: BoxedWriter,
}

impl Transport {
    pub(crate) async fn connect(endpoint: &Endpoint) -> std::io::Result<Self> {
        let RawHalves { reader, writer } = match endpoint {
            Endpoint::Tcp(addr) => tcp::connect(*addr).await?,
            #[cfg(unix)]
            Endpoint::Unix(path) => unix::connect(path).await?,
        };
        Ok(Self::from_halves(reader, writer))
    }

    pub(crate) fn from_halves(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader: FramedRead::new(reader, ControlCodec::new()),
            writer,
        }
    }

    /// Write one command's encoded bytes, then overwrite the scratch buffer with
    /// spaces so any secret/key material it held does not linger in memory.
    pub(crate) async fn write_command(&mut self, command: &Command) -> std::io::Result<()> {
        let mut bytes = command.encode();
        let result = self.writer.write_all(&bytes).await;
        bytes.iter_mut().for_each(|byte| *byte = b' ');
        result
    }

    /// The next line off the wire, or `None` on a clean EOS.
    pub(crate) async fn next_line(&mut self) -> Option<Result<ControlLine, ProtocolError>> {
        self.reader.next().await
    }

    pub(crate) async fn close(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}
