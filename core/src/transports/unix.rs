//! Local stream socket endpoint: connects to a control socket at a filesystem path
//! (`ControlSocket` in torrc). Unix-only.

use std::path::Path;

use tokio::net::UnixStream;

use super::RawHalves;

pub(crate) async fn connect(path: impl AsRef<Path>) -> std::io::Result<RawHalves> {
    let stream = UnixStream::connect(path).await?;
    let (reader, writer) = tokio::io::split(stream);
    Ok(RawHalves {
        reader: Box::new(reader),
        writer: Box::new(writer),
    })
}
