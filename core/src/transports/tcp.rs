//! TCP endpoint: connects to a control port listening on `127.0.0.1:<port>` (or any
//! routable address, though tor itself only ever binds the control port locally).

use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::RawHalves;

pub(crate) async fn connect(addr: SocketAddr) -> std::io::Result<RawHalves> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (reader, writer) = tokio::io::split(stream);
    Ok(RawHalves {
        reader: Box::new(reader),
        writer: Box::new(writer),
    })
}
