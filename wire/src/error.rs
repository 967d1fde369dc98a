/// An error produced while decoding bytes from the control port into a [`crate::ControlLine`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("line was not valid UTF-8")]
    InvalidUtf8,
    #[error("status line too short: {0:?}")]
    MalformedStatusLine(String),
    #[error("status code {0} is not a valid 3 digit code")]
    InvalidStatusCode(String),
    #[error("connection closed mid data-block")]
    UnexpectedEof,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
