//! The authentication method a [`crate::ControllerBuilder`] uses for the first
//! command on a fresh connection.

use torctl_wire::AuthMethod;

use crate::error::TorError;

/// Chosen at builder time; converted to [`AuthMethod`] at `connect()`.
#[derive(Clone)]
pub enum ConnectAuth {
    Null,
    /// The plaintext control-port password; hex-encoded on the wire by the wire crate.
    HashedPassword(Vec<u8>),
    /// The already-read bytes of tor's cookie authentication file, hex-encoded on the wire.
    Cookie(Vec<u8>),
    /// HMAC-SHA256 challenge-response cookie auth. Not implemented by this core.
    SafeCookie,
}

impl ConnectAuth {
    pub(crate) fn into_wire(self) -> Result<AuthMethod, TorError> {
        match self {
            Self::Null => Ok(AuthMethod::Null),
            Self::HashedPassword(secret) => Ok(AuthMethod::HashedPassword(secret)),
            Self::Cookie(bytes) => Ok(AuthMethod::Cookie(bytes)),
            Self::SafeCookie => Err(TorError::AuthMethodUnsupported("safe-cookie")),
        }
    }
}
