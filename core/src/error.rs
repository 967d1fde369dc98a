//! Error kinds and the shared-error / suppression-scope plumbing used to propagate
//! them out of the dispatcher, waiter registry, and event router.

use std::sync::{Arc, OnceLock};

/// A context string attached to an error raised by user code running inside the
/// runtime (an observer callback, a job completion callback).
#[derive(Debug, Clone, thiserror::Error)]
#[error("uncaught exception in {context}: {message}")]
pub struct UncaughtException {
    pub context: String,
    pub message: String,
}

impl UncaughtException {
    pub fn new(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Every way a job or the controller itself can fail.
#[derive(Debug, thiserror::Error)]
pub enum TorError {
    /// The stream ended, or a `SIGNAL SHUTDOWN`/`HALT` preempted this job before it
    /// was written.
    #[error("interrupted: {0}")]
    Interrupted(String),
    /// The job was cancelled by the caller before it started executing.
    #[error("cancelled")]
    Cancelled,
    /// The daemon returned a non-2xx reply.
    #[error("reply error {code}: {message}")]
    ReplyError { code: u16, message: String },
    /// A line from the daemon could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] torctl_wire::ProtocolError),
    /// A transport I/O failure.
    #[error("io error: {0}")]
    Io(String),
    /// An operation was attempted in a state that forbids it (e.g. enqueue after destroy).
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// A reply shape this implementation does not parse yet.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// An observer or completion callback raised an error.
    #[error(transparent)]
    UncaughtException(#[from] UncaughtException),
    /// `AUTHENTICATE` returned a non-2xx reply; the handshake is aborted.
    #[error("authentication failed: {code} {message}")]
    AuthenticationFailed { code: u16, message: String },
    /// A `ConnectAuth` this core cannot perform (e.g. safe-cookie HMAC).
    #[error("unsupported auth method: {0}")]
    AuthMethodUnsupported(&'static str),
}

impl From<std::io::Error> for TorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A one-time error slot, set at most once and readable from any clone.
///
/// Grounded on the same shape as a connection's shared peer error: many tasks may
/// observe a connection die, only the first to notice should act as the reporter.
///
/// `Clone`/`Default` are implemented by hand rather than derived: deriving them
/// would add a spurious `T: Clone`/`T: Default` bound on the impl, even though
/// cloning or creating the underlying `Arc<OnceLock<T>>` never needs one — and
/// error types like `std::io::Error` are neither `Clone` nor `Default`.
#[derive(Debug)]
pub struct SharedError<T>(Arc<OnceLock<T>>);

impl<T> Clone for SharedError<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for SharedError<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedError<T> {
    pub fn new() -> Self {
        Self(Arc::new(OnceLock::new()))
    }

    pub fn try_get(&self) -> Option<&T> {
        self.0.get()
    }

    /// Sets the error if unset. Returns `true` if this call was the one that set it.
    pub fn try_insert(&self, err: T) -> bool {
        self.0.set(err).is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }
}

/// Collects every error raised inside a fallible teardown sequence and aggregates
/// them onto the first one, instead of letting later errors silently mask earlier
/// ones or aborting the sequence early.
#[derive(Default)]
pub struct SuppressionScope {
    primary: Option<TorError>,
    suppressed: Vec<TorError>,
}

impl SuppressionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one fallible teardown step; its error (if any) is recorded rather than
    /// returned, so later steps still run.
    pub fn run(&mut self, step: impl FnOnce() -> Result<(), TorError>) {
        if let Err(err) = step() {
            self.record(err);
        }
    }

    pub fn record(&mut self, err: TorError) {
        if self.primary.is_some() {
            self.suppressed.push(err);
        } else {
            self.primary = Some(err);
        }
    }

    /// Finish the scope: `Ok(())` if nothing was recorded, otherwise the primary
    /// error with every other error attached as a suppressed cause.
    pub fn finish(self) -> Result<(), TorError> {
        match self.primary {
            None => Ok(()),
            Some(primary) if self.suppressed.is_empty() => Err(primary),
            Some(primary) => Err(TorError::UncaughtException(UncaughtException::new(
                "suppression-scope",
                format!(
                    "{primary} (plus {} suppressed: {})",
                    self.suppressed.len(),
                    self.suppressed
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_error_sets_once() {
        let shared = SharedError::new();
        assert!(shared.try_insert(TorError::Cancelled));
        assert!(!shared.try_insert(TorError::Cancelled));
        assert!(shared.is_set());
    }

    #[test]
    fn suppression_scope_aggregates_secondary_errors() {
        let mut scope = SuppressionScope::new();
        scope.run(|| Err(TorError::Cancelled));
        scope.run(|| Err(TorError::IllegalState("second".to_owned())));
        scope.run(|| Ok(()));
        let err = scope.finish().unwrap_err();
        assert!(err.to_string().contains("plus 1 suppressed"));
    }

    #[test]
    fn suppression_scope_with_single_error_passes_through() {
        let mut scope = SuppressionScope::new();
        scope.run(|| Err(TorError::Cancelled));
        assert!(matches!(scope.finish(), Err(TorError::Cancelled)));
    }
}
