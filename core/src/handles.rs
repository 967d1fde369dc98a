//! Structured-shutdown handles for a controller's task tree.
//!
//! A [`ControllerGuard`]/[`ControllerHandle`] pair shares one [`CancellationToken`]:
//! the guard is held by every task the controller spawns (reader loop, dispatcher,
//! per-reply await tasks) and is checked cooperatively; the handle is held by the
//! [`crate::Controller`] itself and used to signal shutdown.

use tokio_util::sync::CancellationToken;

/// Builds a [`ControllerGuard`]/[`ControllerHandle`] pair rooted at a fresh token.
pub(crate) struct HandleBuilder;

impl HandleBuilder {
    pub(crate) fn build() -> (ControllerGuard, ControllerHandle) {
        let token = CancellationToken::new();
        (
            ControllerGuard {
                token: token.clone(),
            },
            ControllerHandle { token },
        )
    }
}

/// Held by every task spawned under a controller. Cancels the shared token on drop,
/// so an unexpectedly ended task (panic, early return) still tears down its siblings.
pub(crate) struct ControllerGuard {
    token: CancellationToken,
}

impl ControllerGuard {
    pub(crate) fn should_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Held by the [`crate::Controller`]; used to request shutdown of its whole task tree.
#[derive(Clone)]
pub(crate) struct ControllerHandle {
    token: CancellationToken,
}

impl ControllerHandle {
    pub(crate) fn send_close_signal(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Mint another guard over the same token, for a second task in the
    /// controller's tree (e.g. the dispatcher alongside the connection actor).
    pub(crate) fn guard(&self) -> ControllerGuard {
        ControllerGuard {
            token: self.token.clone(),
        }
    }
}
