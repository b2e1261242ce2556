//! Cancellation context threaded through a pipeline run.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A thin wrapper around [`CancellationToken`] — this crate's analogue of a
/// Go `context.Context`. Stages `select!` on the union of "next payload
/// available" and "context cancelled" rather than polling a flag.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    /// A child context: cancelling `self` also cancels every child, but
    /// cancelling a child has no effect on `self` or its siblings.
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token() }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
