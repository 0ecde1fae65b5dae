use std::sync::Arc;

use tokio::sync::Semaphore;

/// A clonable channel which broadcasts a single shutdown signal to any number
/// of waiters.
///
/// - Cloning yields another handle onto the same signal.
/// - [`send`] is idempotent; later calls are no-ops.
/// - [`recv`] resolves once the signal has been sent, including for handles
///   created (or polled) after the fact. It can be awaited repeatedly.
///
/// Internally this closes a zero-permit [`Semaphore`]: waiters block in
/// `acquire` until the semaphore is closed, at which point every current and
/// future `acquire` fails immediately.
///
/// [`send`]: ShutdownChannel::send
/// [`recv`]: ShutdownChannel::recv
#[derive(Clone, Debug)]
pub struct ShutdownChannel {
    inner: Arc<Semaphore>,
}

impl ShutdownChannel {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Semaphore::new(0)),
        }
    }

    /// Broadcast the shutdown signal.
    pub fn send(&self) {
        self.inner.close();
    }

    /// Wait until the shutdown signal has been sent.
    pub async fn recv(&self) {
        // A permit can never be acquired: none exist and none are ever added.
        // The only way out is the semaphore being closed by `send`.
        let result = self.inner.acquire().await;
        debug_assert!(result.is_err(), "acquired a permit that shouldn't exist");
    }

    /// Wait for the signal, taking ownership of the handle. Useful for
    /// graceful shutdown APIs which want `impl Future<Output = ()> + 'static`.
    pub async fn recv_owned(self) {
        self.recv().await
    }

    /// Whether the shutdown signal has already been sent.
    pub fn is_sent(&self) -> bool {
        self.inner.is_closed()
    }
}
