//! Cooperative cancellation for a running transfer.
//!
//! The worker checks the token before every blocking step (connect,
//! handshake, send, read). Cancelling also shuts down the socket registered
//! for the current hop, so a read that is already blocked returns at once.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use super::TransferError;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
}

/// Shared cancellation flag for one transfer.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("transfer cancellation requested");
        let socket = self
            .inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(socket) = socket {
            // Unblocks a pending read on the worker's handle to the same socket.
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`TransferError::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Cancelled`] if [`cancel`](Self::cancel) was called.
    pub fn check(&self) -> Result<(), TransferError> {
        if self.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Registers the socket of the current hop, replacing the previous one.
    ///
    /// If cancellation already happened the socket is shut down immediately.
    pub(crate) fn register(&self, socket: &TcpStream) {
        let Ok(clone) = socket.try_clone() else {
            trace!("socket clone failed; cancellation falls back to flag checks");
            return;
        };
        let mut slot = self
            .inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            let _ = clone.shutdown(Shutdown::Both);
            return;
        }
        *slot = Some(clone);
    }

    /// Drops the registered socket handle.
    pub(crate) fn release(&self) {
        self.inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
