//! Cooperative cancellation signal.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Cloneable cancellation signal.
///
/// Nothing is ever sent on the inner channel; cancelling drops the only
/// sender, which makes every receiver ready at once. Waiting code can
/// therefore `select!` on [`CancelToken::receiver`] next to its own channel.
#[derive(Clone)]
pub struct CancelToken {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Becomes ready (with an error) once cancelled.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` if
    /// cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        matches!(
            self.receiver.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
