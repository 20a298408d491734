use std::future::Future;

use tokio::sync::watch;

use keeper_core::{AppError, AppResult};

/// Creates a linked trigger/signal pair.
#[must_use]
pub fn cancellation_pair() -> (CancellationTrigger, CancellationSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        CancellationTrigger { sender },
        CancellationSignal { receiver },
    )
}

/// Fires the cancellation observed by every clone of the paired signal.
#[derive(Debug)]
pub struct CancellationTrigger {
    sender: watch::Sender<bool>,
}

impl CancellationTrigger {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Cancellation signal accepted by asynchronous cache and commit operations.
///
/// Dropping the trigger without cancelling leaves the signal pending forever.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_, signal) = cancellation_pair();
        signal
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once cancellation is requested.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drives `operation` until it completes or the signal fires.
    ///
    /// On cancellation the operation future is dropped, releasing anything it
    /// held, and `AppError::Cancelled` is returned.
    pub async fn guard<T, F>(&self, operation_name: &str, operation: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let mut signal = self.clone();
        if signal.is_cancelled() {
            return Err(AppError::Cancelled(format!(
                "{operation_name} was cancelled before it started"
            )));
        }

        tokio::select! {
            biased;
            () = signal.cancelled() => Err(AppError::Cancelled(format!(
                "{operation_name} was cancelled"
            ))),
            result = operation => result,
        }
    }
}
