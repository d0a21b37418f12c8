//! Retry a check until it succeeds, a deadline passes or the run is cancelled
//!
//! # Example
//!
//! ```ignore
//! use seppo_harness::poll::poll_until;
//! use std::time::Duration;
//!
//! poll_until(|| async { Ok::<_, ClientError>(client.get(&pod).await.is_err()) })
//!     .interval(Duration::from_millis(100))
//!     .timeout(Duration::from_secs(30))
//!     .await_done()
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// Error type for poll loops
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// The deadline passed before the check reported done
    #[error("condition not met after {attempts} attempts over {elapsed:?}")]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        /// The error from the last attempt, if it failed with a retryable error
        #[source]
        last_error: Option<E>,
    },

    /// The cancel signal fired
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    /// The check failed with an error that is not retried
    #[error(transparent)]
    Failed(E),
}

impl<E> PollError<E> {
    /// Whether the loop gave up because of the deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Sending half of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Fire the signal; every poll loop holding the paired signal stops
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A linked handle and signal
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_, signal) = Self::pair();
        signal
    }

    /// Whether the signal has fired
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires; pending forever if it never can
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Builder for a poll loop
pub struct PollUntil<F, E> {
    condition: F,
    interval: Duration,
    deadline: Option<Instant>,
    cancel: CancelSignal,
    retry_on: fn(&E) -> bool,
}

/// Poll `condition` until it returns `Ok(true)`
///
/// The condition runs immediately, then every `interval`. `Ok(false)` means
/// "not yet". An `Err` stops the loop unless [`PollUntil::retry_errors`] or
/// [`PollUntil::retry_errors_if`] says it is retryable; the last retryable
/// error is reported on timeout.
///
/// Default interval: 100ms. No deadline unless one is set.
pub fn poll_until<F, Fut, E>(condition: F) -> PollUntil<F, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    PollUntil {
        condition,
        interval: Duration::from_millis(100),
        deadline: None,
        cancel: CancelSignal::never(),
        retry_on: |_| false,
    }
}

impl<F, Fut, E> PollUntil<F, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    /// Set the delay between attempts
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Give up `timeout` from now
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Give up at `deadline`; keeps the earlier deadline if one is already set
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Give up at `deadline` if it is set
    pub fn deadline_opt(self, deadline: Option<Instant>) -> Self {
        match deadline {
            Some(deadline) => self.deadline(deadline),
            None => self,
        }
    }

    /// Stop when `signal` fires
    pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Treat every error as "not yet"
    pub fn retry_errors(mut self) -> Self {
        self.retry_on = |_| true;
        self
    }

    /// Treat errors accepted by `retryable` as "not yet"
    pub fn retry_errors_if(mut self, retryable: fn(&E) -> bool) -> Self {
        self.retry_on = retryable;
        self
    }

    /// Run the loop; returns the number of attempts on success
    pub async fn await_done(mut self) -> Result<u32, PollError<E>> {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled { attempts });
            }

            attempts += 1;
            let outcome = tokio::select! {
                outcome = (self.condition)() => outcome,
                () = self.cancel.cancelled() => {
                    return Err(PollError::Cancelled { attempts });
                }
            };
            match outcome {
                Ok(true) => return Ok(attempts),
                Ok(false) => last_error = None,
                Err(e) if (self.retry_on)(&e) => last_error = Some(e),
                Err(e) => return Err(PollError::Failed(e)),
            }

            let now = Instant::now();
            let pause = match self.deadline {
                Some(deadline) if now >= deadline => {
                    return Err(PollError::Timeout {
                        attempts,
                        elapsed: start.elapsed(),
                        last_error,
                    });
                }
                Some(deadline) => self.interval.min(deadline - now),
                None => self.interval,
            };

            tokio::select! {
                () = sleep(pause) => {}
                () = self.cancel.cancelled() => {
                    return Err(PollError::Cancelled { attempts });
                }
            }
        }
    }
}
