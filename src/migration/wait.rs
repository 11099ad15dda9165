use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::errors::{BalancerError, WaitError};

/// Fixed-interval polling, optionally bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Repeats a probe until it yields a value, the policy's timeout passes, or
/// the cancel flag flips to `true`.
#[derive(Debug, Clone)]
pub struct Waiter {
    policy: WaitPolicy,
    cancel: Option<watch::Receiver<bool>>,
}

impl Waiter {
    pub fn new(policy: WaitPolicy) -> Self {
        Self {
            policy,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sleep one interval, then probe. `on_tick` runs after every miss so
    /// callers can show progress.
    pub async fn poll_until<T, E, F, Fut>(
        &self,
        mut probe: F,
        mut on_tick: impl FnMut(),
    ) -> Result<T, BalancerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
        E: Into<BalancerError>,
    {
        let started = Instant::now();
        let mut cancel = self.cancel.clone();
        loop {
            self.pause(cancel.as_mut()).await?;
            if let Some(value) = probe().await.map_err(Into::into)? {
                return Ok(value);
            }
            on_tick();
            if let Some(limit) = self.policy.timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(WaitError::TimedOut { waited }.into());
                }
            }
        }
    }

    async fn pause(&self, cancel: Option<&mut watch::Receiver<bool>>) -> Result<(), WaitError> {
        let sleep = tokio::time::sleep(self.policy.interval);
        let Some(rx) = cancel else {
            sleep.await;
            return Ok(());
        };

        tokio::pin!(sleep);
        loop {
            if *rx.borrow() {
                return Err(WaitError::Cancelled);
            }
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // sender gone, nobody can cancel any more
                        (&mut sleep).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
