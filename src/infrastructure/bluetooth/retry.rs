//! Retry policy for transport-touching operations
//!
//! Wraps an async operation and re-runs it on transient BLE failures.
//! "Device not found" is never retried, stack-busy errors wait a fixed
//! backoff first, other link errors are retried immediately. When attempts
//! run out the last error is returned untouched.

use crate::domain::settings::RetrySettings;
use crate::infrastructure::bluetooth::transport::{Classify, RetryClass};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Pause before retrying a [`RetryClass::Backoff`] error
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            attempts: settings.attempts,
            backoff: Duration::from_millis(settings.backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, E, F, Fut>(&self, device: &str, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.attempts.max(1) - 1;
        let mut attempt = 0;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.retry_class() {
                RetryClass::Abort | RetryClass::Fatal => return Err(err),
                _ if attempt >= max_attempts => {
                    debug!(
                        "{}: error calling {}, reach max attempts ({}/{}): {}",
                        device, operation, attempt, max_attempts, err
                    );
                    return Err(err);
                }
                RetryClass::Backoff => {
                    debug!(
                        "{}: error calling {}, backing off {:?}, retrying ({}/{})...: {}",
                        device, operation, self.backoff, attempt, max_attempts, err
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                RetryClass::Immediate => {
                    debug!(
                        "{}: error calling {}, retrying ({}/{})...: {}",
                        device, operation, attempt, max_attempts, err
                    );
                }
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::error::DeviceError;
    use crate::infrastructure::bluetooth::transport::TransportError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails with each scripted error in turn, then succeeds
    struct Script {
        errors: Mutex<VecDeque<TransportError>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(errors: Vec<TransportError>) -> Self {
            Self {
                errors: Mutex::new(errors.into()),
                calls: Mutex::new(0),
            }
        }

        async fn call(&self) -> Result<&'static str, TransportError> {
            *self.calls.lock().unwrap() += 1;
            match self.errors.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok("done"),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let script = Script::new(vec![TransportError::NotFound("AA".into())]);
        let result = RetryPolicy::default()
            .run("dev", "turn_on", || script.call())
            .await;

        assert_eq!(result, Err(TransportError::NotFound("AA".into())));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_errors_back_off() {
        let script = Script::new(vec![TransportError::Busy("in progress".into())]);
        let started = Instant::now();
        let result = RetryPolicy::default()
            .run("dev", "turn_on", || script.call())
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(script.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_errors_retry_immediately() {
        let script = Script::new(vec![
            TransportError::Link("reset".into()),
            TransportError::NotConnected,
        ]);
        let started = Instant::now();
        let result = RetryPolicy::default()
            .run("dev", "set_effect", || script.call())
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(script.calls(), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error_verbatim() {
        let script = Script::new(vec![
            TransportError::Busy("first".into()),
            TransportError::Link("second".into()),
            TransportError::Busy("third".into()),
            TransportError::Link("never reached".into()),
        ]);
        let result = RetryPolicy::default()
            .run("dev", "set_rgb_color", || script.call())
            .await;

        assert_eq!(result, Err(TransportError::Busy("third".into())));
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let calls = Mutex::new(0);
        let counter = &calls;
        let result: Result<(), DeviceError> = RetryPolicy::default()
            .run("dev", "set_brightness", move || async move {
                *counter.lock().unwrap() += 1;
                Err(DeviceError::ColorUnknown("dev".into()))
            })
            .await;

        assert_eq!(result, Err(DeviceError::ColorUnknown("dev".into())));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let script = Script::new(vec![TransportError::Link("x".into())]);
        let policy = RetryPolicy {
            attempts: 0,
            backoff: DEFAULT_BACKOFF,
        };
        let result = policy.run("dev", "turn_off", || script.call()).await;

        assert!(result.is_err());
        assert_eq!(script.calls(), 1);
    }
}
