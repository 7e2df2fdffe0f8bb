/*!
 * Background job throttling
 *
 * Extraction jobs are self-contained, but each one holds a full payload in
 * memory and runs CPU-bound recognition passes. The throttler caps how many
 * run at once; jobs beyond the cap wait for a permit up to a bounded time.
 */

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Limits concurrent background jobs
#[derive(Clone)]
pub struct RequestThrottler {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    /// Maximum wait time for acquiring a permit
    max_wait_time: Duration,
    /// Name for logging purposes
    name: String,
}

impl RequestThrottler {
    pub fn new(max_concurrent: usize, max_wait_time: Duration, name: impl Into<String>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_wait_time,
            name: name.into(),
        }
    }

    /// Acquire a permit for processing, with timeout
    pub async fn acquire_permit(&self) -> Result<ThrottlePermit, ThrottleError> {
        let start = Instant::now();

        let permit = tokio::time::timeout(self.max_wait_time, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| ThrottleError::Timeout {
                name: self.name.clone(),
                waited: self.max_wait_time,
            })?
            .map_err(|_| ThrottleError::Closed {
                name: self.name.clone(),
            })?;

        let wait_time = start.elapsed();
        if wait_time > Duration::from_millis(100) {
            info!("Throttler '{}': Acquired permit after {:?} wait", self.name, wait_time);
        }

        Ok(ThrottlePermit {
            _permit: permit,
            throttler_name: self.name.clone(),
        })
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    pub fn is_throttling(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Stop handing out permits. Waiters fail with [`ThrottleError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A permit that must be held while a job runs
pub struct ThrottlePermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    throttler_name: String,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        debug!("Throttler '{}': permit released", self.throttler_name);
    }
}

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Throttler '{name}' had no free slot after {waited:?}")]
    Timeout { name: String, waited: Duration },

    #[error("Throttler '{name}' is shut down")]
    Closed { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttler_basic() {
        let throttler = RequestThrottler::new(2, Duration::from_secs(5), "test");

        let _permit1 = throttler.acquire_permit().await.unwrap();
        let _permit2 = throttler.acquire_permit().await.unwrap();

        assert_eq!(throttler.available_permits(), 0);
        assert_eq!(throttler.in_use(), 2);
        assert!(throttler.is_throttling());
    }

    #[tokio::test]
    async fn test_throttler_timeout() {
        let throttler = RequestThrottler::new(1, Duration::from_millis(20), "test");

        let _permit = throttler.acquire_permit().await.unwrap();

        let result = throttler.acquire_permit().await;
        assert!(matches!(result, Err(ThrottleError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_permit_release() {
        let throttler = RequestThrottler::new(1, Duration::from_secs(5), "test");

        {
            let _permit = throttler.acquire_permit().await.unwrap();
            assert_eq!(throttler.available_permits(), 0);
        }

        assert_eq!(throttler.available_permits(), 1);
        let _permit2 = throttler.acquire_permit().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_throttler_rejects_waiters() {
        let throttler = RequestThrottler::new(1, Duration::from_secs(5), "test");
        throttler.close();
        assert!(matches!(
            throttler.acquire_permit().await,
            Err(ThrottleError::Closed { .. })
        ));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let throttler = RequestThrottler::new(0, Duration::from_secs(1), "test");
        assert_eq!(throttler.available_permits(), 1);
    }
}
