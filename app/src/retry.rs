// Backoff policy shared by every request the host makes to the worker.
use std::future::Future;
use std::time::Duration;

/// Retries connection-level failures with exponential backoff.
///
/// The budget is counted in retries, not wall time: with the defaults the
/// caller waits 500ms, 750ms, 1125ms, ... and gives up once ten retries have
/// been spent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
        }
    }
}

impl RetryPolicy {
    /// Delay slept before retry number `retry_index` (zero based), rounded to
    /// whole milliseconds.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let scaled = base_ms * self.multiplier.powi(retry_index as i32);
        Duration::from_millis(scaled.round() as u64)
    }

    /// The first `len` delays of the series.
    pub fn backoff_series(&self, len: usize) -> Vec<Duration> {
        (0..len as u32).map(|i| self.delay_for(i)).collect()
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut, R>(&self, label: &str, mut op: F, is_retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut retries = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if retries < self.max_retries && is_retryable(&err) => {
                    let delay = self.delay_for(retries);
                    retries += 1;
                    tracing::debug!(
                        "{}: connection failed, retrying in {}ms ({} left): {}",
                        label,
                        delay.as_millis(),
                        self.max_retries - retries,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if retries > 0 {
                        tracing::warn!("{}: giving up after {} retries: {}", label, retries, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}
