use pulsar_core::config::RetryConfig;
use std::fmt::Display;
use std::time::Duration;

/// Runs a fallible staging step, retrying with a linearly growing, capped
/// delay.
#[derive(Debug, Clone)]
pub struct RetryActionExecutor {
    max_retries: u32,
    interval_start: Duration,
    interval_step: Duration,
    interval_max: Duration,
}

impl Default for RetryActionExecutor {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryActionExecutor {
    pub fn from_config(config: &RetryConfig) -> Self {
        let secs = |value: f64| {
            Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
        };
        Self {
            max_retries: config.max_retries,
            interval_start: secs(config.interval_start),
            interval_step: secs(config.interval_step),
            interval_max: secs(config.interval_max),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based).
    pub fn interval(&self, retry: u32) -> Duration {
        self.interval_start
            .saturating_add(self.interval_step.saturating_mul(retry))
            .min(self.interval_max)
    }

    pub fn execute<T, E, F>(&self, description: &str, mut action: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut retry = 0;
        loop {
            match action() {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.max_retries => {
                    let delay = self.interval(retry);
                    tracing::warn!(
                        "Failed to {} (attempt {} of {}): {}. Retrying in {:.1}s",
                        description,
                        retry + 1,
                        self.max_retries + 1,
                        e,
                        delay.as_secs_f64()
                    );
                    std::thread::sleep(delay);
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_retries: u32) -> RetryActionExecutor {
        RetryActionExecutor::from_config(&RetryConfig {
            max_retries,
            interval_start: 0.001,
            interval_step: 0.001,
            interval_max: 0.002,
        })
    }

    #[test]
    fn test_no_retries_runs_once() {
        let calls = Cell::new(0);
        let result: Result<(), String> = fast(0).execute("stage", || {
            calls.set(calls.get() + 1);
            Err("boom".to_string())
        });
        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = fast(3).execute("stage", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err("flaky".to_string())
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<(), String> = fast(2).execute("stage", || {
            calls.set(calls.get() + 1);
            Err("down".to_string())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_interval_grows_and_caps() {
        let executor = RetryActionExecutor::from_config(&RetryConfig {
            max_retries: 5,
            interval_start: 1.0,
            interval_step: 2.0,
            interval_max: 4.0,
        });
        assert_eq!(executor.interval(0), Duration::from_secs(1));
        assert_eq!(executor.interval(1), Duration::from_secs(3));
        assert_eq!(executor.interval(2), Duration::from_secs(4));
    }

    #[test]
    fn test_huge_intervals_saturate_at_the_cap() {
        let executor = RetryActionExecutor::from_config(&RetryConfig {
            max_retries: u32::MAX,
            interval_start: f64::INFINITY,
            interval_step: 1e300,
            interval_max: 60.0,
        });
        assert_eq!(executor.interval(0), Duration::from_secs(60));
        assert_eq!(executor.interval(u32::MAX), Duration::from_secs(60));

        let uncapped = RetryActionExecutor::from_config(&RetryConfig {
            max_retries: 1,
            interval_start: 1.0,
            interval_step: f64::NAN,
            interval_max: f64::INFINITY,
        });
        assert_eq!(uncapped.interval(7), Duration::from_secs(1));
    }
}
