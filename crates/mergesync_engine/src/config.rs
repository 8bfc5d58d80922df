//! Configuration for the sync engine.

use mergesync_model::ConflictPolicy;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Initial conflict policy.
    pub conflict_policy: ConflictPolicy,
    /// Bound on every master call, handed to the master store on connect.
    pub request_timeout: Duration,
    /// Optional bound on a whole cycle. Entity types reached after it
    /// elapses fail with `DeadlineExceeded`.
    pub cycle_deadline: Option<Duration>,
    /// Maximum number of active master records enumerated per entity type
    /// by the reconciliation pass and the orphan detector.
    pub reconcile_batch_size: usize,
    /// Whether full cycles run the orphan detector.
    pub detect_orphans: bool,
    /// Whether full cycles add missing sync columns and backfill `uuid`s.
    pub ensure_schema: bool,
    /// Reconnect behavior.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            conflict_policy: ConflictPolicy::LatestWins,
            request_timeout: Duration::from_secs(30),
            cycle_deadline: None,
            reconcile_batch_size: 10_000,
            detect_orphans: true,
            ensure_schema: true,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the per-cycle deadline.
    pub fn with_cycle_deadline(mut self, deadline: Duration) -> Self {
        self.cycle_deadline = Some(deadline);
        self
    }

    /// Sets the reconciliation batch size.
    pub fn with_reconcile_batch_size(mut self, size: usize) -> Self {
        self.reconcile_batch_size = size;
        self
    }

    /// Enables or disables orphan detection.
    pub fn with_orphan_detection(mut self, enabled: bool) -> Self {
        self.detect_orphans = enabled;
        self
    }

    /// Enables or disables the schema step.
    pub fn with_schema_check(mut self, enabled: bool) -> Self {
        self.ensure_schema = enabled;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for reconnect attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of connection attempts.
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_conflict_policy(ConflictPolicy::MasterWins)
            .with_request_timeout(Duration::from_secs(5))
            .with_cycle_deadline(Duration::from_secs(60))
            .with_reconcile_batch_size(50)
            .with_orphan_detection(false);

        assert_eq!(config.conflict_policy, ConflictPolicy::MasterWins);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.cycle_deadline, Some(Duration::from_secs(60)));
        assert_eq!(config.reconcile_batch_size, 50);
        assert!(!config.detect_orphans);
        assert!(config.ensure_schema);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.conflict_policy, ConflictPolicy::LatestWins);
        assert_eq!(config.cycle_deadline, None);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .without_jitter();

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
