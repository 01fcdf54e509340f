//! Adaptive polling delay.
//!
//! Bursts of change keep the delay tight, quiet periods relax it step by
//! step, and a run of hard failures tells the poller to give up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for [`BackoffPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after start and after every detected change.
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Added to the delay after each run of quiet cycles.
    #[serde(with = "millis")]
    pub step: Duration,

    /// Upper bound for the delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,

    /// Quiet cycles needed before the delay grows by one step.
    pub quiet_cycles_per_step: u32,

    /// Consecutive fetch failures after which polling stops.
    pub max_consecutive_failures: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(2000),
            step: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            quiet_cycles_per_step: 5,
            max_consecutive_failures: 5,
        }
    }
}

/// Poll counters and the resulting delay for one case.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    delay: Duration,
    quiet_cycles: u32,
    consecutive_failures: u32,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            delay: config.initial_delay,
            config,
            quiet_cycles: 0,
            consecutive_failures: 0,
        }
    }

    /// Delay to wait before the next cycle.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// True once the failure counter has reached the configured limit.
    pub fn is_exhausted(&self) -> bool {
        self.consecutive_failures >= self.config.max_consecutive_failures
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// A successful fetch produced no structural change.
    pub fn on_no_change_cycle(&mut self) {
        self.quiet_cycles += 1;
        if self.quiet_cycles >= self.config.quiet_cycles_per_step {
            self.delay = self.delay.saturating_add(self.config.step).min(self.config.max_delay);
            self.quiet_cycles = 0;
        }
    }

    /// A successful fetch produced a non-empty diff.
    pub fn on_change_detected(&mut self) {
        self.delay = self.config.initial_delay;
        self.quiet_cycles = 0;
    }

    /// Returns true when this failure exhausted the retry budget.
    pub fn on_fetch_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.is_exhausted()
    }

    pub fn on_fetch_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Back to the initial state, as on an explicit start.
    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay;
        self.quiet_cycles = 0;
        self.consecutive_failures = 0;
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

/// Serde helper storing a [`Duration`] as whole milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
