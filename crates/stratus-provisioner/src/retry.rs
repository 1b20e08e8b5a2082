use std::time::Duration;

use chrono::{DateTime, Utc};
use stratus_domain::ZoneName;
use tokio::sync::watch;

use crate::error::ProvisionerError;

/// Bookkeeping for one machine's start-attempt sequence.
///
/// The total budget is `retry_count × max(1, zones)` attempts; between
/// attempts the worker sleeps for `delay`, preemptible by shutdown.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts_total: u32,
    attempts_used: u32,
    delay: Duration,
    last_error: Option<String>,
    last_zone: Option<ZoneName>,
    last_failed_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new(retry_count: u32, zone_count: usize, delay: Duration) -> Self {
        let attempts_total = retry_count.saturating_mul(zone_count.max(1) as u32);
        Self {
            attempts_total,
            attempts_used: 0,
            delay,
            last_error: None,
            last_zone: None,
            last_failed_at: None,
        }
    }

    /// The 1-based number of the attempt about to run.
    pub fn attempt(&self) -> u32 {
        self.attempts_used + 1
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_total.saturating_sub(self.attempts_used)
    }

    pub fn record_failure(&mut self, message: String, zone: Option<ZoneName>) {
        self.attempts_used += 1;
        self.last_error = Some(message);
        self.last_zone = zone;
        self.last_failed_at = Some(Utc::now());
    }

    pub fn exhausted(&self) -> bool {
        self.attempts_used >= self.attempts_total
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_zone(&self) -> Option<&ZoneName> {
        self.last_zone.as_ref()
    }

    /// Sleep out the retry delay, returning `Cancelled` if shutdown arrives
    /// first.
    pub async fn wait(&self, dying: &mut watch::Receiver<bool>) -> Result<(), ProvisionerError> {
        if *dying.borrow() {
            return Err(ProvisionerError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => Ok(()),
            _ = dying.changed() => Err(ProvisionerError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_count_times_zones() {
        let state = RetryState::new(3, 4, Duration::from_millis(1));
        assert_eq!(state.attempts_remaining(), 12);

        // Without zones the budget collapses to the plain count.
        let state = RetryState::new(3, 0, Duration::from_millis(1));
        assert_eq!(state.attempts_remaining(), 3);
    }

    #[test]
    fn exhaustion_after_recorded_failures() {
        let mut state = RetryState::new(1, 2, Duration::from_millis(1));
        assert_eq!(state.attempt(), 1);
        assert!(!state.exhausted());

        state.record_failure("no capacity".into(), Some(ZoneName::new("a")));
        assert_eq!(state.attempt(), 2);
        assert!(!state.exhausted());

        state.record_failure("no capacity".into(), Some(ZoneName::new("b")));
        assert!(state.exhausted());
        assert_eq!(state.last_error(), Some("no capacity"));
        assert_eq!(state.last_zone(), Some(&ZoneName::new("b")));
    }

    #[tokio::test]
    async fn wait_is_preempted_by_shutdown() {
        let state = RetryState::new(1, 1, Duration::from_secs(60));
        let (tx, mut rx) = watch::channel(false);

        tx.send(true).unwrap();
        let started = std::time::Instant::now();
        let result = state.wait(&mut rx).await;
        assert!(matches!(result, Err(ProvisionerError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
