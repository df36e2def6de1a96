//! Election timing configuration and lifecycle callbacks.

use elector_core::{ElectorError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for the [`LeaderElector`](crate::LeaderElector)
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// How long a leader's claim stays valid without renewal
    pub lease_duration: Duration,

    /// Time budget, counted from the last successful renewal, before the
    /// leader gives up leadership
    pub renew_deadline: Duration,

    /// Wait between acquisition attempts when not leading
    pub retry_period: Duration,

    /// Cadence of renewals while leading; `None` means `renew_deadline / 4`
    pub renew_interval: Option<Duration>,

    /// Wait between failed renewal attempts inside the deadline
    pub renew_retry_interval: Duration,

    /// Relative spread applied to `retry_period` (0.1 = ±10%)
    pub jitter_factor: f64,

    /// Clear the holder when cancelled while leading
    pub release_on_cancel: bool,

    /// Upper bound on the release attempt during shutdown
    pub release_grace: Duration,

    /// Seed for the jitter RNG, for reproducible runs
    pub randomization_seed: Option<u64>,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            renew_interval: None,
            renew_retry_interval: Duration::from_secs(1),
            jitter_factor: 0.1,
            release_on_cancel: true,
            release_grace: Duration::from_secs(2),
            randomization_seed: None,
        }
    }
}

impl ElectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_renew_deadline(mut self, deadline: Duration) -> Self {
        self.renew_deadline = deadline;
        self
    }

    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period = period;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = Some(interval);
        self
    }

    pub fn with_renew_retry_interval(mut self, interval: Duration) -> Self {
        self.renew_retry_interval = interval;
        self
    }

    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    pub fn with_release_on_cancel(mut self, release: bool) -> Self {
        self.release_on_cancel = release;
        self
    }

    pub fn with_release_grace(mut self, grace: Duration) -> Self {
        self.release_grace = grace;
        self
    }

    pub fn with_randomization_seed(mut self, seed: u64) -> Self {
        self.randomization_seed = Some(seed);
        self
    }

    /// Renewal cadence actually used while leading.
    pub fn effective_renew_interval(&self) -> Duration {
        self.renew_interval.unwrap_or(self.renew_deadline / 4)
    }

    /// Lease duration as written to the record, rounded up to whole seconds.
    pub fn lease_duration_seconds(&self) -> u64 {
        (self.lease_duration.as_millis() as u64).div_ceil(1000)
    }

    /// Check the timing invariants the election depends on.
    pub fn validate(&self) -> Result<()> {
        if self.lease_duration < Duration::from_secs(1) {
            return Err(ElectorError::config(
                "lease duration must be at least one second",
            ));
        }
        if self.renew_deadline.is_zero() {
            return Err(ElectorError::config("renew deadline must be positive"));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(ElectorError::config(format!(
                "renew deadline ({:?}) must be less than lease duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }
        if self.retry_period.is_zero() {
            return Err(ElectorError::config("retry period must be positive"));
        }
        let renew_interval = self.effective_renew_interval();
        if renew_interval.is_zero() || renew_interval >= self.renew_deadline {
            return Err(ElectorError::config(format!(
                "renew interval ({:?}) must be positive and less than renew deadline ({:?})",
                renew_interval, self.renew_deadline
            )));
        }
        if self.renew_retry_interval.is_zero() {
            return Err(ElectorError::config("renew retry interval must be positive"));
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(ElectorError::config(format!(
                "jitter factor must be in [0, 1), got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Handed to `on_started_leading`; tracks the leadership term it was created for.
#[derive(Debug, Clone)]
pub struct LeaderContext {
    identity: String,
    lost_rx: watch::Receiver<bool>,
}

impl LeaderContext {
    pub(crate) fn new(identity: String, lost_rx: watch::Receiver<bool>) -> Self {
        Self { identity, lost_rx }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether the term this context belongs to is still running.
    pub fn is_leading(&self) -> bool {
        !*self.lost_rx.borrow()
    }

    /// Resolves once leadership is lost or the elector is cancelled.
    pub async fn lost(&mut self) {
        let _ = self.lost_rx.wait_for(|lost| *lost).await;
    }
}

pub type StartedLeadingFn = Arc<dyn Fn(LeaderContext) + Send + Sync>;
pub type StoppedLeadingFn = Arc<dyn Fn() + Send + Sync>;
pub type NewLeaderFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle hooks of an election.
///
/// All hooks run inline on the elector's task, between state transitions.
/// They must return promptly: a slow hook delays renewals and can cost the
/// lease. Spawn a task from the hook for anything long-running.
#[derive(Clone, Default)]
pub struct LeaderCallbacks {
    pub(crate) on_started_leading: Option<StartedLeadingFn>,
    pub(crate) on_stopped_leading: Option<StoppedLeadingFn>,
    pub(crate) on_new_leader: Option<NewLeaderFn>,
}

impl LeaderCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when this candidate acquires the lease.
    pub fn on_started_leading<F>(mut self, f: F) -> Self
    where
        F: Fn(LeaderContext) + Send + Sync + 'static,
    {
        self.on_started_leading = Some(Arc::new(f));
        self
    }

    /// Called when this candidate stops leading, whether lost or cancelled.
    pub fn on_stopped_leading<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stopped_leading = Some(Arc::new(f));
        self
    }

    /// Called when a different leader identity is observed.
    pub fn on_new_leader<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_new_leader = Some(Arc::new(f));
        self
    }

    pub(crate) fn started_leading(&self, ctx: LeaderContext) {
        if let Some(f) = &self.on_started_leading {
            f(ctx);
        }
    }

    pub(crate) fn stopped_leading(&self) {
        if let Some(f) = &self.on_stopped_leading {
            f();
        }
    }

    pub(crate) fn new_leader(&self, identity: &str) {
        if let Some(f) = &self.on_new_leader {
            f(identity);
        }
    }
}

impl fmt::Debug for LeaderCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderCallbacks")
            .field("on_started_leading", &self.on_started_leading.is_some())
            .field("on_stopped_leading", &self.on_stopped_leading.is_some())
            .field("on_new_leader", &self.on_new_leader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ElectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_renew_interval(), Duration::from_millis(2500));
        assert_eq!(config.lease_duration_seconds(), 15);
    }

    #[test]
    fn test_renew_deadline_must_be_below_lease() {
        let config = ElectionConfig::default().with_renew_deadline(Duration::from_secs(15));
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_invalid_timings_rejected() {
        let config = ElectionConfig::default().with_retry_period(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = ElectionConfig::default().with_renew_interval(Duration::from_secs(10));
        assert!(config.validate().is_err());

        let config = ElectionConfig::default().with_jitter_factor(1.5);
        assert!(config.validate().is_err());

        let config = ElectionConfig::default()
            .with_lease_duration(Duration::from_millis(500))
            .with_renew_deadline(Duration::from_millis(400));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_seconds_round_up() {
        let config = ElectionConfig::default().with_lease_duration(Duration::from_millis(1500));
        assert_eq!(config.lease_duration_seconds(), 2);
    }

    #[tokio::test]
    async fn test_leader_context_lost() {
        let (lost_tx, lost_rx) = watch::channel(false);
        let mut ctx = LeaderContext::new("node-a".to_string(), lost_rx);
        assert!(ctx.is_leading());

        lost_tx.send(true).unwrap();
        ctx.lost().await;
        assert!(!ctx.is_leading());
    }
}
