//! The lease acquisition and renewal loop.

use crate::{ElectionConfig, ElectionState, ElectionStats, LeaderCallbacks, LeaderContext};
use elector_core::{
    Clock, ElectionIdentity, ElectorError, LockBackend, LockKey, LockRecord, Result, SystemClock,
    Version, VersionedRecord,
};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Result of a single write attempt against the lock record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    /// Took the lock from nobody, an expired holder, or a released record
    Acquired,
    /// Refreshed a lock this candidate already held
    Renewed,
    /// Another candidate holds an unexpired lease
    HeldBy(String),
    /// Lost a write race; the record changed under us
    Conflict,
}

/// How a leadership term ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Lost,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewOutcome {
    Renewed,
    Lost,
    Cancelled,
}

/// Resolves once shutdown is requested. A dropped sender counts as a request.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Contests one election on behalf of one candidate.
///
/// The elector owns its state machine and drives it from [`run`](Self::run).
/// Other tasks follow it through an [`ElectorHandle`].
pub struct LeaderElector<B: LockBackend + 'static> {
    identity: ElectionIdentity,
    key: LockKey,
    config: ElectionConfig,
    callbacks: LeaderCallbacks,
    backend: B,
    clock: Arc<dyn Clock>,
    state_tx: watch::Sender<ElectionState>,
    stats: Arc<RwLock<ElectionStats>>,
    /// Record as of our last read or successful write
    observed: Option<VersionedRecord>,
    /// Last identity passed to `on_new_leader`
    reported_leader: String,
    /// Start of the last successful acquisition or renewal
    last_renewal: Instant,
    rng: StdRng,
}

impl<B: LockBackend + 'static> LeaderElector<B> {
    /// Create an elector for `identity`.
    ///
    /// # Errors
    /// * Returns a configuration error if `config` fails validation
    pub fn new(
        identity: ElectionIdentity,
        config: ElectionConfig,
        backend: B,
        callbacks: LeaderCallbacks,
    ) -> Result<Self> {
        config.validate()?;

        let rng = match config.randomization_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (state_tx, _) = watch::channel(ElectionState::Standby);

        Ok(Self {
            key: identity.lock_key(),
            identity,
            config,
            callbacks,
            backend,
            clock: Arc::new(SystemClock),
            state_tx,
            stats: Arc::new(RwLock::new(ElectionStats::default())),
            observed: None,
            reported_leader: String::new(),
            last_renewal: Instant::now(),
            rng,
        })
    }

    /// Replace the wall clock used to stamp and expire records.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn identity(&self) -> &ElectionIdentity {
        &self.identity
    }

    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.state().is_leading()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> ElectionStats {
        self.stats.read().clone()
    }

    /// A cloneable view of this elector that outlives [`run`](Self::run).
    pub fn handle(&self) -> ElectorHandle {
        ElectorHandle {
            identity: self.identity.clone(),
            state_rx: self.state_tx.subscribe(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Run the election until `shutdown` becomes `true` or its sender is
    /// dropped.
    ///
    /// Backend failures never end the loop: they are retried while
    /// acquiring and count against the renew deadline while leading. The
    /// only error returned is an invalid configuration, which
    /// [`new`](Self::new) already rejects.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting leader election for {} (lease {:?}, renew deadline {:?}, retry {:?})",
            self.identity,
            self.config.lease_duration,
            self.config.renew_deadline,
            self.config.retry_period
        );

        loop {
            if !self.acquire(&mut shutdown).await {
                break;
            }

            match self.lead(&mut shutdown).await {
                Termination::Lost => self.set_state(ElectionState::Standby),
                Termination::Cancelled => break,
            }
        }

        self.set_state(ElectionState::Released);
        info!("Leader election for {} stopped", self.identity);
        Ok(())
    }

    /// Retry acquisition until it succeeds. Returns `false` if cancelled first.
    async fn acquire(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        self.set_state(ElectionState::Acquiring);

        loop {
            if is_cancelled(shutdown) {
                return false;
            }

            let started = Instant::now();
            let now = self.clock.now_millis();
            self.stats.write().acquire_attempts += 1;

            let attempt = tokio::select! {
                biased;
                _ = cancelled(shutdown) => return false,
                result = self.try_acquire_or_renew(now) => result,
            };

            match attempt {
                Ok(Attempt::Acquired) | Ok(Attempt::Renewed) => {
                    self.last_renewal = started;
                    return true;
                }
                Ok(Attempt::HeldBy(holder)) => {
                    debug!("Lock {} is held by {}", self.key, holder);
                    self.report_leader(&holder);
                }
                Ok(Attempt::Conflict) => {
                    debug!("Lost acquisition race for {}", self.key);
                    self.refresh().await;
                }
                Err(e) => {
                    warn!("Failed to acquire {}: {}", self.key, e);
                }
            }

            let wait = self.jittered_retry_period();
            tokio::select! {
                biased;
                _ = cancelled(shutdown) => return false,
                _ = sleep(wait) => {}
            }
        }
    }

    /// One leadership term, from acquisition to loss or cancellation.
    async fn lead(&mut self, shutdown: &mut watch::Receiver<bool>) -> Termination {
        self.set_state(ElectionState::Leading);
        self.stats.write().acquisitions += 1;
        info!("{} acquired leadership", self.identity);

        let candidate = self.identity.candidate_id().to_string();
        self.report_leader(&candidate);

        let (lost_tx, lost_rx) = watch::channel(false);
        self.callbacks
            .started_leading(LeaderContext::new(candidate, lost_rx));

        let termination = self.renew_loop(shutdown).await;
        lost_tx.send_replace(true);
        self.set_state(ElectionState::Released);

        match termination {
            Termination::Cancelled => {
                info!("{} stepping down on shutdown", self.identity);
                if self.config.release_on_cancel {
                    self.release().await;
                }
            }
            Termination::Lost => {
                warn!("{} lost leadership", self.identity);
                self.stats.write().leadership_losses += 1;
                self.reported_leader.clear();
            }
        }

        self.callbacks.stopped_leading();

        if termination == Termination::Lost {
            self.report_observed_holder();
        }
        termination
    }

    async fn renew_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Termination {
        let interval = self.config.effective_renew_interval();

        loop {
            tokio::select! {
                biased;
                _ = cancelled(shutdown) => return Termination::Cancelled,
                _ = sleep(interval) => {}
            }

            self.set_state(ElectionState::Renewing);
            let deadline = self.last_renewal + self.config.renew_deadline;

            match self.renew_until(deadline, shutdown).await {
                RenewOutcome::Renewed => self.set_state(ElectionState::Leading),
                RenewOutcome::Lost => return Termination::Lost,
                RenewOutcome::Cancelled => return Termination::Cancelled,
            }
        }
    }

    /// Keep trying to renew until one attempt succeeds or `deadline` passes.
    async fn renew_until(
        &mut self,
        deadline: Instant,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RenewOutcome {
        let expired = sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            let started = Instant::now();
            let now = self.clock.now_millis();

            let attempt = tokio::select! {
                biased;
                _ = cancelled(shutdown) => return RenewOutcome::Cancelled,
                _ = &mut expired => {
                    warn!(
                        "Failed to renew {} within {:?}",
                        self.key, self.config.renew_deadline
                    );
                    return RenewOutcome::Lost;
                }
                result = self.try_renew(now) => result,
            };

            match attempt {
                Ok(Attempt::Renewed) | Ok(Attempt::Acquired) => {
                    self.last_renewal = started;
                    self.stats.write().renewals += 1;
                    debug!("Renewed {} for {}", self.key, self.identity.candidate_id());
                    return RenewOutcome::Renewed;
                }
                Ok(Attempt::HeldBy(holder)) => {
                    self.stats.write().renewal_failures += 1;
                    warn!("Lock {} was taken over by {}", self.key, holder);
                    return RenewOutcome::Lost;
                }
                Ok(Attempt::Conflict) => {
                    self.stats.write().renewal_failures += 1;
                    debug!("Renewal of {} raced with another writer", self.key);
                }
                Err(e) => {
                    self.stats.write().renewal_failures += 1;
                    warn!("Failed to renew {}: {}", self.key, e);
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(shutdown) => return RenewOutcome::Cancelled,
                _ = &mut expired => {
                    warn!(
                        "Failed to renew {} within {:?}",
                        self.key, self.config.renew_deadline
                    );
                    return RenewOutcome::Lost;
                }
                _ = sleep(self.config.renew_retry_interval) => {}
            }
        }
    }

    /// Read the record and take or refresh the lock if allowed at `now`.
    async fn try_acquire_or_renew(&mut self, now: u64) -> Result<Attempt> {
        let candidate = self.identity.candidate_id();
        let lease_secs = self.config.lease_duration_seconds();

        let Some(current) = self.backend.get(&self.key).await? else {
            let record = LockRecord::acquired_by(candidate, lease_secs, now);
            return match self.backend.create(&self.key, &record).await {
                Ok(version) => {
                    self.observed = Some(VersionedRecord::new(record, version));
                    Ok(Attempt::Acquired)
                }
                Err(e) if e.is_conflict() => Ok(Attempt::Conflict),
                Err(e) => Err(e),
            };
        };

        let held_by_self = current.record.is_held_by(candidate);
        if !held_by_self && !current.record.is_acquirable(now) {
            let holder = current.record.holder_id.clone();
            self.observed = Some(current);
            return Ok(Attempt::HeldBy(holder));
        }

        let record = if held_by_self {
            LockRecord {
                renew_time: now,
                lease_duration_seconds: lease_secs,
                ..current.record.clone()
            }
        } else {
            LockRecord {
                leader_transitions: current.record.leader_transitions + 1,
                ..LockRecord::acquired_by(candidate, lease_secs, now)
            }
        };

        if !self.conditional_update(record, current.version).await? {
            return Ok(Attempt::Conflict);
        }
        Ok(if held_by_self {
            Attempt::Renewed
        } else {
            Attempt::Acquired
        })
    }

    /// Renew from the last written version, falling back to a fresh read.
    async fn try_renew(&mut self, now: u64) -> Result<Attempt> {
        if let Some(observed) = self.observed.clone() {
            if observed.record.is_held_by(self.identity.candidate_id()) {
                let record = LockRecord {
                    renew_time: now,
                    ..observed.record
                };
                if self.conditional_update(record, observed.version).await? {
                    return Ok(Attempt::Renewed);
                }
            }
        }
        self.try_acquire_or_renew(now).await
    }

    /// Write `record` if the backend is still at `expected`.
    ///
    /// Returns `Ok(false)` when the record moved or disappeared.
    async fn conditional_update(&mut self, record: LockRecord, expected: Version) -> Result<bool> {
        match self.backend.update(&self.key, &record, expected).await {
            Ok(version) => {
                self.observed = Some(VersionedRecord::new(record, version));
                Ok(true)
            }
            Err(e) if e.is_conflict() || e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Re-read the record after a lost race and report its holder.
    async fn refresh(&mut self) {
        match self.backend.get(&self.key).await {
            Ok(current) => {
                self.observed = current;
                self.report_observed_holder();
            }
            Err(e) => warn!("Failed to re-read {}: {}", self.key, e),
        }
    }

    /// Best-effort clear of the holder, bounded by the release grace period.
    async fn release(&mut self) {
        let Some(observed) = self.observed.clone() else {
            return;
        };
        if !observed.record.is_held_by(self.identity.candidate_id()) {
            return;
        }

        let record = LockRecord::released(&observed.record, self.clock.now_millis());
        let update = self.backend.update(&self.key, &record, observed.version);

        let released = timeout(self.config.release_grace, update)
            .await
            .unwrap_or_else(|_| {
                Err(ElectorError::timeout(format!(
                    "release after {:?}",
                    self.config.release_grace
                )))
            });

        match released {
            Ok(version) => {
                self.stats.write().releases += 1;
                info!("{} released {}", self.identity.candidate_id(), self.key);
                self.observed = Some(VersionedRecord::new(record, version));
            }
            Err(e) => warn!("Failed to release {}: {}", self.key, e),
        }
    }

    fn report_observed_holder(&mut self) {
        let now = self.clock.now_millis();
        let holder = match &self.observed {
            Some(current)
                if current.record.is_held()
                    && !current.record.is_expired(now)
                    && !current.record.is_held_by(self.identity.candidate_id()) =>
            {
                current.record.holder_id.clone()
            }
            _ => return,
        };
        self.report_leader(&holder);
    }

    /// Invoke `on_new_leader` if `holder` differs from the last one reported.
    fn report_leader(&mut self, holder: &str) {
        if holder.is_empty() || holder == self.reported_leader {
            return;
        }
        self.reported_leader = holder.to_string();
        self.stats.write().leader_changes_observed += 1;
        info!("New leader for {}: {}", self.key, holder);
        self.callbacks.new_leader(holder);
    }

    fn jittered_retry_period(&mut self) -> Duration {
        let factor = self.config.jitter_factor;
        if factor == 0.0 {
            return self.config.retry_period;
        }
        let spread = self.rng.gen_range(-factor..=factor);
        self.config.retry_period.mul_f64(1.0 + spread)
    }

    fn set_state(&self, state: ElectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("{}: {} -> {}", self.identity, previous, state);
        }
    }
}

/// Read-only view of a running [`LeaderElector`].
#[derive(Debug, Clone)]
pub struct ElectorHandle {
    identity: ElectionIdentity,
    state_rx: watch::Receiver<ElectionState>,
    stats: Arc<RwLock<ElectionStats>>,
}

impl ElectorHandle {
    pub fn identity(&self) -> &ElectionIdentity {
        &self.identity
    }

    pub fn state(&self) -> ElectionState {
        *self.state_rx.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.state().is_leading()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ElectionState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> ElectionStats {
        self.stats.read().clone()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// # Errors
    /// * Returns [`ElectorError::Shutdown`] if the elector is dropped first
    pub async fn wait_for_state<F>(&self, predicate: F) -> Result<ElectionState>
    where
        F: FnMut(&ElectionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| ElectorError::Shutdown)?;
        Ok(*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elector_core::AnchoredClock;
    use elector_store::InMemoryLockStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ANCHOR: u64 = 1_700_000_000_000;

    #[derive(Default)]
    struct Events {
        started: AtomicUsize,
        stopped: AtomicUsize,
        leaders: Mutex<Vec<String>>,
    }

    fn callbacks(events: &Arc<Events>) -> LeaderCallbacks {
        let started = Arc::clone(events);
        let stopped = Arc::clone(events);
        let leaders = Arc::clone(events);
        LeaderCallbacks::new()
            .on_started_leading(move |_| {
                started.started.fetch_add(1, Ordering::SeqCst);
            })
            .on_stopped_leading(move || {
                stopped.stopped.fetch_add(1, Ordering::SeqCst);
            })
            .on_new_leader(move |identity| {
                leaders.leaders.lock().unwrap().push(identity.to_string());
            })
    }

    fn elector(
        id: &str,
        store: &InMemoryLockStore,
        config: ElectionConfig,
        events: &Arc<Events>,
    ) -> LeaderElector<InMemoryLockStore> {
        let identity = ElectionIdentity::in_default_namespace("scheduler", id).unwrap();
        LeaderElector::new(identity, config, store.clone(), callbacks(events))
            .unwrap()
            .with_clock(Arc::new(AnchoredClock::with_anchor(ANCHOR)))
    }

    fn key() -> LockKey {
        LockKey::new("default", "scheduler")
    }

    fn config() -> ElectionConfig {
        ElectionConfig::default().with_randomization_seed(7)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let identity = ElectionIdentity::in_default_namespace("scheduler", "a").unwrap();
        let config = ElectionConfig::default().with_renew_deadline(Duration::from_secs(20));
        let result = LeaderElector::new(
            identity,
            config,
            InMemoryLockStore::new(),
            LeaderCallbacks::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquires_absent_record() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let elector = elector("a", &store, config(), &events);
        let handle = elector.handle();
        assert_eq!(handle.state(), ElectionState::Standby);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(elector.run(shutdown_rx));

        handle.wait_for_state(|s| s.is_leading()).await.unwrap();

        let current = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(current.version, Version::INITIAL);
        assert_eq!(current.record.holder_id, "a");
        assert_eq!(current.record.acquire_time, ANCHOR);
        assert_eq!(events.started.load(Ordering::SeqCst), 1);
        assert_eq!(*events.leaders.lock().unwrap(), vec!["a".to_string()]);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_only_moves_renew_time() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let elector = elector("a", &store, config(), &events);
        let handle = elector.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(elector.run(shutdown_rx));
        handle.wait_for_state(|s| s.is_leading()).await.unwrap();

        sleep(Duration::from_secs(6)).await;

        let current = store.get(&key()).await.unwrap().unwrap();
        assert_eq!(current.record.holder_id, "a");
        assert_eq!(current.record.acquire_time, ANCHOR);
        assert!(current.record.renew_time >= ANCHOR + 5_000);
        assert!(current.version > Version::INITIAL);
        assert_eq!(current.record.leader_transitions, 0);
        assert!(handle.stats().renewals >= 2);
        assert_eq!(events.started.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_on_cancel_clears_holder() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let elector = elector("a", &store, config(), &events);
        let handle = elector.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(elector.run(shutdown_rx));
        handle.wait_for_state(|s| s.is_leading()).await.unwrap();

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let current = store.get(&key()).await.unwrap().unwrap();
        assert!(!current.record.is_held());
        assert_eq!(handle.state(), ElectionState::Released);
        assert_eq!(handle.stats().releases, 1);
        assert_eq!(events.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_record_without_release_on_cancel() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let elector = elector("a", &store, config().with_release_on_cancel(false), &events);
        let handle = elector.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(elector.run(shutdown_rx));
        handle.wait_for_state(|s| s.is_leading()).await.unwrap();

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let current = store.get(&key()).await.unwrap().unwrap();
        assert!(current.record.is_held_by("a"));
        assert_eq!(handle.stats().releases, 0);
        assert_eq!(events.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeover_ends_leadership() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let elector = elector("a", &store, config(), &events);
        let handle = elector.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(elector.run(shutdown_rx));
        handle.wait_for_state(|s| s.is_leading()).await.unwrap();

        // Another writer overwrites the record behind the leader's back
        let current = store.get(&key()).await.unwrap().unwrap();
        let usurper = LockRecord::acquired_by("b", 15, ANCHOR);
        store.update(&key(), &usurper, current.version).await.unwrap();

        handle
            .wait_for_state(|s| *s == ElectionState::Acquiring)
            .await
            .unwrap();

        assert_eq!(handle.stats().leadership_losses, 1);
        assert_eq!(events.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.leaders.lock().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        // Never leader again, so nothing to release
        let current = store.get(&key()).await.unwrap().unwrap();
        assert!(current.record.is_held_by("b"));
        assert_eq!(events.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_shutdown_sender_stops_run() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let elector = elector("a", &store, config(), &events);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        elector.run(shutdown_rx).await.unwrap();
        assert_eq!(events.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_jitter_stays_within_factor() {
        let store = InMemoryLockStore::new();
        let events = Arc::new(Events::default());
        let mut elector = elector("a", &store, config(), &events);

        for _ in 0..100 {
            let wait = elector.jittered_retry_period();
            assert!(wait >= Duration::from_millis(1_800));
            assert!(wait <= Duration::from_millis(2_200));
        }
    }
}
