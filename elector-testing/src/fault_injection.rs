use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use elector_core::{ElectorError, LockBackend, LockKey, LockRecord, Result, Version, VersionedRecord};

#[derive(Debug, Clone, Default)]
pub struct FaultConditions {
    /// Every call fails as if the backend could not be reached
    pub unreachable: bool,
    /// Delay added before every call
    pub latency: Duration,
    /// Probability that a reachable call fails anyway
    pub failure_rate: f64,
}

#[derive(Debug, Default, Clone)]
pub struct FaultStats {
    pub calls: u64,
    pub injected_failures: u64,
}

/// A [`LockBackend`] wrapper that injects latency and transient failures.
///
/// Give each candidate its own wrapper around a shared inner store to cut a
/// single candidate off while the others keep talking to the backend.
/// Clones share conditions and statistics.
#[derive(Clone)]
pub struct FaultyLockStore<B> {
    inner: B,
    conditions: Arc<Mutex<FaultConditions>>,
    stats: Arc<Mutex<FaultStats>>,
    rng: Arc<Mutex<StdRng>>,
}

impl<B: LockBackend> FaultyLockStore<B> {
    pub fn new(inner: B) -> Self {
        Self::with_rng(inner, StdRng::from_entropy())
    }

    pub fn with_seed(inner: B, seed: u64) -> Self {
        Self::with_rng(inner, StdRng::seed_from_u64(seed))
    }

    fn with_rng(inner: B, rng: StdRng) -> Self {
        Self {
            inner,
            conditions: Arc::new(Mutex::new(FaultConditions::default())),
            stats: Arc::new(Mutex::new(FaultStats::default())),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.conditions.lock().unreachable = unreachable;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.conditions.lock().latency = latency;
    }

    pub fn set_failure_rate(&self, rate: f64) {
        self.conditions.lock().failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Remove every injected fault.
    pub fn heal(&self) {
        *self.conditions.lock() = FaultConditions::default();
    }

    pub fn conditions(&self) -> FaultConditions {
        self.conditions.lock().clone()
    }

    pub fn stats(&self) -> FaultStats {
        self.stats.lock().clone()
    }

    async fn inject(&self, operation: &str) -> Result<()> {
        let conditions = self.conditions();
        self.stats.lock().calls += 1;

        if !conditions.latency.is_zero() {
            sleep(conditions.latency).await;
        }

        let fail = conditions.unreachable
            || (conditions.failure_rate > 0.0
                && self.rng.lock().gen_bool(conditions.failure_rate));
        if fail {
            self.stats.lock().injected_failures += 1;
            debug!("Injected failure into {}", operation);
            return Err(ElectorError::backend(format!(
                "injected fault: {} unreachable",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<B: LockBackend> LockBackend for FaultyLockStore<B> {
    async fn get(&self, key: &LockKey) -> Result<Option<VersionedRecord>> {
        self.inject("get").await?;
        self.inner.get(key).await
    }

    async fn create(&self, key: &LockKey, record: &LockRecord) -> Result<Version> {
        self.inject("create").await?;
        self.inner.create(key, record).await
    }

    async fn update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Version,
    ) -> Result<Version> {
        self.inject("update").await?;
        self.inner.update(key, record, expected).await
    }
}
