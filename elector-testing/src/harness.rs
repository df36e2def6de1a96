use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use elector_core::{
    AnchoredClock, Clock, ElectionIdentity, ElectorError, LockBackend, LockKey, Result,
    VersionedRecord, DEFAULT_NAMESPACE,
};
use elector_engine::{ElectionConfig, ElectorHandle, LeaderCallbacks, LeaderElector, LeaderObserver};
use elector_store::InMemoryLockStore;

use crate::fault_injection::FaultyLockStore;

/// Wall-clock anchor of the harness clock.
pub const HARNESS_EPOCH_MILLIS: u64 = 1_700_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader(String),
    /// Killed by the harness; ends any open term without a callback
    Crashed,
}

/// An event together with the harness clock reading when it fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub at_millis: u64,
    pub event: ElectionEvent,
}

/// One leadership term of one candidate, in harness clock millis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub candidate: String,
    pub started: u64,
    pub stopped: Option<u64>,
}

impl Term {
    fn overlaps(&self, other: &Term) -> bool {
        let self_end = self.stopped.unwrap_or(u64::MAX);
        let other_end = other.stopped.unwrap_or(u64::MAX);
        self.started < other_end && other.started < self_end
    }
}

/// A running candidate inside an [`ElectionHarness`].
pub struct Candidate {
    id: String,
    backend: FaultyLockStore<InMemoryLockStore>,
    observer: Arc<LeaderObserver>,
    handle: ElectorHandle,
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    clock: Arc<AnchoredClock>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<Result<()>>>,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// This candidate's private view of the shared backend.
    pub fn backend(&self) -> &FaultyLockStore<InMemoryLockStore> {
        &self.backend
    }

    pub fn observer(&self) -> &LeaderObserver {
        &self.observer
    }

    pub fn handle(&self) -> &ElectorHandle {
        &self.handle
    }

    /// Whether the candidate is alive and believes it leads.
    pub fn is_leader(&self) -> bool {
        self.is_running() && self.handle.is_leader()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Identities passed to `on_new_leader`, in order.
    pub fn observed_leaders(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|recorded| match &recorded.event {
                ElectionEvent::NewLeader(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clock reading of the first event matching `event`, if any.
    pub fn first(&self, event: &ElectionEvent) -> Option<u64> {
        self.events
            .lock()
            .iter()
            .find(|recorded| &recorded.event == event)
            .map(|recorded| recorded.at_millis)
    }

    pub fn terms(&self) -> Vec<Term> {
        let mut terms: Vec<Term> = Vec::new();
        for recorded in self.events.lock().iter() {
            match recorded.event {
                ElectionEvent::StartedLeading => terms.push(Term {
                    candidate: self.id.clone(),
                    started: recorded.at_millis,
                    stopped: None,
                }),
                ElectionEvent::StoppedLeading | ElectionEvent::Crashed => {
                    if let Some(term) = terms.last_mut() {
                        term.stopped.get_or_insert(recorded.at_millis);
                    }
                }
                ElectionEvent::NewLeader(_) => {}
            }
        }
        terms
    }

    /// Cancel the elector and wait for `run` to return.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| ElectorError::internal(format!("candidate task failed: {}", e)))?,
            None => Ok(()),
        }
    }

    /// Kill the elector without letting it release or call back.
    pub fn crash(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.events.lock().push(RecordedEvent {
                at_millis: self.clock.now_millis(),
                event: ElectionEvent::Crashed,
            });
            info!("Crashed candidate {}", self.id);
        }
    }
}

/// Runs several candidates against one shared in-memory backend.
///
/// All candidates read the same [`AnchoredClock`], so under paused tokio
/// time the lease arithmetic of every candidate agrees exactly.
pub struct ElectionHarness {
    election: String,
    config: ElectionConfig,
    store: InMemoryLockStore,
    clock: Arc<AnchoredClock>,
    candidates: HashMap<String, Candidate>,
}

impl ElectionHarness {
    pub fn new(election: impl Into<String>, config: ElectionConfig) -> Self {
        Self {
            election: election.into(),
            config,
            store: InMemoryLockStore::new(),
            clock: Arc::new(AnchoredClock::with_anchor(HARNESS_EPOCH_MILLIS)),
            candidates: HashMap::new(),
        }
    }

    /// Direct, fault-free access to the shared backend.
    pub fn store(&self) -> &InMemoryLockStore {
        &self.store
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn key(&self) -> LockKey {
        LockKey::new(DEFAULT_NAMESPACE, self.election.clone())
    }

    pub async fn record(&self) -> Option<VersionedRecord> {
        self.store.get(&self.key()).await.ok().flatten()
    }

    /// Start a candidate with the harness configuration.
    pub fn spawn(&mut self, id: &str) -> Result<&mut Candidate> {
        let config = self.config.clone();
        self.spawn_with(id, config)
    }

    /// Start a candidate with its own configuration.
    pub fn spawn_with(&mut self, id: &str, config: ElectionConfig) -> Result<&mut Candidate> {
        let identity = ElectionIdentity::in_default_namespace(self.election.clone(), id)?;
        let backend = FaultyLockStore::new(self.store.clone());
        let observer = Arc::new(LeaderObserver::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let callbacks = observer.attach(recording_callbacks(
            Arc::clone(&events),
            Arc::clone(&self.clock),
        ));
        let elector = LeaderElector::new(identity, config, backend.clone(), callbacks)?
            .with_clock(Arc::clone(&self.clock) as Arc<dyn Clock>);
        let handle = elector.handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let candidate_id = id.to_string();
        let task = tokio::spawn(async move {
            let result = elector.run(shutdown_rx).await;
            if let Err(e) = &result {
                error!("Candidate {} failed: {}", candidate_id, e);
            }
            result
        });

        let candidate = Candidate {
            id: id.to_string(),
            backend,
            observer,
            handle,
            events,
            clock: Arc::clone(&self.clock),
            shutdown_tx,
            task: Some(task),
        };
        self.candidates.insert(id.to_string(), candidate);
        self.candidates
            .get_mut(id)
            .ok_or_else(|| ElectorError::internal("candidate vanished"))
    }

    /// # Panics
    /// If no candidate named `id` was spawned.
    pub fn candidate(&self, id: &str) -> &Candidate {
        self.candidates
            .get(id)
            .unwrap_or_else(|| panic!("no candidate named {}", id))
    }

    pub fn candidate_mut(&mut self, id: &str) -> &mut Candidate {
        self.candidates
            .get_mut(id)
            .unwrap_or_else(|| panic!("no candidate named {}", id))
    }

    /// Candidates that currently believe they lead.
    pub fn leaders(&self) -> Vec<String> {
        let mut leaders: Vec<String> = self
            .candidates
            .values()
            .filter(|candidate| candidate.is_leader())
            .map(|candidate| candidate.id.clone())
            .collect();
        leaders.sort();
        leaders
    }

    /// Poll until some candidate leads, or `within` passes.
    pub async fn wait_for_leader(&self, within: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if let Some(leader) = self.leaders().into_iter().next() {
                return Some(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Pairs of terms from different candidates that overlapped in time.
    pub fn overlapping_terms(&self) -> Vec<(Term, Term)> {
        let terms: Vec<Term> = self
            .candidates
            .values()
            .flat_map(|candidate| candidate.terms())
            .collect();

        let mut overlaps = Vec::new();
        for (i, a) in terms.iter().enumerate() {
            for b in &terms[i + 1..] {
                if a.candidate != b.candidate && a.overlaps(b) {
                    overlaps.push((a.clone(), b.clone()));
                }
            }
        }
        overlaps
    }

    /// Stop every candidate that is still running.
    pub async fn shutdown(&mut self) -> Result<()> {
        for candidate in self.candidates.values_mut() {
            candidate.stop().await?;
        }
        Ok(())
    }
}

fn recording_callbacks(
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    clock: Arc<AnchoredClock>,
) -> LeaderCallbacks {
    let record = move |event: ElectionEvent| {
        events.lock().push(RecordedEvent {
            at_millis: clock.now_millis(),
            event,
        });
    };
    let started = record.clone();
    let stopped = record.clone();

    LeaderCallbacks::new()
        .on_started_leading(move |_| started(ElectionEvent::StartedLeading))
        .on_stopped_leading(move || stopped(ElectionEvent::StoppedLeading))
        .on_new_leader(move |id| record(ElectionEvent::NewLeader(id.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_overlap() {
        let a = Term {
            candidate: "a".into(),
            started: 0,
            stopped: Some(10),
        };
        let b = Term {
            candidate: "b".into(),
            started: 10,
            stopped: None,
        };
        let c = Term {
            candidate: "c".into(),
            started: 5,
            stopped: Some(6),
        };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(!b.overlaps(&c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_candidate_leads() {
        let mut harness = ElectionHarness::new("scheduler", ElectionConfig::default());
        harness.spawn("a").unwrap();

        assert_eq!(
            harness.wait_for_leader(Duration::from_secs(1)).await,
            Some("a".to_string())
        );
        assert_eq!(harness.candidate("a").observer().get_leader(), "a");

        harness.shutdown().await.unwrap();
        assert!(!harness.candidate("a").is_running());
        assert_eq!(harness.candidate("a").terms().len(), 1);
    }
}
