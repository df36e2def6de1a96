//! Process-local cache of the last known leader.

use crate::LeaderCallbacks;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Last leader identity delivered by the elector's callbacks.
///
/// Reads and writes are lock-free, so status readers never block the
/// elector and vice versa. The value reflects the most recent callback, not
/// the backend's current truth. An empty string means "unknown".
pub struct LeaderObserver {
    current: ArcSwap<String>,
}

impl LeaderObserver {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(String::new()),
        }
    }

    /// Overwrite the cached leader identity.
    pub fn set_leader(&self, identity: impl Into<String>) {
        let identity = identity.into();
        debug!("Observed leader set to {:?}", identity);
        self.current.store(Arc::new(identity));
    }

    /// Forget the cached leader.
    pub fn clear(&self) {
        self.set_leader(String::new());
    }

    /// Last known leader identity, empty if none has been observed.
    pub fn get_leader(&self) -> String {
        self.current.load().as_ref().clone()
    }

    pub fn has_leader(&self) -> bool {
        !self.current.load().is_empty()
    }

    /// Wrap `callbacks` so that every leadership event updates this observer
    /// before the wrapped hook runs.
    ///
    /// `on_started_leading` and `on_new_leader` store the identity;
    /// `on_stopped_leading` clears it, since no successor is known yet.
    pub fn attach(self: &Arc<Self>, callbacks: LeaderCallbacks) -> LeaderCallbacks {
        let LeaderCallbacks {
            on_started_leading,
            on_stopped_leading,
            on_new_leader,
        } = callbacks;

        let started = Arc::clone(self);
        let stopped = Arc::clone(self);
        let new_leader = Arc::clone(self);

        LeaderCallbacks::new()
            .on_started_leading(move |ctx| {
                started.set_leader(ctx.identity());
                if let Some(f) = &on_started_leading {
                    f(ctx);
                }
            })
            .on_stopped_leading(move || {
                stopped.clear();
                if let Some(f) = &on_stopped_leading {
                    f();
                }
            })
            .on_new_leader(move |identity| {
                new_leader.set_leader(identity);
                if let Some(f) = &on_new_leader {
                    f(identity);
                }
            })
    }
}

impl Default for LeaderObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LeaderObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderObserver")
            .field("current", &self.get_leader())
            .finish()
    }
}
