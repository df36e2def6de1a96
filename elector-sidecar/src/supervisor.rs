//! Wires the backend, elector, observer and status endpoint together.

use crate::settings::{BackendKind, Settings};
use crate::status::{serve_status, status_router};
use elector_core::{ElectionIdentity, ElectorError, LockBackend, Result};
use elector_engine::{ElectionConfig, LeaderCallbacks, LeaderElector, LeaderObserver};
use elector_store::{FileSystemLockStore, InMemoryLockStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Owns one sidecar run, from configuration to clean shutdown.
pub struct Supervisor {
    settings: Settings,
    observer: Arc<LeaderObserver>,
}

impl Supervisor {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            observer: Arc::new(LeaderObserver::new()),
        }
    }

    /// The observer fed by this supervisor's elector.
    pub fn observer(&self) -> Arc<LeaderObserver> {
        Arc::clone(&self.observer)
    }

    /// Run until `shutdown` turns `true`.
    ///
    /// In foreground mode only the election runs; otherwise the status
    /// endpoint is served alongside it.
    ///
    /// # Errors
    /// * Configuration errors, before anything starts
    /// * Failure to open the backend or bind the status endpoint
    /// * Status endpoint I/O failure, after the election has been stopped
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let identity = self.settings.identity()?;
        let config = self.settings.election_config();
        config.validate()?;

        match self.settings.backend {
            BackendKind::Memory => {
                warn!(
                    "Memory backend only arbitrates within this process; peers will not see this lock"
                );
                self.run_with(identity, config, InMemoryLockStore::new(), shutdown)
                    .await
            }
            BackendKind::File => {
                let store = FileSystemLockStore::new(&self.settings.state_dir).await?;
                info!("Using lock records under {}", store.root().display());
                self.run_with(identity, config, store, shutdown).await
            }
        }
    }

    async fn run_with<B: LockBackend + 'static>(
        self,
        identity: ElectionIdentity,
        config: ElectionConfig,
        backend: B,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let callbacks = self.observer.attach(LeaderCallbacks::new());
        let elector = LeaderElector::new(identity, config, backend, callbacks)?;

        if self.settings.foreground {
            info!("Running election in foreground mode");
            return elector.run(shutdown).await;
        }

        let addr = self.settings.status_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ElectorError::config(format!("failed to bind status endpoint on {}: {}", addr, e))
        })?;
        let router = status_router(Arc::clone(&self.observer), &self.settings.status_path);

        // Stops both halves, on shutdown or when the server fails
        let (stop_tx, stop_rx) = watch::channel(false);
        let election = tokio::spawn(elector.run(stop_rx.clone()));
        let server = serve_status(listener, router, stop_rx);
        tokio::pin!(server);

        let finished = tokio::select! {
            result = &mut server => Some(result),
            _ = shutdown.wait_for(|stop| *stop) => None,
        };
        stop_tx.send_replace(true);

        let served = match finished {
            Some(result) => result,
            None => server.await,
        };
        let elected = election
            .await
            .map_err(|e| ElectorError::internal(format!("election task failed: {}", e)))?;

        served.and(elected)
    }
}

/// Resolves on SIGINT, SIGTERM or Ctrl-C.
pub async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT detected"),
        _ = sigterm.recv() => info!("SIGTERM detected"),
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C detected"),
    }
    Ok(())
}
