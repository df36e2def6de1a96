//! Command line and environment configuration of the sidecar.

use clap::{Parser, ValueEnum};
use elector_core::{ElectionIdentity, Result, DEFAULT_NAMESPACE};
use elector_engine::ElectionConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Port of the status endpoint when none is configured.
pub const DEFAULT_PORT: u16 = 4040;

/// Where lock records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Process-local map; never arbitrates between separate processes
    Memory,
    /// One JSON file per election under `--state-dir`
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Leader election sidecar.
///
/// Contests the election named by `--election` as `--id` and reports the
/// current leader as `{"name": "..."}` over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(name = "elector", version, about, long_about = None)]
pub struct Settings {
    /// Name of the election
    #[arg(long, env = "ELECTOR_ELECTION")]
    pub election: String,

    /// Identity of this participant
    #[arg(long, env = "ELECTOR_ID")]
    pub id: String,

    /// Namespace partitioning elections
    #[arg(long = "election-namespace", env = "ELECTOR_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// How long a claim stays valid without renewal
    #[arg(long, env = "ELECTOR_LEASE_DURATION", default_value = "15s", value_parser = parse_duration)]
    pub lease_duration: Duration,

    /// How long the leader keeps retrying a failed renewal before stepping down
    #[arg(long, env = "ELECTOR_RENEW_DEADLINE", default_value = "10s", value_parser = parse_duration)]
    pub renew_deadline: Duration,

    /// Wait between acquisition attempts
    #[arg(long, env = "ELECTOR_RETRY_PERIOD", default_value = "2s", value_parser = parse_duration)]
    pub retry_period: Duration,

    /// Clear the lock on shutdown instead of letting it expire
    #[arg(
        long,
        env = "ELECTOR_RELEASE_ON_CANCEL",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub release_on_cancel: bool,

    /// Port of the status endpoint
    #[arg(long, env = "ELECTOR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address the status endpoint binds to
    #[arg(long, env = "ELECTOR_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Path of the status endpoint
    #[arg(long, env = "ELECTOR_STATUS_PATH", default_value = "/")]
    pub status_path: String,

    /// Run only the election loop, without the status endpoint
    #[arg(long, visible_alias = "debug", env = "ELECTOR_FOREGROUND")]
    pub foreground: bool,

    /// Lock backend. Peers contend only when they share a backend, so the
    /// default is the file backend over a shared `--state-dir`.
    #[arg(long, env = "ELECTOR_BACKEND", value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    /// State directory of the file backend
    #[arg(long, env = "ELECTOR_STATE_DIR", default_value = ".elector")]
    pub state_dir: PathBuf,

    /// Longest wait for a clean shutdown after a signal
    #[arg(long, env = "ELECTOR_SHUTDOWN_GRACE", default_value = "5s", value_parser = parse_duration)]
    pub shutdown_grace: Duration,

    /// Log output format
    #[arg(long, env = "ELECTOR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Settings {
    /// Validated identity of this participant.
    pub fn identity(&self) -> Result<ElectionIdentity> {
        ElectionIdentity::new(&self.election, &self.id, &self.namespace)
    }

    /// Election timings. Validated by the elector.
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig::default()
            .with_lease_duration(self.lease_duration)
            .with_renew_deadline(self.renew_deadline)
            .with_retry_period(self.retry_period)
            .with_release_on_cancel(self.release_on_cancel)
    }

    pub fn status_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Parse durations such as `15s`, `500ms`, `2m`, `1h` or a bare number of
/// seconds.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(split);

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;
    let seconds = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown unit '{}' in duration '{}'", other, input)),
    };

    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{}': {}", input, e))
}
