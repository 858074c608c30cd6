use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Rows accumulated per insert in the batched path.
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 500;

fn lookup_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn lookup_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn lookup_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Policy for using the backend's native bulk-copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkCopyMode {
    /// Probe the backend once per import and copy when it is capable.
    #[default]
    Auto,
    /// Skip the probe and always copy.
    Always,
    /// Always use batched inserts.
    Never,
}

impl FromStr for BulkCopyMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BulkCopyMode::Auto),
            "always" | "on" | "true" => Ok(BulkCopyMode::Always),
            "never" | "off" | "false" => Ok(BulkCopyMode::Never),
            other => Err(format!("unknown bulk copy mode '{other}'")),
        }
    }
}

/// Settings consumed by a single import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub bulk_copy: BulkCopyMode,
}

impl ImportConfig {
    pub fn new(batch_size: usize, bulk_copy: BulkCopyMode) -> Self {
        Self {
            batch_size: batch_size.max(1),
            bulk_copy,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_IMPORT_BATCH_SIZE, BulkCopyMode::Auto)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Cadence of scheduled consolidation rebuilds; `None` disables scheduling.
    pub consolidation_interval: Option<Duration>,
    /// How often a running job's heartbeat is refreshed.
    pub heartbeat_interval: Duration,
    /// A running job whose heartbeat is older than this goes back to the queue.
    pub stale_after: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            consolidation_interval: None,
            heartbeat_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Process-wide configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub upload_dir: PathBuf,
    pub import: ImportConfig,
    pub dispatcher: DispatcherConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bulk_copy = match lookup("IMPORT_BULK_COPY") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                log::warn!("{err}; falling back to auto");
                BulkCopyMode::Auto
            }),
            None => BulkCopyMode::Auto,
        };

        let consolidation_secs = lookup_u64(&lookup, "CONSOLIDATION_INTERVAL_SECS", 0);
        let heartbeat_secs = lookup_u64(&lookup, "DISPATCHER_HEARTBEAT_SECS", 30).max(1);
        // A live job must get at least two heartbeats in before it counts as stale.
        let stale_secs = lookup_u64(&lookup, "JOB_STALE_AFTER_SECS", 300).max(heartbeat_secs * 2);

        Self {
            database_url: lookup("DATABASE_URL"),
            max_connections: lookup_usize(&lookup, "DATABASE_MAX_CONNECTIONS", 5).max(1) as u32,
            upload_dir: PathBuf::from(lookup_string(&lookup, "UPLOAD_DIR", "./uploads")),
            import: ImportConfig::new(
                lookup_usize(&lookup, "IMPORT_BATCH_SIZE", DEFAULT_IMPORT_BATCH_SIZE),
                bulk_copy,
            ),
            dispatcher: DispatcherConfig {
                poll_interval: Duration::from_secs(lookup_u64(&lookup, "DISPATCHER_POLL_SECS", 5)),
                error_backoff: Duration::from_secs(lookup_u64(
                    &lookup,
                    "DISPATCHER_ERROR_BACKOFF_SECS",
                    10,
                )),
                consolidation_interval: (consolidation_secs > 0)
                    .then(|| Duration::from_secs(consolidation_secs)),
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                stale_after: Duration::from_secs(stale_secs),
            },
        }
    }
}
