//! Service configuration.
//!
//! Resolution order per field: command-line flag or environment variable,
//! then the `--config` TOML file, then [`runwatch_protocol::defaults`].

use chrono::Duration as ChronoDuration;
use clap::Parser;
use runwatch_protocol::defaults;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::reconciler::ReconcilerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Parser, Debug, Default)]
#[command(
    name = "runwatch-sentinel",
    about = "Keeps a store of active query jobs reconciled with the remote service"
)]
pub struct SentinelArgs {
    /// TOML file with any of the settings below
    #[arg(long, env = "RUNWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, env = "RUNWATCH_BIND")]
    pub bind: Option<String>,

    /// Job store URL (memory: | sqlite:<path>)
    #[arg(long, env = "RUNWATCH_STORE_URL")]
    pub store_url: Option<String>,

    /// Query service REST base URL
    #[arg(long, env = "RUNWATCH_QUERY_API_BASE")]
    pub query_api_base: Option<String>,

    /// Bearer token for the query service
    #[arg(long, env = "RUNWATCH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Seconds an observed insert suppresses redeliveries
    #[arg(long)]
    pub dedup_ttl_secs: Option<u64>,

    /// Completions older than this many seconds are acknowledged without retry
    #[arg(long)]
    pub race_window_secs: Option<u64>,

    /// Nacks sent for a completion that precedes its insert
    #[arg(long)]
    pub max_nacks: Option<u32>,

    /// Seconds an idle nack counter is kept
    #[arg(long)]
    pub nack_ttl_secs: Option<u64>,

    /// Seconds between fan-outs of project sweeps
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Evict unlisted jobs not refreshed for this many seconds (0 = never)
    #[arg(long)]
    pub max_staleness_secs: Option<u64>,

    /// Project billed for the reservation sync query
    #[arg(long, env = "RUNWATCH_RESERVATION_PROJECT")]
    pub reservation_project: Option<String>,

    /// Query returning reservation_id, project_id, slot_count rows
    #[arg(long)]
    pub reservation_query: Option<String>,

    /// Directory for rolling log files
    #[arg(long, env = "RUNWATCH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Debug-level console logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// `--config` file contents. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub store_url: Option<String>,
    pub query_api_base: Option<String>,
    pub access_token: Option<String>,
    pub dedup_ttl_secs: Option<u64>,
    pub race_window_secs: Option<u64>,
    pub max_nacks: Option<u32>,
    pub nack_ttl_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub max_staleness_secs: Option<u64>,
    pub reservation_project: Option<String>,
    pub reservation_query: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub bind: SocketAddr,
    pub store_url: String,
    pub query_api_base: String,
    pub access_token: Option<String>,
    pub dedup_ttl_secs: u64,
    pub race_window_secs: u64,
    pub max_nacks: u32,
    pub nack_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_staleness_secs: u64,
    pub reservation_project: Option<String>,
    pub reservation_query: String,
    pub log_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl SentinelConfig {
    /// Resolve from parsed arguments, reading `--config` if given.
    pub fn from_args(args: SentinelArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: SentinelArgs, file: FileConfig) -> Result<Self> {
        let bind_raw = args
            .bind
            .or(file.bind)
            .unwrap_or_else(|| defaults::DEFAULT_BIND_ADDR.to_string());
        let bind = bind_raw.parse().map_err(|err| ConfigError::Invalid {
            field: "bind",
            message: format!("{}: {}", bind_raw, err),
        })?;

        let config = Self {
            bind,
            store_url: args
                .store_url
                .or(file.store_url)
                .unwrap_or_else(|| defaults::DEFAULT_STORE_URL.to_string()),
            query_api_base: args
                .query_api_base
                .or(file.query_api_base)
                .unwrap_or_else(|| defaults::DEFAULT_QUERY_API_BASE.to_string()),
            access_token: args.access_token.or(file.access_token),
            dedup_ttl_secs: args
                .dedup_ttl_secs
                .or(file.dedup_ttl_secs)
                .unwrap_or(defaults::DEDUP_TTL_SECS),
            race_window_secs: args
                .race_window_secs
                .or(file.race_window_secs)
                .unwrap_or(defaults::RACE_WINDOW_SECS),
            max_nacks: args
                .max_nacks
                .or(file.max_nacks)
                .unwrap_or(defaults::MAX_COMPLETION_NACKS),
            nack_ttl_secs: args
                .nack_ttl_secs
                .or(file.nack_ttl_secs)
                .unwrap_or(defaults::NACK_TTL_SECS),
            sweep_interval_secs: args
                .sweep_interval_secs
                .or(file.sweep_interval_secs)
                .unwrap_or(defaults::SWEEP_INTERVAL_SECS),
            max_staleness_secs: args
                .max_staleness_secs
                .or(file.max_staleness_secs)
                .unwrap_or(defaults::MAX_STALENESS_SECS),
            reservation_project: args.reservation_project.or(file.reservation_project),
            reservation_query: args
                .reservation_query
                .or(file.reservation_query)
                .unwrap_or_else(|| defaults::DEFAULT_RESERVATION_QUERY.to_string()),
            log_dir: args.log_dir.or(file.log_dir),
            verbose: args.verbose || file.verbose.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dedup_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "dedup_ttl_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            dedup_ttl: Duration::from_secs(self.dedup_ttl_secs),
            race_window: ChronoDuration::seconds(self.race_window_secs as i64),
            max_nacks: self.max_nacks,
            nack_ttl: Duration::from_secs(self.nack_ttl_secs),
            max_staleness: (self.max_staleness_secs > 0)
                .then(|| ChronoDuration::seconds(self.max_staleness_secs as i64)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::resolve(SentinelArgs::default(), FileConfig::default()).unwrap();
        assert_eq!(config.bind.to_string(), defaults::DEFAULT_BIND_ADDR);
        assert_eq!(config.store_url, defaults::DEFAULT_STORE_URL);
        assert_eq!(config.max_nacks, 2);

        let reconciler = config.reconciler();
        assert_eq!(reconciler.dedup_ttl, Duration::from_secs(600));
        assert_eq!(reconciler.race_window, ChronoDuration::minutes(30));
        assert!(reconciler.max_staleness.is_some());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "store_url = \"memory:\"\nmax_nacks = 5\nmax_staleness_secs = 0\nbind = \"0.0.0.0:9000\""
        )
        .unwrap();

        let args = SentinelArgs::parse_from([
            "runwatch-sentinel",
            "--config",
            file.path().to_str().unwrap(),
            "--max-nacks",
            "1",
        ]);
        let config = SentinelConfig::from_args(args).unwrap();
        assert_eq!(config.store_url, "memory:");
        assert_eq!(config.max_nacks, 1);
        assert_eq!(config.bind.port(), 9000);
        assert!(config.reconciler().max_staleness.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let file = FileConfig {
            bind: Some("not-an-address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            SentinelConfig::resolve(SentinelArgs::default(), file),
            Err(ConfigError::Invalid { field: "bind", .. })
        ));

        let unknown: std::result::Result<FileConfig, _> = toml::from_str("colour = \"blue\"");
        assert!(unknown.is_err());
    }
}
