//! Configuration loading: compiled-in defaults → config file → env → CLI.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

const DEFAULT_CONFIG_PATH: &str = "/etc/fprintd.conf";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Parser)]
#[command(name = "fprintd", version, about = "Fingerprint reader broker service")]
pub struct Cli {
    /// Path to the daemon config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Disable the idle-exit timer entirely.
    #[arg(long)]
    pub no_timeout: bool,

    /// Idle-exit grace period, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Verbose logging (equivalent to RUST_LOG=debug).
    #[arg(long)]
    pub debug: bool,

    /// Register one in-memory mock device instead of probing for real
    /// hardware. The real driver binding is out of scope for this crate;
    /// this is the development/demo fallback.
    #[arg(long)]
    pub mock_device: bool,

    /// Skip the polkit authorization backend and allow every request.
    /// Intended for local development, not production use.
    #[arg(long)]
    pub no_polkit: bool,
}

/// The `[storage]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub store_type: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_type: "file".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub idle_timeout: Option<Duration>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Build the effective config from a parsed CLI plus an optional config
    /// file on disk. A missing config file is not an error — the compiled-in
    /// defaults apply (the real daemon is usable unconfigured).
    pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config {
            debug: cli.debug,
            ..Config::default()
        };

        if cli.config.exists() {
            let text = std::fs::read_to_string(&cli.config)
                .map_err(|e| ConfigError(format!("reading {:?}: {e}", cli.config)))?;
            config.storage = parse_storage_section(&text)?;
        }

        if cli.no_timeout {
            config.idle_timeout = None;
        } else if let Some(secs) = cli.timeout_secs {
            config.idle_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

/// Parses the single `[storage]` section out of a key/value config file.
/// The on-disk format fprintd uses has exactly one section and one key, so
/// a hand-rolled parser is simpler and more auditable than a general INI
/// dependency.
fn parse_storage_section(text: &str) -> Result<StorageConfig, ConfigError> {
    let mut storage = StorageConfig::default();
    let mut in_storage_section = false;

    for raw_line in text.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            in_storage_section = line.trim_start_matches('[').trim_end_matches(']') == "storage";
            continue;
        }

        if !in_storage_section {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError(format!("malformed line: {raw_line}")));
        };
        let (key, value) = (key.trim(), value.trim());
        if key == "type" {
            storage.store_type = value.to_owned();
        }
    }

    Ok(storage)
}

/// Resolves the print store root the same way `FileStore::from_env` does,
/// exposed so the daemon can log it at startup without depending on the
/// `store` module's internals.
pub fn state_directory() -> PathBuf {
    std::env::var("STATE_DIRECTORY")
        .ok()
        .and_then(|v| v.split(':').next().map(str::to_owned))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib/fprint"))
}

pub fn default_config_path() -> &'static Path {
    Path::new(DEFAULT_CONFIG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storage_type() {
        let cfg = parse_storage_section("[storage]\ntype=memory\n").unwrap();
        assert_eq!(cfg.store_type, "memory");
    }

    #[test]
    fn ignores_other_sections_and_comments() {
        let text = "# comment\n[unrelated]\ntype=bogus\n[storage]\n# a comment\ntype=file\n";
        let cfg = parse_storage_section(text).unwrap();
        assert_eq!(cfg.store_type, "file");
    }

    #[test]
    fn defaults_to_file_when_absent() {
        let cfg = parse_storage_section("").unwrap();
        assert_eq!(cfg.store_type, "file");
    }
}
