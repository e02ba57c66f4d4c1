//! Explorer configuration: defaults, an optional TOML file, then environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DB_FILE_NAME: &str = "bps_database.db";
pub const DOCS_DIR_NAME: &str = "all_bps_docs";
pub const CONFIG_FILE_NAME: &str = "bpsx.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime settings for an [`Explorer`](crate::explorer::Explorer).
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorerConfig {
    /// SQLite file holding the BPS tables.
    pub db_path: PathBuf,
    /// Directory the stored document identifiers are resolved against.
    pub docs_dir: PathBuf,
    /// Maximum cached results per cache (0 disables caching).
    pub cache_capacity: usize,
    /// Age after which a cached result is recomputed.
    pub cache_ttl: Option<Duration>,
    /// Execution limit for ad-hoc queries.
    pub query_timeout: Duration,
    /// Row cap for ad-hoc results (`None` = unbounded).
    pub max_rows: Option<usize>,
    /// Result limit applied by the CLI when no `--limit` is given.
    pub default_limit: Option<usize>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join(DB_FILE_NAME),
            docs_dir: data_dir.join(DOCS_DIR_NAME),
            cache_capacity: 128,
            cache_ttl: None,
            query_timeout: Duration::from_secs(5),
            max_rows: Some(10_000),
            default_limit: Some(50),
        }
    }
}

/// On-disk shape of `bpsx.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    docs_dir: Option<PathBuf>,
    cache_capacity: Option<usize>,
    cache_ttl_secs: Option<u64>,
    query_timeout_ms: Option<u64>,
    max_rows: Option<usize>,
    default_limit: Option<usize>,
}

impl ExplorerConfig {
    /// Configuration for `db_path` with every other setting at its default.
    pub fn for_database(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        let docs_dir = db_path
            .parent()
            .map(|p| p.join(DOCS_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(DOCS_DIR_NAME));
        Self {
            db_path,
            docs_dir,
            ..Self::default()
        }
    }

    /// Full layering: defaults, the config file (explicit or in the data dir), environment.
    ///
    /// An explicit `config_path` must exist; the data-dir file is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        match config_path {
            Some(path) => cfg.merge_file(path)?,
            None => {
                let implicit = default_data_dir().join(CONFIG_FILE_NAME);
                if implicit.is_file() {
                    cfg.merge_file(&implicit)?;
                }
            }
        }
        cfg.merge_env()?;
        Ok(cfg)
    }

    /// Overlay the keys present in a TOML file.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn merge_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(p) = file.db_path {
            self.db_path = p;
        }
        if let Some(p) = file.docs_dir {
            self.docs_dir = p;
        }
        if let Some(n) = file.cache_capacity {
            self.cache_capacity = n;
        }
        if let Some(secs) = file.cache_ttl_secs {
            self.cache_ttl = ttl_from_secs(secs);
        }
        if let Some(ms) = file.query_timeout_ms {
            self.query_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = file.max_rows {
            self.max_rows = limit_from(n);
        }
        if let Some(n) = file.default_limit {
            self.default_limit = limit_from(n);
        }
        Ok(())
    }

    /// Overlay `BPSX_*` environment variables (a `.env` file is honoured via dotenvy).
    /// A malformed number is an error.
    pub fn merge_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = dotenvy::var("BPSX_DB") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(path) = dotenvy::var("BPSX_DOCS_DIR") {
            self.docs_dir = PathBuf::from(path);
        }
        if let Some(n) = env_number("BPSX_CACHE_CAPACITY")? {
            self.cache_capacity = n as usize;
        }
        if let Some(secs) = env_number("BPSX_CACHE_TTL_SECS")? {
            self.cache_ttl = ttl_from_secs(secs);
        }
        if let Some(ms) = env_number("BPSX_QUERY_TIMEOUT_MS")? {
            self.query_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_number("BPSX_MAX_ROWS")? {
            self.max_rows = limit_from(n as usize);
        }
        Ok(())
    }
}

fn env_number(key: &'static str) -> Result<Option<u64>, ConfigError> {
    let Ok(raw) = dotenvy::var(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

/// Zero means "no expiry".
fn ttl_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Zero means "no cap".
fn limit_from(n: usize) -> Option<usize> {
    (n > 0).then_some(n)
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "landfire", "bps-explorer")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: &[&str] = &[
        "BPSX_DB",
        "BPSX_DOCS_DIR",
        "BPSX_CACHE_CAPACITY",
        "BPSX_CACHE_TTL_SECS",
        "BPSX_QUERY_TIMEOUT_MS",
        "BPSX_MAX_ROWS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            // SAFETY: env mutation is confined to #[serial] tests.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = ExplorerConfig::default();
        assert!(cfg.db_path.ends_with(DB_FILE_NAME));
        assert!(cfg.docs_dir.ends_with(DOCS_DIR_NAME));
        assert!(cfg.cache_capacity > 0);
        assert_eq!(cfg.query_timeout, Duration::from_secs(5));
    }

    #[test]
    fn for_database_puts_docs_next_to_db() {
        let cfg = ExplorerConfig::for_database("/data/bps/bps_database.db");
        assert_eq!(cfg.docs_dir, PathBuf::from("/data/bps").join(DOCS_DIR_NAME));
    }

    #[test]
    fn toml_overlays_only_present_keys() {
        let mut cfg = ExplorerConfig::default();
        let before = cfg.clone();
        cfg.merge_toml(
            r#"
            db_path = "/tmp/x.db"
            cache_capacity = 0
            cache_ttl_secs = 30
            max_rows = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.cache_capacity, 0);
        assert_eq!(cfg.cache_ttl, Some(Duration::from_secs(30)));
        assert_eq!(cfg.max_rows, None);
        assert_eq!(cfg.docs_dir, before.docs_dir);
        assert_eq!(cfg.query_timeout, before.query_timeout);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let mut cfg = ExplorerConfig::default();
        assert!(cfg.merge_toml("cache_size = 3").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ExplorerConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&file, "query_timeout_ms = 100\ncache_capacity = 9\n").unwrap();
        unsafe {
            std::env::set_var("BPSX_QUERY_TIMEOUT_MS", "250");
            std::env::set_var("BPSX_DB", "/srv/bps.db");
        }

        let cfg = ExplorerConfig::load(Some(&file)).unwrap();
        assert_eq!(cfg.query_timeout, Duration::from_millis(250));
        assert_eq!(cfg.cache_capacity, 9);
        assert_eq!(cfg.db_path, PathBuf::from("/srv/bps.db"));
        clear_env();
    }

    #[test]
    #[serial]
    fn malformed_env_number_is_reported() {
        clear_env();
        unsafe { std::env::set_var("BPSX_MAX_ROWS", "lots") };
        let mut cfg = ExplorerConfig::default();
        let err = cfg.merge_env().unwrap_err();
        assert!(err.to_string().contains("BPSX_MAX_ROWS"));
        clear_env();
    }
}
