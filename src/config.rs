//! # Configuration document.
//!
//! [`Config`] is the structured document the daemon consumes. It is loaded from
//! TOML; only a handful of sections are read by the core:
//!
//! ```toml
//! [common.web]            # consumed by the entry point only
//! host = "0.0.0.0"
//! port = 8085
//!
//! [scopes]
//! packages = ["pkgA", "pkgB"]
//!
//! [daemon]
//! poll_interval_ms = 2000
//! bus_capacity = 1024
//! allow_list = ["Extra.task"]
//!
//! [[connections]]
//! name = "cache"
//! driver = "memory"
//!
//! [[dispatchers]]
//! type = "timer"
//! name = "ticker"
//! options = { interval_ms = 1000 }
//! ```
//!
//! ## Sentinel values
//! - `poll_interval_ms = 0` → clamped to [`MIN_POLL_INTERVAL`]
//! - `bus_capacity = 0` → clamped to 1

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexSet;
use serde::Deserialize;

use crate::error::{ConfigError, PrepareError};

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_ENV: &str = "SHIVA_CONFIG";

/// Fallback config path.
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

/// Lower bound for the liveness poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings shared by all entry points.
    pub common: CommonConfig,
    /// Extension package declarations.
    pub scopes: ScopesConfig,
    /// Supervisor runtime knobs.
    pub daemon: DaemonConfig,
    /// Connection driver declarations, in preparation order.
    pub connections: Vec<ConnectionDecl>,
    /// Dispatcher instance declarations, in preparation order.
    pub dispatchers: Vec<DispatcherDecl>,
}

/// `[common]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: Option<String>,
    /// Host status listener.
    pub web: WebConfig,
}

/// `[common.web]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
        }
    }
}

impl WebConfig {
    /// `host:port` string suitable for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `[scopes]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopesConfig {
    /// Optional extension packages, in load-priority order.
    pub packages: Vec<String>,
}

/// `[daemon]` section.
///
/// All fields are public; prefer the accessors, which apply the sentinel rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Liveness poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
    /// Extra task identity substrings exempt from shutdown cancellation.
    pub allow_list: Vec<String>,
}

impl Default for DaemonConfig {
    /// - `poll_interval_ms = 2000`
    /// - `bus_capacity = 1024`
    /// - `allow_list = []` (built-in entries always apply)
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            bus_capacity: 1024,
            allow_list: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Poll interval, never below [`MIN_POLL_INTERVAL`].
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_POLL_INTERVAL)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Free-form options attached to a declaration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Options(toml::Table);

impl Options {
    /// Wraps an existing table.
    pub fn new(table: toml::Table) -> Self {
        Self(table)
    }

    /// Returns an integer option; `owner` names the declaration in errors.
    pub fn u64(&self, owner: &str, key: &str) -> Result<Option<u64>, PrepareError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(toml::Value::Integer(v)) if *v >= 0 => Ok(Some(*v as u64)),
            Some(other) => Err(PrepareError::Invalid {
                reason: format!("{owner}: option `{key}` must be a non-negative integer, got {other}"),
            }),
        }
    }

    /// Returns a string option; `owner` names the declaration in errors.
    pub fn str(&self, owner: &str, key: &str) -> Result<Option<&str>, PrepareError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(toml::Value::String(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(PrepareError::Invalid {
                reason: format!("{owner}: option `{key}` must be a string, got {other}"),
            }),
        }
    }

    /// Inserts an option (builder style).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

/// One `[[connections]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDecl {
    /// Registry name of the connection.
    pub name: String,
    /// Driver kind, looked up in the registered driver set.
    pub driver: String,
    #[serde(default)]
    pub options: Options,
}

impl ConnectionDecl {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

/// One `[[dispatchers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherDecl {
    /// Dispatcher type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Instance name, unique within its type.
    pub name: String,
    #[serde(default)]
    pub options: Options,
}

impl DispatcherDecl {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// `type.instance` identity used in logs and events.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }
}

impl Config {
    /// Picks the config path: explicit argument, then [`CONFIG_ENV`], then [`DEFAULT_CONFIG_PATH`].
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Reads, parses and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    /// Parses and validates an in-memory TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw, Path::new("<inline>"))
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks declarations for empty and duplicate names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if let Some(idx) = self.scopes.packages.iter().position(|p| p.trim().is_empty()) {
            return invalid(format!("scopes.packages[{idx}] is empty"));
        }

        let mut seen = IndexSet::new();
        for (idx, c) in self.connections.iter().enumerate() {
            if c.name.trim().is_empty() {
                return invalid(format!("connections[{idx}].name is empty"));
            }
            if c.driver.trim().is_empty() {
                return invalid(format!("connection `{}` has no driver", c.name));
            }
            if !seen.insert(c.name.as_str()) {
                return invalid(format!("duplicate connection `{}`", c.name));
            }
        }

        let mut seen = IndexSet::new();
        for (idx, d) in self.dispatchers.iter().enumerate() {
            if d.kind.trim().is_empty() || d.name.trim().is_empty() {
                return invalid(format!("dispatchers[{idx}] needs both `type` and `name`"));
            }
            if !seen.insert((d.kind.as_str(), d.name.as_str())) {
                return invalid(format!("duplicate dispatcher `{}`", d.qualified_name()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [common]
        log_level = "debug"

        [common.web]
        port = 9000

        [scopes]
        packages = ["pkgA", "pkgB"]

        [daemon]
        poll_interval_ms = 0
        allow_list = ["Host.loop"]

        [[connections]]
        name = "cache"
        driver = "memory"

        [[dispatchers]]
        type = "timer"
        name = "ticker"
        options = { interval_ms = 250, connection = "cache" }
    "#;

    #[test]
    fn parses_full_document() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.common.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.common.web.addr(), "0.0.0.0:9000");
        assert_eq!(cfg.scopes.packages, vec!["pkgA", "pkgB"]);
        assert_eq!(cfg.daemon.poll_interval(), MIN_POLL_INTERVAL);
        assert_eq!(cfg.daemon.bus_capacity_clamped(), 1024);
        assert_eq!(cfg.connections[0].driver, "memory");

        let d = &cfg.dispatchers[0];
        assert_eq!(d.qualified_name(), "timer.ticker");
        assert_eq!(d.options.u64("timer.ticker", "interval_ms").unwrap(), Some(250));
        assert_eq!(d.options.str("timer.ticker", "connection").unwrap(), Some("cache"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert!(cfg.scopes.packages.is_empty());
        assert_eq!(cfg.daemon.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.common.web.port, 8085);
    }

    #[test]
    fn rejects_duplicate_connections() {
        let raw = r#"
            [[connections]]
            name = "db"
            driver = "memory"
            [[connections]]
            name = "db"
            driver = "memory"
        "#;
        let err = Config::from_toml_str(raw).unwrap_err();
        assert_eq!(err.as_label(), "config_invalid");
    }

    #[test]
    fn rejects_wrongly_typed_option() {
        let opts = Options::default().with("interval_ms", "soon");
        let err = opts.u64("timer.x", "interval_ms").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.dispatchers.len(), 1);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.as_label(), "config_read");
    }

    #[test]
    fn explicit_path_wins() {
        let p = Config::resolve_path(Some(Path::new("/etc/shiva.toml")));
        assert_eq!(p, PathBuf::from("/etc/shiva.toml"));
    }
}
