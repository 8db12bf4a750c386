//! Configuration handling for dbkit.
//!
//! Engine configuration (`DbConf`), engine group options, the logger
//! configuration, the JSON engines file and the CLI arguments of the `dbkit`
//! binary all live here.

use crate::error::{DbError, DbResult};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";
pub const DEFAULT_LOC: &str = "Local";

// Logger defaults
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_LOG_FILE: &str = "app.log";
pub const DEFAULT_LOG_MAX_SIZE_MB: u64 = 512;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// MySQL connection parameters for one engine.
///
/// Empty strings and a zero port count as unset and are replaced by
/// [`DbConf::normalize`]. With `parse_time` the driver decodes DATE and
/// DATETIME columns into time values instead of strings.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConf {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    /// utf8mb4 supports emoji
    pub charset: String,
    pub collation: String,
    pub parse_time: bool,
    /// Time zone name such as `Local`, `UTC` or `Asia/Shanghai`
    pub loc: String,

    /// Connections kept around while idle (only applied with `use_pool`)
    pub max_idle_conns: u32,
    /// Upper bound of open connections (only applied with `use_pool`)
    pub max_open_conns: u32,
    /// Echo every SQL statement to the log
    pub show_sql: bool,
    /// Apply `max_idle_conns` / `max_open_conns` to the pool
    pub use_pool: bool,
    /// Log the execution time of every statement
    pub show_exec_time: bool,
}

impl DbConf {
    /// Fill every unset field with its default. Idempotent.
    pub fn normalize(&mut self) {
        if self.host.is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.charset.is_empty() {
            self.charset = DEFAULT_CHARSET.to_string();
        }
        if self.collation.is_empty() {
            self.collation = DEFAULT_COLLATION.to_string();
        }
        if self.loc.is_empty() {
            self.loc = DEFAULT_LOC.to_string();
        }
    }

    /// Normalized copy, leaving `self` untouched.
    pub fn normalized(&self) -> Self {
        let mut conf = self.clone();
        conf.normalize();
        conf
    }
}

impl std::fmt::Debug for DbConf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConf")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("parse_time", &self.parse_time)
            .field("loc", &self.loc)
            .field("max_idle_conns", &self.max_idle_conns)
            .field("max_open_conns", &self.max_open_conns)
            .field("show_sql", &self.show_sql)
            .field("use_pool", &self.use_pool)
            .field("show_exec_time", &self.show_exec_time)
            .finish()
    }
}

/// Options applied uniformly to the primary and every replica of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineGroupOptions {
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
    pub show_sql: bool,
    pub show_exec_time: bool,
    /// Maximum time a connection may be reused. Zero leaves the driver default.
    #[serde(rename = "max_lifetime_secs", with = "duration_secs")]
    pub max_lifetime: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Logging facade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Directory holding the log file (created when missing)
    pub dir: PathBuf,
    pub file_name: String,
    /// Rotate once the file grows beyond this many megabytes
    pub max_size_mb: u64,
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json: bool,
    /// Mirror log lines to stdout
    pub stdout: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            file_name: DEFAULT_LOG_FILE.to_string(),
            max_size_mb: DEFAULT_LOG_MAX_SIZE_MB,
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
            stdout: false,
        }
    }
}

impl LoggerConfig {
    /// Full path of the active log file.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Rotation threshold in bytes.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Read/write split group as declared in an engines file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConf {
    pub primary: DbConf,
    pub replicas: Vec<DbConf>,
    pub options: EngineGroupOptions,
}

/// JSON document listing named engines and engine groups.
///
/// ```text
/// {
///   "logger": { "dir": "./logs", "level": "debug" },
///   "engines": { "default": { "user": "root", "database": "app", "use_pool": true } },
///   "groups": { "orders": { "primary": { ... }, "replicas": [ { ... } ] } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesFile {
    pub logger: Option<LoggerConfig>,
    pub engines: BTreeMap<String, DbConf>,
    pub groups: BTreeMap<String, GroupConf>,
}

impl EnginesFile {
    /// Parse an engines file from its JSON text.
    pub fn from_json(text: &str) -> DbResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| DbError::configuration(format!("Invalid engines file: {e}")))
    }

    /// Read and parse an engines file.
    pub fn load(path: &Path) -> DbResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }
}

/// Command-line arguments of the `dbkit` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbkit",
    about = "Check MySQL engines from an engines file and issue HTTP requests",
    version,
    author
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL, env = "DBKIT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, global = true, env = "DBKIT_JSON_LOGS")]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register every engine of an engines file, ping it and close it again
    Check {
        /// Path of the JSON engines file
        #[arg(short, long, value_name = "FILE", env = "DBKIT_CONFIG")]
        config: PathBuf,
    },
    /// Send a single HTTP request and print the response
    Fetch {
        /// Absolute request URL
        url: String,

        /// HTTP method, case-insensitive
        #[arg(short = 'X', long, default_value = "get")]
        method: String,

        /// Request parameter as key=value; may be repeated
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        params: Vec<(String, String)>,

        /// Request timeout in seconds
        #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
        timeout: u64,
    },
}

/// Parse a `key=value` CLI argument.
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("Missing key in '{s}'")),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("Expected KEY=VALUE, got '{s}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fills_defaults() {
        let mut conf = DbConf::default();
        conf.normalize();
        assert_eq!(conf.host, DEFAULT_HOST);
        assert_eq!(conf.port, DEFAULT_PORT);
        assert_eq!(conf.charset, DEFAULT_CHARSET);
        assert_eq!(conf.collation, DEFAULT_COLLATION);
        assert_eq!(conf.loc, DEFAULT_LOC);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = DbConf {
            user: "root".to_string(),
            database: "app".to_string(),
            ..DbConf::default()
        }
        .normalized();
        let twice = once.normalized();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_keeps_explicit_values() {
        let conf = DbConf {
            host: "db.internal".to_string(),
            port: 3307,
            charset: "utf8".to_string(),
            collation: "utf8_general_ci".to_string(),
            loc: "PRC".to_string(),
            ..DbConf::default()
        }
        .normalized();
        assert_eq!(conf.host, "db.internal");
        assert_eq!(conf.port, 3307);
        assert_eq!(conf.charset, "utf8");
        assert_eq!(conf.collation, "utf8_general_ci");
        assert_eq!(conf.loc, "PRC");
    }

    #[test]
    fn test_normalize_leaves_pool_fields_alone() {
        let conf = DbConf::default().normalized();
        assert_eq!(conf.max_idle_conns, 0);
        assert_eq!(conf.max_open_conns, 0);
        assert!(!conf.use_pool);
    }

    #[test]
    fn test_debug_masks_password() {
        let conf = DbConf {
            password: "secret".to_string(),
            ..DbConf::default()
        };
        let debug = format!("{:?}", conf);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_db_conf_deserialize_partial() {
        let conf: DbConf =
            serde_json::from_str(r#"{"user": "root", "database": "app", "use_pool": true}"#)
                .unwrap();
        assert_eq!(conf.user, "root");
        assert!(conf.use_pool);
        assert!(conf.host.is_empty());
    }

    #[test]
    fn test_group_options_lifetime_in_seconds() {
        let opts: EngineGroupOptions =
            serde_json::from_str(r#"{"max_open_conns": 20, "max_lifetime_secs": 300}"#).unwrap();
        assert_eq!(opts.max_open_conns, 20);
        assert_eq!(opts.max_lifetime, Duration::from_secs(300));

        let opts: EngineGroupOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.max_lifetime, Duration::ZERO);
    }

    #[test]
    fn test_logger_config_defaults() {
        let config = LoggerConfig::default();
        assert_eq!(config.file_path(), PathBuf::from("./logs").join("app.log"));
        assert_eq!(config.max_size_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_engines_file_from_json() {
        let file = EnginesFile::from_json(
            r#"{
                "engines": {
                    "default": { "user": "root", "database": "app" },
                    "stats": { "host": "10.0.0.5", "database": "stats" }
                },
                "groups": {
                    "orders": {
                        "primary": { "database": "orders" },
                        "replicas": [ { "host": "10.0.0.6", "database": "orders" } ],
                        "options": { "max_open_conns": 50 }
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(file.engines.len(), 2);
        assert_eq!(file.engines["stats"].host, "10.0.0.5");
        assert_eq!(file.groups["orders"].replicas.len(), 1);
        assert_eq!(file.groups["orders"].options.max_open_conns, 50);
        assert!(file.logger.is_none());
    }

    #[test]
    fn test_engines_file_invalid_json() {
        let result = EnginesFile::from_json("{ engines: ");
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[test]
    fn test_engines_file_missing_path() {
        let result = EnginesFile::load(Path::new("/nonexistent/dbkit/engines.json"));
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("objtype=1").unwrap(),
            ("objtype".to_string(), "1".to_string())
        );
        assert_eq!(
            parse_key_value("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=1").is_err());
    }

    #[test]
    fn test_cli_parses_fetch() {
        let config = Config::parse_from([
            "dbkit", "fetch", "https://example.com/api", "-X", "post", "-p", "a=1", "-p", "b=2",
        ]);
        match config.command {
            Command::Fetch {
                url,
                method,
                params,
                timeout,
            } => {
                assert_eq!(url, "https://example.com/api");
                assert_eq!(method, "post");
                assert_eq!(params.len(), 2);
                assert_eq!(timeout, DEFAULT_HTTP_TIMEOUT_SECS);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
