//! dbkit Library
//!
//! This library wraps sqlx MySQL pools into named engines, a registry that
//! owns them, and read/write split engine groups. It also ships a small HTTP
//! request helper and a tracing-based logging facade.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod logger;

pub use config::{DbConf, EngineGroupOptions, LoggerConfig};
pub use db::{Engine, EngineGroup, EngineRegistry};
pub use error::{DbError, HttpError};
