//! MySQL engine layer.
//!
//! This module provides:
//! - Connection descriptors built from `DbConf`
//! - Lazily connecting engine handles over sqlx pools
//! - A named engine registry with coordinated teardown
//! - Read/write split engine groups

pub mod dsn;
pub mod engine;
pub mod group;
pub mod registry;

pub use dsn::Dsn;
pub use engine::{Engine, EngineSettings};
pub use group::{EngineGroup, GroupPolicy};
pub use registry::{CloseReport, ConflictPolicy, EngineRegistry};
