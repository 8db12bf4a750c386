//! Named engine registry.
//!
//! Maps logical engine names to live [`Engine`] handles. The registry is an
//! ordinary value owned by the application (clones share the same map); every
//! read and write goes through one `RwLock`, so concurrent registration,
//! lookup and teardown are safe.

use crate::config::DbConf;
use crate::db::engine::Engine;
use crate::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// What `register` does when the name is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Replace the entry; the displaced engine is returned, not closed.
    #[default]
    Overwrite,
    /// Fail with [`DbError::AlreadyExists`].
    Reject,
    /// Close the displaced engine, then replace it.
    CloseThenReplace,
}

/// Per-entry outcome of [`EngineRegistry::close_all`].
#[derive(Debug, Default)]
pub struct CloseReport {
    /// Names that were closed and removed.
    pub closed: Vec<String>,
    /// Names whose close failed; these stay registered.
    pub failed: Vec<(String, DbError)>,
}

impl CloseReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: Arc<RwLock<HashMap<String, Engine>>>,
    policy: ConflictPolicy,
}

impl EngineRegistry {
    /// Create an empty registry that overwrites on name conflicts.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conflict_policy(policy: ConflictPolicy) -> Self {
        Self {
            engines: Arc::default(),
            policy,
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Open a configured engine for `conf` and store it under `name`.
    ///
    /// Returns the engine previously stored under `name`, if any. Under
    /// [`ConflictPolicy::Overwrite`] that engine is still open and now owned
    /// by the caller.
    pub async fn register(&self, name: &str, conf: &DbConf) -> DbResult<Option<Engine>> {
        if name.is_empty() {
            return Err(DbError::invalid_name("engine name cannot be empty"));
        }

        let engine =
            Engine::open_configured(conf).map_err(|e| DbError::registration(name, e))?;
        self.insert(name, engine).await
    }

    /// Store an already opened engine under `name`, following the conflict
    /// policy.
    ///
    /// Under [`ConflictPolicy::CloseThenReplace`] the previous engine is closed
    /// without holding the lock. If that close fails the previous entry is kept
    /// and a [`DbError::Registration`] is returned.
    pub async fn insert(&self, name: &str, engine: Engine) -> DbResult<Option<Engine>> {
        if name.is_empty() {
            return Err(DbError::invalid_name("engine name cannot be empty"));
        }

        let previous = {
            let engines = self.engines.read().await;
            engines.get(name).cloned()
        };

        if let Some(existing) = previous {
            match self.policy {
                ConflictPolicy::Overwrite => warn!(
                    engine = %name,
                    "Replacing registered engine, previous engine left open"
                ),
                ConflictPolicy::Reject => return Err(DbError::already_exists(name)),
                ConflictPolicy::CloseThenReplace => {
                    existing
                        .close()
                        .await
                        .map_err(|e| DbError::registration(name, e))?;
                    info!(engine = %name, "Closed previous engine before replacing it");
                }
            }
        }

        let mut engines = self.engines.write().await;
        // The name may have been taken while the lock was released
        if self.policy == ConflictPolicy::Reject && engines.contains_key(name) {
            return Err(DbError::already_exists(name));
        }
        info!(engine = %name, dsn = %engine.dsn().masked(), "Engine registered");
        Ok(engines.insert(name.to_string(), engine))
    }

    /// Get the engine registered under `name`.
    pub async fn lookup(&self, name: &str) -> DbResult<Engine> {
        let engines = self.engines.read().await;
        engines
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::not_found(name))
    }

    /// Close the engine registered under `name` and remove it.
    ///
    /// The lock is not held while the pool drains, so lookups keep working
    /// during a slow close. If closing fails the error is returned and the
    /// entry stays registered.
    pub async fn close_by_name(&self, name: &str) -> DbResult<()> {
        let engine = self.lookup(name).await?;

        if let Err(e) = engine.close().await {
            warn!(engine = %name, error = %e, "Failed to close engine");
            return Err(e);
        }

        self.remove_if_same(name, &engine).await;
        Ok(())
    }

    /// Attempt to close every registered engine.
    ///
    /// Closed engines are removed; engines whose close fails are logged,
    /// reported and left registered. Like [`EngineRegistry::close_by_name`]
    /// the pools drain outside the lock.
    pub async fn close_all(&self) -> CloseReport {
        let snapshot: Vec<(String, Engine)> = {
            let engines = self.engines.read().await;
            engines
                .iter()
                .map(|(name, engine)| (name.clone(), engine.clone()))
                .collect()
        };

        let mut report = CloseReport::default();
        for (name, engine) in &snapshot {
            match engine.close().await {
                Ok(()) => report.closed.push(name.clone()),
                Err(e) => {
                    warn!(engine = %name, error = %e, "Failed to close engine");
                    report.failed.push((name.clone(), e));
                }
            }
        }

        {
            let mut engines = self.engines.write().await;
            for (name, engine) in &snapshot {
                let closed = report.closed.contains(name);
                // An entry replaced while closing keeps its new engine
                if closed && engines.get(name).is_some_and(|e| e.ptr_eq(engine)) {
                    engines.remove(name);
                }
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failed.len(),
            "Closed registered engines"
        );
        report
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let engines = self.engines.read().await;
        let mut names: Vec<String> = engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn contains(&self, name: &str) -> bool {
        let engines = self.engines.read().await;
        engines.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        let engines = self.engines.read().await;
        engines.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove `name` unless it was re-registered with another engine meanwhile.
    async fn remove_if_same(&self, name: &str, engine: &Engine) {
        let mut engines = self.engines.write().await;
        if engines.get(name).is_some_and(|current| current.ptr_eq(engine)) {
            engines.remove(name);
        }
    }
}
