//! Read/write split engine groups.
//!
//! An [`EngineGroup`] pairs one primary engine with an ordered list of
//! replicas. Writes go to the primary; reads are spread over the replicas by a
//! [`GroupPolicy`] and fall back to the primary when there are none.

use crate::config::{DbConf, EngineGroupOptions};
use crate::db::engine::Engine;
use crate::error::{DbError, DbResult};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// How [`EngineGroup::reader`] picks a replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupPolicy {
    #[default]
    RoundRobin,
    Random,
    /// Replica with the fewest checked-out connections; ties go to the first.
    LeastConn,
}

#[derive(Debug)]
pub struct EngineGroup {
    primary: Engine,
    replicas: Vec<Engine>,
    policy: GroupPolicy,
    cursor: AtomicUsize,
}

impl EngineGroup {
    /// Compose a group from a primary and its replicas.
    ///
    /// Fails when the primary is missing, when any member is already closed,
    /// or when the same engine appears twice.
    pub fn new(primary: Option<Engine>, replicas: Vec<Engine>) -> DbResult<Self> {
        let primary = primary
            .ok_or_else(|| DbError::group_construction("a primary engine is required"))?;

        let members: Vec<&Engine> = std::iter::once(&primary).chain(&replicas).collect();
        for (i, engine) in members.iter().enumerate() {
            if engine.is_closed() {
                return Err(DbError::group_construction(format!(
                    "engine {} is closed",
                    engine.dsn().masked()
                )));
            }
            if members[..i].iter().any(|other| other.ptr_eq(engine)) {
                return Err(DbError::group_construction(format!(
                    "engine {} appears more than once",
                    engine.dsn().masked()
                )));
            }
        }

        info!(
            primary = %primary.dsn().masked(),
            replicas = replicas.len(),
            "Engine group created"
        );

        Ok(Self {
            primary,
            replicas,
            policy: GroupPolicy::default(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Compose a group and apply `options` to every member.
    ///
    /// The connection lifetime is only set when `options.max_lifetime` is
    /// positive.
    pub fn with_options(
        primary: Option<Engine>,
        replicas: Vec<Engine>,
        options: &EngineGroupOptions,
    ) -> DbResult<Self> {
        let group = Self::new(primary, replicas)?;

        group.show_sql(options.show_sql);
        group.show_exec_time(options.show_exec_time);
        group.set_max_idle_conns(options.max_idle_conns);
        group.set_max_open_conns(options.max_open_conns);
        if !options.max_lifetime.is_zero() {
            group.set_conn_max_lifetime(options.max_lifetime);
        }

        Ok(group)
    }

    /// Open configured engines for the primary and each replica, then compose them.
    pub fn from_confs(primary: &DbConf, replicas: &[DbConf]) -> DbResult<Self> {
        let primary = Engine::open_configured(primary)?;
        let replicas = replicas
            .iter()
            .map(Engine::open_configured)
            .collect::<DbResult<Vec<_>>>()?;
        Self::new(Some(primary), replicas)
    }

    pub fn with_policy(mut self, policy: GroupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    pub fn primary(&self) -> &Engine {
        &self.primary
    }

    pub fn replicas(&self) -> &[Engine] {
        &self.replicas
    }

    /// Engine for writes: always the primary.
    pub fn writer(&self) -> &Engine {
        &self.primary
    }

    /// Engine for reads, chosen among the replicas by the group policy.
    pub fn reader(&self) -> &Engine {
        if self.replicas.is_empty() {
            return &self.primary;
        }

        let index = match self.policy {
            GroupPolicy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.replicas.len()
            }
            GroupPolicy::Random => rand::thread_rng().gen_range(0..self.replicas.len()),
            GroupPolicy::LeastConn => self
                .replicas
                .iter()
                .enumerate()
                .min_by_key(|(_, engine)| engine.active_connections())
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        &self.replicas[index]
    }

    pub fn show_sql(&self, enabled: bool) {
        self.each(|engine| engine.show_sql(enabled));
    }

    pub fn show_exec_time(&self, enabled: bool) {
        self.each(|engine| engine.show_exec_time(enabled));
    }

    pub fn set_max_idle_conns(&self, max: u32) {
        self.each(|engine| engine.set_max_idle_conns(max));
    }

    pub fn set_max_open_conns(&self, max: u32) {
        self.each(|engine| engine.set_max_open_conns(max));
    }

    pub fn set_conn_max_lifetime(&self, lifetime: Duration) {
        self.each(|engine| engine.set_conn_max_lifetime(lifetime));
    }

    /// Ping every member, primary first. All members are attempted so one
    /// unreachable replica does not hide the others; the first failure is
    /// returned.
    pub async fn ping(&self) -> DbResult<()> {
        let mut first_error = None;
        for engine in std::iter::once(&self.primary).chain(&self.replicas) {
            if let Err(e) = engine.ping().await {
                warn!(dsn = %engine.dsn().masked(), error = %e, "Group member ping failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close every member. All members are attempted; the first failure is returned.
    pub async fn close(&self) -> DbResult<()> {
        let mut first_error = None;
        for engine in std::iter::once(&self.primary).chain(&self.replicas) {
            if let Err(e) = engine.close().await {
                warn!(dsn = %engine.dsn().masked(), error = %e, "Failed to close group member");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn each(&self, apply: impl Fn(&Engine)) {
        apply(&self.primary);
        self.replicas.iter().for_each(apply);
    }
}
