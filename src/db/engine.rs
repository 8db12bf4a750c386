//! Engine handles.
//!
//! An [`Engine`] is a lazily connecting MySQL resource: it owns a validated
//! [`Dsn`], the runtime [`EngineSettings`] and, once first used, a sqlx
//! `MySqlPool` built with `connect_lazy_with`. No connection is opened until a
//! query (or [`Engine::ping`]) needs one.
//!
//! Settings may be changed freely until the pool is materialized by the first
//! call to [`Engine::pool`]. From then on they are frozen; later setter calls
//! are logged and ignored.

use crate::config::DbConf;
use crate::db::dsn::Dsn;
use crate::error::{DbError, DbResult};
use log::LevelFilter;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{ConnectOptions, Connection, MySqlPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime settings applied to the pool when it is materialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Log every statement at INFO
    pub show_sql: bool,
    /// Log the elapsed time of every statement at INFO
    pub show_exec_time: bool,
    /// Recorded only; the pool reaps idle connections by timeout
    pub max_idle_conns: Option<u32>,
    /// None (or zero) leaves the driver default
    pub max_open_conns: Option<u32>,
    pub max_lifetime: Option<Duration>,
}

struct EngineInner {
    dsn: Dsn,
    /// Uses std::sync::RwLock (not tokio) since it is never held across await points.
    settings: RwLock<EngineSettings>,
    pool: OnceLock<MySqlPool>,
    closed: AtomicBool,
}

/// Shared handle to one MySQL pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Normalize `conf`, build its descriptor and return an unconfigured,
    /// not-yet-connected engine.
    pub fn open(conf: &DbConf) -> DbResult<Self> {
        let dsn = Dsn::from_conf(conf)?;
        debug!(dsn = %dsn.masked(), "Opening engine");

        Ok(Self {
            inner: Arc::new(EngineInner {
                dsn,
                settings: RwLock::new(EngineSettings::default()),
                pool: OnceLock::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open an engine and apply the logging and pool settings of `conf`.
    ///
    /// Pool limits are only applied when `conf.use_pool` is set.
    pub fn open_configured(conf: &DbConf) -> DbResult<Self> {
        let engine = Self::open(conf)?;

        if conf.show_sql {
            engine.show_sql(true);
        }
        if conf.show_exec_time {
            engine.show_exec_time(true);
        }
        if conf.use_pool {
            engine.set_max_idle_conns(conf.max_idle_conns);
            engine.set_max_open_conns(conf.max_open_conns);
        }

        Ok(engine)
    }

    /// Open an engine for a one-off caller: like [`Engine::open_configured`]
    /// with `use_pool` forced off.
    pub fn open_short_lived(conf: &DbConf) -> DbResult<Self> {
        let conf = DbConf {
            use_pool: false,
            ..conf.clone()
        };
        Self::open_configured(&conf)
    }

    pub fn dsn(&self) -> &Dsn {
        &self.inner.dsn
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> EngineSettings {
        *self
            .inner
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn show_sql(&self, enabled: bool) {
        self.update_settings("show_sql", |s| s.show_sql = enabled);
    }

    pub fn show_exec_time(&self, enabled: bool) {
        self.update_settings("show_exec_time", |s| s.show_exec_time = enabled);
    }

    pub fn set_max_idle_conns(&self, max: u32) {
        self.update_settings("max_idle_conns", |s| s.max_idle_conns = Some(max));
    }

    pub fn set_max_open_conns(&self, max: u32) {
        self.update_settings("max_open_conns", |s| s.max_open_conns = Some(max));
    }

    pub fn set_conn_max_lifetime(&self, lifetime: Duration) {
        self.update_settings("max_lifetime", |s| s.max_lifetime = Some(lifetime));
    }

    /// True once the pool has been built by [`Engine::pool`].
    pub fn is_materialized(&self) -> bool {
        self.inner.pool.get().is_some()
    }

    /// Connections currently checked out of the pool; zero before first use.
    pub fn active_connections(&self) -> u32 {
        self.inner
            .pool
            .get()
            .map(|pool| pool.size().saturating_sub(pool.num_idle() as u32))
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get the underlying pool, building it on first use.
    ///
    /// Must be called from within a Tokio runtime. Building the pool performs
    /// no network I/O.
    pub fn pool(&self) -> DbResult<MySqlPool> {
        // The read lock is held until the pool is stored so neither a setter
        // nor `close` can slip in between the closed check and the build.
        let settings = self
            .inner
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.is_closed() {
            return Err(DbError::closed(self.inner.dsn.masked()));
        }

        let pool = self.inner.pool.get_or_init(|| {
            debug!(dsn = %self.inner.dsn.masked(), settings = ?*settings, "Building pool");
            build_pool(&self.inner.dsn, &settings)
        });
        Ok(pool.clone())
    }

    /// Acquire a connection and ping the server.
    pub async fn ping(&self) -> DbResult<()> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    /// Close the pool and mark the engine closed.
    ///
    /// Waits for checked-out connections to be returned. Closing twice fails
    /// with [`DbError::Closed`].
    pub async fn close(&self) -> DbResult<()> {
        let pool = {
            // Excludes a concurrent `pool` call from building after this point
            let _settings = self
                .inner
                .settings
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return Err(DbError::closed(self.inner.dsn.masked()));
            }
            self.inner.pool.get().cloned()
        };

        if let Some(pool) = pool {
            pool.close().await;
        }

        info!(dsn = %self.inner.dsn.masked(), "Engine closed");
        Ok(())
    }

    fn update_settings(&self, setting: &str, apply: impl FnOnce(&mut EngineSettings)) {
        let mut settings = self
            .inner
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.is_materialized() {
            warn!(
                dsn = %self.inner.dsn.masked(),
                setting,
                "Pool already in use, setting ignored"
            );
            return;
        }

        apply(&mut settings);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dsn", &self.inner.dsn)
            .field("settings", &self.settings())
            .field("materialized", &self.is_materialized())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Translate settings into sqlx options and create a lazy pool.
fn build_pool(dsn: &Dsn, settings: &EngineSettings) -> MySqlPool {
    let mut options = dsn.connect_options();
    options = if settings.show_sql {
        options.log_statements(LevelFilter::Info)
    } else {
        options.log_statements(LevelFilter::Off)
    };
    if settings.show_exec_time {
        options = options.log_slow_statements(LevelFilter::Info, Duration::ZERO);
    }

    let mut pool_options = MySqlPoolOptions::new();
    if let Some(max) = settings.max_open_conns.filter(|max| *max > 0) {
        pool_options = pool_options.max_connections(max);
    }
    // sqlx has no idle cap: idle connections are reaped by its idle timeout,
    // so `max_idle_conns` is kept in the settings only and never becomes a
    // floor of held-open connections.
    if let Some(lifetime) = settings.max_lifetime {
        pool_options = pool_options.max_lifetime(Some(lifetime));
    }

    pool_options.connect_lazy_with(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> DbConf {
        DbConf {
            user: "root".to_string(),
            password: "secret".to_string(),
            database: "app".to_string(),
            ..DbConf::default()
        }
    }

    #[test]
    fn test_open_is_unconfigured_and_lazy() {
        let engine = Engine::open(&conf()).unwrap();
        assert_eq!(engine.settings(), EngineSettings::default());
        assert!(!engine.is_materialized());
        assert!(!engine.is_closed());
        assert_eq!(engine.dsn().host, "127.0.0.1");
    }

    #[test]
    fn test_open_rejects_bad_configuration() {
        let result = Engine::open(&DbConf {
            host: "bad host".to_string(),
            ..conf()
        });
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[test]
    fn test_open_configured_applies_logging() {
        let engine = Engine::open_configured(&DbConf {
            show_sql: true,
            show_exec_time: true,
            ..conf()
        })
        .unwrap();
        let settings = engine.settings();
        assert!(settings.show_sql);
        assert!(settings.show_exec_time);
    }

    #[test]
    fn test_open_configured_pool_limits_only_with_use_pool() {
        let without = Engine::open_configured(&DbConf {
            max_idle_conns: 5,
            max_open_conns: 20,
            ..conf()
        })
        .unwrap();
        assert_eq!(without.settings().max_idle_conns, None);
        assert_eq!(without.settings().max_open_conns, None);

        let with = Engine::open_configured(&DbConf {
            max_idle_conns: 5,
            max_open_conns: 20,
            use_pool: true,
            ..conf()
        })
        .unwrap();
        assert_eq!(with.settings().max_idle_conns, Some(5));
        assert_eq!(with.settings().max_open_conns, Some(20));
    }

    #[test]
    fn test_open_short_lived_ignores_pool_limits() {
        let conf = DbConf {
            max_idle_conns: 5,
            max_open_conns: 20,
            use_pool: true,
            show_sql: true,
            ..conf()
        };
        let engine = Engine::open_short_lived(&conf).unwrap();
        assert_eq!(engine.settings().max_open_conns, None);
        assert!(engine.settings().show_sql);
        // The caller's configuration is not modified
        assert!(conf.use_pool);
    }

    #[test]
    fn test_clones_share_state() {
        let engine = Engine::open(&conf()).unwrap();
        let clone = engine.clone();
        clone.show_sql(true);
        assert!(engine.settings().show_sql);
        assert!(engine.ptr_eq(&clone));

        let other = Engine::open(&conf()).unwrap();
        assert!(!engine.ptr_eq(&other));
    }

    #[test]
    fn test_debug_masks_password() {
        let engine = Engine::open(&conf()).unwrap();
        assert!(!format!("{:?}", engine).contains("secret"));
    }

    #[tokio::test]
    async fn test_pool_applies_settings() {
        let engine = Engine::open(&conf()).unwrap();
        engine.set_max_open_conns(20);
        engine.set_max_idle_conns(10);
        engine.set_conn_max_lifetime(Duration::from_secs(300));

        let pool = engine.pool().unwrap();
        assert!(engine.is_materialized());
        assert_eq!(pool.options().get_max_connections(), 20);
        assert_eq!(engine.settings().max_idle_conns, Some(10));
        assert_eq!(
            pool.options().get_max_lifetime(),
            Some(Duration::from_secs(300))
        );

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_frozen_after_materialization() {
        let engine = Engine::open(&conf()).unwrap();
        engine.pool().unwrap();

        engine.show_sql(true);
        engine.set_max_open_conns(3);
        assert_eq!(engine.settings(), EngineSettings::default());

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_marks_closed_and_closes_pool() {
        let engine = Engine::open(&conf()).unwrap();
        let pool = engine.pool().unwrap();

        engine.close().await.unwrap();
        assert!(engine.is_closed());
        assert!(pool.is_closed());
        assert!(matches!(engine.pool(), Err(DbError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let engine = Engine::open(&conf()).unwrap();
        engine.close().await.unwrap();

        let result = engine.close().await;
        assert!(matches!(result, Err(DbError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_close_unmaterialized_engine() {
        let engine = Engine::open(&conf()).unwrap();
        engine.close().await.unwrap();
        assert!(engine.is_closed());
        assert!(!engine.is_materialized());
    }

    #[tokio::test]
    async fn test_idle_limit_does_not_hold_connections_open() {
        let engine = Engine::open(&conf()).unwrap();
        engine.set_max_open_conns(4);
        engine.set_max_idle_conns(3);

        let pool = engine.pool().unwrap();
        assert_eq!(pool.options().get_min_connections(), 0);

        engine.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pool_and_close_never_leak_a_pool() {
        for _ in 0..200 {
            let engine = Engine::open(&conf()).unwrap();

            let builder = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.pool().ok() })
            };
            let closer = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.close().await })
            };

            let built = builder.await.unwrap();
            closer.await.unwrap().unwrap();

            assert!(engine.is_closed());
            // Whichever side won, a pool that exists has been closed
            if let Some(pool) = engine.inner.pool.get() {
                assert!(pool.is_closed());
            }
            if let Some(pool) = built {
                assert!(pool.is_closed());
            }
        }
    }
}
