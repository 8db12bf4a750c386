//! Tests against a running MySQL server.
//!
//! Set TEST_MYSQL_DSN to run them, e.g.
//! TEST_MYSQL_DSN="root:root@tcp(127.0.0.1:3306)/test_db?charset=utf8mb4&parseTime=true&loc=Local"

use dbkit::config::{DbConf, EngineGroupOptions};
use dbkit::db::{Dsn, Engine, EngineGroup, EngineRegistry};
use sqlx::Row;
use std::time::Duration;

fn live_conf() -> Option<DbConf> {
    match std::env::var("TEST_MYSQL_DSN") {
        Ok(dsn) => Some(Dsn::parse(&dsn).unwrap().to_conf()),
        Err(_) => {
            eprintln!("Skipping test: TEST_MYSQL_DSN not set");
            None
        }
    }
}

#[tokio::test]
async fn test_registered_engine_queries_server() {
    let Some(conf) = live_conf() else {
        return;
    };

    let registry = EngineRegistry::new();
    registry
        .register(
            "live",
            &DbConf {
                use_pool: true,
                max_open_conns: 4,
                max_idle_conns: 1,
                show_sql: true,
                ..conf
            },
        )
        .await
        .unwrap();

    let engine = registry.lookup("live").await.unwrap();
    engine.ping().await.unwrap();

    let pool = engine.pool().unwrap();
    let row = sqlx::query("SELECT 1 + 1 AS two")
        .fetch_one(&pool)
        .await
        .unwrap();
    let two: i64 = row.try_get("two").unwrap();
    assert_eq!(two, 2);
    assert_eq!(pool.options().get_max_connections(), 4);

    let report = registry.close_all().await;
    assert!(report.is_complete());
    assert!(engine.is_closed());
}

#[tokio::test]
async fn test_utc_loc_sets_session_time_zone() {
    let Some(conf) = live_conf() else {
        return;
    };

    let engine = Engine::open_short_lived(&DbConf {
        loc: "UTC".to_string(),
        ..conf
    })
    .unwrap();

    let pool = engine.pool().unwrap();
    let row = sqlx::query("SELECT @@session.time_zone AS tz")
        .fetch_one(&pool)
        .await
        .unwrap();
    let tz: String = row.try_get("tz").unwrap();
    assert_eq!(tz, "+00:00");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_group_reads_and_writes() {
    let Some(conf) = live_conf() else {
        return;
    };

    let options = EngineGroupOptions {
        max_open_conns: 2,
        max_lifetime: Duration::from_secs(60),
        ..EngineGroupOptions::default()
    };
    let group = EngineGroup::with_options(
        Some(Engine::open(&conf).unwrap()),
        vec![Engine::open(&conf).unwrap()],
        &options,
    )
    .unwrap();

    group.ping().await.unwrap();

    let reader = group.reader().pool().unwrap();
    let row = sqlx::query("SELECT DATABASE() AS db")
        .fetch_one(&reader)
        .await
        .unwrap();
    let db: Option<String> = row.try_get("db").unwrap();
    assert_eq!(db.unwrap_or_default(), conf.database);

    group.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_ping_fails() {
    if live_conf().is_none() {
        return;
    }

    // Port 9 (discard) is not a MySQL server
    let engine = Engine::open(&DbConf {
        host: "127.0.0.1".to_string(),
        port: 9,
        user: "nobody".to_string(),
        ..DbConf::default()
    })
    .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), engine.ping()).await;
    assert!(!matches!(result, Ok(Ok(()))));
    engine.close().await.unwrap();
}
