//! dbkit - Main entry point.
//!
//! `dbkit check` registers every engine of an engines file, pings it and
//! tears everything down again; `dbkit fetch` sends one HTTP request.

use clap::Parser;
use dbkit::config::{Command, Config, EnginesFile};
use dbkit::db::{EngineGroup, EngineRegistry};
use dbkit::http::ApiRequest;
use dbkit::logger;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging to stderr.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[derive(Debug, Serialize)]
struct CheckEntry {
    name: String,
    kind: &'static str,
    /// Masked descriptor of the engine (or the group primary)
    dsn: Option<String>,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    checked_at: chrono::DateTime<chrono::Utc>,
    entries: Vec<CheckEntry>,
}

impl CheckReport {
    fn failures(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.ok).count()
    }
}

async fn run_check(file: &EnginesFile) -> CheckReport {
    let registry = EngineRegistry::new();
    let mut entries = Vec::new();

    for (name, conf) in &file.engines {
        if let Err(e) = registry.register(name, conf).await {
            error!(engine = %name, error = %e, "Failed to register engine");
            entries.push(CheckEntry {
                name: name.clone(),
                kind: "engine",
                dsn: None,
                ok: false,
                error: Some(e.to_string()),
            });
        }
    }

    let names = registry.names().await;
    let pings = join_all(names.iter().map(|name| {
        let registry = registry.clone();
        async move {
            let engine = registry.lookup(name).await?;
            let result = engine.ping().await;
            Ok::<_, dbkit::DbError>((engine.dsn().masked(), result))
        }
    }))
    .await;

    for (name, outcome) in names.into_iter().zip(pings) {
        let entry = match outcome {
            Ok((dsn, Ok(()))) => CheckEntry {
                name,
                kind: "engine",
                dsn: Some(dsn),
                ok: true,
                error: None,
            },
            Ok((dsn, Err(e))) => CheckEntry {
                name,
                kind: "engine",
                dsn: Some(dsn),
                ok: false,
                error: Some(e.to_string()),
            },
            Err(e) => CheckEntry {
                name,
                kind: "engine",
                dsn: None,
                ok: false,
                error: Some(e.to_string()),
            },
        };
        entries.push(entry);
    }

    for (name, group_conf) in &file.groups {
        let group = group_conf
            .replicas
            .iter()
            .map(dbkit::Engine::open_configured)
            .collect::<Result<Vec<_>, _>>()
            .and_then(|replicas| {
                let primary = dbkit::Engine::open_configured(&group_conf.primary)?;
                EngineGroup::with_options(Some(primary), replicas, &group_conf.options)
            });

        let entry = match group {
            Ok(group) => {
                let dsn = Some(group.primary().dsn().masked());
                let result = group.ping().await;
                if let Err(e) = group.close().await {
                    warn!(group = %name, error = %e, "Failed to close engine group");
                }
                CheckEntry {
                    name: name.clone(),
                    kind: "group",
                    dsn,
                    ok: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            }
            Err(e) => CheckEntry {
                name: name.clone(),
                kind: "group",
                dsn: None,
                ok: false,
                error: Some(e.to_string()),
            },
        };
        entries.push(entry);
    }

    let closed = registry.close_all().await;
    for (name, e) in &closed.failed {
        warn!(engine = %name, error = %e, "Engine left registered after close failure");
    }

    CheckReport {
        checked_at: chrono::Utc::now(),
        entries,
    }
}

async fn run_fetch(
    url: String,
    method: String,
    params: Vec<(String, String)>,
    timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = ApiRequest::new(method, url);
    request.timeout = Duration::from_secs(timeout);
    for (key, value) in params {
        request = request.param(key, Value::String(value));
    }

    let response = request.send().await?;
    info!(status = response.status, bytes = response.body.len(), "Request finished");
    eprintln!("HTTP {}", response.status);
    println!("{}", response.text());

    if !response.is_success() {
        return Err(format!("request failed with status {}", response.status).into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    match config.command.clone() {
        Command::Check { config: path } => {
            let file = EnginesFile::load(&path)?;

            // The engines file may carry its own logger section
            match &file.logger {
                Some(logger_config) => logger::init(logger_config)?,
                None => init_tracing(&config),
            }

            info!(
                config = %path.display(),
                "Starting dbkit check v{}",
                env!("CARGO_PKG_VERSION")
            );

            let report = run_check(&file).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            let failures = report.failures();
            if failures > 0 {
                error!(failures, "Engine check failed");
                return Err(format!("{failures} engine check(s) failed").into());
            }
            info!("All engines reachable");
        }
        Command::Fetch {
            url,
            method,
            params,
            timeout,
        } => {
            init_tracing(&config);
            run_fetch(url, method, params, timeout).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_check_uses_parsed_file() {
        let file = EnginesFile::from_json(
            r#"{
                "engines": { "broken": { "host": "bad/host", "user": "root" } },
                "groups": { "orders": { "primary": { "host": "db(1)" } } }
            }"#,
        )
        .unwrap();

        let report = run_check(&file).await;

        assert_eq!(report.failures(), 2);
        let kinds: Vec<&str> = report.entries.iter().map(|entry| entry.kind).collect();
        assert_eq!(kinds, vec!["engine", "group"]);
        assert!(report.entries.iter().all(|entry| entry.dsn.is_none()));
    }
}
