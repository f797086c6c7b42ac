use anyhow::Result;
use batch_analytics::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

enum Mode {
    Run,
    Once,
    Backfill {
        job: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

fn parse_mode(args: &[String]) -> Result<Mode> {
    match args.first().map(String::as_str) {
        None | Some("run") => Ok(Mode::Run),
        Some("once") => Ok(Mode::Once),
        Some("backfill") => {
            let [_, job, from, to] = args else {
                anyhow::bail!("usage: batch-analytics backfill <job> <from-rfc3339> <to-rfc3339>");
            };
            Ok(Mode::Backfill {
                job: job.clone(),
                from: DateTime::parse_from_rfc3339(from)?.with_timezone(&Utc),
                to: DateTime::parse_from_rfc3339(to)?.with_timezone(&Utc),
            })
        }
        Some(other) => anyhow::bail!("unknown mode {:?} (expected run, once or backfill)", other),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = config::AppConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(app_config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_mode(&args)?;

    let warehouse = Arc::new(
        warehouse::Warehouse::connect(
            &app_config.database.connection_url(),
            app_config.database.max_connections,
        )
        .await?,
    );
    warehouse.init().await?;

    let engine = Arc::new(engine::Engine::new(
        warehouse.clone(),
        app_config.engine_config()?,
    ));

    match mode {
        Mode::Once => {
            let summary = engine.run_one_tick(Utc::now()).await?;
            tracing::info!(
                due = summary.due,
                succeeded = summary.succeeded,
                failed = summary.failed,
                rejected = summary.rejected,
                "single pass complete"
            );
            return Ok(());
        }
        Mode::Backfill { job, from, to } => {
            let report = backfill::run_backfill(&engine, &job, from, to).await?;
            tracing::info!(
                windows = report.windows,
                results = report.results_written,
                "backfill finished"
            );
            return Ok(());
        }
        Mode::Run => {}
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let scheduler_handle = engine::spawn(engine.clone(), shutdown_rx);

    if app_config.server.enabled {
        let app = routes::app(engine.board(), app_config.clone());
        let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Listening on http://{}", addr);

        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = shutdown_signal() => {
                tracing::info!("Received shutdown signal");
            }
        }
    } else {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal");
    }

    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;
    Ok(())
}
