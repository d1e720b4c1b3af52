mod app;
mod cli;
mod config;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use rule_middleware::RuleMiddleware;

use crate::app::{AppState, COMPONENT};
use crate::cli::{Cli, Command};

/// How long the audit writer gets to drain after the server stops.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or_else(Command::serve_defaults) {
        Command::Check { packs } => check(&packs),
        Command::Serve {
            listen,
            log_level,
            rules,
        } => serve(&cli.config, listen, log_level, rules).await,
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(packs: &[PathBuf]) -> Result<()> {
    let mut failed = 0;

    for path in packs {
        match rule_engine::loader::load_rule_pack(path) {
            Ok(set) => {
                let mut per_category: BTreeMap<&str, usize> = BTreeMap::new();
                for rule in &set.rules {
                    *per_category.entry(rule.category.as_str()).or_default() += 1;
                }
                let summary = per_category
                    .iter()
                    .map(|(category, count)| format!("{category}={count}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("ok    {}: {} rule(s) [{summary}]", path.display(), set.rules.len());
            }
            Err(err) => {
                failed += 1;
                println!("error {}: {err:#}", path.display());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} rule pack(s) failed validation", packs.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn serve(
    config_path: &Path,
    listen: Option<String>,
    log_level: Option<String>,
    extra_packs: Vec<PathBuf>,
) -> Result<()> {
    // 1. Load config, then merge CLI overrides.
    let mut cfg = config::load(config_path)?;

    if let Some(listen) = listen {
        cfg.server.listen_addr = listen;
    }
    if let Some(level) = log_level {
        cfg.logging.level = level;
    }

    // 2. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!(
        config_file = %config_path.display(),
        listen = %cfg.server.listen_addr,
        engine = ?cfg.engine,
        "playnite-gate starting"
    );

    // 3. Start the audit trail.
    let (audit, audit_handle) = match &cfg.logging.audit_log_path {
        Some(path) => {
            let (sink, handle) = AuditSink::start(path)
                .await
                .context("failed to start audit logger")?;
            info!(path = %path.display(), "audit log enabled");
            (sink, Some(handle))
        }
        None => {
            info!("audit log disabled");
            (AuditSink::disabled(), None)
        }
    };

    audit.record(AuditEntry::new(
        AuditEventType::ServiceStarted,
        AuditSource::new(COMPONENT),
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config_file": config_path.display().to_string(),
        }),
    ));

    // 4. Build the engine and register rule packs.
    let engine = Arc::new(app::build_engine(&cfg, &extra_packs)?);

    info!(rules = engine.rule_count(), "rule engine ready");

    audit.record(AuditEntry::new(
        AuditEventType::RulesLoaded,
        AuditSource::new(COMPONENT),
        serde_json::json!({
            "rules": engine.rule_count(),
            "builtin": cfg.rule_packs.builtin,
            "files": cfg
                .rule_packs
                .files
                .iter()
                .chain(&extra_packs)
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
        }),
    ));

    // 5. Wire the middleware and the HTTP surface.
    let rules = RuleMiddleware::new(Arc::clone(&engine), cfg.middleware.clone())
        .context("invalid middleware configuration")?
        .with_audit(audit.clone());

    let state = AppState {
        engine: Arc::clone(&engine),
        rules: Arc::new(rules),
        audit: audit.clone(),
    };
    let router = app::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.listen_addr))?;

    info!(listen = %cfg.server.listen_addr, "HTTP gateway listening");

    // 6. Serve until ctrl-c or SIGTERM.
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 7. Log shutdown and let the audit writer drain.
    info!("playnite-gate shutting down");

    audit.record(AuditEntry::new(
        AuditEventType::ServiceStopped,
        AuditSource::new(COMPONENT),
        serde_json::json!({
            "result": format!("{served:?}"),
            "engine": engine.stats(),
            "audit_dropped": audit.dropped(),
        }),
    ));
    drop(audit);

    if let Some(handle) = audit_handle {
        if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("audit writer did not drain before the shutdown deadline");
        }
    }

    served.context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
        _ = terminate => info!("received SIGTERM"),
    }
}
