#![forbid(unsafe_code)]

//! `mvmz-bridge` — worker bridge binary.
//!
//! Bootstraps configuration, spawns the MVMZ crypter backend worker, and
//! bridges NDJSON between the host and the worker: commands read from this
//! process's stdin are forwarded to the worker, and every worker event
//! (`python-message` / `python-error`) plus each command resolution is
//! written as one JSON line on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mvmz_bridge::config::LaunchMode;
use mvmz_bridge::worker::{BridgeEvent, WorkerBridge};
use mvmz_bridge::{BridgeConfig, BridgeError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum ModeArg {
    Development,
    Packaged,
}

impl From<ModeArg> for LaunchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Development => Self::Development,
            ModeArg::Packaged => Self::Packaged,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mvmz-bridge", about = "MVMZ crypter worker bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the launch mode from the config file.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mvmz-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| BridgeError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = BridgeConfig::load_from_path(&args.config)?;
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    info!(mode = ?config.mode, "configuration loaded");

    // ── Spawn the worker ────────────────────────────────
    let bridge = Arc::new(WorkerBridge::from_config(&config));
    bridge.start().await?;

    // ── Relay worker events to stdout ───────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<BridgeEvent>(64);
    bridge.attach_observer(event_tx).await?;
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            emit(&event);
        }
    });

    info!("bridge ready");

    // ── Forward stdin commands until EOF or shutdown ────
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => handle_command(&bridge, &line).await,
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                    Err(err) => {
                        error!(%err, "failed to read stdin");
                        break;
                    }
                }
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    bridge.stop().await;
    event_task.abort();
    info!("mvmz-bridge shut down");

    Ok(())
}

/// Parse one stdin line as a JSON command, send it, and emit the result.
async fn handle_command(bridge: &WorkerBridge, line: &str) {
    let command: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "ignoring non-JSON command line");
            emit(&serde_json::json!({
                "event": "command-error",
                "detail": format!("invalid command: {err}"),
            }));
            return;
        }
    };

    match bridge.send(command).await {
        Ok(data) => emit(&serde_json::json!({
            "event": "command-result",
            "payload": data,
        })),
        Err(err) => {
            warn!(%err, "command failed");
            emit(&serde_json::json!({
                "event": "command-error",
                "detail": err.to_string(),
            }));
        }
    }
}

/// Write one value as an NDJSON line on stdout.
///
/// A write failure (the host closed our stdout) is logged, not fatal:
/// the worker keeps running and shutdown stays orderly.
fn emit<T: serde::Serialize>(value: &T) {
    use std::io::Write;

    let line = match serde_json::to_string(value) {
        Ok(line) => line,
        Err(err) => {
            error!(%err, "failed to serialise outbound event");
            return;
        }
    };
    if let Err(err) = writeln!(std::io::stdout(), "{line}") {
        error!(%err, "failed to write outbound event to stdout");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr; stdout is reserved for NDJSON event output.
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| BridgeError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| BridgeError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
