//! VR Audio Router
//!
//! Keeps per-app audio routing and VoiceMeeter in sync with SteamVR sessions.

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vr_audio_router::api::{self, ApiState};
use vr_audio_router::config::watcher::ConfigWatcher;
use vr_audio_router::engine::{instance, Engine, EngineDeps};
use vr_audio_router::mode::Selection;
use vr_audio_router::paths::AppPaths;
use vr_audio_router::presence::SysinfoProcessTable;
use vr_audio_router::sessions::{AudioSessions, SessionState, Svcl};
use vr_audio_router::store::Store;
use vr_audio_router::voicemeeter::{DllRemote, Layout, Lifecycle, SystemEngineProcess};

/// VR Audio Router - per-app routing and VoiceMeeter sync for VR sessions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding config.json and the other documents
    #[arg(long, env = "VR_AUDIO_ROUTER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Command API port (overrides config.json)
    #[arg(long)]
    api_port: Option<u16>,

    /// Do not start the command API
    #[arg(long)]
    no_api: bool,

    /// Print the current audio sessions and exit
    #[arg(long)]
    list_sessions: bool,

    /// Initial mode: auto, desktop, private or public
    #[arg(long, default_value = "auto")]
    mode: Selection,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect(args.data_dir.as_deref());
    paths.ensure_directories()?;
    let _log_guard = init_logging(&args.log_level, &paths.logs_dir)?;

    info!("Starting VR Audio Router v{}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Data directory: {}{}",
        paths.data_dir.display(),
        if paths.is_portable { " (portable)" } else { "" }
    );

    if let Some(other) = instance::running_instance(&paths.data_dir).await {
        bail!(
            "Another instance is already running (pid {}, started {})",
            other.pid,
            other.started_at
        );
    }

    let store = Store::open(&paths.data_dir).await?;
    let config = store.config().clone();

    let svcl = Svcl::new(config.svcl_path_in(&paths.data_dir));
    if args.list_sessions {
        return list_sessions(&svcl, &config.exclusions()).await;
    }
    svcl.probe().await.with_context(|| {
        format!(
            "Per-app routing tool is unusable ({}); cannot enumerate audio devices",
            svcl.path().display()
        )
    })?;
    info!("✅ Routing tool ready: {}", svcl.path().display());

    let voicemeeter_dir = config.voicemeeter_dir.as_deref();
    let lifecycle = Lifecycle::new(
        Box::new(DllRemote::new(voicemeeter_dir)),
        Box::new(SystemEngineProcess::new(
            voicemeeter_dir,
            Box::new(SysinfoProcessTable::new()),
        )),
        Layout::from_config(&config),
        config.readiness_timeout(),
    );

    let (mut engine, handle) = Engine::new(
        EngineDeps {
            store,
            lifecycle,
            sessions: Box::new(svcl),
            process_table: Box::new(SysinfoProcessTable::new()),
        },
        args.mode,
    );

    // Hot reload of config.json; the watcher guard must live as long as the engine
    let _watcher = match ConfigWatcher::new(paths.config_file()) {
        Ok(watcher) => {
            let (guard, rx) = watcher.into_parts();
            engine = engine.with_config_updates(rx);
            Some(guard)
        }
        Err(e) => {
            warn!("Config hot-reload disabled: {:#}", e);
            None
        }
    };

    let mut engine_task = engine.spawn();

    if !args.no_api {
        let port = args.api_port.unwrap_or(config.api_port);
        let state = Arc::new(ApiState {
            engine: handle.clone(),
        });
        tokio::spawn(async move {
            if let Err(e) = api::start_server(state, port).await {
                error!("Command API stopped: {:#}", e);
            }
        });
    }

    tokio::select! {
        _ = shutdown_signal() => {
            let _ = handle.shutdown();
            engine_task.await.context("Routing engine task failed")?;
        }
        result = &mut engine_task => {
            result.context("Routing engine task failed")?;
        }
    }

    info!("VR Audio Router shutdown complete");
    Ok(())
}

/// Log to stderr and to a daily rolling file in `logs_dir`
fn init_logging(level: &str, logs_dir: &Path) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(logs_dir, "router.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn list_sessions(svcl: &Svcl, excluded: &BTreeSet<String>) -> Result<()> {
    let snapshot = svcl
        .snapshot()
        .await
        .context("Failed to enumerate audio sessions")?;

    println!("\n{}", "=== Audio Sessions ===".bold().cyan());
    match &snapshot.default_render {
        Some(device) => println!("Default output: {}", device.green()),
        None => println!("Default output: {}", "unknown".yellow()),
    }

    if snapshot.sessions.is_empty() {
        println!("\n{}", "No render sessions".yellow());
        return Ok(());
    }

    println!();
    for session in &snapshot.sessions {
        let state = match session.state {
            SessionState::Active => "active".green(),
            SessionState::Inactive => "inactive".yellow(),
            SessionState::Expired => "expired".red(),
        };
        let excluded = if excluded.contains(&session.process) {
            " (excluded)".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "  {} [{}] → {}{}",
            session.process.bold(),
            state,
            if session.devices.is_empty() {
                "?".to_string()
            } else {
                session.devices.join(", ")
            },
            excluded
        );
    }
    Ok(())
}
