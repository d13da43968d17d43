//! cfgtxnd entry point.
//!
//! Starts the agent selected by `[agent] backend`. A switch agent
//! reconciles the dataplane with the running configuration, then runs the
//! deferred task queue and the APPL_DB link-state watcher. A hardware
//! agent reconciles the hardware objects and monitors their alarms. Both
//! run until SIGINT or SIGTERM. With `--batches-from-stdin`, change
//! batches are read as JSON lines and one JSON result line is written per
//! batch.

use anyhow::{anyhow, Context};
use cfgtxn_agent::tables::APP_PORT_TABLE_NAME;
use cfgtxn_agent::{
    spawn_bridge, Agent, AgentConfig, BackendKind, Platform, SwitchBackends, DEFAULT_CONFIG_PATH,
};
use cfgtxn_backend::{
    DbId, HardwareApi, KubectlCluster, MemoryDatastore, MemoryHardware, RedisKeyspaceSource,
    RedisStore,
};
use cfgtxn_core::{Batch, BatchPhase};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Configuration transaction daemon
#[derive(Parser, Debug)]
#[command(name = "cfgtxnd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Read change batches from stdin, one JSON object per line
    #[arg(long)]
    batches_from_stdin: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose) {
        eprintln!("cfgtxnd: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!(config = %args.config.display(), "cfgtxnd: Starting");
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("cfgtxnd: Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logger")?;
    Ok(())
}

async fn switch_agent(
    config: &AgentConfig,
    datastore: Arc<MemoryDatastore>,
) -> anyhow::Result<Agent> {
    let store = Arc::new(RedisStore::connect(&config.store.host, config.store.port).await?);
    let cluster = Arc::new(KubectlCluster::new(config.kubectl_settings()));
    let platform_file = config
        .platform
        .interfaces_file
        .as_ref()
        .ok_or_else(|| anyhow!("platform.interfaces_file is not set"))?;
    let platform = Arc::new(Platform::load(platform_file)?);
    info!(ports = platform.len(), "Platform loaded");

    Ok(Agent::switch(
        SwitchBackends {
            store,
            cluster,
            datastore,
            platform,
        },
        config,
    ))
}

fn hardware_agent(
    config: &AgentConfig,
    datastore: Arc<MemoryDatastore>,
) -> anyhow::Result<(Agent, Arc<MemoryHardware>)> {
    let objects_file = config
        .hardware
        .objects_file
        .as_ref()
        .ok_or_else(|| anyhow!("hardware.objects_file is not set"))?;
    let hw = Arc::new(MemoryHardware::load(objects_file)?);
    info!(objects_file = %objects_file.display(), "Hardware objects loaded");
    Ok((Agent::hardware(hw.clone(), datastore, config), hw))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("cfgtxnd: Received SIGINT"),
        _ = sigterm.recv() => info!("cfgtxnd: Received SIGTERM"),
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = AgentConfig::load_or_default(&args.config)?;

    let datastore = Arc::new(match &config.datastore.startup_config {
        Some(path) => MemoryDatastore::load(path)?,
        None => MemoryDatastore::new(),
    });
    info!(backend = ?config.agent.backend, "cfgtxnd: Building agent");
    let (agent, hardware) = match config.agent.backend {
        BackendKind::Switch => (switch_agent(&config, datastore.clone()).await?, None),
        BackendKind::Hardware => {
            let (agent, hw) = hardware_agent(&config, datastore.clone())?;
            (agent, Some(hw))
        }
    };
    let agent = Arc::new(agent);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => signal_token.cancel(),
            Err(e) => error!("cfgtxnd: {:#}", e),
        }
    });

    agent.start().await.context("startup reconciliation failed")?;

    let queue = agent.queue().clone();
    let queue_token = shutdown.clone();
    let queue_task = tokio::spawn(async move { queue.run(queue_token).await });

    if let Some(watcher) = agent.link_state_watcher() {
        let source = RedisKeyspaceSource {
            host: config.store.host.clone(),
            port: config.store.port,
            db: DbId::ApplDb,
            pattern: format!("{}:*", APP_PORT_TABLE_NAME),
        };
        let (events, _thread) = spawn_bridge(Box::new(source), config.events.queue_capacity)?;
        let token = shutdown.clone();
        tokio::spawn(async move { watcher.run(events, token).await });
    }

    let alarms = agent.spawn_alarm_monitors(&shutdown).await?;

    if args.batches_from_stdin {
        let agent = agent.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = process_batches(agent, datastore, token).await {
                warn!("cfgtxnd: Batch input stopped: {:#}", e);
            }
        });
    }

    let result = queue_task.await.context("task queue consumer panicked")?;
    shutdown.cancel();
    if let Some(alarms) = alarms {
        // Cancelled monitors end once their objects are gone.
        if let Some(hw) = &hardware {
            for object in hw.list_objects().await? {
                hw.remove_object(&object);
            }
        }
        let sent = alarms.join().await;
        info!(sent, "cfgtxnd: Alarm monitors drained");
    }
    match result {
        Ok(()) => {
            info!("cfgtxnd: Graceful shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "cfgtxnd: Orchestration failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn process_batches(
    agent: Arc<Agent>,
    datastore: Arc<MemoryDatastore>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("cfgtxnd: Batch input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Batch>(&line) {
            Err(e) => json!({ "ok": false, "error": format!("invalid batch: {}", e) }),
            Ok(batch) => match agent.handle_batch(&batch).await {
                Ok(report) => {
                    if batch.phase == BatchPhase::Commit {
                        write_back(&datastore, &batch)?;
                    }
                    json!({
                        "id": batch.id,
                        "phase": batch.phase,
                        "ok": true,
                        "handled": report.handled,
                        "applied": report.applied,
                    })
                }
                Err(e) => json!({
                    "id": batch.id,
                    "phase": batch.phase,
                    "ok": false,
                    "error": e.to_string(),
                }),
            },
        };
        stdout.write_all(format!("{}\n", reply).as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Records a committed edit in the running configuration.
fn write_back(datastore: &MemoryDatastore, batch: &Batch) -> anyhow::Result<()> {
    for change in &batch.changes {
        if change.is_delete() {
            datastore.delete_node(&change.path)?;
        } else {
            datastore.set_node(&change.path, change.new_value.as_deref())?;
        }
    }
    Ok(())
}
