//! ---
//! cvl_section: "07-daemon"
//! cvl_subsection: "binary"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Binary entrypoint for the caraveld daemon."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use caravel_agent::{AgentRuntime, InstanceResources};
use caravel_common::config::AppConfig;
use caravel_common::logging::init_tracing;
use caravel_dm::{DmRuntime, StatusMirror, TargetScheduler};
use caravel_model::{validate_application, Application};
use caravel_msg::{BusClient, InMemoryTransport, MessageBus, TargetState, DM_ENDPOINT};
use caravel_plugin::{PluginRegistry, ScriptedPlugin};

#[derive(Debug, Parser)]
#[command(author, version, about = "Caravel deployment daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the DM and agent in one process")]
    Run {
        #[arg(long, value_name = "FILE", help = "Application descriptor to load")]
        application: PathBuf,

        #[arg(long, help = "Request DEPLOYED_STARTED for every root instance on boot")]
        autostart: bool,
    },
    #[command(about = "Validate an application descriptor and exit")]
    Validate {
        #[arg(value_name = "FILE", help = "Application descriptor to check")]
        application: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/caravel.toml"));
    candidates.push(PathBuf::from("configs/caravel.example.toml"));

    let config = match AppConfig::load_with_source(&candidates) {
        Ok(loaded) => {
            let config = loaded.config;
            init_tracing("caraveld", &config.logging)?;
            info!(source = %loaded.source.display(), "configuration loaded");
            config
        }
        Err(err) => {
            let config = AppConfig::default();
            init_tracing("caraveld", &config.logging)?;
            warn!(error = %err, "no configuration file found, using defaults");
            config
        }
    };

    match cli.command.unwrap_or_else(|| Commands::Run {
        application: config.agent.application_directory.join("application.json"),
        autostart: false,
    }) {
        Commands::Run {
            application,
            autostart,
        } => run_daemon(config, &application, autostart).await,
        Commands::Validate { application } => validate_descriptor(&application),
    }
}

fn load_descriptor(path: &Path) -> Result<Application> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read application descriptor {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse application descriptor {}", path.display()))
}

fn validate_descriptor(path: &Path) -> Result<()> {
    let application = load_descriptor(path)?;
    let errors = validate_application(&application);
    if errors.is_empty() {
        info!(application = %application.name, "application descriptor is valid");
        println!("{}: valid", application.name);
        return Ok(());
    }
    for error in &errors {
        println!("{}", error);
    }
    bail!("{} validation error(s) in {}", errors.len(), path.display());
}

async fn run_daemon(config: AppConfig, descriptor: &Path, autostart: bool) -> Result<()> {
    let application = load_descriptor(descriptor)?;
    let errors = validate_application(&application);
    if !errors.is_empty() {
        for error in &errors {
            warn!(error = %error, "model defect");
        }
        bail!(
            "application {} has {} validation error(s)",
            application.name,
            errors.len()
        );
    }
    info!(
        application = %application.name,
        qualifier = %application.qualifier,
        instances = application.instances.len(),
        "application loaded"
    );

    // One shared in-process bus: the DM and the agent each own an inbox.
    let bus = Arc::new(MessageBus::new());
    let dm_inbox = Arc::new(InMemoryTransport::new());
    bus.register(DM_ENDPOINT, dm_inbox.clone());
    let agent_endpoint = config.agent.name.clone();
    let agent_inbox = Arc::new(InMemoryTransport::new());
    bus.register(agent_endpoint.clone(), agent_inbox.clone());

    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(ScriptedPlugin::new("script")));
    plugins.register(Arc::new(ScriptedPlugin::new("target")));
    let resources = InstanceResources::new(
        config.agent.application_directory.clone(),
        config.agent.work_directory.clone(),
    );
    let messaging = Arc::new(BusClient::new(bus.clone(), agent_endpoint.clone()));

    let mirror = Arc::new(StatusMirror::new());
    let dm = Arc::new(DmRuntime::new(mirror.clone(), bus.clone(), dm_inbox));
    let root_paths = application.instances.root_paths();
    for root in &root_paths {
        dm.register_agent(&application.name, root, &agent_endpoint);
    }
    let application_name = application.name.clone();

    let mut agent = AgentRuntime::new(
        application,
        Arc::new(plugins),
        messaging,
        resources,
        agent_inbox,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Mutex::new(TargetScheduler::new(mirror.clone())));
    let scheduler_task = tokio::spawn(TargetScheduler::run(
        scheduler.clone(),
        config.dm.target_poll_interval,
        shutdown_rx.clone(),
    ));

    if autostart {
        for root in &root_paths {
            dm.request_state(&application_name, root, TargetState::DeployedStarted)?;
        }
    }

    let pump_dm = dm.clone();
    let mut pump_shutdown = shutdown_rx;
    let pump_task = tokio::spawn(async move {
        loop {
            if *pump_shutdown.borrow() {
                break;
            }
            let worked = agent.pump() + pump_dm.pump();
            if worked == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    _ = pump_shutdown.changed() => {}
                }
            }
        }
    });

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    shutdown_tx.send(true).ok();
    pump_task.await?;
    scheduler_task.await?;

    for (path, status) in mirror.application_view(&application_name) {
        info!(instance = %path, status = %status, "final mirrored status");
    }
    Ok(())
}
