// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod changer_task;
mod config;
mod control;
mod dispatch;
mod listener;
mod vision;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use changer_app::{init_logging, normalize_name, ConfigFile};
use changer_backend::{register_builtin_backends_on, DriverSettings, RegistrationContext};
use changer_core::changer::controller::{AdaptivePolling, ChangerEventBus, ExponentialBackoff};
use changer_core::driver::DriverAccess;
use changer_core::{ChangerRequest, DynResult, SampleChanger};
use changer_protocol::{NoAuthValidator, SimpleTokenValidator, TokenValidator};

use config::ServerConfig;
use dispatch::RobotDispatcher;
use vision::Vision;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - sample changer daemon");
const CHANGER_TASK_CHANNEL_BUFFER: usize = 32;
const RETRY_MAX_DELAY_SECS: u64 = 5;

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Robot backend to use (e.g. ur, dummy)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
    /// Robot dashboard address: <host>:<port>
    #[arg(value_name = "ROBOT_ADDR")]
    robot_addr: Option<String>,
    /// Number of magazine slots
    #[arg(short = 'n', long = "nsamples")]
    nsamples: Option<usize>,
    /// IP address for the robot event listener
    #[arg(short = 'l', long = "listen")]
    listen: Option<IpAddr>,
    /// Port for the robot event listener
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Port for the operator JSON listener
    #[arg(long = "control-port")]
    control_port: Option<u16>,
}

/// Resolved configuration after merging config file and CLI arguments.
struct ResolvedConfig {
    backend: String,
    settings: DriverSettings,
    nsamples: usize,
}

fn resolve_config(
    cli: &Cli,
    cfg: &ServerConfig,
    registry: &RegistrationContext,
) -> DynResult<ResolvedConfig> {
    let backend = normalize_name(cli.backend.as_deref().unwrap_or(&cfg.robot.backend));
    if !registry.is_backend_registered(&backend) {
        return Err(format!(
            "Unknown robot backend: {} (available: {})",
            backend,
            registry.registered_backends().join(", ")
        )
        .into());
    }

    let access = if backend == "dummy" {
        DriverAccess::None
    } else {
        let addr = cli.robot_addr.clone().unwrap_or_else(|| cfg.robot.addr());
        if !addr.contains(':') {
            return Err(format!("Robot address must be '<host>:<port>', got '{}'", addr).into());
        }
        DriverAccess::Tcp { addr }
    };

    let nsamples = cli.nsamples.unwrap_or(cfg.changer.nsamples);
    if nsamples == 0 {
        return Err("Magazine needs at least one slot".into());
    }

    let settings = DriverSettings {
        access,
        timeout: Duration::from_millis(cfg.robot.timeout_ms),
        retry: ExponentialBackoff::new(
            cfg.robot.max_retries.max(1),
            Duration::from_millis(cfg.robot.retry_base_delay_ms),
            Duration::from_secs(RETRY_MAX_DELAY_SECS),
        ),
    };

    Ok(ResolvedConfig {
        backend,
        settings,
        nsamples,
    })
}

fn build_validator(tokens: &[String]) -> Arc<dyn TokenValidator> {
    if tokens.is_empty() {
        Arc::new(NoAuthValidator)
    } else {
        Arc::new(SimpleTokenValidator::new(tokens.iter().cloned()))
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut registry = RegistrationContext::new();
    register_builtin_backends_on(&mut registry);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = ServerConfig::load(cli.config.as_deref())?;
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let resolved = resolve_config(&cli, &cfg, &registry)?;
    match &resolved.settings.access {
        DriverAccess::Tcp { addr } => info!(
            "Starting changer-server (backend: {}, robot: {}, {} slots)",
            resolved.backend, addr, resolved.nsamples
        ),
        DriverAccess::None => info!(
            "Starting changer-server (backend: {}, {} slots)",
            resolved.backend, resolved.nsamples
        ),
    }

    let changer = SampleChanger::new(resolved.nsamples);
    let mut bus = ChangerEventBus::new();
    changer.subscribe(&mut bus);
    let bus = Arc::new(bus);
    let vision = Arc::new(Vision::from_config(&cfg.vision));

    let (tx, rx) = mpsc::channel::<ChangerRequest>(CHANGER_TASK_CHANNEL_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(changer.snapshot(None));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();

    let task_config = changer_task::ChangerTaskConfig {
        registry: Arc::new(registry),
        backend: resolved.backend,
        settings: resolved.settings,
        polling: AdaptivePolling::from_idle(Duration::from_millis(cfg.robot.poll_interval_ms)),
        prebuilt_driver: None,
    };
    let task_changer = changer.clone();
    let task_shutdown_rx = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move {
        if let Err(e) = changer_task::run_changer_task(
            task_config,
            task_changer,
            rx,
            snapshot_tx,
            task_shutdown_rx,
        )
        .await
        {
            error!("Changer task error: {:?}", e);
        }
    }));

    if cfg.listen.enabled {
        let listen_ip = cli.listen.unwrap_or(cfg.listen.listen);
        let listen_port = cli.port.unwrap_or(cfg.listen.port);
        let listen_addr = SocketAddr::from((listen_ip, listen_port));
        let dispatcher = Arc::new(RobotDispatcher::new(changer.clone(), bus.clone(), vision));
        let listener_shutdown_rx = shutdown_rx.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) =
                listener::run_listener(listen_addr, dispatcher, listener_shutdown_rx).await
            {
                error!("Robot listener error: {:?}", e);
            }
        }));
    } else {
        warn!("Robot listener disabled; acknowledgements will not be received");
    }

    if cfg.control.enabled {
        let control_port = cli.control_port.unwrap_or(cfg.control.port);
        let control_addr = SocketAddr::from((cfg.control.listen, control_port));
        let validator = build_validator(&cfg.control.auth.tokens);
        let changer_tx = tx.clone();
        let control_snapshot_rx = snapshot_rx.clone();
        let control_shutdown_rx = shutdown_rx.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = control::run_control_listener(
                control_addr,
                changer_tx,
                validator,
                control_snapshot_rx,
                control_shutdown_rx,
            )
            .await
            {
                error!("Control listener error: {:?}", e);
            }
        }));
    }

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);
    drop(tx);
    tokio::time::sleep(Duration::from_millis(400)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RegistrationContext {
        let mut registry = RegistrationContext::new();
        register_builtin_backends_on(&mut registry);
        registry
    }

    #[test]
    fn test_resolve_defaults_to_dummy() {
        let cli = Cli::parse_from(["changer-server"]);
        let resolved = resolve_config(&cli, &ServerConfig::default(), &registry()).unwrap();
        assert_eq!(resolved.backend, "dummy");
        assert_eq!(resolved.settings.access, DriverAccess::None);
        assert_eq!(resolved.nsamples, 12);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from(["changer-server", "-b", "UR", "-n", "6", "10.0.0.9:29999"]);
        let resolved = resolve_config(&cli, &ServerConfig::default(), &registry()).unwrap();
        assert_eq!(resolved.backend, "ur");
        assert_eq!(
            resolved.settings.access,
            DriverAccess::Tcp {
                addr: "10.0.0.9:29999".to_string()
            }
        );
        assert_eq!(resolved.nsamples, 6);
    }

    #[test]
    fn test_resolve_rejections() {
        let cli = Cli::parse_from(["changer-server", "-b", "kuka"]);
        assert!(resolve_config(&cli, &ServerConfig::default(), &registry()).is_err());

        let cli = Cli::parse_from(["changer-server", "-b", "ur", "robot.local"]);
        assert!(resolve_config(&cli, &ServerConfig::default(), &registry()).is_err());

        let cli = Cli::parse_from(["changer-server", "-n", "0"]);
        assert!(resolve_config(&cli, &ServerConfig::default(), &registry()).is_err());
    }
}
