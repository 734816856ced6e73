// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Changer task: owns the robot driver and serializes operator commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use changer_backend::{DriverSettings, RegistrationContext};
use changer_core::changer::controller::{
    AdaptivePolling, PollingPolicy, Transition, TransitionListener,
};
use changer_core::changer::program::RobotProgram;
use changer_core::driver::{ChangerDriver, DriverAccess, DriverStatus};
use changer_core::{
    ChangerCommand, ChangerError, ChangerRequest, ChangerResult, ChangerSnapshot, ChangerStatus,
    DynResult, SampleChanger,
};

/// Configuration for the changer task.
pub struct ChangerTaskConfig {
    pub registry: Arc<RegistrationContext>,
    pub backend: String,
    pub settings: DriverSettings,
    pub polling: AdaptivePolling,
    /// Driver to use instead of building `backend` from the registry.
    pub prebuilt_driver: Option<Box<dyn ChangerDriver>>,
}

/// Wakes the task after every transition so the snapshot is republished.
struct ChangeNotifier {
    tx: mpsc::UnboundedSender<()>,
}

impl TransitionListener for ChangeNotifier {
    fn on_transition(&self, _transition: &Transition) {
        let _ = self.tx.send(());
    }
}

/// Run the changer task until the request channel closes or shutdown.
pub async fn run_changer_task(
    config: ChangerTaskConfig,
    changer: SampleChanger,
    mut rx: mpsc::Receiver<ChangerRequest>,
    snapshot_tx: watch::Sender<ChangerSnapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let mut driver = match config.prebuilt_driver {
        Some(driver) => driver,
        None => {
            match &config.settings.access {
                DriverAccess::Tcp { addr } => {
                    info!("Opening robot backend {} at {}", config.backend, addr)
                }
                DriverAccess::None => info!("Opening robot backend {}", config.backend),
            }
            config
                .registry
                .build_driver(&config.backend, config.settings)?
        }
    };
    let info = driver.info().clone();
    info!("Robot backend ready: {} {}", info.manufacturer, info.model);

    let mut chained = changer.chained_mounts();
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
    changer.add_transition_listener(Arc::new(ChangeNotifier { tx: changed_tx }));

    let mut driver_status: Option<DriverStatus> = None;
    let _ = snapshot_tx.send(changer.snapshot(None));

    let polling = &config.polling;
    let mut poll_sleep = Box::pin(tokio::time::sleep(Duration::ZERO));

    loop {
        tokio::select! {
            _ = &mut poll_sleep => {
                let busy = ChangerStatus::of(changer.state()).is_busy();
                poll_sleep = Box::pin(tokio::time::sleep(polling.interval(busy)));
                driver_status = match driver.status().await {
                    Ok(status) => {
                        if let Some(reason) = status.blocker() {
                            debug!("Robot not ready: {}", reason);
                        }
                        Some(status)
                    }
                    Err(e) => {
                        if driver_status.is_some() {
                            warn!("Robot status unavailable: {}", e);
                        }
                        None
                    }
                };
                let _ = snapshot_tx.send(changer.snapshot(driver_status.clone()));
            },

            Some(()) = changed_rx.recv() => {
                while changed_rx.try_recv().is_ok() {}
                let _ = snapshot_tx.send(changer.snapshot(driver_status.clone()));
            },

            Some(sample) = chained.recv() => {
                if let Err(e) = changer.resume_chained_mount(&sample, driver.as_mut()).await {
                    error!("Chained mount of {} failed: {}", sample, e);
                }
                let _ = snapshot_tx.send(changer.snapshot(driver_status.clone()));
            },

            maybe_req = rx.recv() => {
                let Some(ChangerRequest { cmd, respond_to }) = maybe_req else { break; };
                let cmd_label = format!("{:?}", cmd);
                let started = Instant::now();

                let result =
                    process_command(cmd, &changer, driver.as_mut(), driver_status.clone()).await;
                if let Err(e) = &result {
                    warn!("Command {} rejected: {}", cmd_label, e);
                }
                let _ = snapshot_tx.send(changer.snapshot(driver_status.clone()));
                let _ = respond_to.send(result);

                let elapsed = started.elapsed();
                if elapsed > Duration::from_millis(500) {
                    warn!("Changer command {} took {:?}", cmd_label, elapsed);
                } else {
                    debug!("Changer command {} completed in {:?}", cmd_label, elapsed);
                }
            },

            _ = shutdown_rx.changed() => break,
        }
    }

    info!("changer_task shutting down");
    Ok(())
}

async fn process_command(
    cmd: ChangerCommand,
    changer: &SampleChanger,
    driver: &mut dyn ChangerDriver,
    driver_status: Option<DriverStatus>,
) -> ChangerResult<ChangerSnapshot> {
    match cmd {
        ChangerCommand::Stop => {
            driver.stop().await.map_err(ChangerError::driver)?;
            let state = changer.reset();
            info!("Robot stopped, changer at {}", state);
        }
        ChangerCommand::Reset => {
            let state = changer.reset();
            let program = RobotProgram::Reset.file_name();
            driver
                .run_program(&program, "reset")
                .await
                .map_err(ChangerError::driver)?;
            info!("Started {} [reset], changer at {}", program, state);
        }
        ChangerCommand::Pause => driver.pause().await.map_err(ChangerError::driver)?,
        ChangerCommand::Play => driver.play().await.map_err(ChangerError::driver)?,
        other => {
            if let Some(plan) = changer.plan(&other)? {
                changer.execute(plan, driver).await?;
            }
        }
    }
    Ok(changer.snapshot(driver_status))
}
