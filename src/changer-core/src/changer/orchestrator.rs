// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample changer orchestration.
//!
//! [`SampleChanger`] ties the state machine to the magazine. Operator
//! commands are validated into a [`ProgramPlan`], the matching event is
//! fired and the robot program is started. Robot acknowledgements reach the
//! completion handlers registered by [`SampleChanger::subscribe`], which keep
//! the magazine and the mounted position in sync.
//!
//! Lock order is machine, magazine, position. No lock is held across an
//! `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::changer::command::ChangerCommand;
use crate::changer::controller::{
    CallbackEntry, ChangerEvent, ChangerEventBus, ChangerStateMachine, FireArgs, Outcome,
    SlotListener, Transition, TransitionError, TransitionListener,
};
use crate::changer::program::RobotProgram;
use crate::changer::response::{ChangerError, ChangerResult};
use crate::changer::state::{ChangerSnapshot, ChangerState, ChangerStatus};
use crate::driver::{ChangerDriver, DriverStatus};
use crate::magazine::{placeholder_id, Magazine, MagazineError};
use crate::DynResult;

/// Tag of a mount that first has to return the mounted sample.
pub const SWITCH_TAG: &str = "switch";

/// Validated operator command: the program to run and the event announcing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPlan {
    pub program: RobotProgram,
    pub event: ChangerEvent,
    pub args: FireArgs,
}

impl ProgramPlan {
    fn new(program: RobotProgram, event: ChangerEvent, tag: &str) -> Self {
        Self {
            program,
            event,
            args: FireArgs::tagged(tag),
        }
    }

    fn with_sample(mut self, sample: &str) -> Self {
        self.args.sample = Some(sample.to_string());
        self
    }

    pub fn tag(&self) -> &str {
        self.args.tag.as_deref().unwrap_or_else(|| self.event.name())
    }
}

#[derive(Debug, Default)]
struct Position {
    /// Sample at the measurement position.
    mounted: Option<String>,
    /// Program started last and not yet acknowledged.
    pending: Option<RobotProgram>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle to the changer state. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SampleChanger {
    machine: Arc<Mutex<ChangerStateMachine>>,
    magazine: Arc<Mutex<Magazine>>,
    position: Arc<Mutex<Position>>,
}

impl SampleChanger {
    pub fn new(nsamples: usize) -> Self {
        Self {
            machine: Arc::new(Mutex::new(ChangerStateMachine::new())),
            magazine: Arc::new(Mutex::new(Magazine::new(nsamples))),
            position: Arc::new(Mutex::new(Position::default())),
        }
    }

    pub fn nsamples(&self) -> usize {
        lock(&self.magazine).len()
    }

    pub fn state(&self) -> ChangerState {
        lock(&self.machine).state()
    }

    pub fn tag(&self) -> Option<String> {
        lock(&self.machine).tag().map(str::to_string)
    }

    pub fn mounted_sample(&self) -> Option<String> {
        lock(&self.position).mounted.clone()
    }

    pub fn samples(&self) -> Vec<String> {
        lock(&self.magazine).samples().to_vec()
    }

    /// Fire an event on the shared machine.
    pub fn fire(&self, event: ChangerEvent, args: FireArgs) -> ChangerResult<ChangerState> {
        Ok(lock(&self.machine).fire(event, args)?)
    }

    pub fn add_transition_listener(&self, listener: Arc<dyn TransitionListener>) {
        lock(&self.machine).add_listener(listener);
    }

    pub fn snapshot(&self, driver: Option<DriverStatus>) -> ChangerSnapshot {
        let machine = lock(&self.machine);
        let magazine = lock(&self.magazine);
        let position = lock(&self.position);
        let state = machine.state();
        let status = ChangerStatus::of(state);

        ChangerSnapshot {
            state,
            label: state.label().to_string(),
            status,
            status_code: status.code(),
            tag: machine.tag().map(str::to_string),
            mounted_sample: position.mounted.clone(),
            samples: magazine.samples().to_vec(),
            transition_count: machine.transition_count(),
            driver,
        }
    }

    /// Validate `cmd` against the current state and magazine.
    ///
    /// Returns `Ok(None)` for commands that do not start a program.
    pub fn plan(&self, cmd: &ChangerCommand) -> ChangerResult<Option<ProgramPlan>> {
        let plan = match cmd {
            ChangerCommand::Load => self.plan_load()?,
            ChangerCommand::Unload { sample_id } => self.plan_unload(sample_id)?,
            ChangerCommand::Scan => self.plan_scan()?,
            ChangerCommand::Mount { sample_id } => self.plan_mount(sample_id)?,
            ChangerCommand::Unmount => self.plan_unmount()?,
            ChangerCommand::Next => self.plan_next()?,
            ChangerCommand::RunProgram { name } => self.plan_run(name)?,
            ChangerCommand::GetSnapshot
            | ChangerCommand::Stop
            | ChangerCommand::Pause
            | ChangerCommand::Play
            | ChangerCommand::Reset => return Ok(None),
        };
        Ok(Some(plan))
    }

    fn require_at_rest(&self) -> ChangerResult<ChangerState> {
        let state = self.state();
        if state.is_at_rest() {
            Ok(state)
        } else {
            Err(ChangerError::NotAtHome(state))
        }
    }

    fn plan_load(&self) -> ChangerResult<ProgramPlan> {
        self.require_at_rest()?;
        let slot = lock(&self.magazine)
            .first_free_slot()
            .ok_or(ChangerError::NoFreeSlot)?;
        Ok(
            ProgramPlan::new(RobotProgram::Load { slot }, ChangerEvent::Load, "load")
                .with_sample(&placeholder_id(slot)),
        )
    }

    fn plan_unload(&self, sample_id: &str) -> ChangerResult<ProgramPlan> {
        self.require_at_rest()?;
        if self.mounted_sample().as_deref() == Some(sample_id) {
            return Err(ChangerError::SampleMounted(sample_id.to_string()));
        }
        let slot = self.slot_of(sample_id)?;
        Ok(
            ProgramPlan::new(RobotProgram::Unload { slot }, ChangerEvent::Unload, "unload")
                .with_sample(sample_id),
        )
    }

    fn plan_scan(&self) -> ChangerResult<ProgramPlan> {
        self.require_at_rest()?;
        Ok(ProgramPlan::new(
            RobotProgram::Scan,
            ChangerEvent::ScanSamples,
            ChangerEvent::ScanSamples.name(),
        ))
    }

    fn plan_mount(&self, sample_id: &str) -> ChangerResult<ProgramPlan> {
        let state = self.require_at_rest()?;
        let slot = self.slot_of(sample_id)?;

        if state == ChangerState::Home {
            return Ok(
                ProgramPlan::new(RobotProgram::Mount { slot }, ChangerEvent::Mount, "mount")
                    .with_sample(sample_id),
            );
        }

        let mounted = self.mounted_sample().ok_or(ChangerError::NotHoldingSample)?;
        if mounted == sample_id {
            return Err(ChangerError::AlreadyMounted(mounted));
        }
        let mounted_slot = self.slot_of(&mounted)?;
        Ok(ProgramPlan::new(
            RobotProgram::Unmount { slot: mounted_slot },
            ChangerEvent::Mount,
            SWITCH_TAG,
        )
        .with_sample(sample_id))
    }

    fn plan_unmount(&self) -> ChangerResult<ProgramPlan> {
        let state = self.require_at_rest()?;
        let mounted = match (state, self.mounted_sample()) {
            (ChangerState::HomeMounted, Some(mounted)) => mounted,
            _ => return Err(ChangerError::NotHoldingSample),
        };
        let slot = self.slot_of(&mounted)?;
        Ok(
            ProgramPlan::new(RobotProgram::Unmount { slot }, ChangerEvent::Unmount, "unmount")
                .with_sample(&mounted),
        )
    }

    fn plan_next(&self) -> ChangerResult<ProgramPlan> {
        self.require_at_rest()?;
        let mounted = self.mounted_sample();
        let next = {
            let mut magazine = lock(&self.magazine);
            let mut found = None;
            for _ in 0..magazine.len() {
                match magazine.next_occupied_sample() {
                    Some((_, id)) if Some(&id) != mounted.as_ref() => {
                        found = Some(id);
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            found
        };
        let next = next.ok_or(ChangerError::MagazineEmpty)?;
        self.plan_mount(&next)
    }

    fn plan_run(&self, name: &str) -> ChangerResult<ProgramPlan> {
        let state = self.state();
        if state != ChangerState::Home {
            return Err(ChangerError::NotAtHome(state));
        }
        let program = RobotProgram::named(name)?;
        Ok(ProgramPlan::new(
            program,
            ChangerEvent::RunProgram,
            ChangerEvent::RunProgram.name(),
        ))
    }

    fn slot_of(&self, sample_id: &str) -> ChangerResult<usize> {
        lock(&self.magazine)
            .slot_of(sample_id)
            .ok_or_else(|| MagazineError::UnknownSample(sample_id.to_string()).into())
    }

    /// Fire the event of `plan` and remember its program as pending.
    /// Returns the state before and after the transition.
    pub fn begin(&self, plan: &ProgramPlan) -> ChangerResult<(ChangerState, ChangerState)> {
        let mut machine = lock(&self.machine);
        let previous = machine.state();
        let state = machine.fire(plan.event, plan.args.clone())?;
        drop(machine);

        lock(&self.position).pending = Some(plan.program.clone());
        Ok((previous, state))
    }

    /// Undo [`begin`](Self::begin) after the robot refused the program.
    pub fn abort(&self, previous: ChangerState) {
        lock(&self.machine).restore(previous);
        lock(&self.position).pending = None;
    }

    /// Fire the event of `plan` and start its program.
    pub async fn execute(
        &self,
        plan: ProgramPlan,
        driver: &mut dyn ChangerDriver,
    ) -> ChangerResult<ChangerState> {
        let name = plan.program.file_name();
        let tag = plan.tag().to_string();
        let (previous, state) = self.begin(&plan)?;

        if let Err(e) = driver.run_program(&name, &tag).await {
            error!("Robot refused {} [{}]: {}", name, tag, e);
            self.abort(previous);
            return Err(ChangerError::driver(e));
        }
        info!("Started {} [{}]", name, tag);
        Ok(state)
    }

    /// Start the mount chained by a completed switch.
    pub async fn resume_chained_mount(
        &self,
        sample_id: &str,
        driver: &mut dyn ChangerDriver,
    ) -> ChangerResult<ChangerState> {
        let state = self.state();
        if state != ChangerState::Mounting {
            return Err(TransitionError::InvalidTransition {
                event: ChangerEvent::Mount,
                state,
            }
            .into());
        }
        let slot = match self.slot_of(sample_id) {
            Ok(slot) => slot,
            Err(e) => {
                self.abort(ChangerState::Home);
                return Err(e);
            }
        };

        let program = RobotProgram::Mount { slot };
        let name = program.file_name();
        lock(&self.position).pending = Some(program);

        if let Err(e) = driver.run_program(&name, "mount").await {
            error!("Robot refused chained {}: {}", name, e);
            self.abort(ChangerState::Home);
            return Err(ChangerError::driver(e));
        }
        info!("Started {} [mount] for {}", name, sample_id);
        Ok(state)
    }

    /// Samples whose mount was chained by a completed switch. Feed them to
    /// [`resume_chained_mount`](Self::resume_chained_mount).
    pub fn chained_mounts(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add_transition_listener(Arc::new(ChainedMount { tx }));
        rx
    }

    /// Force the changer back to a rest state.
    ///
    /// A sample in the gripper when the robot stopped is considered dropped
    /// and removed from the magazine. Returns the new state.
    pub fn reset(&self) -> ChangerState {
        let mut machine = lock(&self.machine);
        let mut magazine = lock(&self.magazine);
        let mut position = lock(&self.position);

        let state = machine.state();
        let target = if state.is_in_transit() {
            let dropped = match state {
                ChangerState::Mounting => machine.mount_target().map(str::to_string),
                ChangerState::Unmounting | ChangerState::UnmountingSwitch => {
                    position.mounted.clone()
                }
                _ => None,
            };
            if let Some(id) = dropped {
                match magazine.remove(&id) {
                    Ok(slot) => warn!("Sample {} from slot {} dropped, removed", id, slot),
                    Err(e) => debug!("Dropped sample {} not in magazine: {}", id, e),
                }
            }
            position.mounted = None;
            ChangerState::Home
        } else if state.is_mounted() {
            ChangerState::HomeMounted
        } else {
            ChangerState::Home
        };

        position.pending = None;
        machine.restore(target);
        target
    }

    /// Register completion handlers and the magazine slot listener.
    pub fn subscribe(&self, bus: &mut ChangerEventBus) {
        let position = self.position.clone();
        let magazine = self.magazine.clone();
        let on_load = move |_: Option<&str>| -> DynResult<()> {
            let slot = match lock(&position).pending.take() {
                Some(RobotProgram::Load { slot }) => slot,
                other => {
                    return Err(
                        format!("load acknowledged, but pending program is {:?}", other).into(),
                    )
                }
            };
            lock(&magazine).insert(slot, &placeholder_id(slot))?;
            info!("Sample loaded into slot {}", slot);
            Ok(())
        };

        let position = self.position.clone();
        let magazine = self.magazine.clone();
        let on_unload = move |_: Option<&str>| -> DynResult<()> {
            let slot = match lock(&position).pending.take() {
                Some(RobotProgram::Unload { slot }) => slot,
                other => {
                    return Err(
                        format!("unload acknowledged, but pending program is {:?}", other).into(),
                    )
                }
            };
            let mut magazine = lock(&magazine);
            let id = magazine
                .get_sample(slot)?
                .map(str::to_string)
                .ok_or_else(|| format!("slot {} already empty", slot))?;
            magazine.remove(&id)?;
            info!("Sample {} unloaded from slot {}", id, slot);
            Ok(())
        };

        let machine = self.machine.clone();
        let position = self.position.clone();
        let on_mount = move |_: Option<&str>| -> DynResult<()> {
            let target = lock(&machine).mount_target().map(str::to_string);
            let mut position = lock(&position);
            position.pending = None;
            match target {
                Some(id) => {
                    info!("Sample {} mounted", id);
                    position.mounted = Some(id);
                    Ok(())
                }
                None => Err("mount acknowledged without a mount target".into()),
            }
        };

        let position = self.position.clone();
        let on_unmount = move |_: Option<&str>| -> DynResult<()> {
            let mut position = lock(&position);
            position.pending = None;
            if let Some(id) = position.mounted.take() {
                info!("Sample {} returned to the magazine", id);
            }
            Ok(())
        };

        let clear_pending = |position: Arc<Mutex<Position>>| {
            move |_: Option<&str>| -> DynResult<()> {
                lock(&position).pending = None;
                Ok(())
            }
        };

        bus.register([
            CallbackEntry::new(Outcome::Ok, "load", on_load),
            CallbackEntry::new(Outcome::Ok, "unload", on_unload),
            CallbackEntry::new(Outcome::Ok, "mount", on_mount),
            CallbackEntry::new(Outcome::Ok, "unmount", on_unmount.clone()),
            CallbackEntry::new(Outcome::Ok, SWITCH_TAG, on_unmount),
            CallbackEntry::new(
                Outcome::Ok,
                ChangerEvent::ScanSamples.name(),
                clear_pending(self.position.clone()),
            ),
            CallbackEntry::new(
                Outcome::Ok,
                ChangerEvent::RunProgram.name(),
                clear_pending(self.position.clone()),
            ),
        ]);

        let error_tags = [
            "load",
            "unload",
            "mount",
            "unmount",
            SWITCH_TAG,
            "scan_samples",
            "run_program",
        ];
        for tag in error_tags {
            let position = self.position.clone();
            bus.register([CallbackEntry::new(Outcome::Error, tag, move |message| {
                let pending = lock(&position).pending.take();
                error!(
                    "Robot reported error during {} ({:?}): {}",
                    tag,
                    pending,
                    message.unwrap_or("")
                );
                Ok(())
            })]);
        }

        bus.subscribe_slots(Arc::new(MagazineSync {
            magazine: self.magazine.clone(),
            position: self.position.clone(),
        }));
    }
}

/// Applies scan and presence results to the magazine. The slot of the
/// mounted sample is empty while it is mounted and is left alone.
struct MagazineSync {
    magazine: Arc<Mutex<Magazine>>,
    position: Arc<Mutex<Position>>,
}

impl MagazineSync {
    fn holds_mounted(&self, magazine: &Magazine, slot: usize) -> bool {
        let position = lock(&self.position);
        match (&position.mounted, magazine.get_sample(slot)) {
            (Some(mounted), Ok(Some(id))) => mounted == id,
            _ => false,
        }
    }
}

impl SlotListener for MagazineSync {
    fn on_sample_identified(&self, slot: usize, sample_id: &str) -> DynResult<()> {
        let mut magazine = lock(&self.magazine);
        if self.holds_mounted(&magazine, slot) {
            return Ok(());
        }
        magazine.update_sample(slot, sample_id)?;
        info!("Slot {} holds {}", slot, sample_id);
        Ok(())
    }

    fn on_presence(&self, slot: usize, present: bool) -> DynResult<()> {
        let mut magazine = lock(&self.magazine);
        if self.holds_mounted(&magazine, slot) {
            return Ok(());
        }
        if magazine.set_presence(slot, present)? {
            debug!("Slot {} presence changed to {}", slot, present);
        }
        Ok(())
    }
}

struct ChainedMount {
    tx: mpsc::UnboundedSender<String>,
}

impl TransitionListener for ChainedMount {
    fn on_transition(&self, transition: &Transition) {
        if transition.from != ChangerState::HomeSwitch || transition.to != ChangerState::Mounting {
            return;
        }
        if let Some(sample) = &transition.sample {
            if self.tx.send(sample.clone()).is_err() {
                warn!("Chained mount of {} dropped, no receiver", sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverAccess, DriverFuture, DriverInfo, RobotMode, SafetyStatus};
    use std::time::Duration;

    struct MockDriver {
        info: DriverInfo,
        programs: Vec<(String, String)>,
        refuse: bool,
    }

    impl MockDriver {
        fn new() -> Self {
            Self {
                info: DriverInfo {
                    manufacturer: "Test".to_string(),
                    model: "Mock".to_string(),
                    access: DriverAccess::None,
                },
                programs: Vec::new(),
                refuse: false,
            }
        }

        fn last_program(&self) -> Option<&str> {
            self.programs.last().map(|(name, _)| name.as_str())
        }
    }

    impl ChangerDriver for MockDriver {
        fn info(&self) -> &DriverInfo {
            &self.info
        }

        fn run_program<'a>(&'a mut self, name: &'a str, tag: &'a str) -> DriverFuture<'a, ()> {
            let result: DynResult<()> = if self.refuse {
                Err("program refused".into())
            } else {
                self.programs.push((name.to_string(), tag.to_string()));
                Ok(())
            };
            Box::pin(std::future::ready(result))
        }

        fn stop<'a>(&'a mut self) -> DriverFuture<'a, ()> {
            Box::pin(std::future::ready(Ok(())))
        }

        fn pause<'a>(&'a mut self) -> DriverFuture<'a, ()> {
            Box::pin(std::future::ready(Ok(())))
        }

        fn play<'a>(&'a mut self) -> DriverFuture<'a, ()> {
            Box::pin(std::future::ready(Ok(())))
        }

        fn status<'a>(&'a mut self) -> DriverFuture<'a, DriverStatus> {
            Box::pin(std::future::ready(Ok(DriverStatus {
                mode: RobotMode::Idle,
                safety: SafetyStatus::Normal,
                remote_control: true,
                program_running: false,
                loaded_program: None,
            })))
        }
    }

    fn setup(nsamples: usize) -> (SampleChanger, ChangerEventBus, MockDriver) {
        let changer = SampleChanger::new(nsamples);
        let mut bus = ChangerEventBus::new();
        changer.subscribe(&mut bus);
        (changer, bus, MockDriver::new())
    }

    /// What the robot connection does on an `ok` line.
    fn acknowledge(changer: &SampleChanger, bus: &ChangerEventBus) -> ChangerState {
        let tag = changer.tag().unwrap_or_default();
        let report = bus.dispatch(Outcome::Ok, &tag, None);
        assert_eq!(report.failed, 0, "ok/{} handlers failed", tag);
        changer
            .fire(ChangerEvent::ProgramFinished, FireArgs::default())
            .unwrap()
    }

    async fn run(
        changer: &SampleChanger,
        driver: &mut MockDriver,
        cmd: ChangerCommand,
    ) -> ChangerResult<ChangerState> {
        let plan = changer.plan(&cmd)?.expect("command starts a program");
        changer.execute(plan, driver).await
    }

    async fn load(changer: &SampleChanger, bus: &ChangerEventBus, driver: &mut MockDriver) {
        run(changer, driver, ChangerCommand::Load).await.unwrap();
        assert_eq!(acknowledge(changer, bus), ChangerState::Home);
    }

    #[tokio::test]
    async fn test_load_inserts_placeholder() {
        let (changer, bus, mut driver) = setup(3);

        assert_eq!(
            run(&changer, &mut driver, ChangerCommand::Load).await,
            Ok(ChangerState::Loading)
        );
        assert_eq!(driver.programs, vec![("in0.urp".to_string(), "load".to_string())]);
        assert_eq!(changer.samples(), vec!["", "", ""]);

        assert_eq!(acknowledge(&changer, &bus), ChangerState::Home);
        assert_eq!(changer.samples(), vec!["@0", "", ""]);

        load(&changer, &bus, &mut driver).await;
        assert_eq!(driver.last_program(), Some("in1.urp"));
    }

    #[tokio::test]
    async fn test_load_into_full_magazine() {
        let (changer, bus, mut driver) = setup(1);
        load(&changer, &bus, &mut driver).await;
        assert_eq!(
            changer.plan(&ChangerCommand::Load),
            Err(ChangerError::NoFreeSlot)
        );
    }

    #[tokio::test]
    async fn test_load_acknowledgement_releases_position_before_magazine() {
        let (changer, bus, mut driver) = setup(2);
        run(&changer, &mut driver, ChangerCommand::Load).await.unwrap();

        let magazine = lock(&changer.magazine);
        std::thread::scope(|s| {
            let handler = s.spawn(|| bus.dispatch(Outcome::Ok, "load", None));
            // The handler is now waiting for the magazine.
            std::thread::sleep(Duration::from_millis(50));
            assert!(changer.position.try_lock().is_ok());
            drop(magazine);
            assert_eq!(handler.join().unwrap().failed, 0);
        });
        assert_eq!(changer.samples(), vec!["@0", ""]);
    }

    #[tokio::test]
    async fn test_unload_removes_sample() {
        let (changer, bus, mut driver) = setup(3);
        load(&changer, &bus, &mut driver).await;
        load(&changer, &bus, &mut driver).await;

        let cmd = ChangerCommand::Unload {
            sample_id: "@1".to_string(),
        };
        assert_eq!(run(&changer, &mut driver, cmd).await, Ok(ChangerState::Unloading));
        assert_eq!(driver.last_program(), Some("out1.urp"));
        acknowledge(&changer, &bus);
        assert_eq!(changer.samples(), vec!["@0", "", ""]);

        let missing = ChangerCommand::Unload {
            sample_id: "nope".to_string(),
        };
        assert_eq!(
            changer.plan(&missing),
            Err(ChangerError::Magazine(MagazineError::UnknownSample(
                "nope".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_mount_and_unmount() {
        let (changer, bus, mut driver) = setup(3);
        load(&changer, &bus, &mut driver).await;

        let mount = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        assert_eq!(run(&changer, &mut driver, mount).await, Ok(ChangerState::Mounting));
        assert_eq!(driver.last_program(), Some("messpos0.urp"));
        assert_eq!(acknowledge(&changer, &bus), ChangerState::HomeMounted);
        assert_eq!(changer.mounted_sample().as_deref(), Some("@0"));

        let unload = ChangerCommand::Unload {
            sample_id: "@0".to_string(),
        };
        assert_eq!(
            changer.plan(&unload),
            Err(ChangerError::SampleMounted("@0".to_string()))
        );

        run(&changer, &mut driver, ChangerCommand::Unmount)
            .await
            .unwrap();
        assert_eq!(driver.last_program(), Some("messposin0.urp"));
        assert_eq!(acknowledge(&changer, &bus), ChangerState::Home);
        assert_eq!(changer.mounted_sample(), None);
        assert_eq!(changer.samples()[0], "@0");
    }

    #[tokio::test]
    async fn test_unmount_without_sample() {
        let (changer, _bus, _driver) = setup(3);
        assert_eq!(
            changer.plan(&ChangerCommand::Unmount),
            Err(ChangerError::NotHoldingSample)
        );
    }

    #[tokio::test]
    async fn test_switch_chains_mount_of_next_sample() {
        let (changer, bus, mut driver) = setup(3);
        let mut chained = changer.chained_mounts();
        load(&changer, &bus, &mut driver).await;
        load(&changer, &bus, &mut driver).await;

        let first = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        run(&changer, &mut driver, first).await.unwrap();
        acknowledge(&changer, &bus);

        let second = ChangerCommand::Mount {
            sample_id: "@1".to_string(),
        };
        assert_eq!(
            run(&changer, &mut driver, second).await,
            Ok(ChangerState::UnmountingSwitch)
        );
        assert_eq!(
            driver.programs.last(),
            Some(&("messposin0.urp".to_string(), "switch".to_string()))
        );

        assert_eq!(acknowledge(&changer, &bus), ChangerState::Mounting);
        assert_eq!(changer.mounted_sample(), None);

        let sample = chained.try_recv().unwrap();
        assert_eq!(sample, "@1");
        changer
            .resume_chained_mount(&sample, &mut driver)
            .await
            .unwrap();
        assert_eq!(driver.last_program(), Some("messpos1.urp"));

        assert_eq!(acknowledge(&changer, &bus), ChangerState::HomeMounted);
        assert_eq!(changer.mounted_sample().as_deref(), Some("@1"));
    }

    #[tokio::test]
    async fn test_refused_program_restores_state() {
        let (changer, bus, mut driver) = setup(3);
        load(&changer, &bus, &mut driver).await;
        driver.refuse = true;

        let mount = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        let err = run(&changer, &mut driver, mount).await.unwrap_err();
        assert!(matches!(err, ChangerError::Driver(_)));
        assert_eq!(changer.state(), ChangerState::Home);
    }

    #[tokio::test]
    async fn test_busy_changer_rejects_commands() {
        let (changer, _bus, mut driver) = setup(3);
        run(&changer, &mut driver, ChangerCommand::Scan).await.unwrap();
        assert_eq!(
            changer.plan(&ChangerCommand::Load),
            Err(ChangerError::NotAtHome(ChangerState::MovingToScanPos))
        );
        assert_eq!(changer.plan(&ChangerCommand::Stop), Ok(None));
    }

    #[tokio::test]
    async fn test_run_program_only_from_home() {
        let (changer, bus, mut driver) = setup(3);
        let cmd = ChangerCommand::RunProgram {
            name: "calibrate.urp".to_string(),
        };
        assert_eq!(
            run(&changer, &mut driver, cmd.clone()).await,
            Ok(ChangerState::RunningProgram)
        );
        assert_eq!(acknowledge(&changer, &bus), ChangerState::Home);

        load(&changer, &bus, &mut driver).await;
        let mount = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        run(&changer, &mut driver, mount).await.unwrap();
        acknowledge(&changer, &bus);
        assert_eq!(
            changer.plan(&cmd),
            Err(ChangerError::NotAtHome(ChangerState::HomeMounted))
        );
    }

    #[tokio::test]
    async fn test_next_skips_mounted_sample() {
        let (changer, bus, mut driver) = setup(3);
        assert_eq!(
            changer.plan(&ChangerCommand::Next),
            Err(ChangerError::MagazineEmpty)
        );

        load(&changer, &bus, &mut driver).await;
        run(&changer, &mut driver, ChangerCommand::Next).await.unwrap();
        acknowledge(&changer, &bus);
        assert_eq!(changer.mounted_sample().as_deref(), Some("@0"));
        assert_eq!(
            changer.plan(&ChangerCommand::Next),
            Err(ChangerError::MagazineEmpty)
        );

        run(&changer, &mut driver, ChangerCommand::Load).await.unwrap();
        assert_eq!(acknowledge(&changer, &bus), ChangerState::HomeMounted);
        assert_eq!(changer.samples(), vec!["@0", "@1", ""]);
        let plan = changer.plan(&ChangerCommand::Next).unwrap().unwrap();
        assert_eq!(plan.args.sample.as_deref(), Some("@1"));
        assert_eq!(plan.tag(), SWITCH_TAG);
    }

    #[tokio::test]
    async fn test_reset_while_mounting_drops_sample() {
        let (changer, bus, mut driver) = setup(3);
        load(&changer, &bus, &mut driver).await;
        let mount = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        run(&changer, &mut driver, mount).await.unwrap();

        assert_eq!(changer.reset(), ChangerState::Home);
        assert_eq!(changer.samples(), vec!["", "", ""]);
        assert_eq!(changer.mounted_sample(), None);
    }

    #[tokio::test]
    async fn test_reset_keeps_mounted_axis() {
        let (changer, bus, mut driver) = setup(3);
        load(&changer, &bus, &mut driver).await;
        let mount = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        run(&changer, &mut driver, mount).await.unwrap();
        acknowledge(&changer, &bus);
        run(&changer, &mut driver, ChangerCommand::Load).await.unwrap();
        assert_eq!(changer.state(), ChangerState::LoadingMounted);

        assert_eq!(changer.reset(), ChangerState::HomeMounted);
        assert_eq!(changer.mounted_sample().as_deref(), Some("@0"));
    }

    #[tokio::test]
    async fn test_error_acknowledgement_keeps_state() {
        let (changer, bus, mut driver) = setup(3);
        run(&changer, &mut driver, ChangerCommand::Load).await.unwrap();

        let report = bus.dispatch(Outcome::Error, "load", Some("overload"));
        assert_eq!(report.matched, 1);
        assert_eq!(changer.state(), ChangerState::Loading);
        assert_eq!(changer.samples(), vec!["", "", ""]);
    }

    #[tokio::test]
    async fn test_presence_keeps_slot_of_mounted_sample() {
        let (changer, bus, mut driver) = setup(3);
        load(&changer, &bus, &mut driver).await;
        let mount = ChangerCommand::Mount {
            sample_id: "@0".to_string(),
        };
        run(&changer, &mut driver, mount).await.unwrap();
        acknowledge(&changer, &bus);

        bus.notify_presence(0, false);
        bus.notify_presence(2, true);
        bus.notify_sample_identified(2, "QR-7");
        assert_eq!(changer.samples(), vec!["@0", "", "QR-7"]);
    }

    #[test]
    fn test_snapshot() {
        let changer = SampleChanger::new(2);
        let snapshot = changer.snapshot(None);
        assert_eq!(snapshot.state, ChangerState::Home);
        assert_eq!(snapshot.status, ChangerStatus::Idle);
        assert_eq!(snapshot.status_code, 100);
        assert_eq!(snapshot.samples.len(), 2);
    }
}
