// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample changer state machine.
//!
//! Every event owns a priority-ordered list of (source, destination) pairs.
//! Firing an event from a state that is not a listed source is rejected and
//! leaves the machine untouched.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::changer::state::ChangerState;

use super::events::TransitionListener;

/// Events that can trigger state transitions in the changer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangerEvent {
    /// Move a sample to the measurement position (or start a switch)
    Mount,
    /// Return the mounted sample to its slot
    Unmount,
    /// Insert a sample into the magazine
    Load,
    /// Remove a sample from the magazine
    Unload,
    /// Start the QR scan and presence detection run
    ScanSamples,
    /// Camera reached a QR code position
    AtScanPos,
    /// Advance to the next slot
    NextSlot,
    /// Last QR code read
    FinishedScanning,
    /// Last presence flag reported
    FinishedPresenceDetection,
    /// Robot acknowledged the running program
    ProgramFinished,
    /// Run an arbitrary robot program
    RunProgram,
}

impl ChangerEvent {
    pub const ALL: [ChangerEvent; 11] = [
        Self::Mount,
        Self::Unmount,
        Self::Load,
        Self::Unload,
        Self::ScanSamples,
        Self::AtScanPos,
        Self::NextSlot,
        Self::FinishedScanning,
        Self::FinishedPresenceDetection,
        Self::ProgramFinished,
        Self::RunProgram,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Load => "load",
            Self::Unload => "unload",
            Self::ScanSamples => "scan_samples",
            Self::AtScanPos => "at_scan_pos",
            Self::NextSlot => "next_slot",
            Self::FinishedScanning => "finished_scanning",
            Self::FinishedPresenceDetection => "finished_presence_detection",
            Self::ProgramFinished => "program_finished",
            Self::RunProgram => "run_program",
        }
    }

    /// Transition list of this event, first match wins.
    pub fn transitions(&self) -> &'static [(ChangerState, ChangerState)] {
        use ChangerState as S;

        match self {
            Self::Mount => &[
                (S::Home, S::Mounting),
                (S::HomeMounted, S::UnmountingSwitch),
                (S::HomeSwitch, S::Mounting),
            ],
            Self::Unmount => &[(S::HomeMounted, S::Unmounting)],
            Self::Load => &[(S::Home, S::Loading), (S::HomeMounted, S::LoadingMounted)],
            Self::Unload => &[
                (S::Home, S::Unloading),
                (S::HomeMounted, S::UnloadingMounted),
            ],
            Self::ScanSamples => &[
                (S::Home, S::MovingToScanPos),
                (S::HomeMounted, S::MovingToScanPosMounted),
            ],
            Self::AtScanPos => &[
                (S::MovingToScanPos, S::ScanningSample),
                (S::MovingToScanPosMounted, S::ScanningSampleMounted),
            ],
            Self::NextSlot => &[
                (S::ScanningSample, S::MovingToScanPos),
                (S::ScanningSampleMounted, S::MovingToScanPosMounted),
                (S::PresenceDetection, S::PresenceDetection),
                (S::PresenceDetectionMounted, S::PresenceDetectionMounted),
            ],
            Self::FinishedScanning => &[
                (S::ScanningSample, S::PresenceDetection),
                (S::ScanningSampleMounted, S::PresenceDetectionMounted),
            ],
            Self::FinishedPresenceDetection => &[
                (S::PresenceDetection, S::MovingToHomePos),
                (S::PresenceDetectionMounted, S::MovingToHomePosMounted),
            ],
            Self::ProgramFinished => &[
                (S::Mounting, S::HomeMounted),
                (S::Unmounting, S::Home),
                (S::UnmountingSwitch, S::HomeSwitch),
                (S::Loading, S::Home),
                (S::LoadingMounted, S::HomeMounted),
                (S::Unloading, S::Home),
                (S::UnloadingMounted, S::HomeMounted),
                (S::MovingToHomePos, S::Home),
                (S::MovingToHomePosMounted, S::HomeMounted),
                (S::RunningProgram, S::Home),
            ],
            Self::RunProgram => &[(S::Home, S::RunningProgram)],
        }
    }

    /// Destination reached when fired from `state`, if the event is legal there.
    pub fn target_from(&self, state: ChangerState) -> Option<ChangerState> {
        self.transitions()
            .iter()
            .find(|(source, _)| *source == state)
            .map(|(_, target)| *target)
    }
}

impl fmt::Display for ChangerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("event '{event}' is not allowed in state '{state}'")]
    InvalidTransition {
        event: ChangerEvent,
        state: ChangerState,
    },
}

/// Optional arguments carried by a fired event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireArgs {
    /// Tag recorded on the destination state; defaults to the event name.
    pub tag: Option<String>,
    /// Sample identifier the event operates on.
    pub sample: Option<String>,
}

impl FireArgs {
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            sample: None,
        }
    }

    pub fn with_sample(mut self, sample: impl Into<String>) -> Self {
        self.sample = Some(sample.into());
        self
    }
}

/// A completed transition, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event: ChangerEvent,
    pub from: ChangerState,
    pub to: ChangerState,
    pub tag: String,
    pub sample: Option<String>,
}

/// The changer state machine.
pub struct ChangerStateMachine {
    state: ChangerState,
    tag: Option<String>,
    next_sample: Option<String>,
    mount_target: Option<String>,
    transition_count: u64,
    last_transition: Option<Instant>,
    listeners: Vec<Arc<dyn TransitionListener>>,
}

impl fmt::Debug for ChangerStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangerStateMachine")
            .field("state", &self.state)
            .field("tag", &self.tag)
            .field("next_sample", &self.next_sample)
            .field("mount_target", &self.mount_target)
            .field("transition_count", &self.transition_count)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for ChangerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangerStateMachine {
    /// Create a new state machine in the `home` state.
    pub fn new() -> Self {
        Self {
            state: ChangerState::Home,
            tag: None,
            next_sample: None,
            mount_target: None,
            transition_count: 0,
            last_transition: None,
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> ChangerState {
        self.state
    }

    /// Tag recorded by the transition that entered the current state.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Sample waiting to be mounted once the running switch completes.
    pub fn next_sample(&self) -> Option<&str> {
        self.next_sample.as_deref()
    }

    /// Sample carried by the mount in progress.
    pub fn mount_target(&self) -> Option<&str> {
        self.mount_target.as_deref()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    pub fn can_fire(&self, event: ChangerEvent) -> bool {
        event.target_from(self.state).is_some()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn TransitionListener>) {
        self.listeners.push(listener);
    }

    /// Fire an event and return the resulting state.
    ///
    /// When an enter hook chains another event, the chained transition has
    /// completed by the time this returns and its destination is returned.
    pub fn fire(
        &mut self,
        event: ChangerEvent,
        args: FireArgs,
    ) -> Result<ChangerState, TransitionError> {
        let Some(target) = event.target_from(self.state) else {
            return Err(TransitionError::InvalidTransition {
                event,
                state: self.state,
            });
        };

        let from = self.state;
        self.on_leave(from);

        let tag = args.tag.unwrap_or_else(|| event.name().to_string());
        self.state = target;
        self.tag = Some(tag.clone());
        self.transition_count += 1;
        self.last_transition = Some(Instant::now());
        info!("{} --{}--> {} [{}]", from, event, target, tag);

        let transition = Transition {
            event,
            from,
            to: target,
            tag,
            sample: args.sample,
        };
        let chained = self.on_enter(&transition);

        for listener in &self.listeners {
            listener.on_transition(&transition);
        }

        match chained {
            Some((event, args)) => self.fire(event, args),
            None => Ok(self.state),
        }
    }

    /// Force the machine into `state` (recovery after a failed or stopped
    /// program). Forgets any pending next sample.
    pub fn restore(&mut self, state: ChangerState) {
        if self.state != state {
            warn!("Forcing changer state {} -> {}", self.state, state);
        }
        self.state = state;
        self.tag = None;
        self.next_sample = None;
        self.mount_target = None;
        self.transition_count += 1;
        self.last_transition = Some(Instant::now());
    }

    fn on_leave(&mut self, from: ChangerState) {
        if from == ChangerState::Mounting {
            self.mount_target = None;
        }
        if from.is_in_transit() {
            if let Some(elapsed) = self.time_in_state() {
                debug!("Left {} after {:?}", from, elapsed);
            }
        }
    }

    fn on_enter(&mut self, transition: &Transition) -> Option<(ChangerEvent, FireArgs)> {
        match transition.to {
            ChangerState::Mounting => {
                self.mount_target = transition.sample.clone();
                None
            }
            ChangerState::UnmountingSwitch => {
                self.next_sample = transition.sample.clone();
                None
            }
            ChangerState::HomeSwitch => match self.next_sample.take() {
                Some(sample) => {
                    info!("Mounting next sample {}", sample);
                    Some((
                        ChangerEvent::Mount,
                        FireArgs::tagged(ChangerEvent::Mount.name()).with_sample(sample),
                    ))
                }
                None => {
                    warn!("Reached {} without a next sample", transition.to);
                    None
                }
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use ChangerEvent as E;
    use ChangerState as S;

    fn machine_in(state: S) -> ChangerStateMachine {
        let mut sm = ChangerStateMachine::new();
        sm.restore(state);
        sm
    }

    struct Recorder(Mutex<Vec<Transition>>);

    impl TransitionListener for Recorder {
        fn on_transition(&self, transition: &Transition) {
            self.0.lock().unwrap().push(transition.clone());
        }
    }

    #[test]
    fn test_initial_state() {
        let sm = ChangerStateMachine::new();
        assert_eq!(sm.state(), S::Home);
        assert_eq!(sm.tag(), None);
        assert_eq!(sm.transition_count(), 0);
    }

    #[test]
    fn test_every_unlisted_source_is_rejected() {
        for event in E::ALL {
            for state in S::ALL {
                let listed = event.transitions().iter().any(|(src, _)| *src == state);
                if listed {
                    continue;
                }
                let mut sm = machine_in(state);
                let count = sm.transition_count();
                let err = sm.fire(event, FireArgs::default()).unwrap_err();
                assert_eq!(err, TransitionError::InvalidTransition { event, state });
                assert_eq!(sm.state(), state);
                assert_eq!(sm.transition_count(), count);
            }
        }
    }

    #[test]
    fn test_transitions_stay_on_their_side_of_the_mounted_axis() {
        for event in [E::Load, E::Unload, E::ScanSamples, E::AtScanPos, E::NextSlot] {
            for (src, dst) in event.transitions() {
                assert_eq!(src.is_mounted(), dst.is_mounted(), "{event}: {src} -> {dst}");
            }
        }
        for event in [E::FinishedScanning, E::FinishedPresenceDetection] {
            for (src, dst) in event.transitions() {
                assert_eq!(src.is_mounted(), dst.is_mounted(), "{event}: {src} -> {dst}");
            }
        }
    }

    #[test]
    fn test_mount_and_unmount_cycle() {
        let mut sm = ChangerStateMachine::new();
        assert_eq!(
            sm.fire(E::Mount, FireArgs::default().with_sample("S1")),
            Ok(S::Mounting)
        );
        assert_eq!(sm.tag(), Some("mount"));
        assert_eq!(sm.mount_target(), Some("S1"));
        assert_eq!(sm.fire(E::ProgramFinished, FireArgs::default()), Ok(S::HomeMounted));
        assert_eq!(sm.mount_target(), None);
        assert_eq!(sm.fire(E::Unmount, FireArgs::default()), Ok(S::Unmounting));
        assert_eq!(sm.fire(E::ProgramFinished, FireArgs::default()), Ok(S::Home));
    }

    #[test]
    fn test_switch_auto_mounts_next_sample() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut sm = machine_in(S::HomeMounted);
        sm.add_listener(recorder.clone());

        let state = sm
            .fire(E::Mount, FireArgs::tagged("switch").with_sample("S2"))
            .unwrap();
        assert_eq!(state, S::UnmountingSwitch);
        assert_eq!(sm.tag(), Some("switch"));
        assert_eq!(sm.next_sample(), Some("S2"));

        let state = sm.fire(E::ProgramFinished, FireArgs::default()).unwrap();
        assert_eq!(state, S::Mounting);
        assert_eq!(sm.state(), S::Mounting);
        assert_eq!(sm.tag(), Some("mount"));
        assert_eq!(sm.next_sample(), None);
        assert_eq!(sm.mount_target(), Some("S2"));

        let seen = recorder.0.lock().unwrap();
        let path: Vec<(S, S)> = seen.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (S::HomeMounted, S::UnmountingSwitch),
                (S::UnmountingSwitch, S::HomeSwitch),
                (S::HomeSwitch, S::Mounting),
            ]
        );
        assert_eq!(seen[2].sample.as_deref(), Some("S2"));
    }

    #[test]
    fn test_home_switch_without_next_sample_waits() {
        let mut sm = machine_in(S::UnmountingSwitch);
        assert_eq!(sm.fire(E::ProgramFinished, FireArgs::default()), Ok(S::HomeSwitch));
        assert_eq!(
            sm.fire(E::Mount, FireArgs::default().with_sample("S3")),
            Ok(S::Mounting)
        );
    }

    #[test]
    fn test_scan_chain() {
        let mut sm = ChangerStateMachine::new();
        let steps = [
            (E::ScanSamples, S::MovingToScanPos),
            (E::AtScanPos, S::ScanningSample),
            (E::NextSlot, S::MovingToScanPos),
            (E::AtScanPos, S::ScanningSample),
            (E::FinishedScanning, S::PresenceDetection),
            (E::NextSlot, S::PresenceDetection),
            (E::FinishedPresenceDetection, S::MovingToHomePos),
            (E::ProgramFinished, S::Home),
        ];
        for (event, expected) in steps {
            assert_eq!(sm.fire(event, FireArgs::default()), Ok(expected));
            assert!(!sm.state().is_mounted());
        }
    }

    #[test]
    fn test_mounted_scan_chain_mirrors() {
        let mut sm = machine_in(S::HomeMounted);
        let steps = [
            (E::ScanSamples, S::MovingToScanPosMounted),
            (E::AtScanPos, S::ScanningSampleMounted),
            (E::NextSlot, S::MovingToScanPosMounted),
            (E::AtScanPos, S::ScanningSampleMounted),
            (E::FinishedScanning, S::PresenceDetectionMounted),
            (E::NextSlot, S::PresenceDetectionMounted),
            (E::FinishedPresenceDetection, S::MovingToHomePosMounted),
            (E::ProgramFinished, S::HomeMounted),
        ];
        for (event, expected) in steps {
            assert_eq!(sm.fire(event, FireArgs::default()), Ok(expected));
            assert!(sm.state().is_mounted());
        }
    }

    #[test]
    fn test_tag_override_and_default() {
        let mut sm = ChangerStateMachine::new();
        sm.fire(E::Load, FireArgs::default()).unwrap();
        assert_eq!(sm.tag(), Some("load"));
        sm.fire(E::ProgramFinished, FireArgs::default()).unwrap();
        sm.fire(E::RunProgram, FireArgs::tagged("calibrate")).unwrap();
        assert_eq!(sm.state(), S::RunningProgram);
        assert_eq!(sm.tag(), Some("calibrate"));
    }

    #[test]
    fn test_restore_forgets_next_sample() {
        let mut sm = machine_in(S::HomeMounted);
        sm.fire(E::Mount, FireArgs::default().with_sample("S9")).unwrap();
        sm.restore(S::Home);
        assert_eq!(sm.state(), S::Home);
        assert_eq!(sm.next_sample(), None);
        assert_eq!(sm.tag(), None);
    }
}
