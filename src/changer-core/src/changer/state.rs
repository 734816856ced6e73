// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::driver::DriverStatus;

/// Operating mode of the sample changer.
///
/// States come in mirrored pairs along the "mounted" axis: a `*Mounted`
/// variant asserts that the measurement position holds a sample, its plain
/// mirror asserts that the position is empty. The remaining variants are
/// transitional states of the mount/unmount cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangerState {
    #[default]
    Home,
    HomeMounted,
    Loading,
    LoadingMounted,
    Unloading,
    UnloadingMounted,
    MovingToScanPos,
    MovingToScanPosMounted,
    ScanningSample,
    ScanningSampleMounted,
    PresenceDetection,
    PresenceDetectionMounted,
    MovingToHomePos,
    MovingToHomePosMounted,
    Mounting,
    Unmounting,
    UnmountingSwitch,
    HomeSwitch,
    RunningProgram,
}

impl ChangerState {
    pub const ALL: [ChangerState; 19] = [
        Self::Home,
        Self::HomeMounted,
        Self::Loading,
        Self::LoadingMounted,
        Self::Unloading,
        Self::UnloadingMounted,
        Self::MovingToScanPos,
        Self::MovingToScanPosMounted,
        Self::ScanningSample,
        Self::ScanningSampleMounted,
        Self::PresenceDetection,
        Self::PresenceDetectionMounted,
        Self::MovingToHomePos,
        Self::MovingToHomePosMounted,
        Self::Mounting,
        Self::Unmounting,
        Self::UnmountingSwitch,
        Self::HomeSwitch,
        Self::RunningProgram,
    ];

    /// Stable identifier used in logs and on the wire.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::HomeMounted => "home_mounted",
            Self::Loading => "loading",
            Self::LoadingMounted => "loading_mounted",
            Self::Unloading => "unloading",
            Self::UnloadingMounted => "unloading_mounted",
            Self::MovingToScanPos => "moving_to_scan_pos",
            Self::MovingToScanPosMounted => "moving_to_scan_pos_mounted",
            Self::ScanningSample => "scanning_sample",
            Self::ScanningSampleMounted => "scanning_sample_mounted",
            Self::PresenceDetection => "presence_detection",
            Self::PresenceDetectionMounted => "presence_detection_mounted",
            Self::MovingToHomePos => "moving_to_home_pos",
            Self::MovingToHomePosMounted => "moving_to_home_pos_mounted",
            Self::Mounting => "mounting",
            Self::Unmounting => "unmounting",
            Self::UnmountingSwitch => "unmounting_switch",
            Self::HomeSwitch => "home_switch",
            Self::RunningProgram => "running_program",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::HomeMounted => "home with sample mounted",
            Self::Loading => "loading sample",
            Self::LoadingMounted => "loading sample (sample mounted)",
            Self::Unloading => "unloading sample",
            Self::UnloadingMounted => "unloading sample (sample mounted)",
            Self::MovingToScanPos => "moving to scan position",
            Self::MovingToScanPosMounted => "moving to scan position (sample mounted)",
            Self::ScanningSample => "scanning sample",
            Self::ScanningSampleMounted => "scanning sample (sample mounted)",
            Self::PresenceDetection => "detecting sample presence",
            Self::PresenceDetectionMounted => "detecting sample presence (sample mounted)",
            Self::MovingToHomePos => "moving to home position",
            Self::MovingToHomePosMounted => "moving to home position (sample mounted)",
            Self::Mounting => "mounting sample",
            Self::Unmounting => "unmounting sample",
            Self::UnmountingSwitch => "unmounting sample before mounting the next one",
            Self::HomeSwitch => "home after unmounting, next sample pending",
            Self::RunningProgram => "running program",
        }
    }

    /// True when the measurement position holds a sample.
    pub fn is_mounted(&self) -> bool {
        matches!(
            self,
            Self::HomeMounted
                | Self::LoadingMounted
                | Self::UnloadingMounted
                | Self::MovingToScanPosMounted
                | Self::ScanningSampleMounted
                | Self::PresenceDetectionMounted
                | Self::MovingToHomePosMounted
        )
    }

    /// Counterpart on the other side of the mounted axis, if any.
    pub fn mirror(&self) -> Option<ChangerState> {
        match self {
            Self::Home => Some(Self::HomeMounted),
            Self::HomeMounted => Some(Self::Home),
            Self::Loading => Some(Self::LoadingMounted),
            Self::LoadingMounted => Some(Self::Loading),
            Self::Unloading => Some(Self::UnloadingMounted),
            Self::UnloadingMounted => Some(Self::Unloading),
            Self::MovingToScanPos => Some(Self::MovingToScanPosMounted),
            Self::MovingToScanPosMounted => Some(Self::MovingToScanPos),
            Self::ScanningSample => Some(Self::ScanningSampleMounted),
            Self::ScanningSampleMounted => Some(Self::ScanningSample),
            Self::PresenceDetection => Some(Self::PresenceDetectionMounted),
            Self::PresenceDetectionMounted => Some(Self::PresenceDetection),
            Self::MovingToHomePos => Some(Self::MovingToHomePosMounted),
            Self::MovingToHomePosMounted => Some(Self::MovingToHomePos),
            Self::Mounting
            | Self::Unmounting
            | Self::UnmountingSwitch
            | Self::HomeSwitch
            | Self::RunningProgram => None,
        }
    }

    /// Home position, with or without a mounted sample.
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Home | Self::HomeMounted)
    }

    /// States in which the gripper carries a sample between magazine and
    /// measurement position.
    pub fn is_in_transit(&self) -> bool {
        matches!(
            self,
            Self::Mounting | Self::Unmounting | Self::UnmountingSwitch | Self::HomeSwitch
        )
    }
}

impl fmt::Display for ChangerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ChangerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.id() == s)
            .ok_or_else(|| format!("unknown changer state '{}'", s))
    }
}

/// Coarse status reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangerStatus {
    Idle,
    HoldingSample,
    Busy,
    Mounting,
    Unmounting,
    Loading,
    Unloading,
    Scanning,
}

impl ChangerStatus {
    /// Map a changer state onto its operator status.
    pub fn of(state: ChangerState) -> Self {
        match state {
            ChangerState::Home => Self::Idle,
            ChangerState::HomeMounted => Self::HoldingSample,
            ChangerState::Loading | ChangerState::LoadingMounted => Self::Loading,
            ChangerState::Unloading | ChangerState::UnloadingMounted => Self::Unloading,
            ChangerState::MovingToScanPos
            | ChangerState::MovingToScanPosMounted
            | ChangerState::ScanningSample
            | ChangerState::ScanningSampleMounted
            | ChangerState::PresenceDetection
            | ChangerState::PresenceDetectionMounted
            | ChangerState::MovingToHomePos
            | ChangerState::MovingToHomePosMounted => Self::Scanning,
            ChangerState::Mounting => Self::Mounting,
            ChangerState::Unmounting | ChangerState::UnmountingSwitch => Self::Unmounting,
            ChangerState::HomeSwitch | ChangerState::RunningProgram => Self::Busy,
        }
    }

    /// Numeric status code (SECoP status classes: 1xx idle, 3xx busy).
    pub fn code(&self) -> u16 {
        match self {
            Self::Idle => 100,
            Self::HoldingSample => 101,
            Self::Busy => 300,
            Self::Mounting => 301,
            Self::Unmounting => 302,
            Self::Loading => 303,
            Self::Unloading => 304,
            Self::Scanning => 306,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.code() >= 300
    }
}

/// Point-in-time view of the changer handed to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangerSnapshot {
    pub state: ChangerState,
    pub label: String,
    pub status: ChangerStatus,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounted_sample: Option<String>,
    pub samples: Vec<String>,
    pub transition_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverStatus>,
}
