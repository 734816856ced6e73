// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hardware driver interface for the robot that moves the samples.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DynResult;

/// Alias to reduce type complexity in ChangerDriver.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = DynResult<T>> + Send + 'a>>;

/// How this backend reaches the robot controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverAccess {
    Tcp { addr: String },
    None,
}

/// Static info describing a driver backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    pub manufacturer: String,
    pub model: String,
    pub access: DriverAccess,
}

/// Operating mode reported by the robot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RobotMode {
    NoController,
    Disconnected,
    ConfirmSafety,
    Booting,
    PowerOff,
    PowerOn,
    Idle,
    Backdrive,
    Running,
}

impl RobotMode {
    pub const ALL: [RobotMode; 9] = [
        Self::NoController,
        Self::Disconnected,
        Self::ConfirmSafety,
        Self::Booting,
        Self::PowerOff,
        Self::PowerOn,
        Self::Idle,
        Self::Backdrive,
        Self::Running,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NoController => "NO_CONTROLLER",
            Self::Disconnected => "DISCONNECTED",
            Self::ConfirmSafety => "CONFIRM_SAFETY",
            Self::Booting => "BOOTING",
            Self::PowerOff => "POWER_OFF",
            Self::PowerOn => "POWER_ON",
            Self::Idle => "IDLE",
            Self::Backdrive => "BACKDRIVE",
            Self::Running => "RUNNING",
        }
    }

    /// Status code of the robot in this mode (0 disabled, 100 idle,
    /// 130 standby, 340 preparing, 400 error).
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoController => 400,
            Self::Disconnected | Self::ConfirmSafety | Self::PowerOff => 0,
            Self::Booting | Self::Backdrive => 340,
            Self::PowerOn => 130,
            Self::Idle | Self::Running => 100,
        }
    }

    pub fn is_powered(&self) -> bool {
        matches!(self, Self::PowerOn | Self::Idle | Self::Backdrive | Self::Running)
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RobotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown robot mode '{}'", s))
    }
}

/// Safety status reported by the robot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyStatus {
    Normal,
    Reduced,
    ProtectiveStop,
    Recovery,
    SafeguardStop,
    SystemEmergencyStop,
    RobotEmergencyStop,
    Violation,
    Fault,
    AutomaticModeSafeguardStop,
    SystemThreePositionEnablingStop,
}

impl SafetyStatus {
    pub const ALL: [SafetyStatus; 11] = [
        Self::Normal,
        Self::Reduced,
        Self::ProtectiveStop,
        Self::Recovery,
        Self::SafeguardStop,
        Self::SystemEmergencyStop,
        Self::RobotEmergencyStop,
        Self::Violation,
        Self::Fault,
        Self::AutomaticModeSafeguardStop,
        Self::SystemThreePositionEnablingStop,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Reduced => "REDUCED",
            Self::ProtectiveStop => "PROTECTIVE_STOP",
            Self::Recovery => "RECOVERY",
            Self::SafeguardStop => "SAFEGUARD_STOP",
            Self::SystemEmergencyStop => "SYSTEM_EMERGENCY_STOP",
            Self::RobotEmergencyStop => "ROBOT_EMERGENCY_STOP",
            Self::Violation => "VIOLATION",
            Self::Fault => "FAULT",
            Self::AutomaticModeSafeguardStop => "AUTOMATIC_MODE_SAFEGUARD_STOP",
            Self::SystemThreePositionEnablingStop => "SYSTEM_THREE_POSITION_ENABLING_STOP",
        }
    }

    /// Any stop, fault or violation. Programs must not be started.
    pub fn is_locked(&self) -> bool {
        *self > Self::Reduced
    }
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SafetyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown safety status '{}'", s))
    }
}

/// Snapshot of the robot controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStatus {
    pub mode: RobotMode,
    pub safety: SafetyStatus,
    pub remote_control: bool,
    pub program_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_program: Option<String>,
}

impl DriverStatus {
    /// Reason the robot cannot start a program right now, if any.
    pub fn blocker(&self) -> Option<String> {
        if !self.remote_control {
            return Some("robot is in local control mode".to_string());
        }
        if self.safety.is_locked() {
            return Some(format!("robot safety status is {}", self.safety));
        }
        if self.program_running {
            return Some("robot is already executing another program".to_string());
        }
        if self.mode.status_code() >= 400 {
            return Some(format!("robot is in mode {}", self.mode));
        }
        None
    }
}

/// Common interface for robot backends.
pub trait ChangerDriver: Send {
    fn info(&self) -> &DriverInfo;

    /// Load and start program `name`. `tag` names the changer operation the
    /// program belongs to.
    fn run_program<'a>(&'a mut self, name: &'a str, tag: &'a str) -> DriverFuture<'a, ()>;

    fn stop<'a>(&'a mut self) -> DriverFuture<'a, ()>;

    fn pause<'a>(&'a mut self) -> DriverFuture<'a, ()>;

    /// Continue the loaded program.
    fn play<'a>(&'a mut self) -> DriverFuture<'a, ()>;

    fn status<'a>(&'a mut self) -> DriverFuture<'a, DriverStatus>;
}
