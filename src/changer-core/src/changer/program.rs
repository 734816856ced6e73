// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Robot programs run by the changer.

use std::fmt;
use std::str::FromStr;

use crate::changer::response::ChangerError;

const PROGRAM_SUFFIX: &str = ".urp";

/// A program stored on the robot controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotProgram {
    /// Carry a new sample from the load station into `slot`.
    Load { slot: usize },
    /// Carry the sample in `slot` out of the magazine.
    Unload { slot: usize },
    /// Move the sample in `slot` to the measurement position.
    Mount { slot: usize },
    /// Return the mounted sample to `slot`.
    Unmount { slot: usize },
    /// Visit every slot with the camera and the presence sensor.
    Scan,
    /// Return the arm to its home position.
    Reset,
    Named(String),
}

impl RobotProgram {
    /// Validated arbitrary program name.
    pub fn named(name: &str) -> Result<Self, ChangerError> {
        let name = name.trim();
        if name.len() <= PROGRAM_SUFFIX.len() || !name.ends_with(PROGRAM_SUFFIX) {
            return Err(ChangerError::InvalidProgram(format!(
                "'{}' is not a {} file",
                name, PROGRAM_SUFFIX
            )));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ChangerError::InvalidProgram(format!(
                "'{}' contains whitespace",
                name
            )));
        }
        Ok(Self::Named(name.to_string()))
    }

    /// File name on the controller. Slot numbers in file names are zero based.
    pub fn file_name(&self) -> String {
        match self {
            Self::Load { slot } => format!("in{}{}", slot, PROGRAM_SUFFIX),
            Self::Unload { slot } => format!("out{}{}", slot, PROGRAM_SUFFIX),
            Self::Mount { slot } => format!("messpos{}{}", slot, PROGRAM_SUFFIX),
            Self::Unmount { slot } => format!("messposin{}{}", slot, PROGRAM_SUFFIX),
            Self::Scan => format!("scan{}", PROGRAM_SUFFIX),
            Self::Reset => format!("reset{}", PROGRAM_SUFFIX),
            Self::Named(name) => name.clone(),
        }
    }

    /// Slot a sample was carried to or from when this program ran.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::Load { slot }
            | Self::Unload { slot }
            | Self::Mount { slot }
            | Self::Unmount { slot } => Some(*slot),
            Self::Scan | Self::Reset | Self::Named(_) => None,
        }
    }

    /// True for programs during which the gripper holds a sample outside
    /// the magazine.
    pub fn carries_sample(&self) -> bool {
        matches!(self, Self::Mount { .. } | Self::Unmount { .. })
    }
}

impl fmt::Display for RobotProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl FromStr for RobotProgram {
    type Err = ChangerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(stem) = s.strip_suffix(PROGRAM_SUFFIX) else {
            return Self::named(s);
        };
        match stem {
            "scan" => return Ok(Self::Scan),
            "reset" => return Ok(Self::Reset),
            _ => {}
        }

        // "messposin" shares its prefix with "messpos".
        let slotted: [(&str, fn(usize) -> RobotProgram); 4] = [
            ("messposin", |slot| Self::Unmount { slot }),
            ("messpos", |slot| Self::Mount { slot }),
            ("in", |slot| Self::Load { slot }),
            ("out", |slot| Self::Unload { slot }),
        ];
        for (prefix, build) in slotted {
            if let Some(digits) = stem.strip_prefix(prefix) {
                if let Ok(slot) = digits.parse::<usize>() {
                    return Ok(build(slot));
                }
            }
        }
        Self::named(s)
    }
}
