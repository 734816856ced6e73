// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Message types of the robot line protocol and the operator JSON protocol.

use serde::{Deserialize, Serialize};

use changer_core::ChangerSnapshot;

/// One line received from the robot controller.
///
/// Slot numbers are one based, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotMessage {
    /// `Slot:<n>:<0|1>`, presence flag of slot `n`.
    Slot { slot: usize, present: bool },
    /// `QR:<n>`, the camera is in front of slot `n`.
    Qr { slot: usize },
    /// `GET <key>`, status probe answered with `<key> 1`.
    Get { key: String },
    /// `ok`, the last program finished.
    Ok,
    /// `error` or `error:<message>`, the last program failed.
    Error { message: Option<String> },
}

/// Command received from operators (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    GetState,
    Load,
    Unload { sample_id: String },
    Scan,
    Mount { sample_id: String },
    Unmount,
    Next,
    RunProgram { name: String },
    Stop,
    Pause,
    Play,
    Reset,
}

/// Envelope for operator commands with optional authentication token.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub token: Option<String>,
    #[serde(flatten)]
    pub cmd: ClientCommand,
}

/// Response sent to operators over TCP.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientResponse {
    pub success: bool,
    pub state: Option<ChangerSnapshot>,
    pub error: Option<String>,
}

impl ClientResponse {
    pub fn ok(state: ChangerSnapshot) -> Self {
        Self {
            success: true,
            state: Some(state),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            state: None,
            error: Some(message.into()),
        }
    }
}
