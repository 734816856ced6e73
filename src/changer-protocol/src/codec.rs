// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Parsing of robot lines and operator envelopes.

use thiserror::Error;

use crate::types::{ClientCommand, ClientEnvelope, RobotMessage};

/// A robot line that does not match any known message shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown message '{0}'")]
    UnknownMessage(String),
    #[error("malformed {kind} message '{line}'")]
    Malformed { kind: &'static str, line: String },
    #[error("invalid slot number '{0}'")]
    InvalidSlot(String),
    #[error("invalid presence flag '{0}'")]
    InvalidFlag(String),
}

/// Parse one robot line. Surrounding whitespace (including the line
/// terminator) is ignored.
pub fn parse_line(line: &str) -> Result<RobotMessage, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(key) = line.strip_prefix("GET ") {
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(malformed("GET", line));
        }
        return Ok(RobotMessage::Get {
            key: key.to_string(),
        });
    }

    let (head, rest) = match line.split_once(':') {
        Some((head, rest)) => (head, Some(rest)),
        None => (line, None),
    };

    match (head, rest) {
        ("ok", None) => Ok(RobotMessage::Ok),
        ("error", None) => Ok(RobotMessage::Error { message: None }),
        ("error", Some(message)) => Ok(RobotMessage::Error {
            message: Some(message.to_string()),
        }),
        ("QR", Some(rest)) => {
            if rest.contains(':') {
                return Err(malformed("QR", line));
            }
            Ok(RobotMessage::Qr {
                slot: parse_slot(rest)?,
            })
        }
        ("Slot", Some(rest)) => {
            let Some((slot, flag)) = rest.split_once(':') else {
                return Err(malformed("Slot", line));
            };
            if flag.contains(':') {
                return Err(malformed("Slot", line));
            }
            Ok(RobotMessage::Slot {
                slot: parse_slot(slot)?,
                present: parse_flag(flag)?,
            })
        }
        ("ok", Some(_)) => Err(malformed("ok", line)),
        _ => Err(ParseError::UnknownMessage(line.to_string())),
    }
}

fn malformed(kind: &'static str, line: &str) -> ParseError {
    ParseError::Malformed {
        kind,
        line: line.to_string(),
    }
}

fn parse_slot(value: &str) -> Result<usize, ParseError> {
    match value.trim().parse::<usize>() {
        Ok(slot) if slot > 0 => Ok(slot),
        _ => Err(ParseError::InvalidSlot(value.to_string())),
    }
}

fn parse_flag(value: &str) -> Result<bool, ParseError> {
    match value.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ParseError::InvalidFlag(other.to_string())),
    }
}

/// Reply to a `GET <key>` probe.
pub fn format_get_reply(key: &str) -> String {
    format!("{} 1\n", key)
}

/// Parse a JSON string into a ClientEnvelope.
///
/// First tries to parse as a full ClientEnvelope.
/// If that fails, tries to parse as a bare ClientCommand and wraps it with token: None.
pub fn parse_envelope(input: &str) -> Result<ClientEnvelope, serde_json::Error> {
    match serde_json::from_str::<ClientEnvelope>(input) {
        Ok(envelope) => Ok(envelope),
        Err(_) => {
            let cmd = serde_json::from_str::<ClientCommand>(input)?;
            Ok(ClientEnvelope { token: None, cmd })
        }
    }
}
