// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Wire protocols of changer-rs.
//!
//! The robot controller talks a colon separated line protocol
//! ([`RobotMessage`]); operators send JSON lines ([`ClientEnvelope`]).

pub mod auth;
pub mod codec;
pub mod mapping;
pub mod types;

// Re-export commonly used items
pub use auth::{NoAuthValidator, SimpleTokenValidator, TokenValidator};
pub use codec::{format_get_reply, parse_envelope, parse_line, ParseError};
pub use mapping::client_command_to_changer;
pub use types::{ClientCommand, ClientEnvelope, ClientResponse, RobotMessage};
