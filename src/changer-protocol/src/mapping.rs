// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Mapping from operator commands to changer commands.

use changer_core::ChangerCommand;

use crate::types::ClientCommand;

/// Convert a ClientCommand to a ChangerCommand.
pub fn client_command_to_changer(cmd: ClientCommand) -> ChangerCommand {
    match cmd {
        ClientCommand::GetState => ChangerCommand::GetSnapshot,
        ClientCommand::Load => ChangerCommand::Load,
        ClientCommand::Unload { sample_id } => ChangerCommand::Unload { sample_id },
        ClientCommand::Scan => ChangerCommand::Scan,
        ClientCommand::Mount { sample_id } => ChangerCommand::Mount { sample_id },
        ClientCommand::Unmount => ChangerCommand::Unmount,
        ClientCommand::Next => ChangerCommand::Next,
        ClientCommand::RunProgram { name } => ChangerCommand::RunProgram { name },
        ClientCommand::Stop => ChangerCommand::Stop,
        ClientCommand::Pause => ChangerCommand::Pause,
        ClientCommand::Play => ChangerCommand::Play,
        ClientCommand::Reset => ChangerCommand::Reset,
    }
}
