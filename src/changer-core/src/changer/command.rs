// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Internal command handled by the changer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangerCommand {
    GetSnapshot,
    /// Put a new sample into the first free slot.
    Load,
    Unload { sample_id: String },
    Scan,
    /// Mount `sample_id`, switching out the currently mounted sample.
    Mount { sample_id: String },
    Unmount,
    /// Mount the next occupied slot in round-robin order.
    Next,
    RunProgram { name: String },
    Stop,
    Pause,
    Play,
    Reset,
}
