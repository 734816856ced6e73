// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample changer operating mode, commands and orchestration.

pub mod command;
pub mod controller;
pub mod orchestrator;
pub mod program;
pub mod request;
pub mod response;
pub mod state;
