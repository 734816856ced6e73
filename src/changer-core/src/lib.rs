// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod changer;
pub mod driver;
pub mod magazine;
pub mod vision;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use changer::command::ChangerCommand;
pub use changer::orchestrator::SampleChanger;
pub use changer::request::ChangerRequest;
pub use changer::response::{ChangerError, ChangerResult};
pub use changer::state::{ChangerSnapshot, ChangerState, ChangerStatus};
pub use magazine::{Magazine, MagazineError};
