// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tokio::sync::oneshot;

use crate::{ChangerCommand, ChangerResult, ChangerSnapshot};

/// Request sent to the changer task.
#[derive(Debug)]
pub struct ChangerRequest {
    pub cmd: ChangerCommand,
    pub respond_to: oneshot::Sender<ChangerResult<ChangerSnapshot>>,
}
