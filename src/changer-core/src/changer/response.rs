// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::changer::controller::TransitionError;
use crate::changer::state::ChangerState;
use crate::magazine::MagazineError;

/// Error type returned by changer requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Magazine(#[from] MagazineError),
    #[error("changer must be at home, current state is '{0}'")]
    NotAtHome(ChangerState),
    #[error("no free slot in the magazine")]
    NoFreeSlot,
    #[error("robot is not holding a sample")]
    NotHoldingSample,
    #[error("sample '{0}' is already mounted")]
    AlreadyMounted(String),
    #[error("sample '{0}' is mounted and cannot be unloaded")]
    SampleMounted(String),
    #[error("magazine is empty")]
    MagazineEmpty,
    #[error("invalid program: {0}")]
    InvalidProgram(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("changer task unavailable")]
    Unavailable,
}

pub type ChangerResult<T> = Result<T, ChangerError>;

impl ChangerError {
    pub fn driver(err: impl std::fmt::Display) -> Self {
        Self::Driver(err.to_string())
    }
}

impl Serialize for ChangerError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
