// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample magazine slot bookkeeping.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content of a slot without a sample.
pub const EMPTY_SLOT: &str = "";

/// Identifier stored for a sample that is present but not yet identified.
pub fn placeholder_id(slot: usize) -> String {
    format!("@{}", slot)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MagazineError {
    #[error("slot {slot} out of range (magazine has {len} slots)")]
    SlotOutOfRange { slot: usize, len: usize },
    #[error("slot {0} already holds sample '{1}'")]
    SlotOccupied(usize, String),
    #[error("sample '{0}' is not in the magazine")]
    UnknownSample(String),
    #[error("sample '{id}' is already stored in slot {slot}")]
    DuplicateSample { id: String, slot: usize },
    #[error("sample identifier must not be empty")]
    EmptyIdentifier,
}

/// Ordered collection of slots.
///
/// A non-empty identifier is stored in at most one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Magazine {
    slots: Vec<String>,
    #[serde(skip)]
    cursor: usize,
}

impl Magazine {
    pub fn new(nsamples: usize) -> Self {
        Self {
            slots: vec![EMPTY_SLOT.to_string(); nsamples],
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot holding `id`.
    pub fn slot_of(&self, id: &str) -> Option<usize> {
        if id.is_empty() {
            return None;
        }
        self.slots.iter().position(|s| s == id)
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_empty())
    }

    pub fn get_sample(&self, slot: usize) -> Result<Option<&str>, MagazineError> {
        let content = self.slot(slot)?;
        Ok((!content.is_empty()).then_some(content.as_str()))
    }

    pub fn samples(&self) -> &[String] {
        &self.slots
    }

    /// Occupied slots with their identifiers.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_empty())
            .map(|(i, s)| (i, s.as_str()))
    }

    pub fn insert(&mut self, slot: usize, id: &str) -> Result<(), MagazineError> {
        if id.is_empty() {
            return Err(MagazineError::EmptyIdentifier);
        }
        let content = self.slot(slot)?;
        if !content.is_empty() {
            return Err(MagazineError::SlotOccupied(slot, content.clone()));
        }
        if let Some(existing) = self.slot_of(id) {
            return Err(MagazineError::DuplicateSample {
                id: id.to_string(),
                slot: existing,
            });
        }
        self.slots[slot] = id.to_string();
        Ok(())
    }

    /// Remove `id` and return the slot it occupied.
    pub fn remove(&mut self, id: &str) -> Result<usize, MagazineError> {
        let slot = self
            .slot_of(id)
            .ok_or_else(|| MagazineError::UnknownSample(id.to_string()))?;
        self.slots[slot].clear();
        Ok(slot)
    }

    /// Replace the content of `slot` with a decoded identifier.
    pub fn update_sample(&mut self, slot: usize, id: &str) -> Result<(), MagazineError> {
        if id.is_empty() {
            return Err(MagazineError::EmptyIdentifier);
        }
        self.slot(slot)?;
        match self.slot_of(id) {
            Some(existing) if existing != slot => Err(MagazineError::DuplicateSample {
                id: id.to_string(),
                slot: existing,
            }),
            _ => {
                self.slots[slot] = id.to_string();
                Ok(())
            }
        }
    }

    /// Reconcile a presence flag. Returns true when the slot content changed.
    pub fn set_presence(&mut self, slot: usize, present: bool) -> Result<bool, MagazineError> {
        let content = self.slot(slot)?;
        match (present, content.is_empty()) {
            (false, false) => {
                self.slots[slot].clear();
                Ok(true)
            }
            (true, true) => {
                self.slots[slot] = placeholder_id(slot);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Clear every slot.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.cursor = 0;
    }

    /// Next occupied slot in round-robin order, starting after the slot
    /// returned last time.
    ///
    /// Occupancy is scanned on every call, so samples inserted after an
    /// empty result are picked up by the next call.
    pub fn next_occupied_sample(&mut self) -> Option<(usize, String)> {
        let len = self.slots.len();
        for offset in 0..len {
            let slot = (self.cursor + offset) % len;
            if !self.slots[slot].is_empty() {
                self.cursor = (slot + 1) % len;
                return Some((slot, self.slots[slot].clone()));
            }
        }
        None
    }

    fn slot(&self, slot: usize) -> Result<&String, MagazineError> {
        self.slots.get(slot).ok_or(MagazineError::SlotOutOfRange {
            slot,
            len: self.slots.len(),
        })
    }
}
