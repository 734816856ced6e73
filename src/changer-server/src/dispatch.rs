// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Handling of robot messages.
//!
//! Slot and QR reports advance the scan chain, `ok`/`error` are routed to
//! the completion handlers by the tag of the current state.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use changer_core::changer::controller::{ChangerEvent, ChangerEventBus, FireArgs, Outcome};
use changer_core::{ChangerState, SampleChanger};
use changer_protocol::{format_get_reply, RobotMessage};

use crate::vision::Vision;

pub struct RobotDispatcher {
    changer: SampleChanger,
    bus: Arc<ChangerEventBus>,
    vision: Arc<Vision>,
}

impl RobotDispatcher {
    pub fn new(changer: SampleChanger, bus: Arc<ChangerEventBus>, vision: Arc<Vision>) -> Self {
        Self {
            changer,
            bus,
            vision,
        }
    }

    /// Handle one robot message. Returns the reply line, if any.
    pub async fn handle(&self, msg: RobotMessage) -> Option<String> {
        match msg {
            RobotMessage::Slot { slot, present } => {
                self.on_slot(slot, present);
                None
            }
            RobotMessage::Qr { slot } => {
                self.on_qr(slot).await;
                None
            }
            RobotMessage::Get { key } => Some(format_get_reply(&key)),
            RobotMessage::Ok => {
                self.on_ok();
                None
            }
            RobotMessage::Error { message } => {
                self.on_error(message.as_deref());
                None
            }
        }
    }

    fn check_slot(&self, kind: &str, slot: usize) -> bool {
        let nsamples = self.changer.nsamples();
        if slot > nsamples {
            warn!("{}:{} ignored, magazine has {} slots", kind, slot, nsamples);
            return false;
        }
        true
    }

    /// Fire a robot-reported scan step. The tag of the running program is
    /// kept so its acknowledgement reaches the right handlers.
    fn advance(&self, event: ChangerEvent) {
        let args = self.changer.tag().map(FireArgs::tagged).unwrap_or_default();
        if let Err(e) = self.changer.fire(event, args) {
            warn!("Robot report out of sequence: {}", e);
        }
    }

    fn last_slot_or_next(&self, slot: usize, last: ChangerEvent) -> ChangerEvent {
        if slot == self.changer.nsamples() {
            last
        } else {
            ChangerEvent::NextSlot
        }
    }

    fn on_slot(&self, slot: usize, present: bool) {
        if !self.check_slot("Slot", slot) {
            return;
        }
        self.bus.notify_presence(slot - 1, present);
        self.advance(self.last_slot_or_next(slot, ChangerEvent::FinishedPresenceDetection));
    }

    async fn on_qr(&self, slot: usize) {
        if !self.check_slot("QR", slot) {
            return;
        }
        match self.changer.state() {
            ChangerState::MovingToScanPos | ChangerState::MovingToScanPosMounted => {
                self.advance(ChangerEvent::AtScanPos);
                match self.scan().await {
                    Some(id) => self.bus.notify_sample_identified(slot - 1, &id),
                    None => info!("No sample identified at slot {}", slot),
                }
                self.advance(self.last_slot_or_next(slot, ChangerEvent::FinishedScanning));
            }
            ChangerState::Mounting => match self.scan().await {
                Some(id) => info!("QR at mount position: {}", id),
                None => info!("No QR code at mount position"),
            },
            state => warn!("QR:{} ignored in state {}", slot, state),
        }
    }

    async fn scan(&self) -> Option<String> {
        let vision = self.vision.clone();
        match tokio::task::spawn_blocking(move || vision.scan()).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!("Camera capture failed: {}", e);
                None
            }
            Err(e) => {
                error!("Vision task failed: {}", e);
                None
            }
        }
    }

    fn on_ok(&self) {
        let tag = self.changer.tag().unwrap_or_default();
        let report = self.bus.dispatch(Outcome::Ok, &tag, None);
        debug!("ok [{}]: {} handler(s), {} failed", tag, report.matched, report.failed);
        if let Err(e) = self.changer.fire(ChangerEvent::ProgramFinished, FireArgs::default()) {
            warn!("Unexpected ok: {}", e);
        }
    }

    fn on_error(&self, message: Option<&str>) {
        let tag = self.changer.tag().unwrap_or_default();
        warn!("Robot error [{}]: {}", tag, message.unwrap_or(""));
        self.bus.dispatch(Outcome::Error, &tag, Some(message.unwrap_or("")));
    }
}
