// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Changer event notification.
//!
//! Completion acknowledgements from the robot (`ok` / `error`) are routed
//! through a callback registry keyed by (outcome, tag), where the tag is the
//! one recorded on the state that started the program. Vision and presence
//! results are fanned out to slot listeners. Every handler call is isolated:
//! a failing or panicking handler is logged and the remaining handlers run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::DynResult;

use super::machine::Transition;

/// Result reported by the robot for the last program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Ok,
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Completion handler. Receives the optional message of the acknowledgement.
pub type CallbackHandler = Arc<dyn Fn(Option<&str>) -> DynResult<()> + Send + Sync>;

/// One (outcome, tag, handler) registration.
#[derive(Clone)]
pub struct CallbackEntry {
    pub outcome: Outcome,
    pub tag: String,
    handler: CallbackHandler,
}

impl CallbackEntry {
    pub fn new<F>(outcome: Outcome, tag: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<&str>) -> DynResult<()> + Send + Sync + 'static,
    {
        Self {
            outcome,
            tag: tag.into(),
            handler: Arc::new(handler),
        }
    }

    fn matches(&self, outcome: Outcome, tag: &str) -> bool {
        self.outcome == outcome && self.tag == tag
    }
}

impl fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("outcome", &self.outcome)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// How a dispatch went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers whose key matched.
    pub matched: usize,
    /// Matched handlers that returned an error or panicked.
    pub failed: usize,
}

/// Ordered (outcome, tag) -> handlers table.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: Vec<CallbackEntry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entries. Duplicated keys are kept and all of them fire.
    pub fn register<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = CallbackEntry>,
    {
        self.entries.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke every matching handler in registration order.
    pub fn dispatch(&self, outcome: Outcome, tag: &str, arg: Option<&str>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for entry in self.entries.iter().filter(|e| e.matches(outcome, tag)) {
            report.matched += 1;
            let handler = &entry.handler;
            match catch_unwind(AssertUnwindSafe(|| handler(arg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!("{}/{} handler failed: {}", outcome, tag, e);
                }
                Err(_) => {
                    report.failed += 1;
                    error!("{}/{} handler panicked", outcome, tag);
                }
            }
        }

        if report.matched == 0 {
            match outcome {
                Outcome::Error => warn!(
                    "Unhandled error acknowledgement for '{}': {}",
                    tag,
                    arg.unwrap_or("")
                ),
                Outcome::Ok => debug!("No handler for ok/{}", tag),
            }
        }

        report
    }
}

/// Receives every completed state machine transition.
///
/// Called with the state machine borrowed; implementations must not try to
/// fire events or lock the machine.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

/// Receives per-slot results of scan and presence detection runs.
///
/// Slots are zero based.
pub trait SlotListener: Send + Sync {
    /// A QR code was decoded at `slot`.
    fn on_sample_identified(&self, _slot: usize, _sample_id: &str) -> DynResult<()> {
        Ok(())
    }

    /// The robot reported whether `slot` holds a sample.
    fn on_presence(&self, _slot: usize, _present: bool) -> DynResult<()> {
        Ok(())
    }
}

/// Unique identifier for a registered slot listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The single event bus of a changer process.
///
/// Components subscribe while the server starts up; afterwards the bus is
/// shared read-only behind an `Arc`.
#[derive(Default)]
pub struct ChangerEventBus {
    callbacks: CallbackRegistry,
    slot_listeners: Vec<(ListenerId, Arc<dyn SlotListener>)>,
}

impl fmt::Debug for ChangerEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangerEventBus")
            .field("callbacks", &self.callbacks.len())
            .field("slot_listeners", &self.slot_listeners.len())
            .finish()
    }
}

impl ChangerEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = CallbackEntry>,
    {
        self.callbacks.register(entries);
    }

    pub fn subscribe_slots(&mut self, listener: Arc<dyn SlotListener>) -> ListenerId {
        let id = ListenerId::new();
        self.slot_listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.slot_listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn slot_listener_count(&self) -> usize {
        self.slot_listeners.len()
    }

    pub fn dispatch(&self, outcome: Outcome, tag: &str, arg: Option<&str>) -> DispatchReport {
        self.callbacks.dispatch(outcome, tag, arg)
    }

    pub fn notify_sample_identified(&self, slot: usize, sample_id: &str) {
        for (_, listener) in &self.slot_listeners {
            isolate("sample identified", || {
                listener.on_sample_identified(slot, sample_id)
            });
        }
    }

    pub fn notify_presence(&self, slot: usize, present: bool) {
        for (_, listener) in &self.slot_listeners {
            isolate("presence", || listener.on_presence(slot, present));
        }
    }
}

fn isolate<F>(what: &str, f: F)
where
    F: FnOnce() -> DynResult<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{} listener failed: {}", what, e),
        Err(_) => error!("{} listener panicked", what),
    }
}
