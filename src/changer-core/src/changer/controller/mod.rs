// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Changer controller components.
//!
//! The state machine, the completion callback registry and event bus, and
//! the retry/polling policies used when talking to the robot.

pub mod events;
pub mod machine;
pub mod policies;

pub use events::{
    CallbackEntry, CallbackHandler, CallbackRegistry, ChangerEventBus, DispatchReport, ListenerId,
    Outcome, SlotListener, TransitionListener,
};
pub use machine::{ChangerEvent, ChangerStateMachine, FireArgs, Transition, TransitionError};
pub use policies::{AdaptivePolling, ExponentialBackoff, PollingPolicy, RetryPolicy};
