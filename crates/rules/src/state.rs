//! Alert state machine.
//!
//! [`transition`] is a pure function of the current state, the alert's
//! last evaluation outcome and the event. Side effects (counters,
//! timestamps, notifications) are applied by the evaluator.

use cadence_core::model::{AlertState, LastStatus};

use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    /// An evaluation produced a value; `triggered` is the predicate.
    Evaluated { triggered: bool },
    EvaluationFailed,
    Acknowledge,
    Mute,
    /// Explicit unmute, or `muted_until` has passed.
    Unmute,
}

impl AlertEvent {
    fn action(&self) -> &'static str {
        match self {
            AlertEvent::Evaluated { .. } => "evaluate",
            AlertEvent::EvaluationFailed => "fail",
            AlertEvent::Acknowledge => "acknowledge",
            AlertEvent::Mute => "mute",
            AlertEvent::Unmute => "unmute",
        }
    }
}

/// State restored when a mute ends.
pub fn restored_state(last_status: Option<LastStatus>) -> AlertState {
    match last_status {
        Some(LastStatus::Triggered) => AlertState::Triggered,
        _ => AlertState::Ok,
    }
}

pub fn transition(
    current: AlertState,
    last_status: Option<LastStatus>,
    event: AlertEvent,
) -> Result<AlertState, AlertError> {
    let next = match (current, event) {
        (_, AlertEvent::EvaluationFailed) => AlertState::Error,
        (_, AlertEvent::Mute) => AlertState::Muted,

        // Muted alerts keep evaluating; only last_status moves.
        (AlertState::Muted, AlertEvent::Evaluated { .. }) => AlertState::Muted,
        (AlertState::Muted, AlertEvent::Unmute) => restored_state(last_status),
        (other, AlertEvent::Unmute) => other,

        // Acknowledged holds while the condition stays true.
        (AlertState::Acknowledged, AlertEvent::Evaluated { triggered: true }) => {
            AlertState::Acknowledged
        }
        (_, AlertEvent::Evaluated { triggered: true }) => AlertState::Triggered,
        (_, AlertEvent::Evaluated { triggered: false }) => AlertState::Ok,

        (
            AlertState::Ok | AlertState::Triggered | AlertState::Acknowledged,
            AlertEvent::Acknowledge,
        ) => AlertState::Acknowledged,
        (state @ (AlertState::Muted | AlertState::Error), AlertEvent::Acknowledge) => {
            return Err(AlertError::InvalidTransition {
                action: event.action(),
                state: state.to_string(),
            })
        }
    };
    Ok(next)
}
