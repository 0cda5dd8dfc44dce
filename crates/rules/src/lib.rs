//! Threshold alerts over saved queries.
//!
//! This crate provides:
//! - request validation for alert create/update
//! - the alert state machine and notification gating (mute, cooldown)
//! - [`AlertEvaluator`], which runs one scheduled check end to end

pub mod coerce;
pub mod cooldown;
pub mod error;
pub mod evaluator;
pub mod operator;
pub mod request;
pub mod state;
pub mod store;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use error::{AlertError, EvalError};
pub use evaluator::{apply_check, evaluate, AlertEvaluator, CheckOutcome, Evaluation};
pub use operator::Operator;
pub use request::{
    AlertFilter, AlertStats, ChannelRequest, CreateAlertRequest, TestAlertRequest,
    TestAlertResponse, UpdateAlertRequest,
};
pub use state::{transition, AlertEvent};
pub use store::AlertStore;
pub use validation::{validate_create, validate_update};
