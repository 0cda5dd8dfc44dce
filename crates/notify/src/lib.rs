//! Alert notification delivery.
//!
//! - [`Notifier`] trait for pluggable channels
//! - webhook, Slack and Teams notifiers with bounded retry
//! - minijinja rendering of subjects and bodies
//! - [`Dispatcher`] fanning one notification out to an alert's channels

pub mod chat;
pub mod dispatcher;
pub mod registry;
pub mod retry;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::{ChannelTarget, Dispatcher};
pub use registry::ChannelRegistry;
pub use retry::RetryPolicy;
pub use templating::{AlertContext, TemplateRenderer};
pub use traits::{DispatchResult, Notification, Notifier, NotifyError};
