//! Event bus and client push infrastructure for job lifecycle events.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying [`PlatformEvent`]s for
//!   operators and other in-process consumers.
//! - [`ConnectionRegistry`] — owner-keyed live client connections.
//! - [`JobNotifier`] — the publisher the engine calls on every state
//!   change; fans out to both of the above.
//! - [`AlertLog`] — bus consumer that logs operational alerts.

pub mod alerts;
pub mod bus;
pub mod notifier;
pub mod registry;

pub use alerts::AlertLog;
pub use bus::{EventBus, PlatformEvent};
pub use notifier::JobNotifier;
pub use registry::ConnectionRegistry;
