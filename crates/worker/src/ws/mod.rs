//! WebSocket push channel for job events.
//!
//! Each connection is registered in the shared
//! [`ConnectionRegistry`](genforge_events::ConnectionRegistry) under the
//! owner it was opened for; the job notifier writes to it from there.

mod handler;
mod heartbeat;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
