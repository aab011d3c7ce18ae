//! Generation worker library.
//!
//! Exposes the building blocks of the worker binary (config, state, error
//! handling, routes, WebSocket push channel) so integration tests and the
//! entrypoint share them.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
