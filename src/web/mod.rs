//! HTTP API for front-ends
//!
//! Serves the cached codes, accepts notification opt-ins and exposes
//! recent logs and a manual check trigger.

mod api;
mod server;

pub use api::ApiState;
pub use server::{start_web_server, WebServerConfig};
