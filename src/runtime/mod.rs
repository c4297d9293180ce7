//! # Runtime
//!
//! Process-level wiring around the controller.
//!
//! - `initialization`: rustls, tracing, metrics and the probe server
//! - `client`: Kubernetes client resolution
//! - `shutdown`: signal handling
//! - `watch_loop`: builds and runs the controller for the configured target

pub mod client;
pub mod initialization;
pub mod shutdown;
pub mod watch_loop;
