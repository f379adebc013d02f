//! Outlay HTTP API: webhook ingress, request gate and health endpoints.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use server::{create_router, shutdown_signal, start_server, AppState};
