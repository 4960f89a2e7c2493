//! # elevox-server
//!
//! HTTP server library for elevox: serves the detected floor, the scan status
//! and diagnostics of the background scan cycle.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod server;
pub mod state;
