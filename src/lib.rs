//! This crate contains the core of the timebox web framework.
//!
//! Handlers run under a per-route deadline with their database connection,
//! session and template engine provisioned by the framework, and a canned
//! busy response is sent when the deadline wins.

pub mod config;
pub mod core;
pub mod database;
pub mod logging;
pub mod orchestration;
pub mod resource;
pub mod server;
pub mod session;
pub mod template;
pub(crate) mod utils;
