//! Request orchestration layer
//!
//! Bounded execution of handlers, the bridges that plug them into axum and
//! the listener lifecycle.

pub mod executor;
pub mod lifecycle;
pub mod router;

pub use executor::BoundedExecutor;
pub use lifecycle::{shutdown_signal, LifecycleController, LifecycleState};
pub use router::RouteTarget;
