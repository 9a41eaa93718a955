//! Core abstractions for timebox
//!
//! This module provides the error vocabulary and the request context that
//! every other layer builds on.

pub mod context;
pub mod error;

// Re-export commonly used types
pub use context::{ContextError, RequestContext};
pub use error::{ErrorContext, FrameworkError, FrameworkResult};
