//! Unified error handling for timebox
//!
//! Every fallible operation in the crate returns [`FrameworkResult`], so the
//! executor, the template engine and the resource providers share one error
//! vocabulary without depending on each other.

use std::{fmt, io, path::PathBuf};

/// Unified error types for the execution core
#[derive(Debug)]
pub enum FrameworkError {
    /// Invalid server configuration, fatal at startup
    Configuration(String),

    /// Settings file failed validation
    Validation(String),

    /// A scoped resource could not be acquired before dispatch
    Provisioning(String),

    /// The request deadline elapsed
    Timeout(String),

    /// The database connection was already returned to the pool
    ConnectionReleased,

    /// Session store failures
    Session(String),

    /// Named query could not be bound
    Query(String),

    /// A template file could not be read
    TemplateRead {
        name: String,
        path: PathBuf,
        source: io::Error,
    },

    /// A template set failed to parse
    TemplateCompile {
        name: String,
        path: PathBuf,
        message: String,
    },

    /// A compiled template failed while rendering
    TemplateExecute { name: String, message: String },

    /// The response sink was already turned into a response
    ResponseClosed,

    /// Encoding or decoding failures
    Serialization(String),

    /// Network and I/O errors
    Io(io::Error),
}

impl fmt::Display for FrameworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameworkError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            FrameworkError::Validation(msg) => write!(f, "Validation error: {msg}"),
            FrameworkError::Provisioning(msg) => write!(f, "Provisioning failed: {msg}"),
            FrameworkError::Timeout(msg) => write!(f, "Request timed out: {msg}"),
            FrameworkError::ConnectionReleased => {
                write!(f, "Database connection already returned to the pool")
            }
            FrameworkError::Session(msg) => write!(f, "Session error: {msg}"),
            FrameworkError::Query(msg) => write!(f, "Query error: {msg}"),
            FrameworkError::TemplateRead { name, path, source } => write!(
                f,
                "Template read failed, name: {name}, path: {}, error: {source}",
                path.display()
            ),
            FrameworkError::TemplateCompile {
                name,
                path,
                message,
            } => write!(
                f,
                "Template parse failed, name: {name}, path: {}, error: {message}",
                path.display()
            ),
            FrameworkError::TemplateExecute { name, message } => {
                write!(f, "Template execute failed, name: {name}, error: {message}")
            }
            FrameworkError::ResponseClosed => write!(f, "Response already sent"),
            FrameworkError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            FrameworkError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for FrameworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameworkError::Io(err) => Some(err),
            FrameworkError::TemplateRead { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl FrameworkError {
    /// Create a serialization error with context
    pub fn serialization_error(context: &str, err: impl fmt::Display) -> Self {
        FrameworkError::Serialization(format!("{context}: {err}"))
    }

    /// Whether this error was caused by the request deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameworkError::Timeout(_))
    }
}

// Error conversions
impl From<io::Error> for FrameworkError {
    fn from(err: io::Error) -> Self {
        FrameworkError::Io(err)
    }
}

impl From<serde_json::Error> for FrameworkError {
    fn from(err: serde_json::Error) -> Self {
        FrameworkError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for FrameworkError {
    fn from(err: serde_yaml::Error) -> Self {
        FrameworkError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for FrameworkError {
    fn from(err: validator::ValidationErrors) -> Self {
        FrameworkError::Validation(err.to_string())
    }
}

/// Result type alias for framework operations
pub type FrameworkResult<T> = std::result::Result<T, FrameworkError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> FrameworkResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> FrameworkResult<T> {
        self.map_err(|e| FrameworkError::Configuration(format!("{context}: {e}")))
    }
}

/// Convenience macro for configuration errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::FrameworkError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::FrameworkError::Configuration(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_errors_name_the_file() {
        let err = FrameworkError::TemplateRead {
            name: "index".to_string(),
            path: PathBuf::from("views/index.html"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("index"));
        assert!(msg.contains("views/index.html"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_with_context_maps_to_configuration() {
        let res: Result<(), &str> = Err("boom");
        match res.with_context("loading settings") {
            Err(FrameworkError::Configuration(msg)) => {
                assert_eq!(msg, "loading settings: boom")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("timeout {}s below minimum", 1);
        assert!(matches!(err, FrameworkError::Configuration(ref m) if m == "timeout 1s below minimum"));
    }
}
