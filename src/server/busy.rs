//! Canned responses for requests the executor gives up on.

use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};

use crate::{
    core::FrameworkError,
    resource::writer::{content_type, ResponseWriter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    /// The request deadline elapsed
    Timeout,
    /// A resource could not be provisioned
    Unavailable,
}

/// Writes the response sent when a request times out or cannot get its resources
pub trait BusyResponder: Send + Sync {
    fn respond(&self, writer: &ResponseWriter, reason: BusyReason, error: &FrameworkError);
}

/// Plain-text busy responses with a fixed status per reason
#[derive(Debug, Clone)]
pub struct StatusBusyResponder {
    timeout_status: StatusCode,
    unavailable_status: StatusCode,
}

impl Default for StatusBusyResponder {
    fn default() -> Self {
        Self {
            timeout_status: StatusCode::GATEWAY_TIMEOUT,
            unavailable_status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl StatusBusyResponder {
    pub fn new(timeout_status: StatusCode, unavailable_status: StatusCode) -> Self {
        Self {
            timeout_status,
            unavailable_status,
        }
    }

    pub fn status_for(&self, reason: BusyReason) -> StatusCode {
        match reason {
            BusyReason::Timeout => self.timeout_status,
            BusyReason::Unavailable => self.unavailable_status,
        }
    }
}

impl BusyResponder for StatusBusyResponder {
    fn respond(&self, writer: &ResponseWriter, reason: BusyReason, error: &FrameworkError) {
        let status = self.status_for(reason);
        log::warn!("Responding {status} ({reason:?}): {error}");

        if writer.is_written() {
            log::debug!("Response already started, busy body skipped");
            return;
        }
        writer.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type::TEXT_PLAIN));
        writer.write_header(status);
        if let Err(e) = writer.write(status.canonical_reason().unwrap_or_default().as_bytes()) {
            log::debug!("Failed to write busy response: {e}");
        }
    }
}
