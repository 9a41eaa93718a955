use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use serde::Serialize;

use super::writer::{content_type, ResponseWriter};
use crate::core::FrameworkResult;

/// JSON responses with the usual status shortcuts
pub struct JsonResponse<'a> {
    writer: &'a ResponseWriter,
}

impl<'a> JsonResponse<'a> {
    pub fn new(writer: &'a ResponseWriter) -> Self {
        Self { writer }
    }

    pub fn success<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::OK, data)
    }

    pub fn error<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::INTERNAL_SERVER_ERROR, data)
    }

    pub fn timeout<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::GATEWAY_TIMEOUT, data)
    }

    pub fn busy<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.timeout(data)
    }

    pub fn forbidden<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::FORBIDDEN, data)
    }

    pub fn not_found<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::NOT_FOUND, data)
    }

    pub fn unauthorized<T: Serialize + ?Sized>(&self, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::UNAUTHORIZED, data)
    }

    /// Serialize `data` and send it with `status`. Nothing is written if
    /// serialization fails.
    pub fn response<T: Serialize + ?Sized>(&self, status: StatusCode, data: &T) -> FrameworkResult<()> {
        let body = serde_json::to_vec(data)?;
        self.writer.set_header(
            CONTENT_TYPE,
            HeaderValue::from_static(content_type::APPLICATION_JSON),
        );
        self.writer.write_header(status);
        self.writer.write(&body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_json_response() {
        let writer = ResponseWriter::new();
        JsonResponse::new(&writer)
            .unauthorized(&json!({"error": "login required"}))
            .unwrap();

        assert_eq!(writer.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(
            writer.header(CONTENT_TYPE).unwrap(),
            content_type::APPLICATION_JSON
        );
        assert_eq!(&writer.body()[..], br#"{"error":"login required"}"#);
    }

    #[test]
    fn test_serialization_failure_writes_nothing() {
        let writer = ResponseWriter::new();
        let bad: HashMap<(u8, u8), u8> = HashMap::from([((1, 1), 1)]);
        assert!(JsonResponse::new(&writer).success(&bad).is_err());
        assert!(!writer.is_written());
    }
}
