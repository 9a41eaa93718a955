use std::io;

use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use serde::Serialize;

use super::writer::{content_type, ResponseWriter};
use crate::{
    config_error,
    core::FrameworkResult,
    template::{Escape, TemplateEngine},
};

/// HTML responses rendered through the route's template engine.
///
/// Values are HTML-escaped unless [`HtmlResponse::unescaped`] is used.
pub struct HtmlResponse<'a> {
    writer: &'a ResponseWriter,
    engine: Option<&'a TemplateEngine>,
    escape: Escape,
}

impl<'a> HtmlResponse<'a> {
    pub fn new(writer: &'a ResponseWriter, engine: Option<&'a TemplateEngine>) -> Self {
        Self {
            writer,
            engine,
            escape: Escape::Html,
        }
    }

    /// Render without escaping interpolated values
    pub fn unescaped(mut self) -> Self {
        self.escape = Escape::None;
        self
    }

    pub fn success<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::OK, name, data)
    }

    pub fn error<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::INTERNAL_SERVER_ERROR, name, data)
    }

    pub fn busy<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::GATEWAY_TIMEOUT, name, data)
    }

    pub fn timeout<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.busy(name, data)
    }

    pub fn forbidden<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::FORBIDDEN, name, data)
    }

    pub fn not_found<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::NOT_FOUND, name, data)
    }

    pub fn unauthorized<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> FrameworkResult<()> {
        self.response(StatusCode::UNAUTHORIZED, name, data)
    }

    pub fn response<T: Serialize + ?Sized>(
        &self,
        status: StatusCode,
        name: &str,
        data: &T,
    ) -> FrameworkResult<()> {
        self.engine()?
            .render(self.writer, status, name, data, self.escape)
    }

    /// Render into `out` instead of the response
    pub fn render_to<W, T>(&self, out: W, name: &str, data: &T) -> FrameworkResult<()>
    where
        W: io::Write,
        T: Serialize + ?Sized,
    {
        self.engine()?.render_to(out, name, data, self.escape)
    }

    /// Send literal text
    pub fn string(&self, status: StatusCode, text: &str) -> FrameworkResult<()> {
        if !self.writer.has_header(CONTENT_TYPE) {
            self.writer
                .set_header(CONTENT_TYPE, HeaderValue::from_static(content_type::TEXT_PLAIN));
        }
        self.bytes(status, text.as_bytes())
    }

    pub fn bytes(&self, status: StatusCode, body: &[u8]) -> FrameworkResult<()> {
        self.writer.write_header(status);
        self.writer.write(body)?;
        Ok(())
    }

    /// Send the canonical reason phrase of `status` as the body
    pub fn status_text(&self, status: StatusCode) -> FrameworkResult<()> {
        self.string(status, status.canonical_reason().unwrap_or_default())
    }

    fn engine(&self) -> FrameworkResult<&'a TemplateEngine> {
        self.engine
            .ok_or_else(|| config_error!("no template engine configured for this route"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        core::FrameworkError,
        template::{MemorySource, TemplateDefinition},
    };
    use serde_json::json;

    fn engine() -> TemplateEngine {
        let source = MemorySource::new()
            .with("views/layout.html", "<main>{{ content | safe }}</main>")
            .with("views/hello.html", "hi {{ name }}");
        TemplateEngine::with_source(
            TemplateDefinition::new("views").master("layout"),
            Arc::new(source),
        )
    }

    #[test]
    fn test_shortcut_statuses() {
        let engine = engine();
        let cases: [(fn(&HtmlResponse<'_>) -> FrameworkResult<()>, StatusCode); 3] = [
            (|h| h.success("hello", &json!({"name": "a"})), StatusCode::OK),
            (|h| h.not_found("hello", &json!({"name": "a"})), StatusCode::NOT_FOUND),
            (|h| h.busy("hello", &json!({"name": "a"})), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (call, status) in cases {
            let writer = ResponseWriter::new();
            call(&HtmlResponse::new(&writer, Some(&engine))).unwrap();
            assert_eq!(writer.status(), Some(status));
            assert_eq!(&writer.body()[..], b"<main>hi a</main>");
        }
    }

    #[test]
    fn test_unescaped() {
        let engine = engine();
        let writer = ResponseWriter::new();
        HtmlResponse::new(&writer, Some(&engine))
            .unescaped()
            .success("hello.html", &json!({"name": "<em>"}))
            .unwrap();
        assert_eq!(&writer.body()[..], b"hi <em>");
    }

    #[test]
    fn test_render_to_buffer() {
        let engine = engine();
        let writer = ResponseWriter::new();
        let mut out = Vec::new();
        HtmlResponse::new(&writer, Some(&engine))
            .render_to(&mut out, "hello", &json!({"name": "b"}))
            .unwrap();

        assert_eq!(out, b"<main>hi b</main>");
        assert!(!writer.is_written());
    }

    #[test]
    fn test_missing_engine_is_configuration_error() {
        let writer = ResponseWriter::new();
        let err = HtmlResponse::new(&writer, None)
            .success("hello", &json!({}))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Configuration(_)));
    }

    #[test]
    fn test_status_text() {
        let writer = ResponseWriter::new();
        HtmlResponse::new(&writer, None)
            .status_text(StatusCode::FORBIDDEN)
            .unwrap();
        assert_eq!(writer.status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(&writer.body()[..], b"Forbidden");
        assert_eq!(writer.header(CONTENT_TYPE).unwrap(), content_type::TEXT_PLAIN);
    }
}
