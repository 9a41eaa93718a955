//! Buffered response sink shared between the executor, the busy responder and
//! the handler task.
//!
//! The sink is turned into an HTTP response exactly once, by [`ResponseWriter::finish`].
//! Writes arriving after that fail with [`FrameworkError::ResponseClosed`].

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use axum::{body::Body, response::Response};
use bytes::{Bytes, BytesMut};
use http::{
    header::{AsHeaderName, SET_COOKIE},
    HeaderMap, HeaderName, HeaderValue, StatusCode,
};

use crate::{
    core::{FrameworkError, FrameworkResult},
    session::CookieOptions,
};

/// Standard content types
pub mod content_type {
    pub const TEXT_HTML: &str = "text/html; charset=utf-8";
    pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";
    pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
}

#[derive(Default)]
struct SinkState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct ResponseWriter {
    state: Arc<Mutex<SinkState>>,
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ResponseWriter")
            .field("status", &state.status)
            .field("body_len", &state.body.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace a header value. Ignored once the response is finished.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.lock();
        if state.closed {
            log::debug!("Dropping header '{name}' set after the response was sent");
            return;
        }
        state.headers.insert(name, value);
    }

    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.lock();
        if state.closed {
            log::debug!("Dropping header '{name}' appended after the response was sent");
            return;
        }
        state.headers.append(name, value);
    }

    /// Add a `Set-Cookie` header for `options.name`. Earlier cookies are kept.
    pub fn add_cookie(
        &self,
        options: &CookieOptions,
        value: &str,
        max_age: Option<Duration>,
    ) -> FrameworkResult<()> {
        let cookie = options.header_value(value, max_age)?;
        self.append_header(SET_COOKIE, cookie);
        Ok(())
    }

    /// Tell the client to drop cookie `options.name`
    pub fn remove_cookie(&self, options: &CookieOptions) -> FrameworkResult<()> {
        self.add_cookie(options, "", Some(Duration::ZERO))
    }

    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<HeaderValue> {
        self.lock().headers.get(name).cloned()
    }

    pub fn has_header<K: AsHeaderName>(&self, name: K) -> bool {
        self.lock().headers.contains_key(name)
    }

    /// Commit the status code. Only the first call has effect.
    pub fn write_header(&self, status: StatusCode) {
        let mut state = self.lock();
        match state.status {
            Some(existing) => {
                log::warn!("Superfluous write_header call with {status}, status already {existing}")
            }
            None if state.closed => {
                log::debug!("Dropping status {status} written after the response was sent")
            }
            None => state.status = Some(status),
        }
    }

    /// Append body bytes, committing an implicit 200 if no status was written
    pub fn write(&self, buf: &[u8]) -> FrameworkResult<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(FrameworkError::ResponseClosed);
        }
        state.status.get_or_insert(StatusCode::OK);
        state.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    /// Whether a status has been committed
    pub fn is_written(&self) -> bool {
        self.lock().status.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    /// Copy of the buffered body
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.lock().body)
    }

    /// Reject further writes while keeping the buffered contents for [`finish`](Self::finish)
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Discard everything buffered so far, take over `replacement`'s status,
    /// headers and body, and close the sink.
    ///
    /// Happens under a single lock, so a concurrent writer sees either the old
    /// contents or a closed sink.
    pub fn replace_and_close(&self, replacement: ResponseWriter) {
        let incoming = std::mem::take(&mut *replacement.lock());
        let mut state = self.lock();
        *state = SinkState {
            closed: true,
            ..incoming
        };
    }

    /// Close the sink and turn its contents into a response
    pub fn finish(&self) -> Response {
        let mut state = self.lock();
        state.closed = true;
        let status = state.status.unwrap_or(StatusCode::OK);
        let headers = std::mem::take(&mut state.headers);
        let body = std::mem::take(&mut state.body).freeze();
        drop(state);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    /// Copy headers set on the sink onto a downstream response
    pub fn merge_headers_into(&self, headers: &mut HeaderMap) {
        let state = self.lock();
        for (name, value) in state.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::write(self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn test_first_status_wins() {
        let writer = ResponseWriter::new();
        writer.write_header(StatusCode::GATEWAY_TIMEOUT);
        writer.write_header(StatusCode::OK);

        assert_eq!(writer.status(), Some(StatusCode::GATEWAY_TIMEOUT));
    }

    #[test]
    fn test_write_implies_ok() {
        let writer = ResponseWriter::new();
        assert!(!writer.is_written());
        writer.write(b"hello").unwrap();

        assert_eq!(writer.status(), Some(StatusCode::OK));
        assert_eq!(writer.body(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_writes_after_finish_fail() {
        let writer = ResponseWriter::new();
        writer.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type::TEXT_PLAIN));
        writer.write_header(StatusCode::CREATED);
        let response = writer.finish();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            content_type::TEXT_PLAIN
        );
        assert!(matches!(
            writer.write(b"late"),
            Err(FrameworkError::ResponseClosed)
        ));
    }

    #[test]
    fn test_close_keeps_buffered_response() {
        let writer = ResponseWriter::new();
        writer.write_header(StatusCode::GATEWAY_TIMEOUT);
        writer.write(b"Gateway Timeout").unwrap();
        writer.close();

        assert!(matches!(writer.write(b"late"), Err(FrameworkError::ResponseClosed)));
        let response = writer.finish();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(writer.body(), Bytes::new());
    }

    #[test]
    fn test_replace_discards_partial_body() {
        let writer = ResponseWriter::new();
        writer.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type::TEXT_HTML));
        writer.write(b"<html><body>half").unwrap();

        let busy = ResponseWriter::new();
        busy.write_header(StatusCode::GATEWAY_TIMEOUT);
        busy.write(b"Gateway Timeout").unwrap();
        writer.replace_and_close(busy);

        assert!(writer.is_closed());
        assert!(matches!(writer.write(b"more"), Err(FrameworkError::ResponseClosed)));
        let response = writer.finish();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_cookies_accumulate() {
        let writer = ResponseWriter::new();
        let theme = CookieOptions {
            name: "theme".to_string(),
            http_only: false,
            ..CookieOptions::default()
        };
        let lang = CookieOptions {
            name: "lang".to_string(),
            ..theme.clone()
        };
        writer.add_cookie(&theme, "dark", None).unwrap();
        writer.remove_cookie(&lang).unwrap();

        let response = writer.finish();
        let cookies: Vec<_> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            cookies,
            vec![
                "theme=dark; Path=/; SameSite=Lax".to_string(),
                "lang=; Path=/; Max-Age=0; SameSite=Lax".to_string(),
            ]
        );
    }

    #[test]
    fn test_clones_share_state() {
        let writer = ResponseWriter::new();
        let other = writer.clone();
        other.write(b"x").unwrap();
        assert!(writer.is_written());
    }

    #[test]
    fn test_merge_headers() {
        let writer = ResponseWriter::new();
        writer.append_header(
            HeaderName::from_static("x-trace"),
            HeaderValue::from_static("abc"),
        );
        let mut headers = HeaderMap::new();
        writer.merge_headers_into(&mut headers);
        assert_eq!(headers.get("x-trace").unwrap(), "abc");
    }

    #[test]
    fn test_io_write() {
        use std::io::Write;

        let mut writer = ResponseWriter::new();
        write!(writer, "{}-{}", 1, 2).unwrap();
        assert_eq!(writer.body(), Bytes::from_static(b"1-2"));
    }
}
