//! Inbound request snapshot handed to handlers.

use std::{io, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, RawPathParams},
    RequestPartsExt,
};
use bytes::Bytes;
use http::{header, request::Parts, uri::Scheme, Extensions, HeaderMap, Method, Uri, Version};
use serde::de::DeserializeOwned;

use crate::{
    core::{FrameworkError, FrameworkResult, RequestContext},
    utils::request::{
        get_client_ip, get_cookie_value, get_cookies, get_query_value, get_req_header_value, get_request_scheme,
    },
};

/// Largest request body buffered for a handler
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug)]
pub struct Request {
    parts: Parts,
    body: Bytes,
    params: Vec<(String, String)>,
    peer: Option<SocketAddr>,
    context: RequestContext,
}

impl Request {
    /// Buffer an axum request, capturing matched path parameters and the peer address
    pub async fn from_axum(request: axum::extract::Request) -> FrameworkResult<Self> {
        let (mut parts, body) = request.into_parts();
        let params = match parts.extract::<RawPathParams>().await {
            Ok(raw) => raw
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| FrameworkError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut request = Self::from_parts(parts, body);
        request.params = params;
        Ok(request)
    }

    /// Build from already buffered parts; no path parameters are known
    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Self {
            parts,
            body,
            params: Vec::new(),
            peer,
            context: RequestContext::new(),
        }
    }

    pub fn from_http(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self::from_parts(parts, body)
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    pub fn parts(&self) -> &Parts {
        &self.parts
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> FrameworkResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Root context of the request; the executor derives deadlines from it
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Matched route parameter, e.g. `id` for `/users/{id}`
    pub fn url_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        get_query_value(self.uri(), name)
    }

    /// Raw query string without the leading `?`
    pub fn query_string(&self) -> &str {
        self.uri().query().unwrap_or_default()
    }

    /// Path plus query, as sent by the client
    pub fn request_uri(&self) -> String {
        self.uri()
            .path_and_query()
            .map_or_else(|| self.uri().path().to_string(), |pq| pq.to_string())
    }

    /// Direct peer address of the connection
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Client IP, preferring `X-Forwarded-For` and `X-Real-IP`
    pub fn remote_addr(&self) -> String {
        get_client_ip(self.headers(), self.peer)
    }

    pub fn is_tls(&self) -> bool {
        self.uri().scheme() == Some(&Scheme::HTTPS)
    }

    pub fn is_websocket(&self) -> bool {
        get_req_header_value(self.headers(), header::UPGRADE.as_str())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    }

    pub fn scheme(&self) -> String {
        if self.is_tls() {
            return "https".to_string();
        }
        get_request_scheme(self.headers(), self.uri())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        get_cookie_value(self.headers(), name)
    }

    /// All request cookies as `(name, value)` pairs
    pub fn cookies(&self) -> Vec<(&str, &str)> {
        get_cookies(self.headers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn request(builder: http::request::Builder, body: &'static str) -> Request {
        Request::from_http(builder.body(Bytes::from_static(body.as_bytes())).unwrap())
    }

    #[test]
    fn test_uri_helpers() {
        let req = request(
            http::Request::builder().uri("/users/7?tab=posts&sort=new"),
            "",
        )
        .with_params([("id", "7")]);

        assert_eq!(req.url_param("id"), Some("7"));
        assert_eq!(req.url_param("missing"), None);
        assert_eq!(req.query_param("tab").as_deref(), Some("posts"));
        assert_eq!(req.query_string(), "tab=posts&sort=new");
        assert_eq!(req.request_uri(), "/users/7?tab=posts&sort=new");
    }

    #[test]
    fn test_connection_helpers() {
        let mut req = http::Request::builder()
            .uri("/")
            .header("upgrade", "WebSocket")
            .header("x-forwarded-proto", "https")
            .header("cookie", "session=abc; theme=dark")
            .body(Bytes::new())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("192.168.1.5:4000".parse::<SocketAddr>().unwrap()));
        let req = Request::from_http(req);

        assert!(req.is_websocket());
        assert!(!req.is_tls());
        assert_eq!(req.scheme(), "https");
        assert_eq!(req.cookie("session"), Some("abc"));
        assert_eq!(req.cookies(), vec![("session", "abc"), ("theme", "dark")]);
        assert_eq!(req.remote_addr(), "192.168.1.5");
    }

    #[test]
    fn test_json_body() {
        #[derive(Deserialize)]
        struct Login {
            user: String,
        }

        let req = request(http::Request::builder().method("POST"), r#"{"user":"ada"}"#);
        let login: Login = req.json().unwrap();
        assert_eq!(login.user, "ada");

        let bad = request(http::Request::builder(), "not json");
        assert!(bad.json::<Login>().is_err());
    }
}
