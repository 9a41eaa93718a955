use std::net::SocketAddr;

use http::{header, HeaderMap, HeaderName, Uri};
use once_cell::sync::Lazy;

static HTTP_HEADER_X_FORWARDED_FOR: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-forwarded-for"));

static HTTP_HEADER_X_REAL_IP: Lazy<HeaderName> = Lazy::new(|| HeaderName::from_static("x-real-ip"));

static HTTP_HEADER_X_FORWARDED_PROTO: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-forwarded-proto"));

static HTTP_HEADER_X_FORWARDED_PROTOCOL: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-forwarded-protocol"));

static HTTP_HEADER_X_FORWARDED_SSL: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-forwarded-ssl"));

static HTTP_HEADER_X_URL_SCHEME: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-url-scheme"));

/// Extracts the value of a specific query parameter from the request URI.
///
/// Returns the first occurrence, percent-decoded.
pub fn get_query_value(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Retrieves the value of a specific header from the request.
///
/// Returns `None` if the header is not present or its value is not valid UTF-8.
pub fn get_req_header_value<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|value| value.to_str().ok())
}

/// Retrieves the value of a specific cookie from the `Cookie` headers.
///
/// Returns the first occurrence of the cookie's value.
pub fn get_cookie_value<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let found = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|item| item.trim().split_once('='))
        .find(|(k, _)| k.trim() == cookie_name)
        .map(|(_, v)| v.trim());

    if found.is_none() {
        log::debug!("Cookie '{cookie_name}' not found in request");
    }
    found
}

/// Every `name=value` pair across all `Cookie` headers, in request order
pub fn get_cookies(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|item| item.trim().split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

/// Gets the client's apparent IP address based on common proxy headers or the direct connection address.
///
/// The order of precedence is:
/// 1. `X-Forwarded-For` (first IP in the list)
/// 2. `X-Real-IP`
/// 3. Direct client address
///
/// Returns an empty string if no IP address can be determined.
pub fn get_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get(&*HTTP_HEADER_X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        // First entry is the originating client; spoofable without a trusted proxy in front
        if let Some(ip) = forwarded.split(',').next().map(str::trim) {
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    if let Some(real_ip) = headers
        .get(&*HTTP_HEADER_X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => {
            log::debug!("Could not determine client IP address");
            String::new()
        }
    }
}

/// Resolves the request scheme, honouring the usual reverse proxy headers.
///
/// `X-Forwarded-Proto`, `X-Forwarded-Protocol`, `X-Forwarded-Ssl: on` and
/// `X-Url-Scheme` are checked in that order before the request URI.
pub fn get_request_scheme(headers: &HeaderMap, uri: &Uri) -> String {
    let forwarded = [
        &*HTTP_HEADER_X_FORWARDED_PROTO,
        &*HTTP_HEADER_X_FORWARDED_PROTOCOL,
    ]
    .into_iter()
    .find_map(|name| headers.get(name).and_then(|v| v.to_str().ok()));

    if let Some(scheme) = forwarded {
        return scheme.trim().to_ascii_lowercase();
    }
    if headers
        .get(&*HTTP_HEADER_X_FORWARDED_SSL)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("on"))
    {
        return "https".to_string();
    }
    if let Some(scheme) = headers
        .get(&*HTTP_HEADER_X_URL_SCHEME)
        .and_then(|v| v.to_str().ok())
    {
        return scheme.trim().to_ascii_lowercase();
    }

    uri.scheme_str().unwrap_or("http").to_string()
}
