//! Session load/save middleware.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{
    header::{CACHE_CONTROL, SET_COOKIE, VARY},
    HeaderValue, StatusCode,
};

use super::SessionManager;
use crate::utils::request::get_cookie_value;

/// Loads the request's session into the request extensions and commits it
/// after the inner service has produced a response.
///
/// Install with `axum::middleware::from_fn_with_state(manager, load_and_save)`.
pub async fn load_and_save(
    State(manager): State<Arc<SessionManager>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = get_cookie_value(request.headers(), manager.cookie_name()).map(str::to_owned);
    let session = manager.load(token.as_deref()).await;
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    match manager.commit(&session).await {
        Ok(Some(cookie)) => {
            let headers = response.headers_mut();
            headers.append(SET_COOKIE, cookie);
            headers.append(VARY, HeaderValue::from_static("Cookie"));
            headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static(r#"no-cache="Set-Cookie""#),
            );
            response
        }
        Ok(None) => response,
        Err(e) => {
            log::error!("Failed to commit session: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryStore, SessionHandle};
    use axum::{middleware, routing::get, Extension, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_cookie_round_trip() {
        let manager = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
        let router = Router::new()
            .route(
                "/count",
                get(|Extension(session): Extension<SessionHandle>| async move {
                    let visits = session.get("visits").int() + 1;
                    session.set("visits", &visits);
                    visits.to_string()
                }),
            )
            .layer(middleware::from_fn_with_state(manager, load_and_save));
        let base = serve(router).await;
        let client = reqwest::Client::new();

        let first = client.get(format!("{base}/count")).send().await.unwrap();
        let cookie = first
            .headers()
            .get(SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        assert_eq!(first.text().await.unwrap(), "1");

        let second = client
            .get(format!("{base}/count"))
            .header("cookie", cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(second.text().await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_untouched_session_sets_no_cookie() {
        let manager = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(manager, load_and_save));
        let base = serve(router).await;

        let response = reqwest::get(format!("{base}/")).await.unwrap();
        assert!(response.headers().get(SET_COOKIE).is_none());
    }
}
