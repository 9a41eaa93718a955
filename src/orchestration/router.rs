//! Bridges between axum and the bounded executor
//!
//! Route handlers become axum endpoints and middleware handlers become
//! `from_fn` layers. Each bridge buffers the request, runs the executor and
//! turns the response sink into the axum response.

use std::sync::Arc;

use axum::{
    body::Body,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use log::warn;

use crate::{
    orchestration::executor::BoundedExecutor,
    resource::{Request, ResponseWriter},
    server::{config::ServerConfig, handler::Handler},
};

/// A handler bound to its executor and effective configuration
pub struct RouteTarget {
    executor: Arc<BoundedExecutor>,
    handler: Handler,
    config: ServerConfig,
}

impl RouteTarget {
    pub fn new(executor: Arc<BoundedExecutor>, handler: Handler, config: ServerConfig) -> Self {
        Self {
            executor,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve a request end to end
    pub async fn dispatch(self: Arc<Self>, request: axum::extract::Request) -> Response {
        let request = match Request::from_axum(request).await {
            Ok(request) => Arc::new(request),
            Err(e) => return bad_request(e),
        };
        let writer = ResponseWriter::new();
        self.executor
            .execute(request, &writer, &self.handler, &self.config)
            .await;
        writer.finish()
    }

    /// Run as middleware: stop with the sink's response when the handler
    /// returns `false`, otherwise continue with `next`.
    pub async fn intercept(self: Arc<Self>, request: axum::extract::Request, next: Next) -> Response {
        let (parts, body) = request.into_parts();
        let body = match axum::body::to_bytes(body, crate::resource::request::MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(e) => return bad_request(e),
        };

        let snapshot = axum::extract::Request::from_parts(parts.clone(), Body::from(body.clone()));
        let snapshot = match Request::from_axum(snapshot).await {
            Ok(request) => Arc::new(request),
            Err(e) => return bad_request(e),
        };

        let writer = ResponseWriter::new();
        if !self
            .executor
            .execute(snapshot, &writer, &self.handler, &self.config)
            .await
        {
            return writer.finish();
        }

        let mut response = next
            .run(axum::extract::Request::from_parts(parts, Body::from(body)))
            .await;
        writer.merge_headers_into(response.headers_mut());
        response
    }
}

fn bad_request(error: impl std::fmt::Display) -> Response {
    warn!("Failed to read request body: {error}");
    (StatusCode::BAD_REQUEST, "Bad Request").into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{routing::post, Router};
    use http::{header::HeaderName, HeaderValue};

    use super::*;

    fn target(handler: Handler) -> Arc<RouteTarget> {
        Arc::new(RouteTarget::new(
            Arc::new(BoundedExecutor::default()),
            handler,
            ServerConfig::new(Duration::from_secs(2)).unwrap(),
        ))
    }

    async fn serve(endpoint: Arc<RouteTarget>, middleware: Arc<RouteTarget>) -> String {
        let router = Router::new()
            .route(
                "/items/{id}",
                post(move |req: axum::extract::Request| endpoint.clone().dispatch(req)),
            )
            .layer(axum::middleware::from_fn(
                move |req: axum::extract::Request, next: Next| middleware.clone().intercept(req, next),
            ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn echo() -> Arc<RouteTarget> {
        target(Handler::route(|ctx| async move {
            let id = ctx.request().url_param("id").unwrap_or("none").to_string();
            let body = String::from_utf8_lossy(ctx.request().body()).to_string();
            ctx.html().string(StatusCode::OK, &format!("{id}:{body}")).unwrap();
        }))
    }

    #[tokio::test]
    async fn test_middleware_passes_through() {
        let tag = target(Handler::middleware(|ctx| async move {
            ctx.writer().set_header(
                HeaderName::from_static("x-checked"),
                HeaderValue::from_static("yes"),
            );
            ctx.request().body().as_ref() == b"payload"
        }));
        let base = serve(echo(), tag).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/items/42"))
            .body("payload")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-checked"], "yes");
        assert_eq!(response.text().await.unwrap(), "42:payload");
    }

    #[tokio::test]
    async fn test_middleware_short_circuits() {
        let deny = target(Handler::middleware(|ctx| async move {
            ctx.html().status_text(StatusCode::UNAUTHORIZED).unwrap();
            false
        }));
        let base = serve(echo(), deny).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/items/42"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.text().await.unwrap(), "Unauthorized");
    }
}
