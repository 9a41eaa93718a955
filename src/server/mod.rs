//! Route registration and serving
//!
//! A [`Server`] is built once through [`ServerBuilder`], which fixes the
//! optional resources (database pool, session store) and the root
//! configuration. Routes, groups and middleware then derive their own
//! configuration from their parent at registration time.

pub mod busy;
pub mod config;
pub mod handler;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::Request as AxumRequest,
    middleware::{self, Next},
    routing::{any, on, MethodFilter, MethodRouter},
    Router,
};
use http::Method;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::{
    config_error,
    core::FrameworkResult,
    database::{DatabasePool, DatabaseProvisioner, Placeholder},
    logging::access_log,
    orchestration::{
        lifecycle::DEFAULT_GRACE_PERIOD, shutdown_signal, BoundedExecutor, LifecycleController,
        LifecycleState, RouteTarget,
    },
    session::{load_and_save, MemoryStore, SessionManager, SessionStore},
    template::{TemplateDefinition, TemplateEngine},
};

pub use busy::{BusyReason, BusyResponder, StatusBusyResponder};
pub use config::{
    validate_timeout, with_cancellation, with_database, with_session, with_template,
    with_timeout, CancellationPolicy, ConfigOverride, ServerConfig, DEFAULT_TIMEOUT, MIN_TIMEOUT,
};
pub use handler::Handler;

pub struct ServerBuilder {
    pool: Option<Arc<dyn DatabasePool>>,
    placeholder: Placeholder,
    sessions: Option<Arc<SessionManager>>,
    config: ServerConfig,
    busy: Arc<dyn BusyResponder>,
    grace: Duration,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            placeholder: Placeholder::default(),
            sessions: None,
            config: ServerConfig::default(),
            busy: Arc::new(StatusBusyResponder::default()),
            grace: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_pool(mut self, pool: Arc<dyn DatabasePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Keep sessions in `store` with default cookie settings
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(Arc::new(SessionManager::new(store)));
        self
    }

    pub fn session_manager(mut self, manager: SessionManager) -> Self {
        self.sessions = Some(Arc::new(manager));
        self
    }

    /// Enable the database for every route unless overridden
    pub fn with_database(mut self, enabled: bool) -> Self {
        self.config = self.config.derive(&[with_database(enabled)]);
        self
    }

    /// Enable sessions for every route unless overridden
    pub fn with_session(mut self, enabled: bool) -> Self {
        self.config = self.config.derive(&[with_session(enabled)]);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.derive(&[with_timeout(timeout)]);
        self
    }

    pub fn cancellation(mut self, policy: CancellationPolicy) -> Self {
        self.config = self.config.derive(&[with_cancellation(policy)]);
        self
    }

    pub fn template(self, definition: TemplateDefinition) -> Self {
        self.template_engine(TemplateEngine::new(definition))
    }

    pub fn template_engine(mut self, engine: TemplateEngine) -> Self {
        self.config.set_template(engine);
        self
    }

    pub fn busy_responder(mut self, busy: Arc<dyn BusyResponder>) -> Self {
        self.busy = busy;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Validate the configuration and create the server.
    ///
    /// Fails when the timeout is below [`MIN_TIMEOUT`] or the database is
    /// enabled without a pool.
    pub fn build(self) -> FrameworkResult<Server> {
        validate_timeout(self.config.timeout())?;
        if self.config.uses_database() && self.pool.is_none() {
            return Err(config_error!(
                "database enabled but no database pool configured"
            ));
        }

        let sessions = match self.sessions {
            Some(manager) => Some(manager),
            None if self.config.uses_session() => {
                info!("No session store configured, keeping sessions in memory");
                Some(Arc::new(SessionManager::new(Arc::new(MemoryStore::new()))))
            }
            None => None,
        };

        let mut executor = BoundedExecutor::new(self.busy);
        if let Some(pool) = &self.pool {
            executor = executor
                .with_database(DatabaseProvisioner::new(pool.clone()).placeholder(self.placeholder));
        }
        if let Some(manager) = &sessions {
            executor = executor.with_sessions(manager.clone());
        }

        info!(
            "Server configured, timeout: {:?}, database: {}, session: {}",
            self.config.timeout(),
            self.config.uses_database(),
            self.config.uses_session()
        );

        Ok(Server {
            router: Router::new(),
            executor: Arc::new(executor),
            config: self.config,
            middleware: Vec::new(),
            pool: self.pool,
            sessions,
            grace: self.grace,
        })
    }
}

/// Routes and middleware bound to one configuration scope
pub struct Server {
    router: Router,
    executor: Arc<BoundedExecutor>,
    config: ServerConfig,
    middleware: Vec<Arc<RouteTarget>>,
    pool: Option<Arc<dyn DatabasePool>>,
    sessions: Option<Arc<SessionManager>>,
    grace: Duration,
}

macro_rules! method_shortcuts {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $name(&mut self, path: &str, handler: Handler, overrides: &[ConfigOverride]) -> &mut Self {
                self.method(Method::$method, path, handler, overrides)
            }
        )*
    };
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Configuration new routes in this scope start from
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn target(&self, handler: Handler, overrides: &[ConfigOverride]) -> Arc<RouteTarget> {
        let config = self.config.derive(overrides);
        if config.uses_database() && !self.executor.has_database() {
            warn!("Route enables the database but no pool is configured, requests will be rejected");
        }
        Arc::new(RouteTarget::new(self.executor.clone(), handler, config))
    }

    fn endpoint(target: Arc<RouteTarget>) -> MethodRouter {
        any(move |request: AxumRequest| target.clone().dispatch(request))
    }

    fn take_router(&mut self) -> Router {
        std::mem::take(&mut self.router)
    }

    pub fn method(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
        overrides: &[ConfigOverride],
    ) -> &mut Self {
        let filter = match MethodFilter::try_from(method.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                error!("Skipping route {method} {path}: {e}");
                return self;
            }
        };
        let target = self.target(handler, overrides);
        let route = on(filter, move |request: AxumRequest| target.clone().dispatch(request));
        self.router = self.take_router().route(path, route);
        self
    }

    method_shortcuts! {
        get => GET,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
        head => HEAD,
        options => OPTIONS,
        trace => TRACE,
        connect => CONNECT,
    }

    /// Register `handler` for every method on `path`
    pub fn handle(&mut self, path: &str, handler: Handler, overrides: &[ConfigOverride]) -> &mut Self {
        let target = self.target(handler, overrides);
        self.router = self.take_router().route(path, Self::endpoint(target));
        self
    }

    /// Handler for requests no route matches. Register on the root server only.
    pub fn not_found(&mut self, handler: Handler, overrides: &[ConfigOverride]) -> &mut Self {
        let target = self.target(handler, overrides);
        self.router = self
            .take_router()
            .fallback(move |request: AxumRequest| target.clone().dispatch(request));
        self
    }

    /// Handler for paths that match with an unregistered method
    pub fn method_not_allowed(&mut self, handler: Handler, overrides: &[ConfigOverride]) -> &mut Self {
        let target = self.target(handler, overrides);
        self.router = self
            .take_router()
            .method_not_allowed_fallback(move |request: AxumRequest| target.clone().dispatch(request));
        self
    }

    /// Add middleware to this scope. Middleware runs in registration order
    /// and covers every route of the scope, including those registered before it.
    pub fn use_middleware(&mut self, handler: Handler, overrides: &[ConfigOverride]) -> &mut Self {
        if !handler.is_middleware() {
            warn!("Route handler registered as middleware, the chain always continues");
        }
        let target = self.target(handler, overrides);
        self.middleware.push(target);
        self
    }

    fn child(&self, overrides: &[ConfigOverride]) -> Server {
        Server {
            router: Router::new(),
            executor: self.executor.clone(),
            config: self.config.derive(overrides),
            middleware: Vec::new(),
            pool: self.pool.clone(),
            sessions: self.sessions.clone(),
            grace: self.grace,
        }
    }

    /// Routes sharing configuration and middleware under the current prefix
    pub fn group<F>(&mut self, f: F, overrides: &[ConfigOverride]) -> &mut Self
    where
        F: FnOnce(&mut Server),
    {
        let mut child = self.child(overrides);
        f(&mut child);
        let routes = child.finish_routes();
        self.router = self.take_router().merge(routes);
        self
    }

    /// Routes sharing configuration and middleware under `prefix`
    pub fn route<F>(&mut self, prefix: &str, f: F, overrides: &[ConfigOverride]) -> &mut Self
    where
        F: FnOnce(&mut Server),
    {
        let mut child = self.child(overrides);
        f(&mut child);
        let routes = child.finish_routes();
        self.attach(prefix, routes);
        self
    }

    /// Attach an independent axum router under `path`
    pub fn mount(&mut self, path: &str, router: Router) -> &mut Self {
        self.attach(path, router);
        self
    }

    fn attach(&mut self, prefix: &str, routes: Router) {
        let router = self.take_router();
        self.router = match prefix.trim_end_matches('/') {
            "" => router.merge(routes),
            prefix => router.nest(prefix, routes),
        };
    }

    fn finish_routes(&mut self) -> Router {
        let mut router = self.take_router();
        // The layer added last runs first.
        for target in self.middleware.drain(..).rev() {
            router = router.layer(middleware::from_fn(
                move |request: AxumRequest, next: Next| target.clone().intercept(request, next),
            ));
        }
        router
    }

    /// Turn the registered routes into an axum router with session handling
    /// and access logging
    pub fn into_router(mut self) -> Router {
        let mut router = self.finish_routes();
        if let Some(manager) = self.sessions.take() {
            router = router.layer(middleware::from_fn_with_state(manager, load_and_save));
        }
        router.layer(middleware::from_fn(access_log))
    }

    /// Close the database pool
    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Database pool closed");
        }
    }

    /// Serve on `listener` until `signal` resolves, then drain and close the pool
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> FrameworkResult<LifecycleState>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let pool = self.pool.clone();
        let controller = LifecycleController::new(self.grace);
        let state = controller.run(listener, self.into_router(), signal).await;
        if let Some(pool) = pool {
            pool.close().await;
            info!("Database pool closed");
        }
        state
    }

    /// Bind `addr` and serve until SIGHUP, SIGINT, SIGTERM or SIGQUIT.
    ///
    /// Exits the process with status 1 when in-flight requests outlive the
    /// grace period.
    pub async fn listen_and_serve(self, addr: &str) -> FrameworkResult<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        match self.serve(listener, shutdown_signal()).await? {
            LifecycleState::ForceKilled => {
                error!("Server forced to shutdown");
                std::process::exit(1);
            }
            _ => {
                info!("Server stopped");
                Ok(())
            }
        }
    }
}
