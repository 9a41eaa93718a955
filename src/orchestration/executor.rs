//! Bounded request execution
//!
//! The executor runs one handler invocation under the route's deadline. It
//! provisions the resources the route asked for, runs the handler on its own
//! task and answers with the busy response if the deadline wins. Resources
//! are returned exactly once on every exit path.

use std::sync::Arc;

use http::StatusCode;
use log::{debug, error, warn};

use crate::{
    core::{FrameworkError, RequestContext},
    database::{DatabaseHandle, DatabaseProvisioner},
    resource::{ExecutionContext, Request, ResponseWriter},
    server::{
        busy::{BusyReason, BusyResponder, StatusBusyResponder},
        config::{CancellationPolicy, ServerConfig},
        handler::Handler,
    },
    session::{SessionHandle, SessionManager},
};

/// Returns the database connection when the execution scope ends
struct ReleaseGuard(Option<Arc<DatabaseHandle>>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if handle.release() {
                debug!("Database connection returned to the pool");
            }
        }
    }
}

/// Runs handlers under a deadline with scoped resources
pub struct BoundedExecutor {
    busy: Arc<dyn BusyResponder>,
    database: Option<DatabaseProvisioner>,
    sessions: Option<Arc<SessionManager>>,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(Arc::new(StatusBusyResponder::default()))
    }
}

impl BoundedExecutor {
    pub fn new(busy: Arc<dyn BusyResponder>) -> Self {
        Self {
            busy,
            database: None,
            sessions: None,
        }
    }

    pub fn with_database(mut self, provisioner: DatabaseProvisioner) -> Self {
        self.database = Some(provisioner);
        self
    }

    pub fn with_sessions(mut self, manager: Arc<SessionManager>) -> Self {
        self.sessions = Some(manager);
        self
    }

    pub fn has_database(&self) -> bool {
        self.database.is_some()
    }

    /// Execute `handler` for `request` under `config`.
    ///
    /// Returns `true` when the handler completed in time and asked the chain
    /// to continue. Any other outcome has already produced a response on
    /// `writer`.
    pub async fn execute(
        &self,
        request: Arc<Request>,
        writer: &ResponseWriter,
        handler: &Handler,
        config: &ServerConfig,
    ) -> bool {
        let context = request.context().with_timeout(config.timeout());
        let _cancel = context.cancel_on_drop();

        let mut builder = ExecutionContext::builder(request.clone(), writer.clone(), context.clone())
            .template(config.template().cloned());

        if config.uses_session() {
            builder = builder.session(self.bind_session(&request));
        }

        let mut guard = ReleaseGuard(None);
        if config.uses_database() {
            match self.provision_database(&context).await {
                Ok(handle) => {
                    let handle = Arc::new(handle);
                    guard.0 = Some(handle.clone());
                    builder = builder.database(handle);
                }
                Err(e) => {
                    let reason = if e.is_timeout() {
                        BusyReason::Timeout
                    } else {
                        BusyReason::Unavailable
                    };
                    self.respond_busy(writer, reason, &e);
                    return false;
                }
            }
        }

        let ctx = Arc::new(builder.build());
        let mut task = tokio::spawn(handler.invoke(ctx));

        tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(proceed) => proceed,
                Err(e) => {
                    error!(
                        "Handler for {} {} failed: {e}",
                        request.method(),
                        request.uri().path()
                    );
                    if !writer.is_written() {
                        writer.write_header(StatusCode::INTERNAL_SERVER_ERROR);
                    }
                    false
                }
            },
            _ = context.done() => {
                let err = FrameworkError::Timeout(format!(
                    "{} {} exceeded {:?}",
                    request.method(),
                    request.uri().path(),
                    config.timeout()
                ));
                self.respond_busy(writer, BusyReason::Timeout, &err);
                if config.cancellation() == CancellationPolicy::Abort {
                    task.abort();
                }
                false
            }
        }
    }

    /// Replace whatever the handler buffered with the busy response
    fn respond_busy(&self, writer: &ResponseWriter, reason: BusyReason, error: &FrameworkError) {
        let busy = ResponseWriter::new();
        self.busy.respond(&busy, reason, error);
        if writer.is_written() {
            debug!("Discarding partial response in favour of the busy response");
        }
        writer.replace_and_close(busy);
    }

    fn bind_session(&self, request: &Request) -> SessionHandle {
        if let Some(session) = request.extensions().get::<SessionHandle>() {
            return session.clone();
        }
        match &self.sessions {
            Some(manager) => {
                warn!("Session layer did not run, using an unsaved session");
                manager.new_session()
            }
            None => {
                warn!("Route enables sessions but no session store is configured");
                SessionHandle::detached()
            }
        }
    }

    async fn provision_database(
        &self,
        context: &RequestContext,
    ) -> Result<DatabaseHandle, FrameworkError> {
        match &self.database {
            Some(provisioner) => provisioner.acquire(context).await,
            None => Err(FrameworkError::Provisioning(
                "route enables the database but no pool is configured".to_string(),
            )),
        }
    }
}
