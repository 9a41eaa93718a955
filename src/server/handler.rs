use std::{fmt, future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

use crate::resource::ExecutionContext;

type RouteFn = dyn Fn(Arc<ExecutionContext>) -> BoxFuture<'static, ()> + Send + Sync;
type MiddlewareFn = dyn Fn(Arc<ExecutionContext>) -> BoxFuture<'static, bool> + Send + Sync;

/// User code run by the executor.
///
/// A route handler writes a response. A middleware handler returns `false`
/// to stop the chain after writing its own response.
#[derive(Clone)]
pub enum Handler {
    Route(Arc<RouteFn>),
    Middleware(Arc<MiddlewareFn>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Route(_) => f.write_str("Handler::Route"),
            Handler::Middleware(_) => f.write_str("Handler::Middleware"),
        }
    }
}

impl Handler {
    pub fn route<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Handler::Route(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn middleware<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Handler::Middleware(Arc::new(move |ctx| f(ctx).boxed()))
    }

    pub fn is_middleware(&self) -> bool {
        matches!(self, Handler::Middleware(_))
    }

    /// Run the handler; route handlers always continue the chain
    pub(crate) fn invoke(&self, ctx: Arc<ExecutionContext>) -> BoxFuture<'static, bool> {
        match self {
            Handler::Route(f) => {
                let fut = f(ctx);
                async move {
                    fut.await;
                    true
                }
                .boxed()
            }
            Handler::Middleware(f) => f(ctx),
        }
    }
}
