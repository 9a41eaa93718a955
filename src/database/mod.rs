//! Request-scoped database connections
//!
//! The framework never talks SQL itself. Applications plug a driver in through
//! [`DatabasePool`]; the executor checks one connection out per request through
//! [`DatabaseProvisioner`] and hands it to the handler as a [`DatabaseHandle`],
//! which returns it to the pool exactly once.

pub mod query;
#[cfg(test)]
pub(crate) mod testing;

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;

use crate::core::{ContextError, FrameworkError, FrameworkResult, RequestContext};

pub use query::{build_query, BoundQuery, Placeholder};

/// Upper bound for the liveness check of a freshly acquired connection
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// A connection checked out of a [`DatabasePool`]
#[async_trait]
pub trait PooledConnection: Send + Sync {
    /// Liveness check run before the connection is handed out
    async fn ping(&self) -> FrameworkResult<()>;

    /// Return the connection to its pool. Drivers must fail every later call
    /// made through this value, since the pool may already have handed the
    /// underlying connection to another request.
    fn release(&self);

    /// Access to the driver's concrete connection type
    fn as_any(&self) -> &dyn Any;
}

/// Driver connection pool
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Check out a connection, waiting for one to become free
    async fn acquire(&self) -> FrameworkResult<Arc<dyn PooledConnection>>;

    /// Close every connection; called once when the server stops
    async fn close(&self);
}

/// Checks connections out of the pool under a request's deadline
#[derive(Clone)]
pub struct DatabaseProvisioner {
    pool: Arc<dyn DatabasePool>,
    placeholder: Placeholder,
    ping_timeout: Duration,
}

impl fmt::Debug for DatabaseProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseProvisioner")
            .field("placeholder", &self.placeholder)
            .field("ping_timeout", &self.ping_timeout)
            .finish()
    }
}

impl DatabaseProvisioner {
    pub fn new(pool: Arc<dyn DatabasePool>) -> Self {
        Self {
            pool,
            placeholder: Placeholder::default(),
            ping_timeout: PING_TIMEOUT,
        }
    }

    pub fn placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    /// Acquire and ping a connection, giving up when `context` is done.
    ///
    /// Fails with [`FrameworkError::Timeout`] when the deadline caused the
    /// failure and [`FrameworkError::Provisioning`] otherwise. A connection
    /// that fails its ping is released before returning.
    pub async fn acquire(&self, context: &RequestContext) -> FrameworkResult<DatabaseHandle> {
        let conn = tokio::select! {
            biased;
            res = self.pool.acquire() => res.map_err(|e| {
                FrameworkError::Provisioning(format!("failed to acquire connection: {e}"))
            })?,
            _ = context.done() => return Err(context_failure(context, "acquiring a connection")),
        };

        let ping = tokio::select! {
            biased;
            res = tokio::time::timeout(self.ping_timeout, conn.ping()) => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(FrameworkError::Provisioning(format!("connection ping failed: {e}"))),
                Err(_) => Err(FrameworkError::Provisioning(format!(
                    "connection ping timed out after {:?}",
                    self.ping_timeout
                ))),
            },
            _ = context.done() => Err(context_failure(context, "pinging the connection")),
        };

        if let Err(e) = ping {
            conn.release();
            return Err(e);
        }

        Ok(DatabaseHandle::new(conn, context.clone(), self.placeholder))
    }
}

fn context_failure(context: &RequestContext, stage: &str) -> FrameworkError {
    match context.error() {
        Some(ContextError::DeadlineExceeded) => {
            FrameworkError::Timeout(format!("deadline exceeded while {stage}"))
        }
        _ => FrameworkError::Provisioning(format!("request canceled while {stage}")),
    }
}

/// One pooled connection owned by a single request
pub struct DatabaseHandle {
    conn: Mutex<Option<Arc<dyn PooledConnection>>>,
    released: Arc<AtomicBool>,
    context: RequestContext,
    placeholder: Placeholder,
}

/// Access to a request's connection that stops working once the owning
/// [`DatabaseHandle`] is released.
///
/// Every accessor checks the release flag, so a handler task that outlives
/// its deadline gets [`FrameworkError::ConnectionReleased`] instead of a
/// connection the pool may have lent to someone else.
#[derive(Clone)]
pub struct ConnectionLease {
    conn: Arc<dyn PooledConnection>,
    released: Arc<AtomicBool>,
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("released", &self.is_released())
            .finish()
    }
}

impl ConnectionLease {
    pub fn get(&self) -> FrameworkResult<&dyn PooledConnection> {
        if self.is_released() {
            return Err(FrameworkError::ConnectionReleased);
        }
        Ok(self.conn.as_ref())
    }

    /// The driver's concrete connection
    pub fn downcast<T: Any>(&self) -> FrameworkResult<&T> {
        self.get()?.as_any().downcast_ref::<T>().ok_or_else(|| {
            FrameworkError::Provisioning(format!(
                "connection is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("released", &self.is_released())
            .field("placeholder", &self.placeholder)
            .finish()
    }
}

impl DatabaseHandle {
    pub fn new(
        conn: Arc<dyn PooledConnection>,
        context: RequestContext,
        placeholder: Placeholder,
    ) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            released: Arc::new(AtomicBool::new(false)),
            context,
            placeholder,
        }
    }

    /// Lease on the checked-out connection, until the handle is released
    pub fn connection(&self) -> FrameworkResult<ConnectionLease> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(FrameworkError::ConnectionReleased)?;
        Ok(ConnectionLease {
            conn,
            released: self.released.clone(),
        })
    }

    /// Context the connection was checked out under; drivers should bound
    /// their calls by it
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Bind a named query for this connection's driver
    pub fn query<T>(&self, named: &str, args: &T) -> FrameworkResult<BoundQuery>
    where
        T: Serialize + ?Sized,
    {
        if self.is_released() {
            return Err(FrameworkError::ConnectionReleased);
        }
        build_query(named, args, self.placeholder)
    }

    /// Return the connection to the pool. Only the first call has effect;
    /// returns whether this call released it.
    pub fn release(&self) -> bool {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match conn {
            Some(conn) => {
                self.released.store(true, Ordering::Release);
                conn.release();
                true
            }
            None => false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for DatabaseHandle {
    fn drop(&mut self) {
        if self.release() {
            log::debug!("Database connection released on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::{FakeConnection, FakePool};
    use serde_json::json;

    #[tokio::test]
    async fn test_acquire_and_release_once() {
        let pool = Arc::new(FakePool::default());
        let provisioner = DatabaseProvisioner::new(pool.clone());

        let handle = provisioner.acquire(&RequestContext::new()).await.unwrap();
        assert!(handle.connection().is_ok());

        assert!(handle.release());
        assert!(!handle.release());
        drop(handle);

        assert_eq!(pool.acquired(), 1);
        assert_eq!(pool.released(), 1);
    }

    #[tokio::test]
    async fn test_connection_after_release() {
        let pool = Arc::new(FakePool::default());
        let handle = DatabaseProvisioner::new(pool)
            .acquire(&RequestContext::new())
            .await
            .unwrap();
        handle.release();

        assert!(matches!(
            handle.connection(),
            Err(FrameworkError::ConnectionReleased)
        ));
        assert!(matches!(
            handle.query("SELECT 1", &()),
            Err(FrameworkError::ConnectionReleased)
        ));
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let pool = Arc::new(FakePool::default());
        {
            let _handle = DatabaseProvisioner::new(pool.clone())
                .acquire(&RequestContext::new())
                .await
                .unwrap();
        }
        assert_eq!(pool.released(), 1);
    }

    #[tokio::test]
    async fn test_ping_failure_releases() {
        let pool = Arc::new(FakePool::default().ping_fails(true));
        let err = DatabaseProvisioner::new(pool.clone())
            .acquire(&RequestContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FrameworkError::Provisioning(_)));
        assert_eq!(pool.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ping_bounded() {
        let pool = Arc::new(FakePool::default().ping_delay(Duration::from_secs(10)));
        let err = DatabaseProvisioner::new(pool.clone())
            .acquire(&RequestContext::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
        assert_eq!(pool.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_acquire_times_out() {
        let pool = Arc::new(FakePool::default().acquire_delay(Duration::from_secs(5)));
        let context = RequestContext::new().with_timeout(Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let err = DatabaseProvisioner::new(pool.clone())
            .acquire(&context)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(pool.released(), 0);
    }

    #[tokio::test]
    async fn test_canceled_context_is_provisioning_error() {
        let pool = Arc::new(FakePool::default().acquire_delay(Duration::from_secs(60)));
        let context = RequestContext::new();
        context.cancel();

        let err = DatabaseProvisioner::new(pool)
            .acquire(&context)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Provisioning(_)));
    }

    #[tokio::test]
    async fn test_query_uses_placeholder() {
        let pool = Arc::new(FakePool::default());
        let handle = DatabaseProvisioner::new(pool)
            .placeholder(Placeholder::Question)
            .acquire(&RequestContext::new())
            .await
            .unwrap();

        let q = handle.query("id = :id", &json!({"id": 1})).unwrap();
        assert_eq!(q.sql, "id = ?");
    }

    #[tokio::test]
    async fn test_downcast_connection() {
        let pool = Arc::new(FakePool::default());
        let handle = DatabaseProvisioner::new(pool)
            .acquire(&RequestContext::new())
            .await
            .unwrap();
        let lease = handle.connection().unwrap();
        assert!(lease.downcast::<FakeConnection>().is_ok());
        assert!(matches!(
            lease.downcast::<String>(),
            Err(FrameworkError::Provisioning(_))
        ));
    }

    #[tokio::test]
    async fn test_lease_dies_with_handle() {
        let pool = Arc::new(FakePool::default());
        let handle = DatabaseProvisioner::new(pool)
            .acquire(&RequestContext::new())
            .await
            .unwrap();
        let lease = handle.connection().unwrap();
        let conn = lease.downcast::<FakeConnection>().unwrap();
        assert!(conn.execute("SELECT 1").is_ok());

        handle.release();

        assert!(lease.is_released());
        assert!(matches!(lease.get(), Err(FrameworkError::ConnectionReleased)));
        assert!(matches!(
            lease.clone().downcast::<FakeConnection>(),
            Err(FrameworkError::ConnectionReleased)
        ));
        assert!(matches!(
            conn.execute("SELECT 1"),
            Err(FrameworkError::ConnectionReleased)
        ));
    }
}
