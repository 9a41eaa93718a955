//! Counting fake pool shared by the database and executor tests.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{DatabasePool, PooledConnection};
use crate::core::{FrameworkError, FrameworkResult};

#[derive(Default)]
struct Counters {
    acquired: AtomicUsize,
    released: AtomicUsize,
    executed: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Default)]
pub(crate) struct FakePool {
    acquire_delay: Duration,
    ping_delay: Duration,
    ping_fails: bool,
    counters: Arc<Counters>,
}

impl FakePool {
    pub(crate) fn acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    pub(crate) fn ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    pub(crate) fn ping_fails(mut self, fails: bool) -> Self {
        self.ping_fails = fails;
        self
    }

    pub(crate) fn acquired(&self) -> usize {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }

    pub(crate) fn executed(&self) -> usize {
        self.counters.executed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabasePool for FakePool {
    async fn acquire(&self) -> FrameworkResult<Arc<dyn PooledConnection>> {
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeConnection {
            ping_delay: self.ping_delay,
            ping_fails: self.ping_fails,
            released: AtomicBool::new(false),
            counters: self.counters.clone(),
        }))
    }

    async fn close(&self) {
        self.counters.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct FakeConnection {
    ping_delay: Duration,
    ping_fails: bool,
    released: AtomicBool,
    counters: Arc<Counters>,
}

impl FakeConnection {
    /// Stand-in for a driver call; refused once the connection went back to the pool
    pub(crate) fn execute(&self, _sql: &str) -> FrameworkResult<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(FrameworkError::ConnectionReleased);
        }
        self.counters.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PooledConnection for FakeConnection {
    async fn ping(&self) -> FrameworkResult<()> {
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        if self.ping_fails {
            return Err(FrameworkError::Provisioning("connection refused".to_string()));
        }
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
