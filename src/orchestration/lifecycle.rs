//! Server lifecycle management
//!
//! Runs the HTTP listener until a shutdown signal arrives, then drains
//! in-flight requests for a bounded grace period.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use axum::Router;
use log::{info, warn};
use tokio::{net::TcpListener, sync::watch};
use tokio_util::sync::CancellationToken;

use crate::core::{FrameworkError, FrameworkResult};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
    /// Every in-flight request finished within the grace period
    Stopped,
    /// The grace period expired with requests still running
    ForceKilled,
}

pub struct LifecycleController {
    grace: Duration,
    state: watch::Sender<LifecycleState>,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl LifecycleController {
    pub fn new(grace: Duration) -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self { grace, state }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Serve `router` on `listener` until `signal` resolves.
    ///
    /// Returns [`LifecycleState::Stopped`] after a clean drain and
    /// [`LifecycleState::ForceKilled`] when the grace period ran out.
    pub async fn run<F>(
        &self,
        listener: TcpListener,
        router: Router,
        signal: F,
    ) -> FrameworkResult<LifecycleState>
    where
        F: Future<Output = ()> + Send,
    {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        });
        self.state.send_replace(LifecycleState::Running);

        tokio::select! {
            joined = &mut server => {
                self.state.send_replace(LifecycleState::Stopped);
                return match joined {
                    Ok(Ok(())) => Ok(LifecycleState::Stopped),
                    Ok(Err(e)) => Err(FrameworkError::Io(e)),
                    Err(e) => Err(FrameworkError::Io(io::Error::other(e))),
                };
            }
            _ = signal => {}
        }

        info!(
            "Shutdown signal received, waiting up to {:?} for in-flight requests",
            self.grace
        );
        self.state.send_replace(LifecycleState::ShuttingDown);
        shutdown.cancel();

        match tokio::time::timeout(self.grace, &mut server).await {
            Ok(joined) => {
                if let Ok(Err(e)) = joined {
                    warn!("Server exited with error during shutdown: {e}");
                }
                self.state.send_replace(LifecycleState::Stopped);
                Ok(LifecycleState::Stopped)
            }
            Err(_) => {
                warn!("Grace period of {:?} expired, forcing shutdown", self.grace);
                server.abort();
                self.state.send_replace(LifecycleState::ForceKilled);
                Ok(LifecycleState::ForceKilled)
            }
        }
    }
}

/// Resolves on SIGHUP, SIGINT, SIGTERM or SIGQUIT (Ctrl-C elsewhere)
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut streams = Vec::new();
        for kind in [
            SignalKind::hangup(),
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::quit(),
        ] {
            match signal(kind) {
                Ok(stream) => streams.push(stream),
                Err(e) => warn!("Failed to install signal handler: {e}"),
            }
        }
        if streams.is_empty() {
            std::future::pending::<()>().await;
        }
        let waits = streams.iter_mut().map(|stream| Box::pin(stream.recv()));
        futures::future::select_all(waits).await;
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use tokio::sync::oneshot;

    use super::*;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    #[tokio::test]
    async fn test_drains_in_flight_request() {
        let (listener, base) = bind().await;
        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "done"
            }),
        );
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let controller = LifecycleController::new(Duration::from_secs(5));

        let client = tokio::spawn(async move { reqwest::get(format!("{base}/slow")).await });
        let run = controller.run(listener, router, async move {
            let _ = stop_rx.await;
        });
        let trigger = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop_tx.send(());
        };

        let (state, _) = tokio::join!(run, trigger);
        assert_eq!(state.unwrap(), LifecycleState::Stopped);
        assert_eq!(controller.state(), LifecycleState::Stopped);

        let response = client.await.unwrap().unwrap();
        assert_eq!(response.text().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_force_kill_after_grace() {
        let (listener, base) = bind().await;
        let router = Router::new().route(
            "/stuck",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "never"
            }),
        );
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let controller = LifecycleController::new(Duration::from_millis(200));

        tokio::spawn(async move {
            let _ = reqwest::get(format!("{base}/stuck")).await;
        });
        let run = controller.run(listener, router, async move {
            let _ = stop_rx.await;
        });
        let trigger = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = stop_tx.send(());
        };

        let (state, _) = tokio::join!(run, trigger);
        assert_eq!(state.unwrap(), LifecycleState::ForceKilled);
    }

    #[tokio::test]
    async fn test_state_updates_are_observable() {
        let (listener, _) = bind().await;
        let controller = LifecycleController::default();
        let mut states = controller.subscribe();

        let state = controller
            .run(listener, Router::new(), async {})
            .await
            .unwrap();

        assert_eq!(state, LifecycleState::Stopped);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), LifecycleState::Stopped);
    }
}
