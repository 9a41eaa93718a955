use std::{
    io::{self, Write},
    net::SocketAddr,
    path::Path,
};

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{config, core::FrameworkResult, utils::request::get_client_ip};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender.send(data).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes `log` records into a file through a background writer task
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    pub fn init_env_logger(&self) {
        let writer = self.create_async_writer();
        let _ = Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .filter(None, LevelFilter::Info)
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .try_init();
    }

    /// Append buffered records to the log file until `shutdown` fires or
    /// every writer is gone
    pub async fn run(mut self, shutdown: CancellationToken) -> FrameworkResult<()> {
        let log_file_path = Path::new(&self.config.path);

        if let Some(parent) = log_file_path.parent() {
            if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(log_file_path)
                .await?,
        );
        drop(self.sender);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("Shutdown signal received, stopping write log");
                    while let Ok(data) = self.receiver.try_recv() {
                        if let Err(e) = file.write_all(&data).await {
                            eprintln!("Failed to write to log file: {e}");
                        }
                    }
                    break;
                }

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file: {e}");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        file.flush().await?;
        Ok(())
    }
}

/// Log to stderr with the default `info` filter, overridable through `RUST_LOG`
pub fn init_stderr_logger() {
    let _ = Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

/// Middleware logging one line per request
pub async fn access_log(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = get_client_ip(request.headers(), peer);

    let response = next.run(request).await;

    log::info!(
        "{client} \"{method} {path}\" {} {:?}",
        response.status().as_u16(),
        started.elapsed()
    );
    response
}
