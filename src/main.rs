use std::{sync::Arc, time::Duration};

use clap::Parser;
use http::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use timebox::{
    config::Settings,
    logging::{init_stderr_logger, Logger},
    server::{with_session, with_timeout, Handler},
    session::MemoryStore,
};

#[derive(Debug, Parser)]
#[command(name = "timebox", about = "Deadline-bound web server")]
struct Opt {
    /// Path to the YAML settings file
    #[arg(short, long)]
    conf: Option<String>,
}

#[tokio::main]
async fn main() {
    let opt = Opt::parse();

    let settings = match &opt.conf {
        Some(path) => Settings::load_from_yaml(path),
        None => Ok(Settings::default()),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_shutdown = CancellationToken::new();
    let log_task = settings.log.clone().map(|log| {
        let logger = Logger::new(log);
        logger.init_env_logger();
        tokio::spawn(logger.run(log_shutdown.clone()))
    });
    if log_task.is_none() {
        init_stderr_logger();
    }

    let mut builder = settings.server_builder();
    if settings.session.is_none() {
        builder = builder.session_store(Arc::new(MemoryStore::new()));
    }
    let mut server = match builder.build() {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to initialize server: {e}");
            std::process::exit(1);
        }
    };

    log::info!("Registering routes...");
    server
        .get(
            "/",
            Handler::route(|ctx| async move {
                let _ = ctx.json().success(&json!({"status": "ok"}));
            }),
            &[],
        )
        .get(
            "/visits",
            Handler::route(|ctx| async move {
                let Some(session) = ctx.session() else {
                    let _ = ctx.html().status_text(StatusCode::INTERNAL_SERVER_ERROR);
                    return;
                };
                let visits = session.get("visits").int() + 1;
                session.set("visits", &visits);
                let _ = ctx.json().success(&json!({"visits": visits}));
            }),
            &[with_session(true)],
        )
        .get(
            "/slow",
            Handler::route(|ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let _ = ctx.html().string(StatusCode::OK, "finished");
            }),
            &[with_timeout(Duration::from_secs(2))],
        );

    if let Err(e) = server.listen_and_serve(&settings.listen).await {
        log::error!("Server failed: {e}");
    }

    log_shutdown.cancel();
    if let Some(task) = log_task {
        let _ = task.await;
    }
}
