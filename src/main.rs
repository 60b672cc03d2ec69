//! # speedtest-exporter
//!
//! Serves `qms_lib` speedtest results as Prometheus gauges over HTTP.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io;
use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use speedtest_exporter::{AppState, BackgroundTasks, Config, QmsClient, Service, configure, logging};
use tracing::{error, info};

/// Starts the Actix-web server.
///
/// Binds to `BIND_ADDRESS` and `BIND_PORT`. On Ctrl-C or SIGTERM in-flight
/// speedtests are cancelled, the server stops gracefully and pending
/// artifact cleanup is drained.
#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "invalid configuration");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;
    config.log_summary();

    let background = BackgroundTasks::new();
    let client = QmsClient::new(&config);
    let service = Service::new(Arc::new(client), background.clone(), config.server_id);
    let state = web::Data::new(AppState::new(service));
    let shutdown = state.shutdown.clone();

    info!(
        "Starting server at http://{}:{}/speedtest",
        config.bind_address, config.bind_port
    );

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default().exclude("/health"))
            .app_data(state.clone())
            .configure(configure)
    })
    .disable_signals()
    .shutdown_timeout(config.shutdown_timeout.as_secs())
    .bind((config.bind_address.as_str(), config.bind_port))?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested");
        shutdown.cancel();
        handle.stop(true).await;
    });

    server.await?;

    background.drain(config.shutdown_timeout).await;
    info!("server stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "can't listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
