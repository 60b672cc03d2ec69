//! # speedtest-exporter
//!
//! Serves `qms_lib` speedtest results as Prometheus gauges over HTTP.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Index page |
//! | GET | `/health` | Liveness, always `OK` |
//! | GET | `/server_list` | Measurement servers as JSON |
//! | GET | `/speedtest` | Run a test, reply with exposition text |
//!
//! ## Disclaimer
//! This project is not affiliated with, endorsed by, or sponsored by the
//! vendors of the measurement binary. All trademarks and copyrights belong to
//! their respective owners.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

pub mod adapter;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod process;
pub mod service;
pub mod waiter;

use actix_web::{HttpResponse, Responder, get, web};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

pub use adapter::{QmsClient, SpeedtestAdapter};
pub use config::Config;
pub use error::{Result, SpeedtestError};
pub use models::*;
pub use service::{BackgroundTasks, Service};

/// State shared by every handler.
pub struct AppState {
    pub service: Service,
    /// Cancelled when the server shuts down; in-flight runs are killed.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: Service) -> Self {
        AppState {
            service,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SpeedtestQuery {
    pub server_id: Option<u32>,
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Speedtest Service</title>
</head>
<body>
    <h1>Speedtest Service</h1>
    <p>Internet speed test exporter. A single test takes roughly 40 seconds.</p>
    <div>
        <div><a href="/speedtest">/speedtest</a> Run a speed test</div>
        <div><a href="/server_list">/server_list</a> Measurement servers</div>
        <div><a href="/health">/health</a> Service status</div>
    </div>
</body>
</html>
"#;

#[get("/")]
pub async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

/// HTTP GET endpoint `/server_list` returns the measurement servers in the
/// order the binary listed them.
#[get("/server_list")]
pub async fn server_list(state: web::Data<AppState>) -> Result<HttpResponse> {
    // Dropping this future (client gone, worker stopped) kills the child
    // process, so only shutdown needs an explicit token.
    let cancel = state.shutdown.child_token();
    let servers = state.service.servers(&cancel).await?;
    Ok(HttpResponse::Ok().json(servers))
}

/// HTTP GET endpoint `/speedtest` runs a test and returns Prometheus text.
///
/// `?server_id=N` targets a specific server.
#[get("/speedtest")]
pub async fn speedtest(
    state: web::Data<AppState>,
    query: web::Query<SpeedtestQuery>,
) -> Result<HttpResponse> {
    let cancel = state.shutdown.child_token();
    let body = state.service.run_speedtest(&cancel, query.server_id).await?;
    Ok(HttpResponse::Ok()
        .content_type(metrics::CONTENT_TYPE)
        .body(body))
}

/// Registers every route on an actix `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(health)
        .service(server_list)
        .service(speedtest);
}
