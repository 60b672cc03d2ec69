// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! HTTP surface tests for `speedtest-exporter`.
//!
//! The measurement binary is replaced by a scripted [`SpeedtestAdapter`]
//! so the handlers, status codes and bodies can be checked in isolation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use actix_web::{App, http, test, web};
use async_trait::async_trait;
use speedtest_exporter::*;
use tokio_util::sync::CancellationToken;

enum Script {
    Succeed,
    Fail(fn() -> SpeedtestError),
}

struct ScriptedAdapter {
    script: Script,
}

#[async_trait]
impl SpeedtestAdapter for ScriptedAdapter {
    async fn fetch_servers(&self, _cancel: &CancellationToken) -> Result<Artifact<Vec<Server>>> {
        match &self.script {
            Script::Succeed => Ok(Artifact {
                value: vec![
                    Server {
                        id: 2,
                        name: "Near".into(),
                        distance: 3,
                        ..Server::default()
                    },
                    Server {
                        id: 1,
                        name: "Far".into(),
                        distance: 10,
                        ..Server::default()
                    },
                ],
                path: PathBuf::from("server_data"),
            }),
            Script::Fail(make) => Err(make()),
        }
    }

    async fn run_speedtest(
        &self,
        _cancel: &CancellationToken,
        server_id: Option<u32>,
    ) -> Result<Artifact<SpeedtestResult>> {
        match &self.script {
            Script::Succeed => Ok(Artifact {
                value: SpeedtestResult {
                    server: format!("server {}", server_id.unwrap_or(0)),
                    download: 123.45,
                    upload: 67.89,
                    ping: 20,
                    ..SpeedtestResult::default()
                },
                path: PathBuf::from("data/test-0.json"),
            }),
            Script::Fail(make) => Err(make()),
        }
    }

    async fn remove_artifact(&self, _path: &Path) {}
}

fn state(script: Script) -> web::Data<AppState> {
    let adapter = Arc::new(ScriptedAdapter { script });
    web::Data::new(AppState::new(Service::new(adapter, BackgroundTasks::new(), None)))
}

#[actix_web::test]
async fn health_returns_ok() {
    let app = test::init_service(App::new().app_data(state(Script::Succeed)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::OK);
    assert_eq!(test::read_body(resp).await, "OK");
}

#[actix_web::test]
async fn index_links_every_endpoint() {
    let app = test::init_service(App::new().app_data(state(Script::Succeed)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    for link in ["/speedtest", "/server_list", "/health"] {
        assert!(body.contains(&format!("href=\"{link}\"")), "{link}");
    }
}

#[actix_web::test]
async fn server_list_keeps_binary_order() {
    let app = test::init_service(App::new().app_data(state(Script::Succeed)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/server_list").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::OK);
    let servers: Vec<Server> = test::read_body_json(resp).await;
    let ids: Vec<i64> = servers.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![2, 1]);
}

#[actix_web::test]
async fn server_list_failure_is_structured() {
    let failing = Script::Fail(|| SpeedtestError::Timeout("server_data did not appear".into()));
    let app = test::init_service(App::new().app_data(state(failing)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/server_list").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.code, "timeout");
    assert!(body.message.contains("server_data did not appear"));
}

#[actix_web::test]
async fn speedtest_returns_exposition_text() {
    let app = test::init_service(App::new().app_data(state(Script::Succeed)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/speedtest").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::OK);
    assert_eq!(
        resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("qms_speedtest_download_mbps 123.450000\n"));
    assert!(body.contains("qms_speedtest_upload_mbps 67.890000\n"));
    assert!(body.contains("qms_speedtest_ping_ms 20\n"));
}

#[actix_web::test]
async fn speedtest_passes_requested_server() {
    let app = test::init_service(App::new().app_data(state(Script::Succeed)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/speedtest?server_id=77").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::OK);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("server=\"server 77\""));
}

#[actix_web::test]
async fn speedtest_failure_is_structured() {
    let failing = Script::Fail(|| SpeedtestError::ExecutionFailed("exit status 1".into()));
    let app = test::init_service(App::new().app_data(state(failing)).configure(configure)).await;
    let req = test::TestRequest::get().uri("/speedtest").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.code, "external_exec_failed");
    assert_eq!(body.message, "speedtest binary failed: exit status 1");
}
