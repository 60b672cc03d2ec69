//! Error kinds surfaced by the adapter and the service.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Everything that can go wrong while talking to the measurement binary.
///
/// Every variant is reported to HTTP clients as a 500 with a stable
/// machine-readable [`code`](SpeedtestError::code). Nothing is retried here.
#[derive(Debug, Error)]
pub enum SpeedtestError {
    /// The request deadline elapsed while waiting for the process or a file.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The caller (or server shutdown) cancelled the operation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The binary could not be started or exited abnormally for a reason
    /// that is not a tolerated abort.
    #[error("speedtest binary failed: {0}")]
    ExecutionFailed(String),

    /// The run looked successful but its artifact is absent or unreadable.
    #[error("result file missing: {0}")]
    ResultMissing(String),

    /// The artifact exists but is not the JSON we expect.
    #[error("failed to decode {what}: {source}")]
    DecodeFailed {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl SpeedtestError {
    pub fn code(&self) -> &'static str {
        match self {
            SpeedtestError::Timeout(_) => "timeout",
            SpeedtestError::Cancelled(_) => "cancelled",
            SpeedtestError::ExecutionFailed(_) => "external_exec_failed",
            SpeedtestError::ResultMissing(_) => "result_file_missing",
            SpeedtestError::DecodeFailed { .. } => "decode_failed",
        }
    }
}

impl ResponseError for SpeedtestError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        })
    }
}

pub type Result<T> = std::result::Result<T, SpeedtestError>;
