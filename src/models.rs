//! Records decoded from the artifacts written by `qms_lib`.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A measurement server, as listed by `qms_lib -L`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub city: String,
    pub lat: String,
    pub lng: String,
    pub src: String,
    pub source: String,
    pub port: i64,
    pub region_name: String,
    pub region_okato: String,
    pub external_id: String,
    /// Ranking number used by the binary to order servers. Unit-less.
    pub distance: i64,
}

/// Ping statistics recorded during the download or upload phase.
///
/// Values are passed through exactly as the binary reports them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PingStats {
    pub count: i64,
    pub min: i64,
    pub max: i64,
    pub mean: i64,
    pub median: i64,
    pub iqr: i64,
    pub iqm: i64,
    pub jitter: i64,
}

/// Amount of data transferred during a run.
///
/// Different `qms_lib` releases emit a number, a numeric string, or nothing.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(untagged)]
pub enum DataVolume {
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl DataVolume {
    /// Renders as a six-decimal number when the value is numeric, otherwise
    /// returns the raw text.
    pub fn formatted(&self) -> String {
        match self {
            DataVolume::Number(value) => format!("{value:.6}"),
            DataVolume::Text(text) => match text.trim().parse::<f64>() {
                Ok(value) => format!("{value:.6}"),
                Err(_) => text.clone(),
            },
            DataVolume::Missing => format!("{:.6}", 0.0),
        }
    }
}

/// A single speedtest result as written by `qms_lib -F json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SpeedtestResult {
    pub datetime: String,
    pub server: String,
    pub city: String,
    pub region_name: String,
    pub ip: String,
    pub isp: String,
    /// Milliseconds.
    pub ping: i64,
    /// Milliseconds.
    pub jitter: i64,
    /// Mbit/s.
    pub download: f64,
    pub download_ping: PingStats,
    /// Mbit/s.
    pub upload: f64,
    pub upload_ping: PingStats,
    pub data: DataVolume,
    /// Public report URL. Empty when the binary did not publish one.
    #[serde(rename = "result")]
    pub result_url: String,
    /// Wall-clock duration of the invocation, stamped after decoding.
    #[serde(skip)]
    pub duration: Duration,
}

/// A decoded artifact together with the file it was read from, so the
/// caller can schedule its removal once the value has been consumed.
#[derive(Debug, Clone)]
pub struct Artifact<T> {
    pub value: T,
    pub path: PathBuf,
}

/// JSON body returned with every failed request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_decodes_with_missing_fields() {
        let servers: Vec<Server> =
            serde_json::from_str(r#"[{"id":1,"name":"A","distance":10}]"#).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, 1);
        assert_eq!(servers[0].name, "A");
        assert_eq!(servers[0].distance, 10);
        assert_eq!(servers[0].city, "");
    }

    #[test]
    fn result_decodes_full_document() {
        let json = r#"{
            "datetime": "2025-09-01T10:00:00Z",
            "server": "Moscow #1",
            "city": "Moscow",
            "region_name": "Moscow",
            "ip": "10.0.0.1",
            "isp": "ISP",
            "ping": 20,
            "jitter": 3,
            "download": 123.45,
            "download_ping": {"count": 10, "min": 5, "max": 40, "mean": 20, "median": 19, "iqr": 4, "iqm": 18, "jitter": 2},
            "upload": 67.89,
            "upload_ping": {"count": 0},
            "data": "512.5",
            "result": "https://example.invalid/r/1"
        }"#;
        let result: SpeedtestResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.ping, 20);
        assert_eq!(result.download_ping.max, 40);
        assert_eq!(result.upload_ping, PingStats::default());
        assert_eq!(result.data, DataVolume::Text("512.5".into()));
        assert_eq!(result.result_url, "https://example.invalid/r/1");
        assert_eq!(result.duration, Duration::ZERO);
    }

    #[test]
    fn data_volume_accepts_every_shape() {
        let number: DataVolume = serde_json::from_str("42.5").unwrap();
        let text: DataVolume = serde_json::from_str(r#""42.5""#).unwrap();
        let null: DataVolume = serde_json::from_str("null").unwrap();
        let junk: DataVolume = serde_json::from_str(r#""n/a""#).unwrap();

        assert_eq!(number.formatted(), "42.500000");
        assert_eq!(text.formatted(), "42.500000");
        assert_eq!(null.formatted(), "0.000000");
        assert_eq!(junk.formatted(), "n/a");
    }
}
