//! Prometheus text exposition (`text/plain; version=0.0.4`) of a speedtest
//! result.
//!
//! Every render emits the same eight gauges in the same order:
//!
//! | metric | value |
//! |---|---|
//! | `qms_speedtest_ping_ms` | ping |
//! | `qms_speedtest_jitter_ms` | jitter |
//! | `qms_speedtest_download_mbps` | download throughput |
//! | `qms_speedtest_download_ping` | `1`, ping stats as labels |
//! | `qms_speedtest_upload_mbps` | upload throughput |
//! | `qms_speedtest_upload_ping` | `1`, ping stats as labels |
//! | `qms_speedtest_info` | `1`, descriptive labels |
//! | `qms_speedtest_scrape_duration_seconds` | invocation duration |

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::fmt::{Display, Write};

use crate::models::{PingStats, SpeedtestResult};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders `result` as gauges. Pure: the same input always yields the same
/// bytes.
pub fn render(result: &SpeedtestResult) -> String {
    let mut out = String::with_capacity(1536);

    gauge(&mut out, "qms_speedtest_ping_ms", "Average ping in ms", "", result.ping);
    gauge(&mut out, "qms_speedtest_jitter_ms", "Jitter in ms", "", result.jitter);
    gauge(
        &mut out,
        "qms_speedtest_download_mbps",
        "Download speed in Mbps",
        "",
        format_args!("{:.6}", result.download),
    );
    gauge(
        &mut out,
        "qms_speedtest_download_ping",
        "Download ping stats",
        &ping_labels(&result.download_ping),
        1,
    );
    gauge(
        &mut out,
        "qms_speedtest_upload_mbps",
        "Upload speed in Mbps",
        "",
        format_args!("{:.6}", result.upload),
    );
    gauge(
        &mut out,
        "qms_speedtest_upload_ping",
        "Upload ping stats",
        &ping_labels(&result.upload_ping),
        1,
    );

    let data = result.data.formatted();
    let info = labels(&[
        ("datetime", result.datetime.as_str()),
        ("server", result.server.as_str()),
        ("city", result.city.as_str()),
        ("region", result.region_name.as_str()),
        ("ip", result.ip.as_str()),
        ("isp", result.isp.as_str()),
        ("data", data.as_str()),
    ]);
    gauge(&mut out, "qms_speedtest_info", "Meta information", &info, 1);

    gauge(
        &mut out,
        "qms_speedtest_scrape_duration_seconds",
        "Duration speedtest in seconds",
        "",
        format_args!("{:.2}", result.duration.as_secs_f64()),
    );

    out
}

/// Escapes a label value: `\` → `\\`, `"` → `\"`, newline → `\n`.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn gauge(out: &mut String, name: &str, help: &str, labels: &str, value: impl Display) {
    // Writing to a String cannot fail.
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    if labels.is_empty() {
        let _ = writeln!(out, "{name} {value}");
    } else {
        let _ = writeln!(out, "{name}{{{labels}}} {value}");
    }
}

fn labels(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{key}=\"{}\"", escape_label_value(value));
    }
    out
}

fn ping_labels(stats: &PingStats) -> String {
    let values = [
        ("count", stats.count),
        ("min", stats.min),
        ("max", stats.max),
        ("mean", stats.mean),
        ("median", stats.median),
        ("iqr", stats.iqr),
        ("iqm", stats.iqm),
        ("jitter", stats.jitter),
    ]
    .map(|(key, value)| (key, value.to_string()));
    let pairs: Vec<(&str, &str)> = values.iter().map(|(k, v)| (*k, v.as_str())).collect();
    labels(&pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataVolume;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn sample() -> SpeedtestResult {
        SpeedtestResult {
            datetime: "2025-09-01T10:00:00Z".into(),
            server: "Moscow #1".into(),
            city: "Moscow".into(),
            region_name: "Moscow".into(),
            ip: "10.0.0.1".into(),
            isp: "Example ISP".into(),
            ping: 20,
            jitter: 3,
            download: 123.45,
            download_ping: PingStats {
                count: 10,
                min: 5,
                max: 40,
                mean: 20,
                median: 19,
                iqr: 4,
                iqm: 18,
                jitter: 2,
            },
            upload: 67.89,
            upload_ping: PingStats::default(),
            data: DataVolume::Number(512.5),
            result_url: String::new(),
            duration: Duration::from_millis(41_237),
        }
    }

    /// A sample line taken apart the way a scraper reads it.
    #[derive(Debug)]
    struct Sample {
        name: String,
        labels: BTreeMap<String, String>,
        value: f64,
    }

    fn parse_sample(line: &str) -> Sample {
        let name_end = line.find(['{', ' ']).expect("metric name");
        let name = line[..name_end].to_string();
        let mut labels = BTreeMap::new();
        let mut chars = line[name_end..].chars().peekable();

        if chars.peek() == Some(&'{') {
            chars.next();
            loop {
                let mut key = String::new();
                for c in chars.by_ref() {
                    if c == '=' {
                        break;
                    }
                    key.push(c);
                }
                assert_eq!(chars.next(), Some('"'), "label value must be quoted");
                let mut value = String::new();
                loop {
                    match chars.next().expect("unterminated label value") {
                        '\\' => match chars.next().expect("dangling escape") {
                            'n' => value.push('\n'),
                            other => value.push(other),
                        },
                        '"' => break,
                        '\n' => panic!("raw newline inside label value"),
                        c => value.push(c),
                    }
                }
                labels.insert(key, value);
                match chars.next() {
                    Some(',') => continue,
                    Some('}') => break,
                    other => panic!("unexpected {other:?} after label"),
                }
            }
        }

        let rest: String = chars.collect();
        let value = rest.trim().parse().expect("numeric sample value");
        Sample { name, labels, value }
    }

    fn samples(exposition: &str) -> Vec<Sample> {
        exposition
            .lines()
            .filter(|line| !line.starts_with('#'))
            .map(parse_sample)
            .collect()
    }

    #[test]
    fn renders_every_gauge_in_order() {
        let text = render(&sample());
        let names: Vec<String> = samples(&text).into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "qms_speedtest_ping_ms",
                "qms_speedtest_jitter_ms",
                "qms_speedtest_download_mbps",
                "qms_speedtest_download_ping",
                "qms_speedtest_upload_mbps",
                "qms_speedtest_upload_ping",
                "qms_speedtest_info",
                "qms_speedtest_scrape_duration_seconds",
            ]
        );

        for name in &names {
            assert!(text.contains(&format!("# TYPE {name} gauge\n")), "{name}");
            assert!(text.contains(&format!("# HELP {name} ")), "{name}");
        }
        assert_eq!(text.lines().count(), 8 * 3);
    }

    #[test]
    fn renders_values() {
        let text = render(&sample());
        assert!(text.contains("qms_speedtest_ping_ms 20\n"));
        assert!(text.contains("qms_speedtest_jitter_ms 3\n"));
        assert!(text.contains("qms_speedtest_download_mbps 123.450000\n"));
        assert!(text.contains("qms_speedtest_upload_mbps 67.890000\n"));
        assert!(text.contains("qms_speedtest_scrape_duration_seconds 41.24\n"));
        assert!(text.contains(
            "qms_speedtest_download_ping{count=\"10\",min=\"5\",max=\"40\",mean=\"20\",median=\"19\",iqr=\"4\",iqm=\"18\",jitter=\"2\"} 1\n"
        ));
        assert!(text.contains(
            "qms_speedtest_info{datetime=\"2025-09-01T10:00:00Z\",server=\"Moscow #1\",city=\"Moscow\",region=\"Moscow\",ip=\"10.0.0.1\",isp=\"Example ISP\",data=\"512.500000\"} 1\n"
        ));
    }

    #[test]
    fn rendering_is_idempotent() {
        let result = sample();
        assert_eq!(render(&result), render(&result));
    }

    #[test]
    fn escapes_label_values() {
        assert_eq!(escape_label_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_label_value("two\nlines"), "two\\nlines");
        assert_eq!(escape_label_value("plain"), "plain");
    }

    #[test]
    fn hostile_labels_survive_a_parse() {
        let mut result = sample();
        result.server = r#"Srv "Quoted" \ backslash"#.into();
        result.isp = "ISP \"Ltd\",} 0\nfake_metric 1".into();
        result.city = r"C:\path\".into();

        let text = render(&result);
        let parsed = samples(&text);
        assert_eq!(parsed.len(), 8);

        let info = parsed
            .iter()
            .find(|s| s.name == "qms_speedtest_info")
            .expect("info gauge");
        assert_eq!(info.value, 1.0);
        assert_eq!(info.labels["server"], result.server);
        assert_eq!(info.labels["isp"], result.isp);
        assert_eq!(info.labels["city"], result.city);
        assert_eq!(info.labels.len(), 7);
    }

    #[test]
    fn negative_ping_stats_pass_through() {
        let mut result = sample();
        result.upload_ping.min = -1;
        let text = render(&result);
        let upload = samples(&text)
            .into_iter()
            .find(|s| s.name == "qms_speedtest_upload_ping")
            .unwrap();
        assert_eq!(upload.labels["min"], "-1");
        assert_eq!(upload.labels["count"], "0");
    }
}
