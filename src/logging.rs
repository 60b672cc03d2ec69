//! JSON tracing setup and short request ids.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use time::macros::format_description;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a JSON subscriber on stdout. `RUST_LOG` overrides the default
/// `info` level. Records emitted through the `log` facade (actix's request
/// logger among them) are forwarded as well.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
    ));

    let fmt_layer = fmt::layer()
        .event_format(fmt::format().json().with_current_span(false).with_span_list(false))
        .fmt_fields(fmt::format::JsonFields::new())
        .with_timer(timer)
        .with_writer(std::io::stdout);

    // Ignore a second initialisation, e.g. from tests.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Short random identifier used to keep per-run artifacts apart.
pub fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}
