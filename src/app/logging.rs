// SPDX-License-Identifier: MIT

use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Dependencies whose debug output would drown the engine's own logs.
const QUIET_DIRECTIVES: &str =
    "h2=info,hyper=info,hyper_util=info,reqwest=info,sqlx=warn,alloy_transport_http=info";

pub fn setup_logging(log_level: &str, json_format: bool) {
    let spec = log_level.trim();
    // A directive string (containing ',' or '=') is used verbatim; a bare
    // level gets the quiet-dependency defaults appended.
    let spec = if spec.contains(',') || spec.contains('=') {
        spec.to_string()
    } else {
        format!("{spec},{QUIET_DIRECTIVES}")
    };

    let filter = EnvFilter::from_str(&spec).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_format {
        registry
            .with(fmt::layer().json().with_target(false).with_current_span(false))
            .init();
    } else {
        registry.with(fmt::layer().compact().with_target(true)).init();
    }

    tracing::info!(filter = %spec, json = json_format, "Logging initialized");
}
