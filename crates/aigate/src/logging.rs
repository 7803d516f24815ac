//! Tracing subscriber setup.
//!
//! `RUST_LOG` selects the filter (default `info`). `LOG_FORMAT=json` switches
//! to one JSON object per line.

use std::env;

use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stdout);

    let result = if json_requested(env::var("LOG_FORMAT").ok().as_deref()) {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(e) = result {
        warn!("Logging already initialized: {}", e);
    }
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}
