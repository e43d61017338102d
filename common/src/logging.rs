//! Tracing bootstrap shared by both binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Honors `RUST_LOG`, defaulting
/// to `info` for this crate family and `warn` for dependencies.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,bollard=warn"));

    let builder = fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
