//! Logging setup: parse the requested level, fall back to INFO on
//! anything unrecognized, install a formatting subscriber.

pub fn init_logging(log_level: Option<&str>) {
    let level = log_level
        .and_then(|s| s.parse::<tracing::Level>().ok())
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .init();
}
