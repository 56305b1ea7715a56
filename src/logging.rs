use std::env;
use std::error::Error;

use tracing_appender::non_blocking::WorkerGuard;

/// Install the global subscriber. With `JSON_LOG=true` logs are written as
/// Bunyan JSON through a non-blocking stdout writer; keep the returned guard
/// alive until exit so buffered lines are flushed.
pub fn init_logger() -> Result<Option<WorkerGuard>, Box<dyn Error + Send + Sync>> {
    use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
    use tracing_log::LogTracer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::{EnvFilter, Registry};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !json_log_enabled() {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()?;
        return Ok(None);
    }

    // Redirect the logs from log library to tracing's subscribers.
    LogTracer::init()?;

    let app_name = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION")).to_string();

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);
    let subscriber = Registry::default()
        .with(filter)
        .with(JsonStorageLayer)
        .with(bunyan_formatting_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(Some(guard))
}

fn json_log_enabled() -> bool {
    env::var("JSON_LOG").map_or(false, |s| s.parse().unwrap_or_default())
}
