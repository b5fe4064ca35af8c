use tracing::{level_filters::LevelFilter, Subscriber};
use tracing_subscriber::{layer::SubscriberExt as _, registry::LookupSpan, util::SubscriberInitExt as _, EnvFilter, Layer};

/// Initializes the logging subsystem for `tracing`.
///
/// Log filtering directives are read from `DATAPORT_LOG_LEVEL`, defaulting to `INFO`. When `DATAPORT_LOG_FORMAT_JSON`
/// is `true` or `1`, logs are written as JSON, otherwise in a compact human-readable format. Logs always go to standard
/// error, as standard output carries the replayed batches.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging() -> Result<(), anyhow::Error> {
    let is_json = std::env::var("DATAPORT_LOG_FORMAT_JSON")
        .map(|s| s.trim().to_lowercase())
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);

    let level_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("DATAPORT_LOG_LEVEL")
        .from_env_lossy();

    if is_json {
        tracing_subscriber::registry()
            .with(initialize_tracing_json().with_filter(level_filter))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(initialize_tracing_pretty().with_filter(level_filter))
            .try_init()?;
    }

    Ok(())
}

fn initialize_tracing_json<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new()
        .json()
        .flatten_event(true)
        .with_target(true)
        .with_writer(std::io::stderr)
}

fn initialize_tracing_pretty<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new()
        .compact()
        .with_ansi(true)
        .with_target(true)
        .with_writer(std::io::stderr)
}
