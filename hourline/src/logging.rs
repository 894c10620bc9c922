use once_cell::sync::Lazy;
use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Subscriber installed once for unit and integration tests. Output is only emitted when
/// `TEST_LOG` is set, filtered by `RUST_LOG` (default `debug`).
pub static TEST_TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "debug";
    let subscriber_name = "test";
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    };
});

/// Bunyan JSON formatted subscriber; `RUST_LOG` overrides `log_directives`.
pub fn get_subscriber<S0, S1, W>(name: S0, log_directives: S1, sink: W) -> impl Subscriber + Sync + Send
where
    S0: Into<String>,
    S1: AsRef<str>,
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_directives.as_ref()));

    let formatting_layer = BunyanFormattingLayer::new(name.into(), sink);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer)
}

/// Registers the subscriber as the global default. A subscriber already installed by another
/// test in the same process is left in place.
pub fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    if let Err(error) = set_global_default(subscriber) {
        eprintln!("tracing subscriber already set: {error}");
    }
}
