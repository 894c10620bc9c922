use std::future::Future;

use clap::Parser;
use hourline::engine::{self, Hourline};
use hourline::logging::{get_subscriber, init_subscriber};
use hourline::settings::{CliOptions, Settings};
use hourline::Result;
use once_cell::sync::Lazy;
use prometheus::Registry;
use settings_loader::SettingsLoader;

static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("hourline".to_string()), None).expect("failed to create prometheus registry")
});

fn main() -> Result<()> {
    let subscriber = get_subscriber("hourline", "info", std::io::stdout);
    init_subscriber(subscriber);

    let main_span = tracing::trace_span!("main");
    let _main_span_guard = main_span.enter();

    let options = CliOptions::parse();
    let settings = Settings::load(&options)?;
    tracing::info!(?settings, "hourline settings loaded.");

    start_pipeline(async move {
        let engine = Hourline::builder()
            .with_metrics_registry(&METRICS_REGISTRY)
            .finish(&settings)
            .await?
            .run();

        tracing::info!("Starting rollup engine management API...");
        let api_handle = engine::run_http_server(engine.inner.tx_service_api.clone(), &settings.http).await?;

        tracing::info!("rollup engine fully running...");
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupt received - stopping rollup engine.");
            },

            api = api_handle => {
                tracing::error!(result=?api, "rollup engine API stopped unexpectedly - stopping rollup engine.");
            },
        }

        engine.shutdown().await?;
        tracing::info!("hourline stopped.");
        Ok(())
    })
}

#[tracing::instrument(level="trace", skip(future), fields(worker_threads=num_cpus::get()))]
fn start_pipeline<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let worker_threads = num_cpus::get();
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(future)
}
