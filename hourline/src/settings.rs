use std::path::PathBuf;

use clap::Parser;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};
use settings_loader::common::http::HttpServerSettings;
use settings_loader::{Environment, LoadingOptions, SettingsError, SettingsLoader};

mod engine_settings;
mod publisher_settings;
mod storage_settings;

pub use engine_settings::*;
pub use publisher_settings::*;
pub use storage_settings::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub http: HttpServerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub publisher: PublisherSettings,
}

impl SettingsLoader for Settings {
    type Options = CliOptions;
}

#[derive(Parser, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[clap(author, version, about)]
pub struct CliOptions {
    /// override environment-based configuration file to load.
    /// Default behavior is to load configuration based on `APP_ENVIRONMENT` envvar.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// specify path to secrets configuration file
    #[clap(short, long)]
    pub secrets: Option<PathBuf>,

    #[clap(short, long)]
    pub environment: Option<Environment>,

    /// Override default location from which to load configuration files. Default directory is
    /// ./resources.
    #[clap(short, long)]
    pub resources: Option<PathBuf>,

    /// Override the configured rollup storage, e.g. `memory` for a local dry run.
    #[clap(long, value_parser = ["memory", "postgres"])]
    pub storage: Option<String>,

    /// Override the reconcile interval in seconds; must be at least 1.
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub reconcile_interval_secs: Option<u64>,
}

impl LoadingOptions for CliOptions {
    type Error = SettingsError;

    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone()
    }

    fn resources_path(&self) -> Option<PathBuf> {
        self.resources.clone()
    }

    fn secrets_path(&self) -> Option<PathBuf> {
        self.secrets.clone()
    }

    fn load_overrides(&self, config: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, Self::Error> {
        let config = match self.storage.as_deref() {
            None => config,
            Some(kind) => config.set_override("storage.kind", kind)?,
        };

        let config = match self.reconcile_interval_secs {
            None => config,
            Some(secs) => config.set_override("engine.reconcile_interval_secs", secs)?,
        };

        Ok(config)
    }

    fn environment_override(&self) -> Option<Environment> {
        self.environment.clone()
    }
}
