use anyhow::anyhow;
use clap::Parser;
use meteo_etl_core::{find_config_file, load_config, ConfigSource, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
use slog::{o, Drain, Level, Logger};
use std::{env, time::Duration};

use crate::{default_locations, Location, WarehouseTarget};

pub const DEFAULT_PROVIDER_URL: &str = "https://api.open-meteo.com/v1";
pub const DEFAULT_WAREHOUSE_URL: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_TABLE: &str = "weather_data";

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "meteo-etl - Loads hourly Open-Meteo forecasts into BigQuery"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $METEO_ETL_CONFIG, ./meteo-etl.toml,
    /// $XDG_CONFIG_HOME/meteo-etl/meteo-etl.toml, /etc/meteo-etl/meteo-etl.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "METEO_ETL_LEVEL")]
    pub level: Option<String>,

    /// Weather provider base URL
    #[arg(long, env = "METEO_ETL_BASE_URL")]
    pub base_url: Option<String>,

    /// SQLite file used to stage records before the warehouse load
    #[arg(long, env = "METEO_ETL_STORE_PATH")]
    pub store_path: Option<String>,

    /// Table name inside the staging database
    #[arg(long, env = "METEO_ETL_STAGING_TABLE")]
    pub staging_table: Option<String>,

    /// BigQuery API base URL
    #[arg(long, env = "METEO_ETL_WAREHOUSE_URL")]
    pub warehouse_url: Option<String>,

    /// GCP project holding the warehouse dataset
    #[arg(long, env = "METEO_ETL_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Warehouse dataset id
    #[arg(long, env = "METEO_ETL_DATASET_ID")]
    pub dataset_id: Option<String>,

    /// Warehouse table id
    #[arg(long, env = "METEO_ETL_TABLE_ID")]
    pub table_id: Option<String>,

    /// OAuth2 bearer token for the warehouse API
    #[arg(long, env = "METEO_ETL_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Milliseconds between load job status checks
    #[arg(long, env = "METEO_ETL_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// HTTP User-Agent header for provider requests
    #[arg(long, env = "METEO_ETL_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Forecast points, only settable from the config file
    #[arg(skip)]
    pub locations: Option<Vec<Location>>,
}

impl Cli {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string())
    }

    pub fn store_path(&self) -> String {
        self.store_path
            .clone()
            .unwrap_or_else(|| "./data/sqlite_database.db".to_string())
    }

    pub fn staging_table(&self) -> String {
        self.staging_table
            .clone()
            .unwrap_or_else(|| DEFAULT_TABLE.to_string())
    }

    pub fn warehouse_url(&self) -> String {
        self.warehouse_url
            .clone()
            .unwrap_or_else(|| DEFAULT_WAREHOUSE_URL.to_string())
    }

    pub fn warehouse_target(&self) -> Result<WarehouseTarget, anyhow::Error> {
        let project_id = self
            .project_id
            .clone()
            .ok_or_else(|| anyhow!("missing project id, set --project-id or METEO_ETL_PROJECT_ID"))?;
        let dataset_id = self
            .dataset_id
            .clone()
            .ok_or_else(|| anyhow!("missing dataset id, set --dataset-id or METEO_ETL_DATASET_ID"))?;
        Ok(WarehouseTarget {
            project_id,
            dataset_id,
            table_id: self
                .table_id
                .clone()
                .unwrap_or_else(|| DEFAULT_TABLE.to_string()),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(1000))
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("meteo-etl/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn locations(&self) -> Vec<Location> {
        match &self.locations {
            Some(locations) if !locations.is_empty() => locations.clone(),
            _ => default_locations(),
        }
    }

    /// Fill every unset value from `file`; values already set (CLI or env) win
    pub fn merge(self, file: Cli) -> Cli {
        Cli {
            config: self.config,
            level: self.level.or(file.level),
            base_url: self.base_url.or(file.base_url),
            store_path: self.store_path.or(file.store_path),
            staging_table: self.staging_table.or(file.staging_table),
            warehouse_url: self.warehouse_url.or(file.warehouse_url),
            project_id: self.project_id.or(file.project_id),
            dataset_id: self.dataset_id.or(file.dataset_id),
            table_id: self.table_id.or(file.table_id),
            access_token: self.access_token.or(file.access_token),
            poll_interval_ms: self.poll_interval_ms.or(file.poll_interval_ms),
            user_agent: self.user_agent.or(file.user_agent),
            locations: self.locations.or(file.locations),
        }
    }
}

pub const PROJECT_ID_ALIAS: &str = "GCP_PROJECT_ID";
pub const DATASET_ID_ALIAS: &str = "GCP_DATASET_ID";
pub const LOG_LEVEL_ALIAS: &str = "LOG_LEVEL";

/// Values from the unprefixed variable names, ranked below `METEO_ETL_*` and above the file
pub fn env_aliases(lookup: impl Fn(&str) -> Option<String>) -> Cli {
    Cli {
        level: lookup(LOG_LEVEL_ALIAS),
        project_id: lookup(PROJECT_ID_ALIAS),
        dataset_id: lookup(DATASET_ID_ALIAS),
        ..Cli::default()
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Result<(Cli, ConfigSource), anyhow::Error> {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file(CONFIG_ENV_VAR, CONFIG_FILE_NAME)
    };

    let file_config: Cli = load_config(&source)?;
    let aliases = env_aliases(|name| env::var(name).ok());
    Ok((cli_args.merge(aliases).merge(file_config), source))
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn get_log_level(cli: &Cli) -> Level {
    match cli.level.as_ref() {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = get_log_level(cli);

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}
