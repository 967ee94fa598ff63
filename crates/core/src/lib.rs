//! meteo-etl core library
//!
//! Shared pieces for the pipeline binary:
//! - Configuration file discovery and loading (XDG-compliant)
//! - File system utilities

mod config;
pub mod fs;

pub use config::{find_config_file, load_config, ConfigSource};
pub use fs::{create_dir_all, ensure_parent_dir};

/// Application name used for XDG paths
pub const APP_NAME: &str = "meteo-etl";

/// Config file name searched for in the standard locations
pub const CONFIG_FILE_NAME: &str = "meteo-etl.toml";

/// Environment variable holding an explicit config file path
pub const CONFIG_ENV_VAR: &str = "METEO_ETL_CONFIG";
