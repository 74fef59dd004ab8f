//! Configuration for HLOD streaming hosts.
//!
//! Settings persist to disk as a RON file, accept CLI overrides via clap,
//! and tolerate missing or unknown fields so old files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, Config, DebugConfig, DemoConfig, default_config_dir};
pub use error::ConfigError;
