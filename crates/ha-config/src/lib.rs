//! Configuration loading for the Home Assistant control client
//!
//! The client reads `ha-control.yaml` from a configuration directory. Two
//! custom YAML tags are understood:
//!
//! - `!secret key` - Substitute from `secrets.yaml` in the same directory
//! - `!env_var VAR [default]` - Substitute an environment variable
//!
//! `HA_URL` and `HA_TOKEN` in the environment override the file.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::ClientConfig;
//!
//! let config = ClientConfig::load("/etc/ha-control")?;
//! println!("{}", config.url);
//! ```

mod client;
mod error;
mod loader;
mod secrets;

pub use client::{ClientConfig, CONFIG_FILE, ENV_TOKEN, ENV_URL};
pub use error::{ConfigError, ConfigResult};
pub use loader::YamlLoader;
pub use secrets::Secrets;
