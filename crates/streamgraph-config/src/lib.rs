//! Configuration for streamgraph media graphs.
//!
//! A [`GraphConfig`] describes the graph rate, the output channel count,
//! whether the graph runs in realtime, and how its drivers are tuned. It is
//! stored as TOML, by default under [`paths::default_config_path`].
//!
//! # Example
//!
//! ```rust,no_run
//! use streamgraph_config::{GraphConfig, default_config_path};
//!
//! let mut config = GraphConfig::load_or_default(default_config_path()).unwrap();
//! config.driver.device_name = Some("USB".to_string());
//! config.save(default_config_path()).unwrap();
//! ```

mod error;
mod graph_config;

/// Platform-specific configuration paths.
pub mod paths;

pub use error::ConfigError;
pub use graph_config::{DriverConfig, GraphConfig, MAX_OUTPUT_CHANNELS};
pub use paths::{default_config_path, ensure_user_config_dir, user_config_dir};
