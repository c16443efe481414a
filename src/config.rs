//! Configuration: compiled-in defaults, an optional YAML file, then
//! environment variable overrides.

mod settings;

pub use settings::{AppConfig, ServerConfig, Settings, StoreConfig};
