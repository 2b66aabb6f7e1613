//! Config namespace: yaml settings loading and resolved app config.

mod app;
mod settings;

pub use app::{AppConfig, BackendConfig, DEFAULT_BIND, DEFAULT_LINK_VALIDITY_HOURS, GatewayConfig};
pub use settings::{
    BackendSettings, BulkSettings, GatewaySettings, RuntimeSettings, load_runtime_settings,
    load_runtime_settings_from_paths, runtime_settings_paths, set_config_home_override,
};
