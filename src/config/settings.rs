//! Runtime settings loader.
//!
//! Loads and merges:
//! - System defaults: `<PRJ_ROOT>/conf/settings.yaml`
//! - User overrides:  `<PRJ_CONFIG_HOME>/face-bulk-admin/settings.yaml`
//!
//! Merge precedence is user over system.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

const DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH: &str = "conf/settings.yaml";
const DEFAULT_USER_SETTINGS_RELATIVE_PATH: &str = "face-bulk-admin/settings.yaml";
const DEFAULT_CONFIG_HOME_RELATIVE_PATH: &str = ".config";
static CONFIG_HOME_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub bulk: BulkSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// Remote biometric backend connection and credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendSettings {
    pub endpoint: Option<String>,
    pub client_id: Option<String>,
    pub signing_key_base64: Option<String>,
    pub token_lifetime_mins: Option<u64>,
    pub token_renewal_buffer_mins: Option<u64>,
    pub pool_size: Option<usize>,
    pub acquire_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
    pub health_check_interval_secs: Option<u64>,
    pub enrollment_deadline_secs: Option<u64>,
    pub verification_deadline_secs: Option<u64>,
    pub request_deadline_secs: Option<u64>,
}

/// Bulk engine limits.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkSettings {
    pub max_bulk_operation_size: Option<usize>,
    pub max_concurrent_operations: Option<usize>,
    pub batch_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub max_completed_retained: Option<usize>,
}

/// Administrative HTTP surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySettings {
    pub bind: Option<String>,
    pub enrollment_base_url: Option<String>,
    pub link_validity_hours: Option<u32>,
}

impl RuntimeSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            backend: self.backend.merge(overlay.backend),
            bulk: self.bulk.merge(overlay.bulk),
            gateway: self.gateway.merge(overlay.gateway),
        }
    }
}

impl BackendSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            endpoint: overlay.endpoint.or(self.endpoint),
            client_id: overlay.client_id.or(self.client_id),
            signing_key_base64: overlay.signing_key_base64.or(self.signing_key_base64),
            token_lifetime_mins: overlay.token_lifetime_mins.or(self.token_lifetime_mins),
            token_renewal_buffer_mins: overlay
                .token_renewal_buffer_mins
                .or(self.token_renewal_buffer_mins),
            pool_size: overlay.pool_size.or(self.pool_size),
            acquire_timeout_secs: overlay.acquire_timeout_secs.or(self.acquire_timeout_secs),
            connect_timeout_secs: overlay.connect_timeout_secs.or(self.connect_timeout_secs),
            keep_alive_secs: overlay.keep_alive_secs.or(self.keep_alive_secs),
            health_check_interval_secs: overlay
                .health_check_interval_secs
                .or(self.health_check_interval_secs),
            enrollment_deadline_secs: overlay
                .enrollment_deadline_secs
                .or(self.enrollment_deadline_secs),
            verification_deadline_secs: overlay
                .verification_deadline_secs
                .or(self.verification_deadline_secs),
            request_deadline_secs: overlay.request_deadline_secs.or(self.request_deadline_secs),
        }
    }
}

impl BulkSettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            max_bulk_operation_size: overlay
                .max_bulk_operation_size
                .or(self.max_bulk_operation_size),
            max_concurrent_operations: overlay
                .max_concurrent_operations
                .or(self.max_concurrent_operations),
            batch_size: overlay.batch_size.or(self.batch_size),
            queue_capacity: overlay.queue_capacity.or(self.queue_capacity),
            max_completed_retained: overlay
                .max_completed_retained
                .or(self.max_completed_retained),
        }
    }
}

impl GatewaySettings {
    fn merge(self, overlay: Self) -> Self {
        Self {
            bind: overlay.bind.or(self.bind),
            enrollment_base_url: overlay.enrollment_base_url.or(self.enrollment_base_url),
            link_validity_hours: overlay.link_validity_hours.or(self.link_validity_hours),
        }
    }
}

/// Load merged runtime settings (user overrides system).
pub fn load_runtime_settings() -> RuntimeSettings {
    let (system_path, user_path) = runtime_settings_paths();
    load_runtime_settings_from_paths(&system_path, &user_path)
}

#[doc(hidden)]
pub fn runtime_settings_paths() -> (PathBuf, PathBuf) {
    let root = project_root();
    let system_path = root.join(DEFAULT_SYSTEM_SETTINGS_RELATIVE_PATH);
    let user_path = resolve_config_home(&root).join(DEFAULT_USER_SETTINGS_RELATIVE_PATH);
    (system_path, user_path)
}

#[doc(hidden)]
pub fn load_runtime_settings_from_paths(system: &Path, user: &Path) -> RuntimeSettings {
    load_one(system).merge(load_one(user))
}

fn load_one(path: &Path) -> RuntimeSettings {
    if !path.exists() {
        return RuntimeSettings::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to read settings file; ignoring"
            );
            return RuntimeSettings::default();
        }
    };
    match serde_yaml::from_str::<RuntimeSettings>(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to parse settings yaml; ignoring file"
            );
            RuntimeSettings::default()
        }
    }
}

fn project_root() -> PathBuf {
    std::env::var("PRJ_ROOT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Set config-home override (used by CLI `--conf`).
///
/// The path can be absolute, or relative to `PRJ_ROOT`/cwd.
pub fn set_config_home_override(path: impl Into<PathBuf>) {
    let path = path.into();
    if path.as_os_str().is_empty() {
        return;
    }
    if CONFIG_HOME_OVERRIDE.set(path.clone()).is_err()
        && let Some(current) = CONFIG_HOME_OVERRIDE.get()
        && current != &path
    {
        tracing::warn!(
            current = %current.display(),
            ignored = %path.display(),
            "config home override already set; ignoring subsequent value"
        );
    }
}

fn resolve_config_home(project_root: &Path) -> PathBuf {
    if let Some(path) = CONFIG_HOME_OVERRIDE.get() {
        return absolutize(project_root, path.clone());
    }

    let configured = std::env::var("PRJ_CONFIG_HOME")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_HOME_RELATIVE_PATH.to_string());
    absolutize(project_root, PathBuf::from(configured))
}

fn absolutize(project_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}
