//! Resolved application configuration.
//!
//! [`AppConfig::from_settings`] turns the optional, merged YAML settings into
//! concrete values, applying defaults and rejecting incomplete credentials
//! up front rather than at first use.

use crate::config::settings::RuntimeSettings;
use crate::error::AdminError;
use crate::jobs::BulkEngineConfig;
use crate::pool::PoolConfig;
use crate::remote::OperationDeadlines;

/// Default admin bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8088";
/// Default enrollment-link validity.
pub const DEFAULT_LINK_VALIDITY_HOURS: u32 = 24;

/// Remote backend connection, credentials, and call deadlines.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the biometric backend.
    pub endpoint: String,
    /// Client identity used as JWT subject and issuer.
    pub client_id: String,
    /// Base64-encoded JWT signing key.
    pub signing_key_base64: String,
    /// Token lifetime in minutes; `None` uses the provider default.
    pub token_lifetime_mins: Option<u64>,
    /// Renewal buffer in minutes; `None` uses the provider default.
    pub token_renewal_buffer_mins: Option<u64>,
    /// Channel pool sizing and timeouts.
    pub pool: PoolConfig,
    /// Per-operation call deadlines.
    pub deadlines: OperationDeadlines,
}

/// Administrative HTTP surface.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address the admin server binds to.
    pub bind: String,
    /// Base URL generated enrollment links point at.
    pub enrollment_base_url: String,
    /// Validity window for generated links.
    pub link_validity_hours: u32,
}

/// Everything the binary needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub bulk: BulkEngineConfig,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Resolve merged settings into a validated configuration.
    pub fn from_settings(settings: RuntimeSettings) -> Result<Self, AdminError> {
        let endpoint = require(settings.backend.endpoint, "backend.endpoint")?;
        let client_id = require(settings.backend.client_id, "backend.client_id")?;
        let signing_key_base64 = require(
            settings.backend.signing_key_base64,
            "backend.signing_key_base64",
        )?;

        let pool_defaults = PoolConfig::default();
        let pool = PoolConfig {
            pool_size: settings.backend.pool_size.unwrap_or(pool_defaults.pool_size),
            acquire_timeout_secs: settings
                .backend
                .acquire_timeout_secs
                .unwrap_or(pool_defaults.acquire_timeout_secs),
            connect_timeout_secs: settings
                .backend
                .connect_timeout_secs
                .unwrap_or(pool_defaults.connect_timeout_secs),
            keep_alive_secs: settings
                .backend
                .keep_alive_secs
                .unwrap_or(pool_defaults.keep_alive_secs),
            health_check_interval_secs: settings
                .backend
                .health_check_interval_secs
                .unwrap_or(pool_defaults.health_check_interval_secs),
        };

        let deadline_defaults = OperationDeadlines::default();
        let deadlines = OperationDeadlines {
            enrollment_secs: settings
                .backend
                .enrollment_deadline_secs
                .unwrap_or(deadline_defaults.enrollment_secs),
            verification_secs: settings
                .backend
                .verification_deadline_secs
                .unwrap_or(deadline_defaults.verification_secs),
            request_secs: settings
                .backend
                .request_deadline_secs
                .unwrap_or(deadline_defaults.request_secs),
        };

        let bulk_defaults = BulkEngineConfig::default();
        let bulk = BulkEngineConfig {
            max_bulk_operation_size: settings
                .bulk
                .max_bulk_operation_size
                .unwrap_or(bulk_defaults.max_bulk_operation_size),
            max_concurrent_operations: settings
                .bulk
                .max_concurrent_operations
                .unwrap_or(bulk_defaults.max_concurrent_operations),
            batch_size: settings.bulk.batch_size.unwrap_or(bulk_defaults.batch_size),
            queue_capacity: settings
                .bulk
                .queue_capacity
                .unwrap_or(bulk_defaults.queue_capacity),
            max_completed_retained: settings
                .bulk
                .max_completed_retained
                .unwrap_or(bulk_defaults.max_completed_retained),
        };

        let gateway = GatewayConfig {
            bind: settings
                .gateway
                .bind
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            // Links default to the backend host when no dedicated UI is set.
            enrollment_base_url: settings
                .gateway
                .enrollment_base_url
                .unwrap_or_else(|| endpoint.clone()),
            link_validity_hours: settings
                .gateway
                .link_validity_hours
                .unwrap_or(DEFAULT_LINK_VALIDITY_HOURS)
                .max(1),
        };

        Ok(Self {
            backend: BackendConfig {
                endpoint,
                client_id,
                signing_key_base64,
                token_lifetime_mins: settings.backend.token_lifetime_mins,
                token_renewal_buffer_mins: settings.backend.token_renewal_buffer_mins,
                pool,
                deadlines,
            },
            bulk,
            gateway,
        })
    }
}

fn require(value: Option<String>, key: &str) -> Result<String, AdminError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AdminError::Configuration(format!("{key} must be set")))
}
