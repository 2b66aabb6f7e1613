//! Fixed-size pool of HTTP channels to the biometric backend.
//!
//! The pool holds N pre-built clients and hands them out round-robin. A
//! semaphore bounds concurrent leases to N, so acquisition blocks (with a
//! bounded wait) when the pool is exhausted rather than creating extra
//! channels. Request/failure counters are atomics so metric snapshots never
//! tear under concurrent acquire/release.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AdminError, RemoteErrorCode};

/// Default number of channels.
pub const DEFAULT_POOL_SIZE: usize = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
const DEFAULT_HEALTH_PROBE_TIMEOUT_MS: u64 = 1_500;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Channel pool construction settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Fixed number of channels; never exceeded.
    pub pool_size: usize,
    /// Bounded wait for a free channel before failing retryably.
    pub acquire_timeout_secs: u64,
    /// TCP connect timeout per channel.
    pub connect_timeout_secs: u64,
    /// HTTP keep-alive interval per channel.
    pub keep_alive_secs: u64,
    /// Interval for the background health loop.
    pub health_check_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        }
    }
}

/// Outcome reported on release; drives the cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The remote call completed without error.
    Success,
    /// The remote call failed (any classification).
    Failure,
}

/// One reusable transport channel.
#[derive(Debug)]
pub struct HttpChannel {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpChannel {
    /// Client for issuing requests over this channel.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Backend base endpoint this channel targets.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// A leased channel. The permit rides inside, so the lease count can never
/// exceed the pool size; dropping the handle without `release` still frees
/// the slot (but records no outcome).
#[derive(Debug)]
pub struct ChannelHandle {
    channel: Arc<HttpChannel>,
    index: usize,
    _permit: OwnedSemaphorePermit,
}

impl ChannelHandle {
    /// The leased channel.
    pub fn channel(&self) -> &HttpChannel {
        &self.channel
    }

    /// Pool slot index, for log correlation.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Point-in-time pool metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    /// Fixed channel count.
    pub total_channels: usize,
    /// Channels currently lent out.
    pub active: usize,
    /// `total - active`.
    pub idle: usize,
    /// Cumulative request count.
    pub total_requests: u64,
    /// Cumulative failed-request count.
    pub failed_requests: u64,
    /// `1.0` when no requests yet, else `(total - failed) / total`.
    pub success_rate: f64,
    /// `active / total`, `0.0` for an empty pool.
    pub utilization: f64,
}

/// Fixed pool of channels with round-robin lending and atomic counters.
pub struct ChannelPool {
    channels: Vec<Arc<HttpChannel>>,
    permits: Arc<Semaphore>,
    next: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    acquire_timeout: Duration,
    healthy: AtomicBool,
}

impl ChannelPool {
    /// Build the pool with `config.pool_size` channels to `endpoint`.
    pub fn new(endpoint: &str, config: &PoolConfig) -> Result<Self, AdminError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(AdminError::Configuration(
                "backend endpoint must be non-empty".to_string(),
            ));
        }
        let pool_size = config.pool_size.max(1);

        let mut channels = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let http = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
                .tcp_keepalive(Duration::from_secs(config.keep_alive_secs.max(1)))
                .build()
                .map_err(|error| {
                    AdminError::Configuration(format!("failed to build channel client: {error}"))
                })?;
            channels.push(Arc::new(HttpChannel {
                http,
                endpoint: endpoint.to_string(),
            }));
        }

        Ok(Self {
            channels,
            permits: Arc::new(Semaphore::new(pool_size)),
            next: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs.max(1)),
            healthy: AtomicBool::new(true),
        })
    }

    /// Lease a channel. Waits when all channels are lent out; after the
    /// bounded acquire timeout the caller gets a retryable error instead of an
    /// unbounded stall.
    pub async fn acquire(&self) -> Result<ChannelHandle, AdminError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            AdminError::remote(
                RemoteErrorCode::ServiceUnavailable,
                format!(
                    "channel pool exhausted; no channel free within {}s",
                    self.acquire_timeout.as_secs()
                ),
            )
        })?
        .map_err(|_| AdminError::Internal("channel pool semaphore closed".to_string()))?;

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.channels.len();
        Ok(ChannelHandle {
            channel: Arc::clone(&self.channels[index]),
            index,
            _permit: permit,
        })
    }

    /// Return a lease and record the observed outcome exactly once.
    pub fn release(&self, handle: ChannelHandle, outcome: CallOutcome) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if outcome == CallOutcome::Failure {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        drop(handle);
    }

    /// Point-in-time metrics; safe to call concurrently with acquire/release.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let total_channels = self.channels.len();
        let active = total_channels.saturating_sub(self.permits.available_permits());
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let failed_requests = self.failed_requests.load(Ordering::Relaxed);
        let success_rate = if total_requests == 0 {
            1.0
        } else {
            (total_requests.saturating_sub(failed_requests)) as f64 / total_requests as f64
        };
        let utilization = if total_channels == 0 {
            0.0
        } else {
            active as f64 / total_channels as f64
        };
        PoolMetricsSnapshot {
            total_channels,
            active,
            idle: total_channels - active,
            total_requests,
            failed_requests,
            success_rate,
            utilization,
        }
    }

    /// Last observed health state, updated by `check_health`.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Probe backend connectivity on every channel; healthy only when all
    /// probes succeed. Updates the state read by `is_healthy`.
    pub async fn check_health(&self) -> bool {
        let healthy = self.probe_all().await;
        self.healthy.store(healthy, Ordering::Relaxed);
        healthy
    }

    async fn probe_all(&self) -> bool {
        let Some(endpoint) = self.channels.first().map(|c| c.endpoint.clone()) else {
            return false;
        };
        let health_url = format!("{endpoint}/health");
        // Each probe rides the channel's own client so a broken client is
        // actually observed, not just the shared route to the backend.
        for (index, channel) in self.channels.iter().enumerate() {
            let probe = channel
                .http
                .get(&health_url)
                .timeout(Duration::from_millis(DEFAULT_HEALTH_PROBE_TIMEOUT_MS))
                .send();
            match probe.await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(
                        event = "pool.health.probe_failed",
                        channel_index = index,
                        status = response.status().as_u16(),
                        "channel health probe returned non-success"
                    );
                    return false;
                }
                Err(error) => {
                    tracing::warn!(
                        event = "pool.health.probe_failed",
                        channel_index = index,
                        error = %error,
                        "channel health probe failed"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Spawn a loop probing health on the configured interval and logging
    /// transitions.
    pub fn spawn_health_loop(self: &Arc<Self>, interval_secs: u64) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            let mut was_healthy = true;
            loop {
                interval.tick().await;
                let healthy = pool.check_health().await;
                if healthy != was_healthy {
                    let metrics = pool.metrics();
                    if healthy {
                        tracing::info!(
                            event = "pool.health.recovered",
                            active = metrics.active,
                            total_requests = metrics.total_requests,
                            "channel pool healthy again"
                        );
                    } else {
                        tracing::warn!(
                            event = "pool.health.degraded",
                            active = metrics.active,
                            failed_requests = metrics.failed_requests,
                            "channel pool unhealthy"
                        );
                    }
                    was_healthy = healthy;
                }
            }
        });
    }
}
