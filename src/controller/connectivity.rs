//! # Connectivity supervision
//!
//! The network link is a peripheral: it never reads or changes load state.
//! Failures are counted with a leaky counter (up on each failed reconnect
//! attempt, down on each healthy iteration). When the counter reaches its
//! ceiling the control loop asks for a full device restart, which also
//! wipes all guard state.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use validator::Validate;

use super::clock::Clock;

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("link did not come up within {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u32 },
    #[error("link rejected association: {0}")]
    Rejected(String),
}

/// Network link seen from the control loop.
#[cfg_attr(test, mockall::automock)]
pub trait Connectivity: Send {
    /// Start associating. Returns once the request is issued.
    fn begin(&mut self) -> Result<(), ConnectivityError>;
    fn is_connected(&self) -> bool;
    /// Re-issue the association request after a drop.
    fn reconnect(&mut self) -> Result<(), ConnectivityError>;
}

/// Link for builds without networking. Always reports healthy.
#[derive(Debug, Default)]
pub struct NoConnectivity;

impl Connectivity for NoConnectivity {
    fn begin(&mut self) -> Result<(), ConnectivityError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn reconnect(&mut self) -> Result<(), ConnectivityError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub enabled: bool,
    pub ssid: String,
    /// Bounded wait for the first association at boot
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u32,
    #[validate(range(min = 1))]
    pub connect_poll_ms: u32,
    /// Minimum spacing between reconnect attempts
    #[validate(range(min = 1))]
    pub reconnect_backoff_ms: u32,
    /// Failure count that triggers a restart
    #[validate(range(min = 1))]
    pub failure_ceiling: u32,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ssid: String::new(),
            connect_timeout_ms: 5_000,
            connect_poll_ms: 100,
            reconnect_backoff_ms: 1_000,
            failure_ceiling: 40,
        }
    }
}

/// Saturating-up, floored-down failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    ceiling: u32,
}

impl FailureCounter {
    pub fn new(ceiling: u32) -> Self {
        Self { count: 0, ceiling }
    }

    pub fn record_failure(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn record_healthy(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.ceiling
    }
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    Healthy,
    /// Link down, reconnect attempt issued this pass
    Reconnecting,
    /// Link down, waiting for the back-off to expire
    Waiting,
}

/// Owns the link and its failure counter.
pub struct ConnectivityMonitor {
    link: Box<dyn Connectivity>,
    failures: FailureCounter,
    connect_timeout_ms: u32,
    connect_poll_ms: u32,
    reconnect_backoff_ms: u32,
    last_attempt_ms: Option<u32>,
}

impl ConnectivityMonitor {
    pub fn new(link: Box<dyn Connectivity>, config: &ConnectivityConfig) -> Self {
        Self {
            link,
            failures: FailureCounter::new(config.failure_ceiling),
            connect_timeout_ms: config.connect_timeout_ms,
            connect_poll_ms: config.connect_poll_ms.max(1),
            reconnect_backoff_ms: config.reconnect_backoff_ms,
            last_attempt_ms: None,
        }
    }

    /// Monitor for a link that is always up.
    pub fn disabled() -> Self {
        Self::new(Box::new(NoConnectivity), &ConnectivityConfig::default())
    }

    pub fn failures(&self) -> u32 {
        self.failures.count()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn should_restart(&self) -> bool {
        self.failures.is_exhausted()
    }

    /// Bring the link up at boot, waiting at most `connect_timeout_ms`.
    ///
    /// The only blocking step of the device. On timeout the caller restarts.
    pub async fn establish(&mut self) -> Result<(), ConnectivityError> {
        self.link.begin()?;

        let polls = (self.connect_timeout_ms / self.connect_poll_ms).max(1);
        for _ in 0..polls {
            if self.link.is_connected() {
                info!("link established");
                return Ok(());
            }
            sleep(Duration::from_millis(self.connect_poll_ms as u64)).await;
        }

        if self.link.is_connected() {
            info!("link established");
            return Ok(());
        }
        Err(ConnectivityError::ConnectTimeout {
            timeout_ms: self.connect_timeout_ms,
        })
    }

    /// One pass per loop iteration.
    pub fn maintain(&mut self, clock: &dyn Clock) -> LinkHealth {
        if self.link.is_connected() {
            self.failures.record_healthy();
            return LinkHealth::Healthy;
        }

        let now = clock.now_ms();
        let backoff_expired = self
            .last_attempt_ms
            .map(|last| now.wrapping_sub(last) >= self.reconnect_backoff_ms)
            .unwrap_or(true);
        if !backoff_expired {
            return LinkHealth::Waiting;
        }

        self.failures.record_failure();
        self.last_attempt_ms = Some(now);
        warn!(
            failures = self.failures.count(),
            "link down, attempting to reconnect"
        );
        if let Err(e) = self.link.reconnect() {
            debug!(error = %e, "reconnect request failed");
        }
        LinkHealth::Reconnecting
    }
}
