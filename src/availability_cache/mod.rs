//! AvailabilityCache - Remote Server Reachability Memo
//!
//! ## Responsibilities
//!
//! - Single-slot memo of the last reachability probe
//! - TTL expiry (30s default) independent of process activity
//! - Explicit invalidation after the user starts/stops the server
//! - Loopback guard: never probe a non-local host

use crate::remote_client::RemotePipeline;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default bound for a live probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Cached probe outcome
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityCacheEntry {
    pub available: bool,
    pub checked_at: Instant,
}

impl AvailabilityCacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.checked_at.elapsed() < ttl
    }
}

/// True when `url` names localhost or a loopback address
pub fn is_loopback_url(url: &str) -> bool {
    let parsed = match reqwest::Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h.trim_start_matches('[').trim_end_matches(']'),
        None => return false,
    };

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// AvailabilityCache service
pub struct AvailabilityCache {
    remote: Arc<dyn RemotePipeline>,
    entry: RwLock<Option<AvailabilityCacheEntry>>,
    ttl: Duration,
    probe_timeout: Duration,
}

impl AvailabilityCache {
    /// Create new cache with the default TTL
    pub fn new(remote: Arc<dyn RemotePipeline>) -> Self {
        Self::with_ttl(remote, DEFAULT_TTL)
    }

    /// Create new cache with a custom TTL
    pub fn with_ttl(remote: Arc<dyn RemotePipeline>, ttl: Duration) -> Self {
        Self {
            remote,
            entry: RwLock::new(None),
            ttl,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached reachability if still fresh, otherwise probe live
    /// and store the outcome. Never fails.
    pub async fn check(&self) -> bool {
        {
            let entry = self.entry.read().await;
            if let Some(e) = entry.as_ref() {
                if e.is_fresh(self.ttl) {
                    return e.available;
                }
            }
        }

        let available = self.probe_live().await;

        let mut entry = self.entry.write().await;
        *entry = Some(AvailabilityCacheEntry {
            available,
            checked_at: Instant::now(),
        });

        tracing::debug!(
            available = available,
            base_url = %self.remote.base_url(),
            "Remote availability probed"
        );

        available
    }

    /// Drop the cached entry; the next check probes live
    pub async fn invalidate(&self) {
        let mut entry = self.entry.write().await;
        if entry.take().is_some() {
            tracing::debug!("Availability cache invalidated");
        }
    }

    /// Current entry, if any (stale entries included)
    pub async fn entry(&self) -> Option<AvailabilityCacheEntry> {
        *self.entry.read().await
    }

    async fn probe_live(&self) -> bool {
        let base_url = self.remote.base_url();
        if !is_loopback_url(base_url) {
            tracing::warn!(
                base_url = %base_url,
                "Refusing to probe non-loopback inference server"
            );
            return false;
        }
        self.remote.probe(self.probe_timeout).await
    }
}
