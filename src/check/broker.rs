//! Broker selection
//!
//! Candidates come from a pinned broker, a tag-filtered list, or the full
//! broker list. They are filtered in order:
//! - status: at least one detail must be active
//! - capability: an active detail must support the check type and meet its
//!   own minimum version
//! - reachability: a TCP connect must succeed within `max_response_time`
//!
//! Enterprise brokers are preferred when any survive, and the final pick is
//! uniformly random so load spreads across brokers.

use crate::api::{Broker, BrokerDetail, ResourceApi};
use crate::config::BrokerConfig;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use futures::future::join_all;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Where broker candidates come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerSource {
    /// Explicit broker cid; failures are configuration errors, never a fallback
    Pinned(String),
    Tagged(String),
    All,
}

impl BrokerSource {
    pub fn from_config(config: &BrokerConfig) -> Self {
        if let Some(id) = config.id {
            BrokerSource::Pinned(format!("/broker/{}", id))
        } else if let Some(tag) = config.select_tag.as_ref().filter(|t| !t.is_empty()) {
            BrokerSource::Tagged(tag.clone())
        } else {
            BrokerSource::All
        }
    }
}

/// Connectivity check for a broker endpoint
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    /// Connect latency, or `None` if unreachable within `timeout`
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Option<Duration>;
}

/// Probe that opens (and immediately drops) a TCP connection
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl BrokerProbe for TcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Option<Duration> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Some(started.elapsed()),
            Ok(Err(e)) => {
                tracing::debug!(host = %host, port, error = %e, "Broker connect failed");
                None
            }
            Err(_) => {
                tracing::debug!(
                    host = %host,
                    port,
                    timeout_ms = timeout.as_millis() as u64,
                    "Broker connect timed out"
                );
                None
            }
        }
    }
}

/// Details of `broker` usable for `check_type`
fn usable_details<'a>(
    broker: &'a Broker,
    check_type: &'a str,
) -> impl Iterator<Item = &'a BrokerDetail> + 'a {
    broker.details.iter().filter(move |detail| {
        detail.is_active()
            && detail.supports(check_type)
            && match (detail.version, detail.minimum_version_required) {
                (Some(version), Some(minimum)) => version >= minimum,
                _ => true,
            }
    })
}

/// Reason a broker fails the status or capability filter
fn static_rejection(broker: &Broker, check_type: &str) -> Option<String> {
    if !broker.details.iter().any(BrokerDetail::is_active) {
        return Some("no active broker detail".to_string());
    }
    if usable_details(broker, check_type).next().is_none() {
        return Some(format!(
            "no active detail supports check type '{}' at its minimum version",
            check_type
        ));
    }
    None
}

/// Chooses a broker for new checks
pub struct BrokerSelector {
    api: Arc<dyn ResourceApi>,
    probe: Arc<dyn BrokerProbe>,
    max_response_time: Duration,
}

impl BrokerSelector {
    pub fn new(
        api: Arc<dyn ResourceApi>,
        probe: Arc<dyn BrokerProbe>,
        max_response_time: Duration,
    ) -> Self {
        Self {
            api,
            probe,
            max_response_time,
        }
    }

    /// Select a broker supporting `check_type` from `source`
    ///
    /// # Errors
    ///
    /// - `InvalidBroker` if a pinned broker is inactive, lacks the capability, or is unreachable
    /// - `NoViableBroker` if automatic selection eliminates every candidate
    /// - API errors from fetching candidates
    pub async fn select_broker(
        &self,
        check_type: &str,
        source: &BrokerSource,
    ) -> ClientResult<Broker> {
        let candidates = match source {
            BrokerSource::Pinned(cid) => return self.validate_pinned(check_type, cid).await,
            BrokerSource::Tagged(tag) => self.api.fetch_broker_list_by_tag(tag).await?,
            BrokerSource::All => self.api.fetch_broker_list().await?,
        };

        self.select_from(check_type, candidates).await
    }

    async fn validate_pinned(&self, check_type: &str, cid: &str) -> ClientResult<Broker> {
        let broker = self.api.fetch_broker_by_cid(cid).await?;

        if let Some(reason) = static_rejection(&broker, check_type) {
            return Err(ClientError::InvalidBroker {
                cid: cid.to_string(),
                reason,
            });
        }

        if self.probe_broker(&broker, check_type).await.is_none() {
            return Err(ClientError::InvalidBroker {
                cid: cid.to_string(),
                reason: format!(
                    "unreachable within {}ms",
                    self.max_response_time.as_millis()
                ),
            });
        }

        tracing::info!(broker = %broker.cid, name = %broker.name, "Using pinned broker");
        Ok(broker)
    }

    /// Apply the filter chain to `candidates` and pick one at random
    pub async fn select_from(
        &self,
        check_type: &str,
        candidates: Vec<Broker>,
    ) -> ClientResult<Broker> {
        if candidates.is_empty() {
            return Err(ClientError::NoViableBroker {
                constraint: "empty broker list".to_string(),
            });
        }
        let total = candidates.len();

        let active: Vec<Broker> = candidates
            .into_iter()
            .filter(|b| b.details.iter().any(BrokerDetail::is_active))
            .collect();
        if active.is_empty() {
            return Err(ClientError::NoViableBroker {
                constraint: format!("status ({} brokers, none active)", total),
            });
        }

        let capable: Vec<Broker> = active
            .into_iter()
            .filter(|b| usable_details(b, check_type).next().is_some())
            .collect();
        if capable.is_empty() {
            return Err(ClientError::NoViableBroker {
                constraint: format!("capability (no active broker supports '{}')", check_type),
            });
        }

        let probes = join_all(capable.iter().map(|b| self.probe_broker(b, check_type))).await;
        let reachable: Vec<Broker> = capable
            .into_iter()
            .zip(probes)
            .filter_map(|(broker, latency)| {
                tracing::debug!(
                    broker = %broker.cid,
                    latency_ms = latency.map(|l| l.as_millis() as u64),
                    reachable = latency.is_some(),
                    "Probed broker"
                );
                latency.map(|_| broker)
            })
            .collect();
        if reachable.is_empty() {
            return Err(ClientError::NoViableBroker {
                constraint: format!(
                    "reachability (no broker answered within {}ms)",
                    self.max_response_time.as_millis()
                ),
            });
        }

        let survivors: Vec<Broker> = if reachable.iter().any(Broker::is_enterprise) {
            reachable.into_iter().filter(Broker::is_enterprise).collect()
        } else {
            reachable
        };

        let selected = survivors
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| {
                ClientError::Internal("broker survivors unexpectedly empty".to_string())
            })?;

        tracing::info!(
            broker = %selected.cid,
            name = %selected.name,
            candidates = total,
            survivors = survivors.len(),
            "Selected broker"
        );
        Ok(selected)
    }

    /// Latency of the first usable detail that answers
    async fn probe_broker(&self, broker: &Broker, check_type: &str) -> Option<Duration> {
        for detail in usable_details(broker, check_type) {
            let Some((host, port)) = detail.probe_address() else {
                continue;
            };
            if let Some(latency) = self.probe.probe(&host, port, self.max_response_time).await {
                return Some(latency);
            }
        }
        None
    }
}
