//! Trap submission
//!
//! `TrapSubmitter` PUTs a packaged `MetricSet` to the resolved trap URL. For TLS
//! targets whose certificate name differs from the URL host, the request is
//! addressed to the certificate name and pinned to the URL's address so that
//! SNI and certificate verification use the broker's canonical name.

use crate::check::TrapTarget;
use crate::error::{ClientError, ClientResult};
use crate::metric::MetricSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Sends packaged metrics to a trap
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit `metrics` and return the number of values the trap accepted
    async fn submit(&self, target: &TrapTarget, metrics: &MetricSet) -> ClientResult<u64>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    stats: u64,
}

/// Address override for a TLS target presenting a different server name
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerNameOverride {
    /// URL with its host replaced by the server name
    url: Url,
    server_name: String,
    connect_host: String,
    port: u16,
}

/// Work out whether `target` needs its URL host replaced by the server name
fn server_name_override(target: &TrapTarget) -> ClientResult<Option<ServerNameOverride>> {
    let submit_error = |reason: String| ClientError::Submit {
        url: target.url.clone(),
        reason,
    };

    let mut url = Url::parse(&target.url).map_err(|e| submit_error(format!("invalid URL: {}", e)))?;

    let Some(server_name) = target.server_name.as_deref().filter(|_| target.tls) else {
        return Ok(None);
    };

    let connect_host = url
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| submit_error("URL has no host".to_string()))?;
    if connect_host.eq_ignore_ascii_case(server_name) {
        return Ok(None);
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| submit_error("URL has no port".to_string()))?;
    url.set_host(Some(server_name))
        .map_err(|e| submit_error(format!("invalid server name '{}': {}", server_name, e)))?;

    Ok(Some(ServerNameOverride {
        url,
        server_name: server_name.to_string(),
        connect_host,
        port,
    }))
}

async fn connect_address(host: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, port));
    }
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            tracing::warn!(host = %host, error = %e, "Failed to resolve trap host");
            None
        }
    }
}

/// HTTP client and request URL prepared for one target
#[derive(Clone)]
struct PreparedTarget {
    target: TrapTarget,
    http: reqwest::Client,
    url: Url,
}

/// reqwest-backed `Submitter`
///
/// The HTTP client is built once per target and reused across flushes.
pub struct TrapSubmitter {
    timeout: Duration,
    prepared: Mutex<Option<PreparedTarget>>,
}

impl std::fmt::Debug for TrapSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapSubmitter")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TrapSubmitter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            prepared: Mutex::new(None),
        }
    }

    async fn prepare(&self, target: &TrapTarget) -> ClientResult<PreparedTarget> {
        let cached = self
            .prepared
            .lock()
            .as_ref()
            .filter(|p| &p.target == target)
            .cloned();
        if let Some(prepared) = cached {
            return Ok(prepared);
        }

        let submit_error = |reason: String| ClientError::Submit {
            url: target.url.clone(),
            reason,
        };

        let mut builder = reqwest::Client::builder().timeout(self.timeout);

        if let Some(pool) = target.cert_pool.as_ref().filter(|_| target.tls) {
            for cert in pool.certificates()? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let url = match server_name_override(target)? {
            Some(over) => {
                let addr = connect_address(&over.connect_host, over.port)
                    .await
                    .ok_or_else(|| {
                        submit_error(format!("cannot resolve address '{}'", over.connect_host))
                    })?;
                tracing::debug!(
                    server_name = %over.server_name,
                    address = %addr,
                    "Pinning trap server name to submission address"
                );
                builder = builder.resolve(&over.server_name, addr);
                over.url
            }
            None => Url::parse(&target.url).map_err(|e| submit_error(format!("invalid URL: {}", e)))?,
        };

        let http = builder
            .build()
            .map_err(|e| submit_error(format!("failed to build HTTP client: {}", e)))?;

        let prepared = PreparedTarget {
            target: target.clone(),
            http,
            url,
        };
        *self.prepared.lock() = Some(prepared.clone());
        Ok(prepared)
    }
}

#[async_trait]
impl Submitter for TrapSubmitter {
    async fn submit(&self, target: &TrapTarget, metrics: &MetricSet) -> ClientResult<u64> {
        let submit_error = |reason: String| ClientError::Submit {
            url: target.url.clone(),
            reason,
        };

        let prepared = self.prepare(target).await?;
        let payload = serde_json::to_vec(metrics)
            .map_err(|e| submit_error(format!("failed to encode metrics: {}", e)))?;

        let response = prepared
            .http
            .put(prepared.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| submit_error(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| submit_error(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(submit_error(format!(
                "trap returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| submit_error(format!("unexpected response body '{}': {}", body, e)))?;

        tracing::debug!(
            url = %target.url,
            metrics = metrics.len(),
            accepted = parsed.stats,
            "Submitted metrics"
        );
        Ok(parsed.stats)
    }
}
