//! Trap TLS parameters
//!
//! Broker certificates are issued for the broker's canonical name while the
//! submission URL usually carries an IP or load-balancer address, so the
//! server name presented during the handshake is derived from broker metadata.

use crate::api::{Broker, ResourceApi};
use crate::error::{ClientError, ClientResult};
use std::path::Path;

/// Certificates trusted when connecting to a trap, on top of the bundled webpki roots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertPool {
    pem_bundles: Vec<String>,
}

impl CertPool {
    /// Pool containing only the webpki roots bundled with rustls
    pub fn webpki() -> Self {
        Self::default()
    }

    pub fn add_pem(&mut self, pem: impl Into<String>) {
        self.pem_bundles.push(pem.into());
    }

    /// Number of extra PEM bundles beyond the webpki roots
    pub fn extra_bundles(&self) -> usize {
        self.pem_bundles.len()
    }

    /// Parse every extra bundle into reqwest certificates
    pub fn certificates(&self) -> ClientResult<Vec<reqwest::Certificate>> {
        let mut certs = Vec::new();
        for pem in &self.pem_bundles {
            let parsed = reqwest::Certificate::from_pem_bundle(pem.as_bytes()).map_err(|e| {
                ClientError::Config(format!("invalid CA certificate bundle: {}", e))
            })?;
            certs.extend(parsed);
        }
        Ok(certs)
    }
}

/// Build the trap certificate pool
///
/// Starts from the webpki roots, adds the configured CA file, then tries the
/// API's CA endpoint. Failures fall back to whatever was loaded so far.
pub async fn load_cert_pool(api: Option<&dyn ResourceApi>, ca_file: Option<&Path>) -> CertPool {
    let mut pool = CertPool::webpki();

    if let Some(path) = ca_file {
        match tokio::fs::read_to_string(path).await {
            Ok(pem) => pool.add_pem(pem),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read CA file, continuing with webpki roots"
            ),
        }
    }

    if let Some(api) = api {
        match api.fetch_ca_certificate().await {
            Ok(pem) => {
                tracing::debug!("Loaded broker CA certificate from API");
                pool.add_pem(pem);
            }
            Err(e) => tracing::warn!(
                error = %e,
                "Failed to fetch broker CA certificate, using fallback pool"
            ),
        }
    }

    pool
}

/// Host component of a URL
pub fn url_host(url: &str) -> ClientResult<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ClientError::Config(format!("invalid submission URL '{}': {}", url, e)))?;
    parsed
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| ClientError::Config(format!("submission URL '{}' has no host", url)))
}

/// Certificate name to present for `submission_url` on `broker`
///
/// Matches the URL host against each detail's ip, external host, and cn, and
/// returns the matching detail's cn.
pub fn broker_server_name(broker: &Broker, submission_url: &str) -> ClientResult<String> {
    let host = url_host(submission_url)?;

    broker
        .details
        .iter()
        .find(|detail| {
            detail.ip.as_deref() == Some(host.as_str())
                || detail.external_host.as_deref() == Some(host.as_str())
                || detail.cn == host
        })
        .map(|detail| detail.cn.clone())
        .filter(|cn| !cn.is_empty())
        .ok_or(ClientError::BrokerCnMismatch { host })
}
