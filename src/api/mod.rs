//! Resource API collaborator
//!
//! `ResourceApi` is the seam the check resolver and broker selector call
//! through. `ApiClient` is the reqwest-backed implementation.

pub mod client;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{ApiClient, trap_check_uuid};
pub use types::{
    Broker, BrokerDetail, CaCertificate, Check, CheckBundle, CheckBundleConfig,
    CheckBundleMetric, cid_number,
};

use crate::error::ClientResult;
use async_trait::async_trait;

/// Remote calls needed to resolve a check and keep its metric list current
///
/// Every call is a single request. Non-2xx responses and malformed bodies are
/// returned as errors.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn fetch_check_by_submission_url(&self, url: &str) -> ClientResult<Check>;

    async fn fetch_check_by_id(&self, id: u64) -> ClientResult<Check>;

    async fn fetch_check_bundle_by_cid(&self, cid: &str) -> ClientResult<CheckBundle>;

    async fn search_check_bundles(&self, query: &str) -> ClientResult<Vec<CheckBundle>>;

    async fn create_check_bundle(&self, bundle: &CheckBundle) -> ClientResult<CheckBundle>;

    async fn update_check_bundle(&self, bundle: &CheckBundle) -> ClientResult<CheckBundle>;

    async fn fetch_broker_by_cid(&self, cid: &str) -> ClientResult<Broker>;

    async fn fetch_broker_list(&self) -> ClientResult<Vec<Broker>>;

    async fn fetch_broker_list_by_tag(&self, tag: &str) -> ClientResult<Vec<Broker>>;

    /// PEM bundle of the vendor CA that signs broker certificates
    async fn fetch_ca_certificate(&self) -> ClientResult<String>;
}
