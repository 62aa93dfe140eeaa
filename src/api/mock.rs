//! In-memory `ResourceApi` used by unit tests

use super::ResourceApi;
use super::types::{Broker, Check, CheckBundle};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct MockApi {
    pub checks_by_url: Mutex<HashMap<String, Check>>,
    pub checks_by_id: Mutex<HashMap<u64, Check>>,
    pub bundles: Mutex<HashMap<String, CheckBundle>>,
    pub search_results: Mutex<Vec<CheckBundle>>,
    pub brokers: Mutex<Vec<Broker>>,
    pub fail_updates: Mutex<bool>,
    pub fail_searches: Mutex<bool>,
    pub created: Mutex<Vec<CheckBundle>>,
    pub updates: Mutex<Vec<CheckBundle>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == name).count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }

    fn not_found(endpoint: &str) -> ClientError {
        ClientError::ApiStatus {
            endpoint: endpoint.to_string(),
            status: 404,
            body: "not found".to_string(),
        }
    }
}

#[async_trait]
impl ResourceApi for MockApi {
    async fn fetch_check_by_submission_url(&self, url: &str) -> ClientResult<Check> {
        self.record("fetch_check_by_submission_url");
        self.checks_by_url
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Self::not_found("/check"))
    }

    async fn fetch_check_by_id(&self, id: u64) -> ClientResult<Check> {
        self.record("fetch_check_by_id");
        self.checks_by_id
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("/check/{}", id)))
    }

    async fn fetch_check_bundle_by_cid(&self, cid: &str) -> ClientResult<CheckBundle> {
        self.record("fetch_check_bundle_by_cid");
        self.bundles
            .lock()
            .get(cid)
            .cloned()
            .ok_or_else(|| Self::not_found(cid))
    }

    async fn search_check_bundles(&self, _query: &str) -> ClientResult<Vec<CheckBundle>> {
        self.record("search_check_bundles");
        if *self.fail_searches.lock() {
            return Err(ClientError::ApiStatus {
                endpoint: "/check_bundle".to_string(),
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(self.search_results.lock().clone())
    }

    async fn create_check_bundle(&self, bundle: &CheckBundle) -> ClientResult<CheckBundle> {
        self.record("create_check_bundle");
        self.created.lock().push(bundle.clone());
        let mut stored = bundle.clone();
        stored.cid = Some("/check_bundle/900".to_string());
        stored.checks = vec!["/check/901".to_string()];
        stored.config.submission_url = Some(
            "https://10.0.0.1:43191/module/httptrap/1b9e5a14-7a2b-4d1a-9c66-9b8a7b1c2d3e/s"
                .to_string(),
        );
        self.bundles
            .lock()
            .insert("/check_bundle/900".to_string(), stored.clone());
        Ok(stored)
    }

    async fn update_check_bundle(&self, bundle: &CheckBundle) -> ClientResult<CheckBundle> {
        self.record("update_check_bundle");
        if *self.fail_updates.lock() {
            return Err(ClientError::ApiStatus {
                endpoint: bundle.cid.clone().unwrap_or_default(),
                status: 500,
                body: "update failed".to_string(),
            });
        }
        self.updates.lock().push(bundle.clone());
        Ok(bundle.clone())
    }

    async fn fetch_broker_by_cid(&self, cid: &str) -> ClientResult<Broker> {
        self.record("fetch_broker_by_cid");
        self.brokers
            .lock()
            .iter()
            .find(|b| b.cid == cid)
            .cloned()
            .ok_or_else(|| Self::not_found(cid))
    }

    async fn fetch_broker_list(&self) -> ClientResult<Vec<Broker>> {
        self.record("fetch_broker_list");
        Ok(self.brokers.lock().clone())
    }

    async fn fetch_broker_list_by_tag(&self, tag: &str) -> ClientResult<Vec<Broker>> {
        self.record("fetch_broker_list_by_tag");
        Ok(self
            .brokers
            .lock()
            .iter()
            .filter(|b| b.tags.iter().any(|t| t == tag))
            .cloned()
            .collect())
    }

    async fn fetch_ca_certificate(&self) -> ClientResult<String> {
        self.record("fetch_ca_certificate");
        Err(Self::not_found("/pki/ca.crt"))
    }
}
