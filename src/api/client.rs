//! reqwest implementation of the resource API
//!
//! Each request is a single attempt bounded by `api.request_timeout_seconds`.

use super::ResourceApi;
use super::types::{Broker, CaCertificate, Check, CheckBundle};
use crate::config::ApiConfig;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use uuid::Uuid;

const AUTH_TOKEN_HEADER: &str = "X-Circonus-Auth-Token";
const APP_NAME_HEADER: &str = "X-Circonus-App-Name";

/// Extract the check UUID from a trap URL of the form
/// `https://<broker>/module/<type>/<uuid>/<secret>`
pub fn trap_check_uuid(submission_url: &str) -> ClientResult<Uuid> {
    let parsed = reqwest::Url::parse(submission_url).map_err(|e| {
        ClientError::Config(format!(
            "invalid submission URL '{}': {}",
            submission_url, e
        ))
    })?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();

    let uuid_segment = segments
        .iter()
        .position(|s| *s == "module")
        .and_then(|pos| segments.get(pos + 2))
        .ok_or_else(|| {
            ClientError::Config(format!(
                "submission URL '{}' does not contain /module/<type>/<uuid>",
                submission_url
            ))
        })?;

    Uuid::parse_str(uuid_segment).map_err(|e| {
        ClientError::Config(format!(
            "submission URL '{}' has invalid check UUID '{}': {}",
            submission_url, uuid_segment, e
        ))
    })
}

/// HTTP client for the vendor resource API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client from `[api]` configuration
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if no token is configured or a header value
    /// is not valid ASCII.
    pub fn new(config: &ApiConfig) -> ClientResult<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ClientError::Config("api.token is required for check management".to_string())
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTH_TOKEN_HEADER,
            HeaderValue::from_str(token)
                .map_err(|e| ClientError::Config(format!("api.token is not a valid header: {}", e)))?,
        );
        headers.insert(
            APP_NAME_HEADER,
            HeaderValue::from_str(&config.app)
                .map_err(|e| ClientError::Config(format!("api.app is not a valid header: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build API HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<T> {
        let request = self.http.get(self.url(path)).query(query);
        self.execute(request, path).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
        body: &CheckBundle,
    ) -> ClientResult<T> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ClientError::Internal(format!("failed to encode check bundle: {}", e)))?;
        let request = request
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        self.execute(request, path).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> ClientResult<T> {
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::ApiRequest {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ClientError::ApiRequest {
                endpoint: endpoint.to_string(),
                source,
            })?;

        if !status.is_success() {
            tracing::debug!(
                endpoint = %endpoint,
                status = status.as_u16(),
                "API call returned non-success status"
            );
            return Err(ClientError::ApiStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::ApiDecode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ResourceApi for ApiClient {
    async fn fetch_check_by_submission_url(&self, url: &str) -> ClientResult<Check> {
        let uuid = trap_check_uuid(url)?.to_string();
        let mut checks: Vec<Check> = self.get("/check", &[("f__check_uuid", &uuid)]).await?;

        match checks.len() {
            0 => Err(ClientError::CheckNotFound(format!(
                "no check with uuid {} (from submission URL)",
                uuid
            ))),
            1 => Ok(checks.remove(0)),
            count => Err(ClientError::AmbiguousCheck {
                matched: count,
                active: count,
            }),
        }
    }

    async fn fetch_check_by_id(&self, id: u64) -> ClientResult<Check> {
        self.get(&format!("/check/{}", id), &[]).await
    }

    async fn fetch_check_bundle_by_cid(&self, cid: &str) -> ClientResult<CheckBundle> {
        self.get(cid, &[]).await
    }

    async fn search_check_bundles(&self, query: &str) -> ClientResult<Vec<CheckBundle>> {
        self.get("/check_bundle", &[("search", query)]).await
    }

    async fn create_check_bundle(&self, bundle: &CheckBundle) -> ClientResult<CheckBundle> {
        let path = "/check_bundle";
        self.send(self.http.post(self.url(path)), path, bundle).await
    }

    async fn update_check_bundle(&self, bundle: &CheckBundle) -> ClientResult<CheckBundle> {
        let cid = bundle.cid.as_deref().ok_or_else(|| {
            ClientError::Internal("cannot update a check bundle without _cid".to_string())
        })?;
        self.send(self.http.put(self.url(cid)), cid, bundle).await
    }

    async fn fetch_broker_by_cid(&self, cid: &str) -> ClientResult<Broker> {
        self.get(cid, &[]).await
    }

    async fn fetch_broker_list(&self) -> ClientResult<Vec<Broker>> {
        self.get("/broker", &[]).await
    }

    async fn fetch_broker_list_by_tag(&self, tag: &str) -> ClientResult<Vec<Broker>> {
        self.get("/broker", &[("f__tags_has", tag)]).await
    }

    async fn fetch_ca_certificate(&self) -> ClientResult<String> {
        let cert: CaCertificate = self.get("/pki/ca.crt", &[]).await?;
        Ok(cert.contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_check_uuid_parses_path() {
        let uuid = trap_check_uuid(
            "https://10.0.0.1:43191/module/httptrap/1b9e5a14-7a2b-4d1a-9c66-9b8a7b1c2d3e/s3cret",
        )
        .unwrap();
        assert_eq!(uuid.to_string(), "1b9e5a14-7a2b-4d1a-9c66-9b8a7b1c2d3e");
    }

    #[test]
    fn test_trap_check_uuid_rejects_missing_module() {
        let err = trap_check_uuid("https://10.0.0.1:43191/write/abc").unwrap_err();
        assert!(err.to_string().contains("/module/"));
    }

    #[test]
    fn test_trap_check_uuid_rejects_bad_uuid() {
        let err = trap_check_uuid("https://10.0.0.1/module/httptrap/not-a-uuid/x").unwrap_err();
        assert!(err.to_string().contains("invalid check UUID"));
    }

    #[test]
    fn test_new_requires_token() {
        let err = ApiClient::new(&ApiConfig::default()).unwrap_err();
        assert!(err.to_string().contains("api.token"));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let config = ApiConfig {
            token: Some("t".to_string()),
            url: "http://localhost:8080/v2/".to_string(),
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v2");
    }
}
