//! Resource API wire types
//!
//! Only the fields the check resolver reads or writes are modeled. Underscore
//! prefixed fields are server-assigned and omitted when creating a bundle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default trap port on a broker detail that does not declare one
pub const DEFAULT_BROKER_PORT: u16 = 43191;

/// Extract the trailing numeric id from a `/<kind>/<id>` resource identifier
pub fn cid_number(cid: &str) -> Option<u64> {
    cid.rsplit('/').next()?.parse().ok()
}

/// A single check instance of a bundle, as returned by `/check`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Check {
    #[serde(rename = "_cid")]
    pub cid: String,
    #[serde(rename = "_active", default)]
    pub active: bool,
    #[serde(rename = "_broker", default)]
    pub broker: String,
    #[serde(rename = "_check_bundle", default)]
    pub check_bundle: String,
    #[serde(rename = "_check_uuid", default)]
    pub check_uuid: String,
    #[serde(rename = "_details", default)]
    pub details: BTreeMap<String, String>,
}

impl Check {
    pub fn id(&self) -> Option<u64> {
        cid_number(&self.cid)
    }
}

/// Metric declared on a check bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckBundleMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl CheckBundleMetric {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Check bundle `config` object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckBundleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_metrics: Option<String>,
    /// Keys this client does not interpret, preserved across updates
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Remote check configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckBundle {
    #[serde(rename = "_cid", default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(rename = "_checks", default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<String>,
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default)]
    pub config: CheckBundleConfig,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub metrics: Vec<CheckBundleMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub period: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub timeout: f32,
    #[serde(rename = "type", default)]
    pub check_type: String,
}

impl CheckBundle {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// One node of a broker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BrokerDetail {
    #[serde(default)]
    pub cn: String,
    #[serde(default)]
    pub external_host: Option<String>,
    #[serde(default)]
    pub external_port: Option<u16>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub minimum_version_required: Option<u32>,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: Option<u32>,
}

impl BrokerDetail {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn supports(&self, check_type: &str) -> bool {
        self.modules.iter().any(|m| m == check_type)
    }

    /// Address probed for reachability: external endpoint first, then ip, then cn
    pub fn probe_address(&self) -> Option<(String, u16)> {
        if let Some(host) = self.external_host.as_deref().filter(|h| !h.is_empty()) {
            return Some((
                host.to_string(),
                self.external_port.unwrap_or(DEFAULT_BROKER_PORT),
            ));
        }
        let host = self
            .ip
            .as_deref()
            .filter(|h| !h.is_empty())
            .or(Some(self.cn.as_str()).filter(|h| !h.is_empty()))?;
        Some((host.to_string(), self.port.unwrap_or(DEFAULT_BROKER_PORT)))
    }
}

/// Ingestion front-end
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Broker {
    #[serde(rename = "_cid")]
    pub cid: String,
    #[serde(rename = "_name", default)]
    pub name: String,
    #[serde(rename = "_type", default)]
    pub broker_type: String,
    #[serde(rename = "_tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "_details", default)]
    pub details: Vec<BrokerDetail>,
}

impl Broker {
    pub fn is_enterprise(&self) -> bool {
        self.broker_type == "enterprise"
    }
}

/// Body of `/pki/ca.crt`
#[derive(Debug, Clone, Deserialize)]
pub struct CaCertificate {
    pub contents: String,
}
