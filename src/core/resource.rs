use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Vm,
    Volume,
    Address,
    LoadBalancer,
    Pod,
    Image,
    Secret,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Vm => "VM",
            ResourceKind::Volume => "VOLUME",
            ResourceKind::Address => "ADDRESS",
            ResourceKind::LoadBalancer => "LOAD_BALANCER",
            ResourceKind::Pod => "POD",
            ResourceKind::Image => "IMAGE",
            ResourceKind::Secret => "SECRET",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Active,
    Stopped,
    Failed,
    Unknown,
}

impl ResourceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Active => "ACTIVE",
            ResourceStatus::Stopped => "STOPPED",
            ResourceStatus::Failed => "FAILED",
            ResourceStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(ResourceStatus::Active),
            "STOPPED" => Ok(ResourceStatus::Stopped),
            "FAILED" => Ok(ResourceStatus::Failed),
            "UNKNOWN" => Ok(ResourceStatus::Unknown),
            other => Err(format!(
                "invalid resource status: {other} (expected ACTIVE|STOPPED|FAILED|UNKNOWN)"
            )),
        }
    }
}

/// Immutable snapshot of one remote resource, taken at scan time.
///
/// `created` is optional because some resources genuinely have no creation
/// timestamp (Elastic IPs, for one). Adapters may add derived entries to
/// `tags` under a `<kind>/` prefix (e.g. `pod/restarts`) so the policy layer
/// can match on provider-specific signals without knowing the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub kind: ResourceKind,
    #[serde(
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<OffsetDateTime>,
    #[serde(
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_used: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ResourceDescriptor {
    pub fn age_days(&self, now: OffsetDateTime) -> Option<f64> {
        self.created
            .map(|created| (now - created).as_seconds_f64() / 86_400.0)
    }

    pub fn idle_days(&self, now: OffsetDateTime) -> Option<f64> {
        self.last_used
            .map(|used| (now - used).as_seconds_f64() / 86_400.0)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
