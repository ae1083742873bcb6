use super::runtime::RuntimeState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A persisted target record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Keys stored on the record that the registry does not own, e.g. the
    /// `shutdown` / `reboot` action specs. Kept verbatim across rewrites.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Target {
    pub fn has_mac(&self) -> bool {
        self.mac.is_some()
    }

    /// Raw action spec stored under `key` (`shutdown`, `reboot`).
    pub fn action(&self, key: &str) -> Option<&Value> {
        self.extra.get(key).filter(|v| !v.is_null())
    }
}

/// On-disk document.
#[derive(Debug, Serialize)]
pub(crate) struct RegistryFile<'a> {
    pub targets: &'a [Target],
}

/// Body of a create request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTarget {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
}

/// Partial update. `mac: Some("")` clears the stored MAC.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetPatch {
    pub name: Option<String>,
    pub ip: Option<String>,
    pub mac: Option<String>,
}

/// A target merged with its runtime overlay, as returned by `list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetView {
    pub name: String,
    pub ip: String,
    pub mac: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_wake_at: Option<String>,
    pub has_mac: bool,
}

impl TargetView {
    pub(crate) fn merge(target: &Target, runtime: Option<&RuntimeState>) -> Self {
        let runtime = runtime.cloned().unwrap_or_default();
        Self {
            name: target.name.clone(),
            ip: target.ip.clone(),
            mac: target.mac.clone(),
            created_at: target.created_at.clone(),
            updated_at: target.updated_at.clone(),
            online: runtime.online,
            last_status_at: runtime.last_status_at,
            last_wake_at: runtime.last_wake_at,
            has_mac: target.has_mac(),
        }
    }
}
