use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A conversation container as returned by `conversations.list`.
///
/// Only the fields the sync engine inspects are typed; everything else the
/// remote service sends is carried verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_user_deleted: bool,
    /// Direct-message counterpart, only present on `is_im` channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Channel {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("unknown")
    }

    /// Archived channels and DMs with a deactivated partner never receive new
    /// messages, so one successful capture is final.
    pub fn is_frozen(&self) -> bool {
        self.is_archived || (self.is_im && self.is_user_deleted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Absent on malformed payloads; such messages are kept but never
    /// deduplicated against each other.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(ts: impl Into<String>) -> Self {
        Self {
            ts: Some(ts.into()),
            extra: Map::new(),
        }
    }

    pub fn ts(&self) -> Option<&str> {
        self.ts.as_deref()
    }

    /// Numeric value of `ts`; anything missing or unparseable sorts as zero.
    pub fn ts_value(&self) -> f64 {
        self.ts()
            .and_then(|ts| ts.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.extra
            .get("real_name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

pub type UserDirectory = BTreeMap<String, User>;

/// Result of the last `auth.test` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
