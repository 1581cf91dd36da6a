//! Queue items for pending remote writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Remote collection a queued write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Logs,
    Products,
    Materials,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Logs => "logs",
            Endpoint::Products => "products",
            Endpoint::Materials => "materials",
        }
    }

    pub fn all() -> [Endpoint; 3] {
        [Endpoint::Logs, Endpoint::Products, Endpoint::Materials]
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logs" => Ok(Endpoint::Logs),
            "products" => Ok(Endpoint::Products),
            "materials" => Ok(Endpoint::Materials),
            other => Err(format!("unknown endpoint: {other}")),
        }
    }
}

/// A pending write, owned by the durable queue until remote acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub endpoint: Endpoint,
    /// Sanitized, pure-data payload
    pub payload: serde_json::Value,
    /// Millisecond precision, matching the persisted record
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(endpoint: Endpoint, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        let enqueued_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            id: Uuid::new_v4(),
            endpoint,
            payload,
            enqueued_at,
            attempts: 0,
            last_error: None,
        }
    }

    /// Key for the remote upsert: the payload's own `id` when it has one,
    /// so repeated writes of an entity land on one record
    pub fn record_id(&self) -> String {
        self.payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Sanitize a value into a pure JSON data payload.
///
/// Fails if the value cannot be represented as data (e.g. a map with
/// non-string keys or a serializer that errors on runtime handles).
pub fn sanitize<T: Serialize>(value: &T) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(value)
}
