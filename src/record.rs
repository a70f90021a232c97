//! Generic records and the actors that mutate them

use std::borrow::Cow;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::Role;

pub const ID_KEY: &str = "_id";
pub const CREATED_AT_KEY: &str = "createdAt";
pub const UPDATED_AT_KEY: &str = "updatedAt";
pub const CREATED_BY_KEY: &str = "createdBy";
pub const UPDATED_BY_KEY: &str = "updatedBy";

/// Keys owned by the engine; never taken from client payloads
pub const RESERVED_KEYS: [&str; 5] = [
    ID_KEY,
    CREATED_AT_KEY,
    UPDATED_AT_KEY,
    CREATED_BY_KEY,
    UPDATED_BY_KEY,
];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Timestamps are exposed to predicates and sorting as RFC 3339 strings
pub fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// A stored record: fixed bookkeeping plus an open map of tool fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DataRecord {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>, actor_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            created_by: Some(actor_id.to_string()),
            updated_by: Some(actor_id.to_string()),
            fields,
        }
    }

    /// Look up a value by key, including bookkeeping keys
    pub fn get(&self, key: &str) -> Option<Cow<'_, Value>> {
        match key {
            ID_KEY => Some(Cow::Owned(Value::String(self.id.clone()))),
            CREATED_AT_KEY => Some(Cow::Owned(timestamp_value(&self.created_at))),
            UPDATED_AT_KEY => Some(Cow::Owned(timestamp_value(&self.updated_at))),
            CREATED_BY_KEY => self
                .created_by
                .as_ref()
                .map(|v| Cow::Owned(Value::String(v.clone()))),
            UPDATED_BY_KEY => self
                .updated_by
                .as_ref()
                .map(|v| Cow::Owned(Value::String(v.clone()))),
            _ => self.fields.get(key).map(Cow::Borrowed),
        }
    }

    /// Apply a patch in place, stamping the acting user
    pub fn apply(&mut self, patch: &RecordPatch) {
        for (key, value) in &patch.set {
            self.fields.insert(key.clone(), value.clone());
        }
        self.updated_by = Some(patch.updated_by.clone());
        self.updated_at = patch.updated_at;
    }

    /// The full record as a flat JSON object
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Field assignments applied by one update
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub set: Map<String, Value>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl RecordPatch {
    pub fn new(set: Map<String, Value>, updated_by: impl Into<String>) -> Self {
        Self {
            set,
            updated_by: updated_by.into(),
            updated_at: Utc::now(),
        }
    }

    /// Patch that assigns a single field
    pub fn single(field: &str, value: Value, updated_by: impl Into<String>) -> Self {
        let mut set = Map::new();
        set.insert(field.to_string(), value);
        Self::new(set, updated_by)
    }
}

/// The identity performing an operation, trusted as supplied by the auth layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role,
            ip: None,
            user_agent: None,
        }
    }

    pub fn with_request(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }
}
