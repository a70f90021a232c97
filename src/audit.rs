//! Audit trail: field-level diffs and append-only change logs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{EngineError, EntityKind, Result};
use crate::query::{Page, PageLimits, Pagination};
use crate::record::Actor;
use crate::schema::{Role, ToolSchema};
use crate::store::AuditStore;

/// Keys starting with this prefix are engine-internal and never diffed
pub const DEFAULT_INTERNAL_PREFIX: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditActionType {
    Create,
    Update,
    Delete,
    Action,
}

/// Before/after pair for one field. An absent side is omitted on the wire;
/// an explicit `null` reads back as `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFieldChange {
    pub field: String,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl AuditFieldChange {
    pub fn new(field: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            field: field.into(),
            before,
            after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: String,
    pub actor_user_id: String,
    pub actor_email: String,
    pub role: Role,
    pub tool_id: String,
    pub resource: String,
    pub record_id: String,
    pub action_type: AuditActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    pub diff: Vec<AuditFieldChange>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AuditLog {
    /// New entry stamped with a fresh id and the current time
    pub fn new(
        actor: &Actor,
        schema: &ToolSchema,
        record_id: impl Into<String>,
        action_type: AuditActionType,
        diff: Vec<AuditFieldChange>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_user_id: actor.id.clone(),
            actor_email: actor.email.clone(),
            role: actor.role,
            tool_id: schema.tool_id.clone(),
            resource: schema.resource.clone(),
            record_id: record_id.into(),
            action_type,
            action_name: None,
            diff,
            timestamp: Utc::now(),
            ip: actor.ip.clone(),
            user_agent: actor.user_agent.clone(),
        }
    }

    pub fn with_action_name(mut self, name: impl Into<String>) -> Self {
        self.action_name = Some(name.into());
        self
    }
}

fn normalize(value: Option<&Value>) -> &Value {
    match value {
        Some(v) => v,
        None => &Value::Null,
    }
}

/// Structural equality used for diffing. Absent and null are equivalent,
/// numbers compare by value (`3 == 3.0`), arrays are order-sensitive.
pub fn deep_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    values_equal(normalize(a), normalize(b))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Field-level diff with the default internal prefix
pub fn get_diff(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
    fields: Option<&[String]>,
) -> Vec<AuditFieldChange> {
    get_diff_with_prefix(before, after, fields, DEFAULT_INTERNAL_PREFIX)
}

/// Field-level diff between two snapshots.
///
/// Candidates are `fields` when given, otherwise keys of `before` followed by
/// keys of `after` not already seen. Keys starting with `internal_prefix` are
/// skipped either way.
pub fn get_diff_with_prefix(
    before: &Map<String, Value>,
    after: &Map<String, Value>,
    fields: Option<&[String]>,
    internal_prefix: &str,
) -> Vec<AuditFieldChange> {
    let candidates: Vec<&str> = match fields {
        Some(fields) => fields.iter().map(String::as_str).collect(),
        None => {
            let mut keys: Vec<&str> = before.keys().map(String::as_str).collect();
            keys.extend(
                after
                    .keys()
                    .map(String::as_str)
                    .filter(|k| !before.contains_key(*k)),
            );
            keys
        }
    };

    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|key| internal_prefix.is_empty() || !key.starts_with(internal_prefix))
        .filter(|key| seen.insert(*key))
        .filter_map(|key| {
            let old = before.get(key);
            let new = after.get(key);
            if deep_equal(old, new) {
                None
            } else {
                Some(AuditFieldChange::new(key, old.cloned(), new.cloned()))
            }
        })
        .collect()
}

/// Filters for reading the audit trail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<AuditActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl AuditLogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_id(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_actor(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }

    pub fn with_action_type(mut self, action_type: AuditActionType) -> Self {
        self.action_type = Some(action_type);
        self
    }

    pub fn with_time_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Whether `entry` passes every configured filter; the time range is inclusive
    pub fn matches(&self, entry: &AuditLog) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == value)
        }

        eq(&self.tool_id, &entry.tool_id)
            && eq(&self.resource, &entry.resource)
            && eq(&self.record_id, &entry.record_id)
            && eq(&self.actor_user_id, &entry.actor_user_id)
            && self.action_type.map_or(true, |t| t == entry.action_type)
            && self.start.map_or(true, |start| entry.timestamp >= start)
            && self.end.map_or(true, |end| entry.timestamp <= end)
    }
}

/// Append-only writer and reader over an [`AuditStore`]
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    limits: PageLimits,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            limits: PageLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Append an entry. Write failures are logged and swallowed so the
    /// mutation that produced the entry still succeeds.
    pub async fn record(&self, entry: AuditLog) -> bool {
        let entry_id = entry.id.clone();
        let record_id = entry.record_id.clone();
        match self.store.append(entry).await {
            Ok(()) => {
                debug!(audit_id = %entry_id, record_id = %record_id, "Audit entry written");
                true
            }
            Err(err) => {
                error!(record_id = %record_id, error = %err, "Failed to write audit entry");
                false
            }
        }
    }

    /// Filtered, newest-first page of entries
    pub async fn query(&self, query: &AuditLogQuery) -> Result<Page<AuditLog>> {
        let (page, page_size) = self.limits.resolve(query.page, query.page_size, None)?;
        let skip = (page as usize - 1) * page_size as usize;
        let (data, total) = self.store.query(query, skip, page_size as usize).await?;
        Ok(Page {
            data,
            pagination: Pagination::new(page, page_size, total),
        })
    }

    /// Every entry for one record, newest first
    pub async fn by_record(&self, record_id: &str) -> Result<Vec<AuditLog>> {
        self.store.find_by_record(record_id).await
    }

    pub async fn by_id(&self, id: &str) -> Result<AuditLog> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::AuditLog, id))
    }
}
