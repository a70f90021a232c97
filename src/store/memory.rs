//! In-memory stores

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AuditStore, RecordStore, SchemaStore, StorePage};
use crate::audit::{AuditLog, AuditLogQuery};
use crate::error::{EngineError, EntityKind, Result};
use crate::query::{sort_records, StoreQuery};
use crate::record::{DataRecord, RecordPatch};
use crate::schema::ToolSchema;

#[derive(Default)]
pub struct MemorySchemaStore {
    schemas: RwLock<HashMap<String, ToolSchema>>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Uniqueness check shared by the schema stores
pub(crate) fn ensure_unique(existing: &HashMap<String, ToolSchema>, schema: &ToolSchema) -> Result<()> {
    if existing.contains_key(&schema.id) {
        return Err(EngineError::Conflict(format!(
            "Schema with id '{}' already exists",
            schema.id
        )));
    }
    if existing.values().any(|s| s.tool_id == schema.tool_id) {
        return Err(EngineError::Conflict(format!(
            "Tool with ID '{}' already exists",
            schema.tool_id
        )));
    }
    Ok(())
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn insert(&self, schema: ToolSchema) -> Result<()> {
        let mut schemas = self.schemas.write();
        ensure_unique(&schemas, &schema)?;
        schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    async fn replace(&self, schema: ToolSchema) -> Result<()> {
        let mut schemas = self.schemas.write();
        match schemas.get_mut(&schema.id) {
            Some(slot) => {
                *slot = schema;
                Ok(())
            }
            None => Err(EngineError::not_found(EntityKind::Schema, schema.id)),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ToolSchema>> {
        Ok(self.schemas.read().get(id).cloned())
    }

    async fn find_by_tool_id(&self, tool_id: &str) -> Result<Option<ToolSchema>> {
        Ok(self
            .schemas
            .read()
            .values()
            .find(|s| s.tool_id == tool_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<ToolSchema>> {
        Ok(self.schemas.read().values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.schemas.write().remove(id).is_some())
    }
}

/// Records grouped by resource, kept in insertion order
#[derive(Default)]
pub struct MemoryRecordStore {
    resources: RwLock<HashMap<String, Vec<DataRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for a resource
    pub fn count(&self, resource: &str) -> usize {
        self.resources.read().get(resource).map_or(0, Vec::len)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, resource: &str, record: DataRecord) -> Result<DataRecord> {
        let mut resources = self.resources.write();
        let records = resources.entry(resource.to_string()).or_default();
        if records.iter().any(|r| r.id == record.id) {
            return Err(EngineError::Conflict(format!(
                "Record with id '{}' already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<DataRecord>> {
        Ok(self
            .resources
            .read()
            .get(resource)
            .and_then(|records| records.iter().find(|r| r.id == id).cloned()))
    }

    async fn find(&self, resource: &str, query: &StoreQuery) -> Result<StorePage> {
        let mut matched: Vec<DataRecord> = self
            .resources
            .read()
            .get(resource)
            .map(|records| records.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        sort_records(&mut matched, &query.sort);
        let total = matched.len() as u64;
        let data = matched.into_iter().skip(query.skip).take(query.limit).collect();
        Ok(StorePage { data, total })
    }

    async fn update(&self, resource: &str, id: &str, patch: &RecordPatch) -> Result<Option<DataRecord>> {
        let mut resources = self.resources.write();
        let record = resources
            .get_mut(resource)
            .and_then(|records| records.iter_mut().find(|r| r.id == id));
        Ok(record.map(|r| {
            r.apply(patch);
            r.clone()
        }))
    }

    async fn delete(&self, resource: &str, id: &str) -> Result<bool> {
        let mut resources = self.resources.write();
        let Some(records) = resources.get_mut(resource) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn update_many(&self, resource: &str, ids: &[String], patch: &RecordPatch) -> Result<Vec<String>> {
        let mut resources = self.resources.write();
        let Some(records) = resources.get_mut(resource) else {
            return Ok(Vec::new());
        };
        let mut updated = Vec::new();
        for record in records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.apply(patch);
            updated.push(record.id.clone());
        }
        Ok(updated)
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditLog>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every entry in append order
    pub fn entries(&self) -> Vec<AuditLog> {
        self.entries.read().clone()
    }

    fn newest_first<'a>(entries: impl DoubleEndedIterator<Item = &'a AuditLog>) -> Vec<AuditLog> {
        let mut out: Vec<AuditLog> = entries.rev().cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: AuditLog) -> Result<()> {
        self.entries.write().push(entry);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<AuditLog>> {
        Ok(self.entries.read().iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_record(&self, record_id: &str) -> Result<Vec<AuditLog>> {
        let entries = self.entries.read();
        Ok(Self::newest_first(
            entries.iter().filter(|e| e.record_id == record_id),
        ))
    }

    async fn query(&self, query: &AuditLogQuery, skip: usize, limit: usize) -> Result<(Vec<AuditLog>, u64)> {
        let matched = {
            let entries = self.entries.read();
            Self::newest_first(entries.iter().filter(|e| query.matches(e)))
        };
        let total = matched.len() as u64;
        Ok((matched.into_iter().skip(skip).take(limit).collect(), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SortDirection, SortSpec};
    use serde_json::{json, Map, Value};

    fn record(id: &str, fields: Value) -> DataRecord {
        let map: Map<String, Value> = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        DataRecord::new(id, map, "u1")
    }

    fn query_all(limit: usize) -> StoreQuery {
        StoreQuery {
            all_of: vec![],
            any_of: vec![],
            sort: SortSpec::new("n", SortDirection::Asc),
            skip: 0,
            limit,
        }
    }

    #[tokio::test]
    async fn test_find_sorts_then_pages() {
        let store = MemoryRecordStore::new();
        for n in [3, 1, 2] {
            store
                .insert("items", record(&format!("r{}", n), json!({ "n": n })))
                .await
                .unwrap();
        }

        let mut query = query_all(2);
        query.skip = 1;
        let page = store.find("items", &query).await.unwrap();

        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.data.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn test_update_many_reports_only_existing_ids() {
        let store = MemoryRecordStore::new();
        store.insert("items", record("a", json!({}))).await.unwrap();
        store.insert("items", record("b", json!({}))).await.unwrap();

        let patch = RecordPatch::single("status", json!("closed"), "u2");
        let ids = vec!["a".to_string(), "missing".to_string()];
        let updated = store.update_many("items", &ids, &patch).await.unwrap();

        assert_eq!(updated, vec!["a".to_string()]);
        let b = store.find_by_id("items", "b").await.unwrap().unwrap();
        assert!(b.fields.get("status").is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_resource() {
        let store = MemoryRecordStore::new();
        assert!(!store.delete("nothing", "x").await.unwrap());
    }
}
