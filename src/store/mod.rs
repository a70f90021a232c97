//! Persistence collaborators
//!
//! The engine only talks to these traits. [`memory`] holds reference
//! implementations backed by process memory; [`json_dir`] keeps schema
//! definitions as one JSON file per schema.

pub mod json_dir;
pub mod memory;

use async_trait::async_trait;

use crate::audit::{AuditLog, AuditLogQuery};
use crate::error::Result;
use crate::query::StoreQuery;
use crate::record::{DataRecord, RecordPatch};
use crate::schema::ToolSchema;

pub use json_dir::JsonDirSchemaStore;
pub use memory::{MemoryAuditStore, MemoryRecordStore, MemorySchemaStore};

/// Matching records for one page plus the pre-pagination count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorePage {
    pub data: Vec<DataRecord>,
    pub total: u64,
}

#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Insert a new schema; `Conflict` if the id or tool id is taken
    async fn insert(&self, schema: ToolSchema) -> Result<()>;

    /// Overwrite an existing schema by id; `NotFound` if absent
    async fn replace(&self, schema: ToolSchema) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ToolSchema>>;

    async fn find_by_tool_id(&self, tool_id: &str) -> Result<Option<ToolSchema>>;

    async fn list(&self) -> Result<Vec<ToolSchema>>;

    /// Returns whether a schema was removed
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, resource: &str, record: DataRecord) -> Result<DataRecord>;

    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<DataRecord>>;

    async fn find(&self, resource: &str, query: &StoreQuery) -> Result<StorePage>;

    /// Apply a patch; `None` when the record does not exist
    async fn update(&self, resource: &str, id: &str, patch: &RecordPatch) -> Result<Option<DataRecord>>;

    /// Returns whether a record was removed
    async fn delete(&self, resource: &str, id: &str) -> Result<bool>;

    /// Apply one patch to every listed record; returns the ids actually updated
    async fn update_many(&self, resource: &str, ids: &[String], patch: &RecordPatch) -> Result<Vec<String>>;
}

/// Append-only audit log storage
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditLog) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<AuditLog>>;

    /// Entries for one record, newest first
    async fn find_by_record(&self, record_id: &str) -> Result<Vec<AuditLog>>;

    /// Filtered entries, newest first, with the total before paging
    async fn query(&self, query: &AuditLogQuery, skip: usize, limit: usize) -> Result<(Vec<AuditLog>, u64)>;
}
