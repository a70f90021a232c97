//! Schema Registry
//!
//! Owns the lifecycle of tool definitions: draft creation, edits, publish
//! and unpublish. A schema is only usable for records once published, and
//! publishing re-lints the whole definition.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{EngineError, EntityKind, Result};
use crate::lint::SchemaLinter;
use crate::permissions::can_access_tool;
use crate::schema::{Role, ToolSchema, ToolSchemaInput, ToolSchemaPatch};
use crate::store::{MemorySchemaStore, SchemaStore};

/// Outcome of a dry-run schema validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCheck {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// The main schema registry
pub struct SchemaRegistry {
    store: Arc<dyn SchemaStore>,
    linter: SchemaLinter,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        Self {
            store,
            linter: SchemaLinter::new(),
        }
    }

    /// Registry over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySchemaStore::new()))
    }

    pub fn with_linter(mut self, linter: SchemaLinter) -> Self {
        self.linter = linter;
        self
    }

    /// Lint and store a new draft at version 1
    pub async fn create(&self, input: ToolSchemaInput) -> Result<ToolSchema> {
        self.linter.lint(&input.tool_id, &input).into_result()?;

        if self.store.find_by_tool_id(&input.tool_id).await?.is_some() {
            return Err(EngineError::Conflict(format!(
                "Tool with ID '{}' already exists",
                input.tool_id
            )));
        }

        let schema = ToolSchema::from_input(uuid::Uuid::new_v4().to_string(), input);
        self.store.insert(schema.clone()).await?;
        info!(tool_id = %schema.tool_id, schema_id = %schema.id, "Created tool schema");
        Ok(schema)
    }

    /// Merge the supplied sections and bump the version. The publish state
    /// is left as is; only a changed tool id is re-checked for uniqueness.
    pub async fn update(&self, id: &str, patch: ToolSchemaPatch) -> Result<ToolSchema> {
        let mut schema = self.require(id).await?;

        if let Some(tool_id) = patch.tool_id.as_deref() {
            if tool_id != schema.tool_id && self.store.find_by_tool_id(tool_id).await?.is_some() {
                return Err(EngineError::Conflict(format!(
                    "Tool with ID '{}' already exists",
                    tool_id
                )));
            }
        }

        schema.apply_patch(patch);
        schema.version += 1;
        schema.updated_at = Utc::now();
        self.store.replace(schema.clone()).await?;
        info!(tool_id = %schema.tool_id, version = schema.version, "Updated tool schema");
        Ok(schema)
    }

    /// Re-lint and mark published; a failing lint leaves the state untouched
    pub async fn publish(&self, id: &str) -> Result<ToolSchema> {
        let mut schema = self.require(id).await?;
        self.linter
            .lint(&schema.tool_id, &schema.to_input())
            .into_result()?;

        if schema.is_published {
            debug!(tool_id = %schema.tool_id, "Schema already published");
            return Ok(schema);
        }

        let now = Utc::now();
        schema.is_published = true;
        schema.published_at = Some(now);
        schema.updated_at = now;
        self.store.replace(schema.clone()).await?;
        info!(tool_id = %schema.tool_id, version = schema.version, "Published tool schema");
        Ok(schema)
    }

    pub async fn unpublish(&self, id: &str) -> Result<ToolSchema> {
        let mut schema = self.require(id).await?;
        schema.is_published = false;
        schema.published_at = None;
        schema.updated_at = Utc::now();
        self.store.replace(schema.clone()).await?;
        info!(tool_id = %schema.tool_id, "Unpublished tool schema");
        Ok(schema)
    }

    /// Remove a definition; records in its resource are left alone
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(id).await?;
        if removed {
            info!(schema_id = %id, "Deleted tool schema");
        }
        Ok(removed)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ToolSchema>> {
        self.store.find_by_id(id).await
    }

    pub async fn get_by_tool_id(&self, tool_id: &str) -> Result<Option<ToolSchema>> {
        self.store.find_by_tool_id(tool_id).await
    }

    /// The published schema for a tool, or `NotFound`
    pub async fn get_published(&self, tool_id: &str) -> Result<ToolSchema> {
        self.store
            .find_by_tool_id(tool_id)
            .await?
            .filter(|s| s.is_published)
            .ok_or_else(|| EngineError::not_found(EntityKind::Tool, tool_id))
    }

    /// Every schema, ordered by name
    pub async fn list(&self) -> Result<Vec<ToolSchema>> {
        let mut schemas = self.store.list().await?;
        schemas.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tool_id.cmp(&b.tool_id)));
        Ok(schemas)
    }

    pub async fn list_published(&self) -> Result<Vec<ToolSchema>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.is_published)
            .collect())
    }

    /// Published schemas the role may open
    pub async fn accessible_schemas(&self, role: Role) -> Result<Vec<ToolSchema>> {
        Ok(self
            .list_published()
            .await?
            .into_iter()
            .filter(|s| can_access_tool(role, &s.permissions))
            .collect())
    }

    /// Deserialize and lint a candidate definition without storing it
    pub fn validate_schema_json(&self, candidate: &Value) -> SchemaCheck {
        let schema_id = candidate
            .get("toolId")
            .and_then(Value::as_str)
            .unwrap_or("<candidate>");
        let result = self.linter.lint_value(schema_id, candidate);
        SchemaCheck {
            valid: result.is_clean(),
            errors: result.error_messages(),
            warnings: result.warning_messages(),
        }
    }

    async fn require(&self, id: &str) -> Result<ToolSchema> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Schema, id))
    }
}
