//! Record Query Engine
//!
//! Runs every record operation for a published tool:
//! resolve schema → validate payload → mutate store → diff → audit → notify.
//!
//! Audit and notification failures are logged and never undo or fail the
//! mutation that triggered them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::{ActionHandler, ActionOutcome};
use crate::audit::{deep_equal, get_diff_with_prefix, AuditActionType, AuditFieldChange, AuditLog, AuditTrail};
use crate::checksum::Checksum;
use crate::config::{EngineConfig, EngineSettings};
use crate::error::{EngineError, EntityKind, Result, ValidationErrors};
use crate::lint::SchemaLinter;
use crate::notifier::{ChangeKind, ChangeNotifier, RecordChangeEvent};
use crate::query::{translate, Page, Pagination, RecordQuery};
use crate::record::{Actor, DataRecord, RecordPatch};
use crate::registry::SchemaRegistry;
use crate::schema::ToolSchema;
use crate::store::{
    AuditStore, JsonDirSchemaStore, MemoryAuditStore, MemoryRecordStore, MemorySchemaStore, RecordStore,
    SchemaStore,
};
use crate::validator::{RecordValidator, ValidationMode};

/// Engine over a schema registry and record/audit stores
pub struct RecordEngine {
    registry: Arc<SchemaRegistry>,
    records: Arc<dyn RecordStore>,
    audit: AuditTrail,
    notifier: Arc<ChangeNotifier>,
    validators: RwLock<HashMap<String, (Checksum, Arc<RecordValidator>)>>,
    settings: EngineSettings,
}

impl RecordEngine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        records: Arc<dyn RecordStore>,
        audit_store: Arc<dyn AuditStore>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        let settings = EngineSettings::default();
        Self {
            registry,
            records,
            audit: AuditTrail::new(audit_store).with_limits(settings.page_limits()),
            notifier,
            validators: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Everything in memory with default settings
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(SchemaRegistry::new(Arc::new(MemorySchemaStore::new()))),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryAuditStore::new()),
            Arc::new(ChangeNotifier::default()),
        )
    }

    /// Build from configuration: schemas live in `store.schema_dir` when set,
    /// records and audit entries in memory
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let schema_store: Arc<dyn SchemaStore> = match config.schema_dir() {
            Some(dir) => Arc::new(JsonDirSchemaStore::open(dir)?),
            None => Arc::new(MemorySchemaStore::new()),
        };
        let linter = SchemaLinter::new().with_max_page_size(config.engine.max_page_size);
        let engine = Self::new(
            Arc::new(SchemaRegistry::new(schema_store).with_linter(linter)),
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryAuditStore::new()),
            Arc::new(ChangeNotifier::new(config.notifier.channel_capacity)),
        );
        Ok(engine.with_settings(config.engine.clone()))
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.audit = self.audit.with_limits(settings.page_limits());
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self, tool_id: &str) -> broadcast::Receiver<RecordChangeEvent> {
        self.notifier.subscribe(tool_id)
    }

    /// Compiled validator for a schema, reused while its field list is unchanged
    pub fn validator_for(&self, schema: &ToolSchema) -> Result<Arc<RecordValidator>> {
        let checksum = Checksum::of_fields(&schema.fields)?;
        if let Some((cached, validator)) = self.validators.read().get(&schema.tool_id) {
            if *cached == checksum {
                debug!(tool_id = %schema.tool_id, "Validator cache hit");
                return Ok(Arc::clone(validator));
            }
        }

        let validator = Arc::new(RecordValidator::compile(&schema.fields)?);
        debug!(tool_id = %schema.tool_id, checksum = %checksum, "Compiled record validator");
        self.validators
            .write()
            .insert(schema.tool_id.clone(), (checksum, Arc::clone(&validator)));
        Ok(validator)
    }

    /// Filtered, sorted, paginated records of a published tool
    pub async fn query(&self, tool_id: &str, query: &RecordQuery) -> Result<Page<DataRecord>> {
        let schema = self.registry.get_published(tool_id).await?;
        let plan = translate(&schema, query, &self.settings.page_limits())?;
        debug!(
            tool_id = %tool_id,
            predicates = plan.store_query.all_of.len(),
            search_fields = plan.store_query.any_of.len(),
            page = plan.page,
            page_size = plan.page_size,
            "Translated record query"
        );

        let found = self.records.find(&schema.resource, &plan.store_query).await?;
        Ok(Page {
            data: found.data,
            pagination: Pagination::new(plan.page, plan.page_size, found.total),
        })
    }

    /// [`Self::query`], abandoned with `Cancelled` if the token fires first
    pub async fn query_with_cancel(
        &self,
        tool_id: &str,
        query: &RecordQuery,
        token: &CancellationToken,
    ) -> Result<Page<DataRecord>> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(tool_id = %tool_id, "Record query cancelled");
                Err(EngineError::Cancelled)
            }
            result = self.query(tool_id, query) => result,
        }
    }

    pub async fn get_by_id(&self, tool_id: &str, id: &str) -> Result<Option<DataRecord>> {
        let schema = self.registry.get_published(tool_id).await?;
        self.records.find_by_id(&schema.resource, id).await
    }

    /// Validate and insert a new record, filling declared defaults
    pub async fn create(&self, tool_id: &str, payload: &Map<String, Value>, actor: &Actor) -> Result<DataRecord> {
        let schema = self.registry.get_published(tool_id).await?;
        let validator = self.validator_for(&schema)?;
        let mut fields = validator.validate(payload, ValidationMode::Full)?;

        for field in &schema.fields {
            if let Some(default) = field.default.as_ref() {
                if !fields.contains_key(&field.key) {
                    fields.insert(field.key.clone(), default.clone());
                }
            }
        }

        let record = DataRecord::new(Uuid::new_v4().to_string(), fields, &actor.id);
        let record = self.records.insert(&schema.resource, record).await?;
        info!(tool_id = %tool_id, record_id = %record.id, actor = %actor.id, "Created record");

        if schema.audit.enabled {
            let diff = record
                .fields
                .iter()
                .filter(|(key, _)| !self.is_internal(key))
                .map(|(key, value)| AuditFieldChange::new(key.clone(), None, Some(value.clone())))
                .collect();
            self.audit
                .record(AuditLog::new(actor, &schema, &record.id, AuditActionType::Create, diff))
                .await;
        }

        self.notify(tool_id, &record.id, ChangeKind::Created, actor);
        Ok(record)
    }

    /// Validate and merge a partial payload into an existing record
    pub async fn update(
        &self,
        tool_id: &str,
        id: &str,
        payload: &Map<String, Value>,
        actor: &Actor,
    ) -> Result<DataRecord> {
        let schema = self.registry.get_published(tool_id).await?;
        let existing = self
            .records
            .find_by_id(&schema.resource, id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Record, id))?;

        let validator = self.validator_for(&schema)?;
        let fields = validator.validate(payload, ValidationMode::Partial)?;
        let patch = RecordPatch::new(fields, actor.id.clone());

        let updated = self
            .records
            .update(&schema.resource, id, &patch)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Record, id))?;
        info!(tool_id = %tool_id, record_id = %id, actor = %actor.id, "Updated record");

        if schema.audit.enabled {
            let diff = get_diff_with_prefix(
                &existing.fields,
                &updated.fields,
                schema.audit.audited_fields(),
                &self.settings.internal_key_prefix,
            );
            if diff.is_empty() {
                debug!(record_id = %id, "No audited changes, skipping audit entry");
            } else {
                self.audit
                    .record(AuditLog::new(actor, &schema, id, AuditActionType::Update, diff))
                    .await;
            }
        }

        self.notify(tool_id, id, ChangeKind::Updated, actor);
        Ok(updated)
    }

    pub async fn delete(&self, tool_id: &str, id: &str, actor: &Actor) -> Result<()> {
        let schema = self.registry.get_published(tool_id).await?;
        let existing = self
            .records
            .find_by_id(&schema.resource, id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Record, id))?;

        if !self.records.delete(&schema.resource, id).await? {
            return Err(EngineError::not_found(EntityKind::Record, id));
        }
        info!(tool_id = %tool_id, record_id = %id, actor = %actor.id, "Deleted record");

        if schema.audit.enabled {
            let diff = existing
                .fields
                .iter()
                .filter(|(key, _)| !self.is_internal(key))
                .map(|(key, value)| AuditFieldChange::new(key.clone(), Some(value.clone()), None))
                .collect();
            self.audit
                .record(AuditLog::new(actor, &schema, id, AuditActionType::Delete, diff))
                .await;
        }

        self.notify(tool_id, id, ChangeKind::Deleted, actor);
        Ok(())
    }

    /// Set one client-editable field on many records; returns how many were updated
    pub async fn bulk_update(
        &self,
        tool_id: &str,
        ids: &[String],
        field: &str,
        value: Value,
        actor: &Actor,
    ) -> Result<usize> {
        let schema = self.registry.get_published(tool_id).await?;
        if schema.field(field).is_some_and(|f| !f.accepts_input()) {
            return Err(EngineError::Validation(ValidationErrors::single(field, "is not editable")));
        }
        let action_name = format!("bulk_update_{}", field);
        self.apply_bulk(&schema, ids, field, value, actor, &action_name).await
    }

    /// Run a schema-declared action through the handler registry
    pub async fn execute_action(
        &self,
        tool_id: &str,
        action_id: &str,
        ids: &[String],
        params: &Map<String, Value>,
        actor: &Actor,
    ) -> Result<ActionOutcome> {
        let schema = self.registry.get_published(tool_id).await?;
        let action = schema
            .action(action_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Action, action_id))?;
        let handler: ActionHandler = action.handler.parse()?;
        let assignment = handler.plan(params, actor)?;

        let affected = self
            .apply_bulk(&schema, ids, assignment.field, assignment.value, actor, &action.id)
            .await?;
        info!(tool_id = %tool_id, action = %action.id, handler = %handler, affected, "Executed action");

        Ok(ActionOutcome::completed(
            affected,
            format!("{} applied to {} record(s)", action.label, affected),
        ))
    }

    async fn apply_bulk(
        &self,
        schema: &ToolSchema,
        ids: &[String],
        field: &str,
        value: Value,
        actor: &Actor,
        action_name: &str,
    ) -> Result<usize> {
        let definition = schema
            .field(field)
            .ok_or_else(|| EngineError::not_found(EntityKind::Field, field))?;

        if definition.accepts_input() {
            let mut single = Map::new();
            single.insert(field.to_string(), value.clone());
            self.validator_for(schema)?
                .validate(&single, ValidationMode::Partial)?;
        }

        let audited = schema.audit.enabled && !self.is_internal(field);

        let mut prior: HashMap<&str, Option<Value>> = HashMap::new();
        if audited {
            for id in ids {
                match self.records.find_by_id(&schema.resource, id).await {
                    Ok(Some(record)) => {
                        prior.insert(id.as_str(), record.fields.get(field).cloned());
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(record_id = %id, error = %err, "Failed to load record before bulk update, skipping audit");
                    }
                }
            }
        }

        let patch = RecordPatch::single(field, value.clone(), actor.id.clone());
        let updated = self.records.update_many(&schema.resource, ids, &patch).await?;
        info!(
            tool_id = %schema.tool_id,
            field = %field,
            requested = ids.len(),
            updated = updated.len(),
            "Bulk updated records"
        );

        for id in &updated {
            if let Some(before) = prior.get(id.as_str()) {
                if !deep_equal(before.as_ref(), Some(&value)) {
                    let diff = vec![AuditFieldChange::new(field, before.clone(), Some(value.clone()))];
                    let entry = AuditLog::new(actor, schema, id, AuditActionType::Update, diff)
                        .with_action_name(action_name);
                    self.audit.record(entry).await;
                }
            }
            self.notify(&schema.tool_id, id, ChangeKind::Updated, actor);
        }

        Ok(updated.len())
    }

    fn is_internal(&self, key: &str) -> bool {
        let prefix = &self.settings.internal_key_prefix;
        !prefix.is_empty() && key.starts_with(prefix.as_str())
    }

    fn notify(&self, tool_id: &str, record_id: &str, kind: ChangeKind, actor: &Actor) {
        let delivered = self
            .notifier
            .emit(RecordChangeEvent::new(tool_id, record_id, kind, actor.id.clone()));
        debug!(tool_id = %tool_id, record_id = %record_id, delivered, "Emitted change event");
    }
}
