//! Tool Engine
//!
//! A metadata-driven record engine. A declarative tool definition (fields,
//! views, permissions, audit policy) is all it takes to get validated CRUD,
//! filtered and paginated queries, role-aware field and action gating, and
//! an append-only audit trail for that tool's records.
//!
//! ## Features
//!
//! - **Schema Registry**: Draft/published lifecycle with full-schema linting
//! - **Field Validators**: Field lists compiled to runtime validators, cached by checksum
//! - **Permissions**: Pure role predicates plus sandboxed visibility expressions
//! - **Queries**: Filters, free-text search, sorting and pagination over any store
//! - **Audit Trail**: Field-level diffs for every mutation
//! - **Change Notifications**: Per-tool broadcast of record changes
//!
//! ## Flow
//!
//! ```text
//! published schema ─► compiled validator ─► payload check
//!                                              │
//!        notifier ◄─ audit entry ◄─ diff ◄─ record store
//! ```

pub mod actions;
pub mod audit;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod lint;
pub mod notifier;
pub mod permissions;
pub mod query;
pub mod record;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validator;

pub use actions::{ActionHandler, ActionOutcome};
pub use audit::{AuditActionType, AuditFieldChange, AuditLog, AuditLogQuery, AuditTrail};
pub use checksum::Checksum;
pub use config::EngineConfig;
pub use engine::RecordEngine;
pub use error::{EngineError, EntityKind, Result, ValidationErrors, ValidationIssue};
pub use lint::{LintResult, SchemaLinter};
pub use notifier::{ChangeKind, ChangeNotifier, RecordChangeEvent};
pub use query::{FilterQuery, Page, Pagination, RecordQuery};
pub use record::{Actor, DataRecord, RecordPatch};
pub use registry::{SchemaCheck, SchemaRegistry};
pub use schema::{FieldDefinition, FieldType, Role, ToolSchema, ToolSchemaInput, ToolSchemaPatch};
pub use validator::{FieldRule, RecordValidator, ValidationMode};
