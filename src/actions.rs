//! Built-in action handlers
//!
//! A [`crate::schema::ToolAction`] names its handler by string. Only the
//! handlers listed here exist; each one resolves to a single-field bulk
//! assignment that the engine applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result, ValidationErrors};
use crate::record::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionHandler {
    /// Set `assignee` to the acting user
    AssignToMe,
    /// Set `status` from the `status` parameter
    BulkChangeStatus,
}

impl ActionHandler {
    pub const ALL: [ActionHandler; 2] = [ActionHandler::AssignToMe, ActionHandler::BulkChangeStatus];

    pub fn id(&self) -> &'static str {
        match self {
            ActionHandler::AssignToMe => "assignToMe",
            ActionHandler::BulkChangeStatus => "bulkChangeStatus",
        }
    }

    /// Resolve the field assignment this handler performs
    pub fn plan(&self, params: &Map<String, Value>, actor: &Actor) -> Result<BulkAssignment> {
        match self {
            ActionHandler::AssignToMe => Ok(BulkAssignment {
                field: "assignee",
                value: Value::String(actor.id.clone()),
            }),
            ActionHandler::BulkChangeStatus => match params.get("status") {
                Some(Value::String(status)) if !status.is_empty() => Ok(BulkAssignment {
                    field: "status",
                    value: Value::String(status.clone()),
                }),
                _ => Err(EngineError::Validation(ValidationErrors::single(
                    "params.status",
                    "Status parameter required",
                ))),
            },
        }
    }
}

impl fmt::Display for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ActionHandler {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        ActionHandler::ALL
            .into_iter()
            .find(|h| h.id() == s)
            .ok_or_else(|| EngineError::Configuration(format!("Unknown action handler: {}", s)))
    }
}

pub fn is_known_handler(handler: &str) -> bool {
    handler.parse::<ActionHandler>().is_ok()
}

/// One field set to one value across the selected records
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAssignment {
    pub field: &'static str,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub affected: usize,
}

impl ActionOutcome {
    pub fn completed(affected: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            affected,
        }
    }
}
