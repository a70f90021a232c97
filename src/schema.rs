//! Tool schema types and structures

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse identity class used for every permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Agent,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Manager, Role::Agent, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Agent => "agent",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "agent" => Ok(Role::Agent),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Select,
    Multiselect,
    Date,
    Datetime,
    Relation,
    Json,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub value: String,
    pub label: String,
}

impl FieldOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Declarative constraints on a field value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_message: Option<String>,
}

/// Per-field role sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_view: Option<Vec<Role>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_edit: Option<Vec<Role>>,
}

/// One typed attribute of a tool's record shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
    /// Visibility expression, e.g. `record.status == 'failed'`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<FieldPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    /// Target tool id for relation fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_label_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub readonly: bool,
}

impl FieldDefinition {
    /// Create a bare field of the given type
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            required: false,
            default: None,
            validation: None,
            visibility: None,
            permissions: None,
            options: None,
            relation_to: None,
            relation_label_field: None,
            computed_expression: None,
            help_text: None,
            placeholder: None,
            readonly: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_validation(mut self, validation: FieldValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_options<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(
            values
                .into_iter()
                .map(|v| {
                    let v = v.into();
                    FieldOption::new(v.clone(), v)
                })
                .collect(),
        );
        self
    }

    pub fn with_visibility(mut self, expression: impl Into<String>) -> Self {
        self.visibility = Some(expression.into());
        self
    }

    pub fn with_permissions(mut self, can_view: Option<Vec<Role>>, can_edit: Option<Vec<Role>>) -> Self {
        self.permissions = Some(FieldPermissions { can_view, can_edit });
        self
    }

    /// Whether clients may supply a value for this field
    pub fn accepts_input(&self) -> bool {
        !self.readonly && self.field_type != FieldType::Computed
    }

    /// Declared option values, if any
    pub fn option_values(&self) -> Option<Vec<String>> {
        self.options
            .as_ref()
            .filter(|opts| !opts.is_empty())
            .map(|opts| opts.iter().map(|o| o.value.clone()).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListColumn {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ListColumn {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            sortable: None,
            width: None,
            format: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFilterType {
    Text,
    Select,
    Multiselect,
    Date,
    Daterange,
    Boolean,
}

/// Comparison operator for record filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Equals,
    Contains,
    In,
    Gte,
    Lte,
    Between,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub filter_type: ListFilterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    pub columns: Vec<ListColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<ListFilter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub sections: Vec<FormSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_order: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Row,
    Bulk,
}

/// A named operation users can run against one or more records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAction {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_message: Option<String>,
    /// Identifier in the fixed handler registry
    pub handler: String,
    pub permissions: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPermissions {
    pub can_access_tool: Vec<Role>,
    pub can_create: Vec<Role>,
    pub can_read: Vec<Role>,
    pub can_update: Vec<Role>,
    pub can_delete: Vec<Role>,
    pub can_view_audit_log: Vec<Role>,
}

impl ToolPermissions {
    /// Grant every operation to the given roles
    pub fn all(roles: &[Role]) -> Self {
        Self {
            can_access_tool: roles.to_vec(),
            can_create: roles.to_vec(),
            can_read: roles.to_vec(),
            can_update: roles.to_vec(),
            can_delete: roles.to_vec(),
            can_view_audit_log: roles.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Fields to audit; empty or absent means all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl AuditConfig {
    /// The explicit audited subset, if one is configured
    pub fn audited_fields(&self) -> Option<&[String]> {
        self.fields.as_deref().filter(|f| !f.is_empty())
    }
}

/// Author-supplied tool definition, before the registry assigns bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchemaInput {
    pub tool_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub resource: String,
    pub fields: Vec<FieldDefinition>,
    pub list_view: ListView,
    pub form_view: FormView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ToolAction>>,
    pub permissions: ToolPermissions,
    pub audit: AuditConfig,
}

/// Partial edit of a tool definition; absent sections are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchemaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_view: Option<ListView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_view: Option<FormView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ToolAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<ToolPermissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditConfig>,
}

/// A stored tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    /// Store identifier, distinct from the `tool_id` slug
    pub id: String,
    pub tool_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub resource: String,
    pub fields: Vec<FieldDefinition>,
    pub list_view: ListView,
    pub form_view: FormView,
    #[serde(default)]
    pub actions: Vec<ToolAction>,
    pub permissions: ToolPermissions,
    pub audit: AuditConfig,
    pub version: u32,
    pub is_published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolSchema {
    /// Build a fresh draft at version 1
    pub fn from_input(id: impl Into<String>, input: ToolSchemaInput) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tool_id: input.tool_id,
            name: input.name,
            description: input.description,
            icon: input.icon,
            resource: input.resource,
            fields: input.fields,
            list_view: input.list_view,
            form_view: input.form_view,
            actions: input.actions.unwrap_or_default(),
            permissions: input.permissions,
            audit: input.audit,
            version: 1,
            is_published: false,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The author-facing part of this schema, as submitted for validation
    pub fn to_input(&self) -> ToolSchemaInput {
        ToolSchemaInput {
            tool_id: self.tool_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            icon: self.icon.clone(),
            resource: self.resource.clone(),
            fields: self.fields.clone(),
            list_view: self.list_view.clone(),
            form_view: self.form_view.clone(),
            actions: if self.actions.is_empty() {
                None
            } else {
                Some(self.actions.clone())
            },
            permissions: self.permissions.clone(),
            audit: self.audit.clone(),
        }
    }

    /// Merge supplied sections; bookkeeping is left to the caller
    pub fn apply_patch(&mut self, patch: ToolSchemaPatch) {
        if let Some(tool_id) = patch.tool_id {
            self.tool_id = tool_id;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if patch.icon.is_some() {
            self.icon = patch.icon;
        }
        if let Some(resource) = patch.resource {
            self.resource = resource;
        }
        if let Some(fields) = patch.fields {
            self.fields = fields;
        }
        if let Some(list_view) = patch.list_view {
            self.list_view = list_view;
        }
        if let Some(form_view) = patch.form_view {
            self.form_view = form_view;
        }
        if let Some(actions) = patch.actions {
            self.actions = actions;
        }
        if let Some(permissions) = patch.permissions {
            self.permissions = permissions;
        }
        if let Some(audit) = patch.audit {
            self.audit = audit;
        }
    }

    pub fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn action(&self, id: &str) -> Option<&ToolAction> {
        self.actions.iter().find(|a| a.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_definition_wire_format() {
        let field: FieldDefinition = serde_json::from_value(json!({
            "key": "priority",
            "label": "Priority",
            "type": "number",
            "validation": { "min": 1, "max": 5 }
        }))
        .unwrap();

        assert_eq!(field.field_type, FieldType::Number);
        assert!(!field.required);
        assert_eq!(field.validation.unwrap().max, Some(5.0));
    }

    #[test]
    fn test_role_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_apply_patch_keeps_untouched_sections() {
        let input = ToolSchemaInput {
            tool_id: "incidents".into(),
            name: "Incidents".into(),
            description: None,
            icon: None,
            resource: "incidents".into(),
            fields: vec![FieldDefinition::new("title", "Title", FieldType::Text)],
            list_view: ListView::default(),
            form_view: FormView::default(),
            actions: None,
            permissions: ToolPermissions::all(&[Role::Admin]),
            audit: AuditConfig::default(),
        };
        let mut schema = ToolSchema::from_input("s1", input);
        schema.apply_patch(ToolSchemaPatch {
            name: Some("Major incidents".into()),
            ..Default::default()
        });

        assert_eq!(schema.name, "Major incidents");
        assert_eq!(schema.tool_id, "incidents");
        assert_eq!(schema.fields.len(), 1);
    }

    #[test]
    fn test_audited_fields_empty_means_all() {
        let audit = AuditConfig {
            enabled: true,
            fields: Some(vec![]),
        };
        assert!(audit.audited_fields().is_none());
    }
}
