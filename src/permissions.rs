//! Role-based permission checks
//!
//! Pure predicates over a caller's [`Role`]; nothing here touches a store.

use serde_json::{Map, Value};

use crate::expr::evaluate_visibility;
use crate::schema::{FieldDefinition, Role, ToolAction, ToolPermissions};

pub fn has_permission(role: Role, allowed: &[Role]) -> bool {
    allowed.contains(&role)
}

pub fn can_access_tool(role: Role, permissions: &ToolPermissions) -> bool {
    has_permission(role, &permissions.can_access_tool)
}

pub fn can_create(role: Role, permissions: &ToolPermissions) -> bool {
    has_permission(role, &permissions.can_create)
}

pub fn can_read(role: Role, permissions: &ToolPermissions) -> bool {
    has_permission(role, &permissions.can_read)
}

pub fn can_update(role: Role, permissions: &ToolPermissions) -> bool {
    has_permission(role, &permissions.can_update)
}

pub fn can_delete(role: Role, permissions: &ToolPermissions) -> bool {
    has_permission(role, &permissions.can_delete)
}

pub fn can_view_audit_log(role: Role, permissions: &ToolPermissions) -> bool {
    has_permission(role, &permissions.can_view_audit_log)
}

/// Unrestricted unless the field declares a `canView` set
pub fn can_view_field(role: Role, field: &FieldDefinition) -> bool {
    match field.permissions.as_ref().and_then(|p| p.can_view.as_deref()) {
        Some(allowed) => has_permission(role, allowed),
        None => true,
    }
}

/// Readonly fields are never editable; otherwise unrestricted unless the
/// field declares a `canEdit` set
pub fn can_edit_field(role: Role, field: &FieldDefinition) -> bool {
    if field.readonly {
        return false;
    }
    match field.permissions.as_ref().and_then(|p| p.can_edit.as_deref()) {
        Some(allowed) => has_permission(role, allowed),
        None => true,
    }
}

pub fn can_run_action(role: Role, action: &ToolAction) -> bool {
    has_permission(role, &action.permissions)
}

pub fn field_by_key<'a>(fields: &'a [FieldDefinition], key: &str) -> Option<&'a FieldDefinition> {
    fields.iter().find(|f| f.key == key)
}

/// Fields the role may see; with a record, visibility rules are applied too
pub fn visible_fields<'a>(
    fields: &'a [FieldDefinition],
    role: Role,
    record: Option<&Map<String, Value>>,
) -> Vec<&'a FieldDefinition> {
    fields
        .iter()
        .filter(|field| can_view_field(role, field))
        .filter(|field| match record {
            Some(record) => evaluate_visibility(field.visibility.as_deref(), record, role),
            None => true,
        })
        .collect()
}

pub fn editable_fields(fields: &[FieldDefinition], role: Role) -> Vec<&FieldDefinition> {
    fields.iter().filter(|f| can_edit_field(role, f)).collect()
}

/// Whether an action is offered for a record: role gate plus visibility rule
pub fn is_action_visible(action: &ToolAction, record: &Map<String, Value>, role: Role) -> bool {
    can_run_action(role, action) && evaluate_visibility(action.visibility.as_deref(), record, role)
}

/// Rank in the coarse hierarchy: admin 4, manager 3, agent 2, viewer 1
pub fn role_level(role: Role) -> u8 {
    match role {
        Role::Admin => 4,
        Role::Manager => 3,
        Role::Agent => 2,
        Role::Viewer => 1,
    }
}

pub fn is_role_at_least(role: Role, minimum: Role) -> bool {
    role_level(role) >= role_level(minimum)
}
