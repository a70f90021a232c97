//! End-to-end record operations against a published tool

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tool_engine::query::{FilterQuery, StoreQuery};
use tool_engine::schema::{FieldDefinition, FieldType, FilterOperator, SortDirection, ToolAction};
use tool_engine::store::{MemoryAuditStore, MemoryRecordStore, RecordStore, StorePage};
use tool_engine::{
    AuditActionType, AuditLogQuery, ChangeKind, ChangeNotifier, DataRecord, EngineConfig, EngineError, EntityKind,
    RecordEngine, RecordPatch, RecordQuery, SchemaRegistry,
};

use common::{admin, agent, engine_with, engine_with_incidents, incidents_input, object, publish};

#[tokio::test]
async fn test_create_writes_full_create_diff() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open", "priority": 3})), &admin())
        .await
        .unwrap();

    assert_eq!(record.created_by.as_deref(), Some("u-1"));
    let history = engine.audit().by_record(&record.id).await.unwrap();
    assert_eq!(history.len(), 1);

    let entry = &history[0];
    assert_eq!(entry.action_type, AuditActionType::Create);
    assert_eq!(entry.tool_id, "incidents");
    assert_eq!(entry.actor_email, "ada@example.com");

    let mut changed: Vec<(&str, Option<&Value>, Option<&Value>)> = entry
        .diff
        .iter()
        .map(|c| (c.field.as_str(), c.before.as_ref(), c.after.as_ref()))
        .collect();
    changed.sort_by_key(|(field, _, _)| *field);
    assert_eq!(
        changed,
        vec![
            ("priority", None, Some(&json!(3))),
            ("status", None, Some(&json!("open"))),
        ]
    );
}

#[tokio::test]
async fn test_create_requires_required_fields() {
    let (engine, _) = engine_with_incidents().await;
    let err = engine
        .create("incidents", &object(json!({"priority": 2})), &admin())
        .await
        .unwrap_err();

    let issues = err.validation_issues().expect("validation error");
    assert!(issues.mentions("status"));
    assert!(engine.audit().query(&AuditLogQuery::new()).await.unwrap().data.is_empty());
}

#[tokio::test]
async fn test_update_rejects_out_of_range_value() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open", "priority": 3})), &admin())
        .await
        .unwrap();

    let err = engine
        .update("incidents", &record.id, &object(json!({"priority": 9})), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.to_string().contains("priority: must be at most 5"));

    let stored = engine.get_by_id("incidents", &record.id).await.unwrap().unwrap();
    assert_eq!(stored.fields.get("priority"), Some(&json!(3)));
    assert_eq!(engine.audit().by_record(&record.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_audits_only_changed_fields() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open", "priority": 3})), &admin())
        .await
        .unwrap();

    let updated = engine
        .update(
            "incidents",
            &record.id,
            &object(json!({"status": "closed", "priority": 3})),
            &agent(),
        )
        .await
        .unwrap();
    assert_eq!(updated.fields.get("status"), Some(&json!("closed")));
    assert_eq!(updated.updated_by.as_deref(), Some("u-2"));

    let history = engine.audit().by_record(&record.id).await.unwrap();
    assert_eq!(history.len(), 2);
    let latest = &history[0];
    assert_eq!(latest.action_type, AuditActionType::Update);
    assert_eq!(latest.diff.len(), 1);
    assert_eq!(latest.diff[0].field, "status");
    assert_eq!(latest.diff[0].before, Some(json!("open")));
    assert_eq!(latest.diff[0].after, Some(json!("closed")));
}

#[tokio::test]
async fn test_update_without_changes_skips_audit() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open", "priority": 3})), &admin())
        .await
        .unwrap();

    engine
        .update("incidents", &record.id, &object(json!({"priority": 3.0})), &admin())
        .await
        .unwrap();

    assert_eq!(engine.audit().by_record(&record.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_missing_record_is_not_found() {
    let (engine, _) = engine_with_incidents().await;
    let err = engine
        .update("incidents", "missing", &object(json!({"priority": 1})), &admin())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound { kind: EntityKind::Record, .. }
    ));
}

#[tokio::test]
async fn test_delete_writes_delete_diff_and_removes_record() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();

    engine.delete("incidents", &record.id, &admin()).await.unwrap();
    assert!(engine.get_by_id("incidents", &record.id).await.unwrap().is_none());

    let history = engine.audit().by_record(&record.id).await.unwrap();
    assert_eq!(history[0].action_type, AuditActionType::Delete);
    assert_eq!(history[0].diff[0].before, Some(json!("open")));
    assert_eq!(history[0].diff[0].after, None);

    let err = engine.delete("incidents", &record.id, &admin()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_pagination_over_filtered_set() {
    let (engine, _) = engine_with_incidents().await;
    for i in 0..57 {
        engine
            .create(
                "incidents",
                &object(json!({"status": "open", "priority": (i % 5) + 1, "title": format!("Incident {}", i)})),
                &admin(),
            )
            .await
            .unwrap();
    }
    engine
        .create("incidents", &object(json!({"status": "closed"})), &admin())
        .await
        .unwrap();

    let open = FilterQuery::new("status", FilterOperator::Equals, json!("open"));

    let third = engine
        .query("incidents", &RecordQuery::new().with_filter(open.clone()).with_page(3, 20))
        .await
        .unwrap();
    assert_eq!(third.data.len(), 17);
    assert_eq!(third.pagination.total, 57);
    assert_eq!(third.pagination.total_pages, 3);

    let fourth = engine
        .query("incidents", &RecordQuery::new().with_filter(open).with_page(4, 20))
        .await
        .unwrap();
    assert!(fourth.data.is_empty());
    assert_eq!(fourth.pagination.total, 57);
}

#[tokio::test]
async fn test_query_search_sort_and_range() {
    let (engine, _) = engine_with_incidents().await;
    for (title, priority) in [("Disk full", 4), ("Login outage", 5), ("Slow disk", 2)] {
        engine
            .create(
                "incidents",
                &object(json!({"status": "open", "priority": priority, "title": title})),
                &admin(),
            )
            .await
            .unwrap();
    }

    let page = engine
        .query(
            "incidents",
            &RecordQuery::new()
                .with_search("DISK")
                .with_sort("priority", SortDirection::Asc),
        )
        .await
        .unwrap();
    let titles: Vec<_> = page.data.iter().map(|r| r.fields["title"].clone()).collect();
    assert_eq!(titles, vec![json!("Slow disk"), json!("Disk full")]);

    let page = engine
        .query(
            "incidents",
            &RecordQuery::new().with_filter(FilterQuery::new(
                "priority",
                FilterOperator::Between,
                json!([4, 5]),
            )),
        )
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 2);
}

#[tokio::test]
async fn test_query_rejects_bad_page_size() {
    let (engine, _) = engine_with_incidents().await;
    let err = engine
        .query("incidents", &RecordQuery::new().with_page(1, 500))
        .await
        .unwrap_err();
    assert!(err.validation_issues().unwrap().mentions("pageSize"));
}

#[tokio::test]
async fn test_unpublished_tool_is_not_found() {
    let (engine, schema) = engine_with_incidents().await;
    engine.registry().unpublish(&schema.id).await.unwrap();

    let err = engine.query("incidents", &RecordQuery::new()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound { kind: EntityKind::Tool, .. }
    ));
    assert_eq!(err.to_string(), "Tool not found: incidents");
}

#[tokio::test]
async fn test_cancelled_query_returns_cancelled() {
    let (engine, _) = engine_with_incidents().await;
    let token = CancellationToken::new();
    token.cancel();

    let err = engine
        .query_with_cancel("incidents", &RecordQuery::new(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[tokio::test]
async fn test_bulk_update_audits_each_changed_record() {
    let (engine, _) = engine_with_incidents().await;
    let a = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();
    let b = engine
        .create("incidents", &object(json!({"status": "closed"})), &admin())
        .await
        .unwrap();

    let ids = vec![a.id.clone(), b.id.clone(), "missing".to_string()];
    let updated = engine
        .bulk_update("incidents", &ids, "status", json!("closed"), &admin())
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let bulk_entries = engine
        .audit()
        .query(&AuditLogQuery::new().with_action_type(AuditActionType::Update))
        .await
        .unwrap();
    assert_eq!(bulk_entries.data.len(), 1);
    assert_eq!(bulk_entries.data[0].record_id, a.id);
    assert_eq!(bulk_entries.data[0].action_name.as_deref(), Some("bulk_update_status"));
}

#[tokio::test]
async fn test_bulk_update_validates_value() {
    let (engine, _) = engine_with_incidents().await;
    let a = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();

    let err = engine
        .bulk_update("incidents", &[a.id.clone()], "status", json!("pending"), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .bulk_update("incidents", &[a.id], "nope", json!(1), &admin())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound { kind: EntityKind::Field, .. }
    ));
}

#[tokio::test]
async fn test_execute_assign_to_me() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();

    let outcome = engine
        .execute_action(
            "incidents",
            "assign_to_me",
            &[record.id.clone()],
            &serde_json::Map::new(),
            &agent(),
        )
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.affected, 1);

    let stored = engine.get_by_id("incidents", &record.id).await.unwrap().unwrap();
    assert_eq!(stored.fields.get("assignee"), Some(&json!("u-2")));

    let history = engine.audit().by_record(&record.id).await.unwrap();
    assert_eq!(history[0].action_name.as_deref(), Some("assign_to_me"));
}

#[tokio::test]
async fn test_execute_change_status_requires_param() {
    let (engine, _) = engine_with_incidents().await;
    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();
    let ids = vec![record.id.clone()];

    let err = engine
        .execute_action("incidents", "close_selected", &ids, &serde_json::Map::new(), &admin())
        .await
        .unwrap_err();
    assert!(err.validation_issues().unwrap().mentions("params.status"));

    let outcome = engine
        .execute_action(
            "incidents",
            "close_selected",
            &ids,
            &object(json!({"status": "closed"})),
            &admin(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.affected, 1);
}

#[tokio::test]
async fn test_execute_unknown_action_is_not_found() {
    let (engine, _) = engine_with_incidents().await;
    let err = engine
        .execute_action("incidents", "escalate", &[], &serde_json::Map::new(), &admin())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound { kind: EntityKind::Action, .. }
    ));
}

#[tokio::test]
async fn test_subscribers_receive_changes() {
    let (engine, _) = engine_with_incidents().await;
    let mut rx = engine.subscribe("incidents");

    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();
    engine.delete("incidents", &record.id, &admin()).await.unwrap();

    let created = rx.recv().await.unwrap();
    assert_eq!(created.action_type, ChangeKind::Created);
    assert_eq!(created.record_id, record.id);
    assert_eq!(created.room(), "tool:incidents");

    let deleted = rx.recv().await.unwrap();
    assert_eq!(deleted.action_type, ChangeKind::Deleted);
}

#[tokio::test]
async fn test_audit_query_filters_by_actor() {
    let (engine, _) = engine_with_incidents().await;
    engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();
    engine
        .create("incidents", &object(json!({"status": "open"})), &agent())
        .await
        .unwrap();

    let page = engine
        .audit()
        .query(&AuditLogQuery::new().with_tool_id("incidents").with_actor("u-2"))
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.data[0].actor_user_id, "u-2");

    let entry = engine.audit().by_id(&page.data[0].id).await.unwrap();
    assert_eq!(entry, page.data[0]);
}

#[tokio::test]
async fn test_bulk_update_audits_fields_outside_audited_subset() {
    let mut input = incidents_input();
    input.audit.fields = Some(vec!["priority".to_string()]);
    let (engine, _) = engine_with(input).await;

    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();
    let updated = engine
        .bulk_update("incidents", &[record.id.clone()], "status", json!("closed"), &admin())
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let history = engine.audit().by_record(&record.id).await.unwrap();
    let latest = &history[0];
    assert_eq!(latest.action_type, AuditActionType::Update);
    assert_eq!(latest.action_name.as_deref(), Some("bulk_update_status"));
    assert_eq!(latest.diff[0].before, Some(json!("open")));
    assert_eq!(latest.diff[0].after, Some(json!("closed")));
}

#[tokio::test]
async fn test_bulk_update_rejects_readonly_field() {
    let mut input = incidents_input();
    input
        .fields
        .push(FieldDefinition::new("ticket_ref", "Ticket", FieldType::Text).readonly());
    let (engine, _) = engine_with(input).await;
    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();

    let err = engine
        .bulk_update("incidents", &[record.id.clone()], "ticket_ref", json!("INC-1"), &admin())
        .await
        .unwrap_err();
    assert!(err.validation_issues().unwrap().mentions("ticket_ref"));

    let stored = engine.get_by_id("incidents", &record.id).await.unwrap().unwrap();
    assert!(stored.fields.get("ticket_ref").is_none());
}

#[tokio::test]
async fn test_disabled_audit_writes_nothing_but_still_notifies() {
    let mut input = incidents_input();
    input.audit.enabled = false;
    let (engine, _) = engine_with(input).await;
    let mut rx = engine.subscribe("incidents");

    let record = engine
        .create("incidents", &object(json!({"status": "open", "priority": 2})), &admin())
        .await
        .unwrap();
    engine
        .update("incidents", &record.id, &object(json!({"priority": 4})), &admin())
        .await
        .unwrap();
    engine
        .bulk_update("incidents", &[record.id.clone()], "status", json!("closed"), &admin())
        .await
        .unwrap();
    engine.delete("incidents", &record.id, &admin()).await.unwrap();

    let page = engine.audit().query(&AuditLogQuery::new()).await.unwrap();
    assert_eq!(page.pagination.total, 0);

    let mut kinds = Vec::new();
    for _ in 0..4 {
        kinds.push(rx.recv().await.unwrap().action_type);
    }
    assert_eq!(
        kinds,
        vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Updated, ChangeKind::Deleted]
    );
}

#[tokio::test]
async fn test_execute_action_with_unknown_handler_is_configuration_error() {
    let mut input = incidents_input();
    let escalate: ToolAction = serde_json::from_value(json!({
        "id": "escalate",
        "label": "Escalate",
        "type": "row",
        "handler": "pageOnCall",
        "permissions": ["admin"]
    }))
    .unwrap();
    input.actions.get_or_insert_with(Vec::new).push(escalate);
    let (engine, _) = engine_with(input).await;
    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &admin())
        .await
        .unwrap();

    let err = engine
        .execute_action("incidents", "escalate", &[record.id], &serde_json::Map::new(), &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(err.to_string().contains("pageOnCall"));
}

#[tokio::test]
async fn test_request_metadata_reaches_audit_entry() {
    let (engine, _) = engine_with_incidents().await;
    let actor = admin().with_request(Some("10.0.0.7".to_string()), Some("toolctl/0.1".to_string()));

    let record = engine
        .create("incidents", &object(json!({"status": "open"})), &actor)
        .await
        .unwrap();

    let entry = engine.audit().by_record(&record.id).await.unwrap().remove(0);
    assert_eq!(entry.ip.as_deref(), Some("10.0.0.7"));
    assert_eq!(entry.user_agent.as_deref(), Some("toolctl/0.1"));

    let wire = serde_json::to_value(&entry).unwrap();
    assert_eq!(wire["ip"], json!("10.0.0.7"));
    assert_eq!(wire["userAgent"], json!("toolctl/0.1"));
}

#[tokio::test]
async fn test_from_config_lints_against_configured_page_limit() {
    let mut config = EngineConfig::default();
    config.engine.max_page_size = 50;
    let engine = RecordEngine::from_config(&config).unwrap();

    let mut oversized = incidents_input();
    oversized.list_view.page_size = Some(80);
    let err = engine.registry().create(oversized).await.unwrap_err();
    assert!(err.validation_issues().unwrap().mentions("listView.pageSize"));

    let mut input = incidents_input();
    input.list_view.page_size = Some(40);
    publish(&engine, input).await;
    let page = engine.query("incidents", &RecordQuery::new()).await.unwrap();
    assert_eq!(page.pagination.page_size, 40);
}

/// Record store whose `find` never answers in time
struct StalledRecordStore {
    inner: MemoryRecordStore,
}

#[async_trait]
impl RecordStore for StalledRecordStore {
    async fn insert(&self, resource: &str, record: DataRecord) -> tool_engine::Result<DataRecord> {
        self.inner.insert(resource, record).await
    }

    async fn find_by_id(&self, resource: &str, id: &str) -> tool_engine::Result<Option<DataRecord>> {
        self.inner.find_by_id(resource, id).await
    }

    async fn find(&self, resource: &str, query: &StoreQuery) -> tool_engine::Result<StorePage> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        self.inner.find(resource, query).await
    }

    async fn update(
        &self,
        resource: &str,
        id: &str,
        patch: &RecordPatch,
    ) -> tool_engine::Result<Option<DataRecord>> {
        self.inner.update(resource, id, patch).await
    }

    async fn delete(&self, resource: &str, id: &str) -> tool_engine::Result<bool> {
        self.inner.delete(resource, id).await
    }

    async fn update_many(
        &self,
        resource: &str,
        ids: &[String],
        patch: &RecordPatch,
    ) -> tool_engine::Result<Vec<String>> {
        self.inner.update_many(resource, ids, patch).await
    }
}

#[tokio::test]
async fn test_cancel_during_store_call_returns_cancelled() {
    let engine = RecordEngine::new(
        Arc::new(SchemaRegistry::in_memory()),
        Arc::new(StalledRecordStore {
            inner: MemoryRecordStore::new(),
        }),
        Arc::new(MemoryAuditStore::new()),
        Arc::new(ChangeNotifier::default()),
    );
    publish(&engine, incidents_input()).await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        engine.query_with_cancel("incidents", &RecordQuery::new(), &token),
    )
    .await
    .expect("query should stop once the token fires");
    assert!(matches!(result, Err(EngineError::Cancelled)));
}
