#![allow(dead_code)]

use serde_json::{Map, Value};
use tool_engine::schema::{Role, ToolSchemaInput};
use tool_engine::{Actor, RecordEngine, ToolSchema};

pub const INCIDENTS: &str = include_str!("../fixtures/incidents.json");

pub fn incidents_input() -> ToolSchemaInput {
    serde_json::from_str(INCIDENTS).expect("incidents fixture should deserialize")
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn admin() -> Actor {
    Actor::new("u-1", "ada@example.com", Role::Admin)
}

pub fn agent() -> Actor {
    Actor::new("u-2", "grace@example.com", Role::Agent)
}

/// In-memory engine with the incidents tool created and published
pub async fn engine_with_incidents() -> (RecordEngine, ToolSchema) {
    engine_with(incidents_input()).await
}

/// In-memory engine with the given tool created and published
pub async fn engine_with(input: ToolSchemaInput) -> (RecordEngine, ToolSchema) {
    let engine = RecordEngine::in_memory();
    let published = publish(&engine, input).await;
    (engine, published)
}

pub async fn publish(engine: &RecordEngine, input: ToolSchemaInput) -> ToolSchema {
    let draft = engine
        .registry()
        .create(input)
        .await
        .expect("create tool");
    engine
        .registry()
        .publish(&draft.id)
        .await
        .expect("publish tool")
}
