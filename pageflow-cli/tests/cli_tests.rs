use pageflow_cli::{
    LoggingNavigator, StoreOptions, fire, load_page, open_store, parse_object, registry_for,
    render, validate,
};
use pageflow_engine::{Collaborators, EngineConfig};
use pageflow_storage::KvStore;
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use std::sync::Arc;

fn todo_page() -> Value {
    json!({
        "id": "todos",
        "name": "Todos",
        "dataSources": [
            {"id": "todos", "type": "kv", "key": "app-todos", "defaultValue": []},
            {"id": "stats", "type": "computed", "dependencies": ["todos"], "transform": "count"}
        ],
        "components": [
            {
                "id": "root",
                "type": "Stack",
                "children": [
                    {"id": "total", "type": "Badge", "bindings": [{"source": "stats", "target": "label"}]},
                    {"id": "add", "type": "Button", "events": [{"event": "onClick", "actionId": "add-todo"}]}
                ]
            }
        ],
        "actions": [
            {
                "id": "add-todo",
                "type": "create",
                "target": "todos",
                "payload": {"item": {"title": "${payload.title}", "done": false}},
                "onSuccess": "go-home"
            },
            {"id": "go-home", "type": "navigate", "payload": {"path": "/"}}
        ]
    })
}

// ── validate ─────────────────────────────────────────────────────

#[test]
fn valid_schema_reports_order_and_counts() {
    let report = validate(&todo_page().to_string()).unwrap();

    assert!(report.is_valid());
    assert_eq!(report.page, "todos");
    assert_eq!(report.data_sources, 2);
    assert_eq!(report.actions, 2);
    assert_eq!(report.components, 3);
    assert_eq!(report.order, vec!["todos".to_string(), "stats".to_string()]);
}

#[test]
fn cyclic_sources_are_reported_without_an_order() {
    let mut schema = todo_page();
    schema["dataSources"][0] = json!({
        "id": "todos", "type": "computed", "dependencies": ["stats"], "transform": "value"
    });

    let report = validate(&schema.to_string()).unwrap();
    assert!(!report.is_valid());
    assert!(report.order.is_empty());
    assert!(report.issues.iter().any(|i| i.contains("cycle")));
}

#[test]
fn every_structural_issue_is_listed() {
    let mut schema = todo_page();
    schema["actions"][0]["onSuccess"] = json!("missing-action");
    schema["components"][0]["children"][1]["id"] = json!("total");

    let report = validate(&schema.to_string()).unwrap();
    assert!(report.issues.len() >= 2);
    assert!(report.issues.iter().all(|i| i.starts_with('[')));
}

#[test]
fn malformed_json_is_an_error() {
    assert!(validate("{ not json").is_err());
}

// ── registry ─────────────────────────────────────────────────────

#[test]
fn registry_defaults_to_schema_types() {
    let schema = pageflow_model::load_page_schema(&todo_page().to_string()).unwrap();

    let all = registry_for(&schema, &[]);
    assert!(all.contains("Stack"));
    assert!(all.contains("Badge"));
    assert!(all.contains("Button"));

    let narrow = registry_for(&schema, &["Stack".to_string()]);
    assert!(narrow.contains("Stack"));
    assert!(!narrow.contains("Button"));
}

// ── render / fire ────────────────────────────────────────────────

#[tokio::test]
async fn render_reads_from_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, json!({"app-todos": [{"title": "a"}, {"title": "b"}]}).to_string())
        .unwrap();

    let store = open_store(&StoreOptions {
        file: Some(path),
        remote: None,
    })
    .await
    .unwrap();
    let page = load_page(
        &todo_page().to_string(),
        &[],
        Collaborators::new(store),
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let report = render(&page).await;
    assert!(report.errors.is_empty());
    assert!(report.unknown_components.is_empty());
    assert_eq!(report.context["stats"], json!(2));
    assert_eq!(report.nodes[0].find("total").unwrap().props["label"], json!(2));
}

#[tokio::test]
async fn missing_component_type_fails_to_load() {
    let err = load_page(
        &todo_page().to_string(),
        &["Stack".to_string()],
        Collaborators::default(),
        EngineConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("Badge") || format!("{err:#}").contains("Button"));
}

#[tokio::test]
async fn fire_runs_the_chain_and_persists() {
    let store = open_store(&StoreOptions::default()).await.unwrap();
    let navigator = Arc::new(LoggingNavigator::default());
    let collaborators = Collaborators::new(store.clone()).with_navigator(navigator.clone());
    let page = load_page(&todo_page().to_string(), &[], collaborators, EngineConfig::default())
        .await
        .unwrap();

    let payload = parse_object(Some(r#"{"title": "milk"}"#)).unwrap();
    let report = fire(&page, "add-todo", payload, Value::Null).await;

    assert!(report.trace.succeeded());
    assert_eq!(report.trace.action_ids(), vec!["add-todo", "go-home"]);
    assert_eq!(report.context.get("stats"), Some(&json!(1)));
    assert_eq!(
        store.get("app-todos").await.unwrap(),
        Some(json!([{"title": "milk", "done": false}]))
    );
    assert_eq!(navigator.visited(), vec!["path /".to_string()]);
}

#[tokio::test]
async fn fire_unknown_action_fails_the_trace() {
    let page = load_page(
        &todo_page().to_string(),
        &[],
        Collaborators::default(),
        EngineConfig::default(),
    )
    .await
    .unwrap();

    let report = fire(&page, "nope", Map::new(), Value::Null).await;
    assert!(!report.trace.succeeded());
}

// ── arguments ────────────────────────────────────────────────────

#[test]
fn parse_object_accepts_objects_only() {
    assert_eq!(parse_object(None).unwrap(), Map::new());
    assert_eq!(
        Value::Object(parse_object(Some(r#"{"a": 1}"#)).unwrap()),
        json!({"a": 1})
    );
    assert!(parse_object(Some("[1, 2]")).is_err());
    assert!(parse_object(Some("nope")).is_err());
}
