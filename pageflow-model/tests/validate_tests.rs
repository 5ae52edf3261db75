use pageflow_model::{
    Action, ActionKind, ComponentNode, DataSource, EventHandler, IssueKind, ModelError,
    PageSchema, SourceKind, load_page_schema, validate_schema,
};
use serde_json::Map;

fn kv(id: &str, key: &str) -> DataSource {
    DataSource {
        id: id.into(),
        kind: SourceKind::Kv { key: key.into(), transform: None },
        default_value: None,
        dependencies: vec![],
    }
}

fn computed(id: &str, transform: &str, deps: &[&str]) -> DataSource {
    DataSource {
        id: id.into(),
        kind: SourceKind::Computed { transform: transform.into() },
        default_value: None,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

fn kinds(schema: &PageSchema) -> Vec<IssueKind> {
    validate_schema(schema).into_iter().map(|i| i.kind).collect()
}

// ── Well-formed ──────────────────────────────────────────────────

#[test]
fn well_formed_schema_has_no_issues() {
    let mut schema = PageSchema::new("p", "Page");
    schema.data_sources = vec![kv("todos", "t"), computed("count", "todos.length", &["todos"])];
    let mut add = Action::new("add", ActionKind::Create);
    add.target = Some("todos".into());
    schema.actions = vec![add];
    assert!(validate_schema(&schema).is_empty());
}

#[test]
fn validation_does_not_reject_cycles() {
    // Cycles are the graph's concern; the model only checks that ids exist.
    let mut schema = PageSchema::new("p", "Page");
    schema.data_sources = vec![computed("a", "b", &["b"]), computed("b", "a", &["a"])];
    assert!(validate_schema(&schema).is_empty());
}

// ── Data sources ─────────────────────────────────────────────────

#[test]
fn duplicate_source_id() {
    let mut schema = PageSchema::new("p", "Page");
    schema.data_sources = vec![kv("a", "x"), kv("a", "y")];
    assert_eq!(kinds(&schema), vec![IssueKind::DuplicateSourceId]);
}

#[test]
fn undeclared_dependency() {
    let mut schema = PageSchema::new("p", "Page");
    schema.data_sources = vec![computed("total", "items.length", &["items"])];
    let issues = validate_schema(&schema);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::UnknownDependency);
    assert!(issues[0].message.contains("'items'"));
}

#[test]
fn empty_computed_transform() {
    let mut schema = PageSchema::new("p", "Page");
    schema.data_sources = vec![computed("x", "  ", &[])];
    assert_eq!(kinds(&schema), vec![IssueKind::EmptyTransform]);
}

// ── Actions ──────────────────────────────────────────────────────

#[test]
fn mutating_action_without_target() {
    let mut schema = PageSchema::new("p", "Page");
    schema.actions = vec![Action::new("del", ActionKind::Delete)];
    assert_eq!(kinds(&schema), vec![IssueKind::MissingActionTarget]);
}

#[test]
fn action_with_unknown_target() {
    let mut schema = PageSchema::new("p", "Page");
    let mut upd = Action::new("upd", ActionKind::Update);
    upd.target = Some("ghost".into());
    schema.actions = vec![upd];
    assert_eq!(kinds(&schema), vec![IssueKind::UnknownActionTarget]);
}

#[test]
fn custom_action_without_handler() {
    let mut schema = PageSchema::new("p", "Page");
    schema.actions = vec![Action::new("c", ActionKind::Custom)];
    assert_eq!(kinds(&schema), vec![IssueKind::MissingHandler]);
}

#[test]
fn chain_to_unknown_action() {
    let mut schema = PageSchema::new("p", "Page");
    let mut nav = Action::new("nav", ActionKind::Navigate);
    nav.on_success = Some("later".into());
    nav.on_error = Some("nav".into());
    schema.actions = vec![nav];
    assert_eq!(kinds(&schema), vec![IssueKind::UnknownChainTarget]);
}

#[test]
fn duplicate_action_id() {
    let mut schema = PageSchema::new("p", "Page");
    schema.actions = vec![
        Action::new("go", ActionKind::Navigate),
        Action::new("go", ActionKind::Navigate),
    ];
    assert_eq!(kinds(&schema), vec![IssueKind::DuplicateActionId]);
}

// ── Components ───────────────────────────────────────────────────

#[test]
fn duplicate_component_id_across_levels() {
    let mut schema = PageSchema::new("p", "Page");
    let mut root = ComponentNode::new("box", "Stack");
    root.children.push(ComponentNode::new("box", "Text"));
    schema.components = vec![root];
    assert_eq!(kinds(&schema), vec![IssueKind::DuplicateComponentId]);
}

#[test]
fn event_references_unknown_action() {
    let mut schema = PageSchema::new("p", "Page");
    let mut button = ComponentNode::new("btn", "Button");
    button.events.push(EventHandler {
        event: "onClick".into(),
        action_id: "missing".into(),
        params: Map::new(),
    });
    schema.components = vec![button];
    let issues = validate_schema(&schema);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::UnknownEventAction);
    assert!(issues[0].message.contains("onClick"));
}

// ── Reporting ────────────────────────────────────────────────────

#[test]
fn all_issues_reported_together() {
    let mut schema = PageSchema::new("p", "Page");
    schema.data_sources = vec![kv("a", "x"), kv("a", "y"), computed("b", "c", &["c"])];
    schema.actions = vec![Action::new("d", ActionKind::Update)];
    assert_eq!(
        kinds(&schema),
        vec![
            IssueKind::DuplicateSourceId,
            IssueKind::UnknownDependency,
            IssueKind::MissingActionTarget,
        ]
    );
}

#[test]
fn load_surfaces_issues_in_error_message() {
    let doc = r#"{"id": "p", "name": "P", "actions": [{"id": "x", "type": "custom"}]}"#;
    let err = load_page_schema(doc).unwrap_err();
    assert!(matches!(err, ModelError::Invalid(ref issues) if issues.len() == 1));
    assert!(err.to_string().contains("[missing_handler]"));
}
