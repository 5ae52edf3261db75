mod common;

use common::{
    CountingStore, GatedStore, ShoutingAi, SlowStore, StubHttp, map, registry,
};
use pageflow_engine::{
    Collaborators, EngineConfig, EngineError, PageRuntime, SourceState,
};
use pageflow_storage::{KvStore, MemoryStore};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

fn todo_page() -> Value {
    json!({
        "id": "todos",
        "name": "Todos",
        "dataSources": [
            {"id": "todos", "type": "kv", "key": "app-todos", "defaultValue": []},
            {"id": "filter", "type": "static", "value": "all", "defaultValue": "none"},
            {
                "id": "stats",
                "type": "computed",
                "transform": "todos.filter(t => t.done).length + '/' + todos.length",
                "dependencies": ["todos"]
            },
            {
                "id": "headline",
                "type": "computed",
                "transform": "filter + ': ' + stats",
                "dependencies": ["stats", "filter"]
            }
        ],
        "components": [
            {
                "id": "root",
                "type": "Stack",
                "children": [
                    {"id": "count", "type": "Text", "bindings": [{"source": "stats", "target": "children"}]},
                    {"id": "title", "type": "Text", "props": {"children": "${headline}"}}
                ]
            }
        ],
        "actions": []
    })
}

fn seeded_todos() -> Value {
    json!({
        "app-todos": [
            {"id": 1, "title": "write tests", "done": true},
            {"id": 2, "title": "ship", "done": false}
        ]
    })
}

async fn load(schema: Value, collaborators: Collaborators) -> PageRuntime {
    load_with(schema, collaborators, EngineConfig::default()).await
}

async fn load_with(schema: Value, collaborators: Collaborators, config: EngineConfig) -> PageRuntime {
    PageRuntime::from_json(&schema.to_string(), registry(), collaborators, config)
        .await
        .unwrap()
}

// ── Loading ──────────────────────────────────────────────────────

#[tokio::test]
async fn sources_start_pending_with_defaults() {
    let page = load(todo_page(), Collaborators::default()).await;
    let ctx = page.context().await;

    assert_eq!(ctx.get("todos"), Some(&json!([])));
    assert_eq!(ctx.get("filter"), Some(&json!("none")));
    assert_eq!(ctx.get("stats"), Some(&Value::Null));
    assert_eq!(ctx.state("todos"), Some(&SourceState::Pending));
    assert!(!ctx.is_settled());
}

#[tokio::test]
async fn seed_data_is_written_for_absent_keys_only() {
    let store = Arc::new(MemoryStore::with_entries(map(json!({"kept": "mine"}))));
    let mut schema = todo_page();
    schema["seedData"] = json!({"kept": "seed", "app-todos": [{"id": 9, "done": false}]});

    let page = load(schema, Collaborators::new(store.clone())).await;
    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(store.get("kept").await.unwrap(), Some(json!("mine")));
    assert_eq!(ctx.get("todos"), Some(&json!([{"id": 9, "done": false}])));
}

#[tokio::test]
async fn invalid_schema_is_rejected() {
    let mut schema = todo_page();
    schema["dataSources"][2]["dependencies"] = json!(["nope"]);

    let err = PageRuntime::from_json(
        &schema.to_string(),
        registry(),
        Collaborators::default(),
        EngineConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::Schema(_)));
}

// ── Resolution ───────────────────────────────────────────────────

#[tokio::test]
async fn resolve_all_produces_every_source() {
    let store = Arc::new(MemoryStore::with_entries(map(seeded_todos())));
    let page = load(todo_page(), Collaborators::new(store)).await;

    let ctx = page.resolve_all().await.unwrap();

    assert!(ctx.is_settled());
    assert!(ctx.errors().is_empty());
    assert_eq!(ctx.values().len(), 4);
    assert_eq!(ctx.get("filter"), Some(&json!("all")));
    assert_eq!(ctx.get("stats"), Some(&json!("1/2")));
    assert_eq!(ctx.get("headline"), Some(&json!("all: 1/2")));
}

#[tokio::test]
async fn absent_kv_key_resolves_to_default() {
    let page = load(todo_page(), Collaborators::default()).await;
    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("todos"), Some(&json!([])));
    assert_eq!(ctx.state("todos"), Some(&SourceState::Ready));
    assert_eq!(ctx.get("stats"), Some(&json!("0/0")));
}

#[tokio::test]
async fn kv_transform_receives_raw_value() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "names", "type": "kv", "key": "people", "transform": "value.map(p => p.name)", "defaultValue": []},
            {"id": "total", "type": "kv", "key": "amounts", "transform": "sum"}
        ]
    });
    let store = Arc::new(MemoryStore::with_entries(map(json!({
        "people": [{"name": "ada"}, {"name": "bob"}],
        "amounts": [1, 2, 3.5]
    }))));
    let page = load(schema, Collaborators::new(store)).await;
    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("names"), Some(&json!(["ada", "bob"])));
    assert_eq!(ctx.get("total"), Some(&json!(6.5)));
}

#[tokio::test]
async fn api_sources_use_the_http_collaborator() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "weather", "type": "api", "endpoint": "/api/weather", "transform": "value.temp"}
        ]
    });
    let http = Arc::new(StubHttp::returning(json!({"temp": 21})));
    let page = load(schema, Collaborators::default().with_http(http.clone())).await;

    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("weather"), Some(&json!(21)));
    let calls = http.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "/api/weather");
}

#[tokio::test]
async fn failed_fetch_degrades_source_and_dependents() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "weather", "type": "api", "endpoint": "/api/weather", "defaultValue": {"temp": 0}},
            {"id": "label", "type": "computed", "transform": "weather.temp + '°'", "dependencies": ["weather"], "defaultValue": "n/a"},
            {"id": "other", "type": "static", "value": 1}
        ]
    });
    let page = load(schema, Collaborators::default().with_http(Arc::new(StubHttp::failing()))).await;

    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("weather"), Some(&json!({"temp": 0})));
    assert!(ctx.state("weather").unwrap().error().unwrap().contains("503"));
    assert_eq!(ctx.get("label"), Some(&json!("n/a")));
    assert_eq!(
        ctx.state("label"),
        Some(&SourceState::Failed {
            error: "dependency 'weather' failed".into()
        })
    );
    assert_eq!(ctx.get("other"), Some(&json!(1)));
    assert_eq!(ctx.errors().len(), 2);
}

#[tokio::test]
async fn missing_http_collaborator_fails_the_source() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [{"id": "weather", "type": "api", "endpoint": "/api/weather"}]
    });
    let page = load(schema, Collaborators::default()).await;
    let ctx = page.resolve_all().await.unwrap();
    assert_eq!(ctx.errors()["weather"], "no http client configured");
}

#[tokio::test]
async fn transform_error_is_recorded_per_source() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "n", "type": "static", "value": 4},
            {"id": "broken", "type": "computed", "transform": "n / 0", "dependencies": ["n"], "defaultValue": -1},
            {"id": "fine", "type": "computed", "transform": "n * 2", "dependencies": ["n"]}
        ]
    });
    let page = load(schema, Collaborators::default()).await;
    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("broken"), Some(&json!(-1)));
    assert!(ctx.state("broken").unwrap().is_failed());
    assert_eq!(ctx.get("fine"), Some(&json!(8)));
}

#[tokio::test]
async fn timeout_becomes_a_timeout_error() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [{"id": "slow", "type": "kv", "key": "slow", "defaultValue": "fallback"}]
    });
    let config = EngineConfig {
        fetch_timeout_ms: 50,
        ..EngineConfig::default()
    };
    let page = load_with(schema, Collaborators::new(Arc::new(SlowStore::default())), config).await;

    tokio::time::pause();
    let ctx = page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("slow"), Some(&json!("fallback")));
    assert_eq!(
        ctx.state("slow"),
        Some(&SourceState::Failed {
            error: "timeout".into()
        })
    );
}

// ── Caching ──────────────────────────────────────────────────────

#[tokio::test]
async fn re_resolving_is_idempotent_and_fetches_nothing() {
    let mut schema = todo_page();
    schema["dataSources"]
        .as_array_mut()
        .unwrap()
        .push(json!({"id": "weather", "type": "api", "endpoint": "/api/weather"}));
    let store = Arc::new(CountingStore::with_entries(seeded_todos()));
    let http = Arc::new(StubHttp::returning(json!({"temp": 21})));
    let page = load(schema, Collaborators::new(store.clone()).with_http(http.clone())).await;

    let first = page.resolve_all().await.unwrap();
    let gets = store.gets();
    let calls = http.call_count();

    let second = page.resolve_all().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.gets(), gets);
    assert_eq!(http.call_count(), calls);
}

#[tokio::test]
async fn refresh_refetches_and_recomputes() {
    let store = Arc::new(CountingStore::with_entries(seeded_todos()));
    let page = load(todo_page(), Collaborators::new(store.clone())).await;
    page.resolve_all().await.unwrap();

    store
        .inner
        .set("app-todos", json!([{"id": 3, "done": true}]))
        .await
        .unwrap();
    let changed = page.refresh("todos").await.unwrap();

    assert_eq!(
        changed,
        BTreeSet::from(["todos".to_string(), "stats".to_string(), "headline".to_string()])
    );
    let ctx = page.context().await;
    assert_eq!(ctx.get("stats"), Some(&json!("1/1")));
    assert_eq!(ctx.get("headline"), Some(&json!("all: 1/1")));
}

#[tokio::test]
async fn refresh_of_unknown_source_fails() {
    let page = load(todo_page(), Collaborators::default()).await;
    assert!(matches!(
        page.refresh("nope").await,
        Err(EngineError::UnknownSource(id)) if id == "nope"
    ));
    assert!(matches!(
        page.recompute("nope").await,
        Err(EngineError::UnknownSource(_))
    ));
}

#[tokio::test]
async fn unchanged_result_stops_propagation() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "items", "type": "kv", "key": "items", "defaultValue": []},
            {"id": "empty", "type": "computed", "transform": "items.length === 0", "dependencies": ["items"]},
            {"id": "banner", "type": "computed", "transform": "empty ? 'nothing yet' : 'ready'", "dependencies": ["empty"]}
        ]
    });
    let store = Arc::new(MemoryStore::with_entries(map(json!({"items": [1]}))));
    let page = load(schema, Collaborators::new(store.clone())).await;
    page.resolve_all().await.unwrap();

    store.set("items", json!([1, 2])).await.unwrap();
    let changed = page.refresh("items").await.unwrap();

    assert_eq!(changed, BTreeSet::from(["items".to_string()]));
    assert_eq!(page.context().await.get("banner"), Some(&json!("ready")));
}

// ── Concurrency ──────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_fetches_for_one_id_are_coalesced() {
    let store = Arc::new(GatedStore::with_entries(seeded_todos()));
    let page = load(todo_page(), Collaborators::new(store.clone())).await;

    let (first, second, ()) = tokio::join!(page.refresh("todos"), page.refresh("todos"), async {
        store.read_started().await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        store.open();
    });

    assert_eq!(store.gets(), 1);
    assert!(first.unwrap().contains("todos"));
    // The second caller observed the same write, so nothing else changed.
    assert!(!second.unwrap().contains("todos"));
    assert_eq!(page.context().await.get("stats"), Some(&json!("1/2")));
}

#[tokio::test]
async fn stale_fetch_does_not_overwrite_an_action_write() {
    let mut schema = todo_page();
    schema["actions"] = json!([
        {"id": "replace", "type": "update", "target": "todos", "payload": {"value": [{"id": 9, "done": true}]}}
    ]);
    let store = Arc::new(GatedStore::reading_early(seeded_todos()));
    let page = load(schema, Collaborators::new(store.clone())).await;

    let (resolved, ()) = tokio::join!(page.resolve_all(), async {
        store.read_started().await;
        page.execute("replace", Default::default()).await.unwrap();
        store.open();
    });
    resolved.unwrap();

    let expected = json!([{"id": 9, "done": true}]);
    let ctx = page.context().await;
    assert_eq!(ctx.get("todos"), Some(&expected));
    assert_eq!(ctx.get("stats"), Some(&json!("1/1")));
    assert_eq!(store.get("app-todos").await.unwrap(), Some(expected.clone()));

    // The write left the source Ready, so a later pass keeps it as is.
    let ctx = page.resolve_all().await.unwrap();
    assert_eq!(ctx.get("todos"), Some(&expected));
}

#[tokio::test]
async fn teardown_discards_late_results() {
    let store = Arc::new(GatedStore::with_entries(seeded_todos()));
    let old = load(todo_page(), Collaborators::new(store.clone())).await;
    let fresh = load(todo_page(), Collaborators::new(store.clone())).await;
    let mut changes = old.subscribe();

    let (result, ()) = tokio::join!(old.resolve_all(), async {
        store.read_started().await;
        old.teardown();
        store.open();
    });

    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(old.is_torn_down());
    assert!(old.cancellation_token().is_cancelled());
    let ctx = old.context().await;
    assert_eq!(ctx.get("todos"), Some(&json!([])));
    assert_eq!(ctx.state("todos"), Some(&SourceState::Pending));
    assert!(changes.try_recv().is_err());

    let ctx = fresh.resolve_all().await.unwrap();
    assert_eq!(ctx.get("stats"), Some(&json!("1/2")));
    assert_ne!(old.instance_id(), fresh.instance_id());
}

// ── Subscriptions ────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_follow_bindings_and_templates() {
    let page = load(todo_page(), Collaborators::default()).await;

    assert_eq!(page.subscribers("stats"), BTreeSet::from(["count".to_string()]));
    assert_eq!(page.subscribers("headline"), BTreeSet::from(["title".to_string()]));
    assert!(page.subscribers("todos").is_empty());
}

#[tokio::test]
async fn changes_are_broadcast_with_affected_nodes() {
    let store = Arc::new(MemoryStore::with_entries(map(seeded_todos())));
    let page = load(todo_page(), Collaborators::new(store)).await;
    let mut changes = page.subscribe();

    let ctx = page.resolve_all().await.unwrap();
    let change = changes.recv().await.unwrap();

    assert_eq!(change.revision, ctx.revision());
    assert!(change.changed.contains("stats"));
    assert_eq!(
        change.affected_nodes,
        BTreeSet::from(["count".to_string(), "title".to_string()])
    );
}

// ── AI sources ───────────────────────────────────────────────────

#[tokio::test]
async fn ai_source_sends_interpolated_prompt() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "topic", "type": "static", "value": "rust"},
            {"id": "summary", "type": "ai", "prompt": "summarize ${topic}", "transform": "value + '!'", "dependencies": ["topic"]}
        ]
    });
    let ai = Arc::new(ShoutingAi::default());
    let page = load(schema, Collaborators::default().with_ai(ai.clone())).await;

    let ctx = page.resolve_all().await.unwrap();
    page.resolve_all().await.unwrap();

    assert_eq!(ctx.get("summary"), Some(&json!("SUMMARIZE RUST!")));
    assert_eq!(ai.prompts.lock().unwrap().clone(), vec!["summarize rust"]);
}

#[tokio::test]
async fn ai_source_without_client_behaves_like_computed() {
    let schema = json!({
        "id": "p",
        "name": "P",
        "dataSources": [
            {"id": "words", "type": "static", "value": ["a", "b"]},
            {"id": "joined", "type": "ai", "prompt": "join ${words}", "transform": "words.join('-')", "dependencies": ["words"]}
        ]
    });
    let page = load(schema, Collaborators::default()).await;
    let ctx = page.resolve_all().await.unwrap();
    assert_eq!(ctx.get("joined"), Some(&json!("a-b")));
}
