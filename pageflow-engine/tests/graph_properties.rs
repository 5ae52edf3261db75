//! Property-based tests for the data source graph.
//!
//! - Any acyclic dependency set builds, and the order lists every id once
//!   with each dependency ahead of its dependents.
//! - Closing a path back onto its start is always reported as a cycle
//!   naming the start.
//! - `resolve_all` on an acyclic page settles every declared source.

use pageflow_engine::{Collaborators, ComponentRegistry, EngineConfig, PageRuntime, SourceGraph};
use pageflow_model::{DataSource, PageSchema, SourceKind};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

/// Node `i` may only depend on nodes `< i`, so the result is a DAG.
fn dag_strategy() -> impl Strategy<Value = Vec<DataSource>> {
    (1usize..12)
        .prop_flat_map(|n| prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n))
        .prop_map(|picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    let dependencies: Vec<String> = if i == 0 {
                        Vec::new()
                    } else {
                        let set: HashSet<usize> = deps.iter().map(|ix| ix.index(i)).collect();
                        set.into_iter().map(|d| format!("s{d}")).collect()
                    };
                    source(i, dependencies)
                })
                .collect()
        })
}

fn source(i: usize, dependencies: Vec<String>) -> DataSource {
    let kind = if dependencies.is_empty() {
        SourceKind::Static {
            value: Some(json!(i)),
        }
    } else {
        SourceKind::Computed {
            transform: format!("{} + 1", dependencies[0]),
        }
    };
    DataSource {
        id: format!("s{i}"),
        kind,
        default_value: None,
        dependencies,
    }
}

proptest! {
    #[test]
    fn acyclic_sources_always_build(sources in dag_strategy()) {
        let graph = SourceGraph::build(&sources).unwrap();
        let order = graph.order();
        prop_assert_eq!(order.len(), sources.len());

        let unique: HashSet<&String> = order.iter().collect();
        prop_assert_eq!(unique.len(), sources.len());

        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        for source in &sources {
            for dep in &source.dependencies {
                prop_assert!(pos(dep) < pos(&source.id));
            }
        }
    }

    #[test]
    fn closing_a_chain_is_a_cycle(len in 1usize..8) {
        let mut sources: Vec<DataSource> = (0..len)
            .map(|i| {
                let deps = if i == 0 { Vec::new() } else { vec![format!("s{}", i - 1)] };
                source(i, deps)
            })
            .collect();
        sources[0].dependencies.push(format!("s{}", len - 1));

        let err = SourceGraph::build(&sources).unwrap_err();
        prop_assert!(err.ids.contains(&"s0".to_string()));
        prop_assert_eq!(err.ids.len(), len);
    }

    #[test]
    fn resolve_all_settles_every_source(sources in dag_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let ids: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();

        let ctx = runtime.block_on(async move {
            let mut schema = PageSchema::new("generated", "Generated");
            schema.data_sources = sources;
            let page = PageRuntime::load(
                schema,
                ComponentRegistry::new(),
                Collaborators::default(),
                EngineConfig::default(),
            )
            .await
            .unwrap();
            page.resolve_all().await.unwrap()
        });

        prop_assert!(ctx.is_settled());
        prop_assert!(ctx.errors().is_empty());
        for id in ids {
            prop_assert!(ctx.get(&id).is_some());
        }
    }
}
