use pageflow_model::PageInstanceId;
use std::collections::HashSet;
use std::str::FromStr;

#[test]
fn new_ids_are_unique() {
    let ids: HashSet<PageInstanceId> = (0..100).map(|_| PageInstanceId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn later_instances_sort_after_earlier() {
    let first = PageInstanceId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = PageInstanceId::new();
    assert!(first < second);
}

#[test]
fn display_parse_roundtrip() {
    let id = PageInstanceId::new();
    let parsed = PageInstanceId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn parse_rejects_garbage() {
    assert!(PageInstanceId::from_str("not-a-uuid").is_err());
}

#[test]
fn serializes_transparently() {
    let id = PageInstanceId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", id));
}
