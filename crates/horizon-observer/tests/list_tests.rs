//! Tests for indexed and sorted observer lists.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use horizon_observer::{ListEvent, ListKey, Observer, ObserverList};

fn entity(id: &str, order: i64) -> Observer {
    Observer::from_json(json!({ "resource_id": id, "order": order })).unwrap()
}

fn order_of(observer: &Observer) -> i64 {
    observer.get("order").and_then(|v| v.as_i64()).unwrap_or_default()
}

fn entity_list() -> ObserverList<Observer> {
    ObserverList::new()
        .with_index("resource_id")
        .with_sorted(|a: &Observer, b: &Observer| order_of(a).cmp(&order_of(b)))
}

#[test]
fn test_sorted_indexed_registry() {
    let list = entity_list();
    let added = Arc::new(Mutex::new(Vec::new()));
    let sink = added.clone();
    list.on("add", move |event| {
        if let ListEvent::Add { key, position, .. } = event {
            sink.lock().push((key.clone(), *position));
        }
    });

    assert_eq!(list.add(entity("c", 30)), Some(0));
    assert_eq!(list.add(entity("a", 10)), Some(0));
    assert_eq!(list.add(entity("b", 20)), Some(1));
    assert_eq!(list.add(entity("b", 99)), None);

    assert_eq!(
        *added.lock(),
        vec![
            (ListKey::from("c"), 0),
            (ListKey::from("a"), 0),
            (ListKey::from("b"), 1),
        ]
    );
    let ids: Vec<_> = list.map(|item| item.get("resource_id"));
    assert_eq!(ids, vec![Some(json!("a")), Some(json!("b")), Some(json!("c"))]);
}

#[test]
fn test_indexed_add_event() {
    let list = entity_list();
    let seen = Arc::new(Mutex::new(0));
    let sink = seen.clone();
    list.once("add[e7]", move |_| *sink.lock() += 1);

    list.add(entity("e1", 1));
    list.add(entity("e7", 7));
    assert_eq!(*seen.lock(), 1);
}

#[test]
fn test_json_materializes_observers() {
    let list = entity_list();
    list.add(entity("x", 2));
    list.add(entity("y", 1));
    assert_eq!(
        list.json(),
        json!([
            { "resource_id": "y", "order": 1 },
            { "resource_id": "x", "order": 2 }
        ])
    );
}

#[test]
fn test_remove_reports_key_and_position() {
    let list = entity_list();
    let first = entity("first", 1);
    list.add(first.clone());
    list.add(entity("second", 2));

    let removed = Arc::new(Mutex::new(Vec::new()));
    let sink = removed.clone();
    list.on("remove", move |event| {
        if let ListEvent::Remove { key, position, .. } = event {
            sink.lock().push((key.to_string(), *position));
        }
    });

    assert!(list.remove(&first));
    assert!(list.remove_by_key("second").is_some());
    assert!(list.is_empty());
    assert_eq!(
        *removed.lock(),
        vec![("first".to_string(), 0), ("second".to_string(), 0)]
    );
}
