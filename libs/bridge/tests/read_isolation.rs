//! Cached property reads stay consistent until the remote announces a
//! context advance through `beforenotify`

use bridge::{BridgeClient, Callback, MockTransport, RemoteId, Value};
use bridge_config::BridgeConfig;
use serde_json::json;

fn realm_client() -> (MockTransport, BridgeClient, bridge::RemoteObject) {
    let mock = MockTransport::new();
    let config = BridgeConfig::default()
        .with_host("localhost:8083")
        .with_polling(false);
    let client = BridgeClient::with_transport(&config, mock.clone()).unwrap();

    mock.push_json(json!({"result": {"value": "s-1"}}))
        .push_json(json!({"result": {"type": "realm", "id": "r-1"}}));
    client
        .create_session(None, Callback::new(|_, _| Ok(Value::Undefined)))
        .unwrap();
    let realm = client.create_realm(&[Value::from("isolation.realm")]).unwrap();
    (mock, client, realm)
}

#[test]
fn test_reads_stable_until_notified() {
    let (mock, client, realm) = realm_client();

    mock.push_json(json!({"result": {"value": 1}}));
    assert_eq!(realm.get("length").unwrap(), Value::from(1));

    // The remote has new data but cannot advance before notifying us
    assert_eq!(realm.get("length").unwrap(), Value::from(1));
    assert_eq!(mock.commands().len(), 3);

    // Hook handle is 1; the realm is passed as the notifying context
    mock.push_json(json!({
        "callback": 1,
        "arguments": {"value": [{"type": "realm", "id": "r-1"}]}
    }))
    .push_json(json!({}))
    .push_json(json!({"result": {"value": 2}}));

    client.poll().unwrap();
    assert_eq!(client.isolation().notifications(), 1);
    assert_eq!(realm.get("length").unwrap(), Value::from(2));

    assert_eq!(
        mock.commands()[3..].to_vec(),
        vec!["callbacks_poll", "callback_poll_result", "get_property"]
    );
}

#[test]
fn test_notification_leaves_other_contexts_cached() {
    let (mock, client, realm) = realm_client();
    let other = RemoteId::from("r-2");
    client
        .isolation()
        .cache()
        .insert(Some(&other), &RemoteId::Int(7), "name", Value::from("kept"));

    mock.push_json(json!({"result": {"value": 1}}));
    realm.get("length").unwrap();

    mock.push_json(json!({
        "callback": 1,
        "this": {"type": "realm", "id": "r-1"}
    }))
    .push_json(json!({}));
    client.poll().unwrap();

    let cache = client.isolation().cache();
    assert!(cache.get(realm.context(), realm.id(), "length").is_none());
    assert_eq!(
        cache.get(Some(&other), &RemoteId::Int(7), "name"),
        Some(Value::from("kept"))
    );
}

#[test]
fn test_clear_test_state_keeps_hook_usable() {
    let (mock, client, _realm) = realm_client();
    mock.set_fallback(json!({}));
    client.clear_test_state().unwrap();

    // Re-creating a realm re-registers the hook under a fresh handle
    mock.push_json(json!({"result": {"type": "realm", "id": "r-3"}}));
    client.create_realm(&[]).unwrap();

    let requests = mock.requests();
    let body = &requests.last().unwrap().body;
    assert_eq!(body["beforeNotify"]["type"], json!("function"));
    assert_ne!(body["beforeNotify"]["value"], json!(1));
}

#[test]
fn test_local_mutation_refreshes_collection_reads() {
    let (mock, _client, realm) = realm_client();

    mock.push_json(json!({"result": {"type": "results", "id": 4}}))
        .push_json(json!({}))
        .push_json(json!({"result": {"value": 1}}));
    let dogs = realm.call("objects", &[Value::from("Dog")]).unwrap();
    let dogs = realm.child(&dogs).unwrap().expect("results reference");
    assert_eq!(dogs.get("length").unwrap(), Value::from(1));

    mock.push_json(json!({}))
        .push_json(json!({"result": {"value": 0}}));
    realm.call("deleteAll", &[]).unwrap();
    assert_eq!(dogs.get("length").unwrap(), Value::from(0));

    assert_eq!(
        mock.commands()[2..].to_vec(),
        vec!["call_method", "call_method", "get_property", "call_method", "get_property"]
    );
    assert_eq!(mock.requests()[3].body["name"], json!("addListener"));
}
