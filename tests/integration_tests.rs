use memcachedb_client::{Client, Options, StatValue, Status};

// NOTE: These tests run against a real MemcacheDB server on the default
// port. Each test uses keys unique to that test so they can run in any
// order against a shared server.

fn setup_client(keys: &[&str]) -> Client {
    let client = Client::new(&["127.0.0.1:21201"], Options::default())
        .expect("failed to connect to server");

    for key in keys {
        client.delete(key, 0).expect("failed to delete key");
    }

    client
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_set_get_roundtrip() {
    let key = "mdb-test-roundtrip";
    let client = setup_client(&[key]);

    let value = rand::random::<u64>().to_string();
    let result = client.set(key, value.as_bytes(), 0);
    assert_eq!(result.unwrap(), Status::Stored, "failed to set {}", key);

    let fetched = client.get(key).expect("failed to get");
    assert_eq!(fetched, Some(value.into_bytes()));
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_get_with_nonexistent_key() {
    let key = "mdb-test-nonexistent";
    let client = setup_client(&[key]);

    assert_eq!(client.get(key).unwrap(), None);
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_add_only_stores_once() {
    let key = "mdb-test-add";
    let client = setup_client(&[key]);

    assert_eq!(client.add(key, b"first", 0).unwrap(), Status::Stored);
    assert_eq!(client.add(key, b"second", 0).unwrap(), Status::NotStored);
    assert_eq!(client.get(key).unwrap(), Some(b"first".to_vec()));
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_delete() {
    let key = "mdb-test-delete";
    let client = setup_client(&[key]);

    client.set(key, b"value", 0).expect("failed to set");
    assert!(client.delete(key, 0).unwrap());
    assert_eq!(client.get(key).unwrap(), None);
    assert!(!client.delete(key, 0).unwrap());
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_incr_decr() {
    let key = "mdb-test-counter";
    let client = setup_client(&[key]);

    client.set(key, b"10", 0).expect("failed to set");
    assert_eq!(client.incr(key, 5).unwrap(), Some(15));
    assert_eq!(client.decr(key, 3).unwrap(), Some(12));

    // decr floors at zero on the server side.
    assert_eq!(client.decr(key, 100).unwrap(), Some(0));

    assert_eq!(client.incr("mdb-test-counter-missing", 1).unwrap(), None);
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_get_multi() {
    let keys = ["mdb-test-multi-a", "mdb-test-multi-b", "mdb-test-multi-c"];
    let client = setup_client(&keys);

    client.set(keys[0], b"1", 0).expect("failed to set");
    client.set(keys[2], b"3", 0).expect("failed to set");

    let results = client.get_multi(&keys).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results.get(keys[0]), Some(&b"1".to_vec()));
    assert_eq!(results.get(keys[1]), None);
    assert_eq!(results.get(keys[2]), Some(&b"3".to_vec()));
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_get_range() {
    let keys = ["mdb-range-a", "mdb-range-b", "mdb-range-c"];
    let client = setup_client(&keys);

    for key in &keys {
        client.set(key, key.as_bytes(), 0).expect("failed to set");
    }

    // Endpoint openness varies by server version; the interior key is
    // always in range.
    let results = client.get_range("mdb-range-a", "mdb-range-c", 100).unwrap();
    assert_eq!(results.get("mdb-range-b"), Some(&b"mdb-range-b".to_vec()));
    for (key, value) in &results {
        assert_eq!(value, &key.as_bytes().to_vec());
    }
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_namespaced_roundtrip() {
    let options = Options {
        namespace: Some("mdb-test-ns".to_string()),
        ..Options::default()
    };
    let client = Client::new(&["127.0.0.1:21201"], options).expect("failed to connect");

    client.set("key", b"value", 0).expect("failed to set");
    assert_eq!(client.get("key").unwrap(), Some(b"value".to_vec()));

    // The same key without the namespace is a different entry.
    let plain = setup_client(&[]);
    assert_eq!(plain.get("key").unwrap(), None);
}

#[ignore = "Relies on a running MemcacheDB server"]
#[test]
fn test_stats() {
    let client = setup_client(&[]);

    let stats = client.stats().unwrap();
    let entries = stats.get("127.0.0.1:21201").expect("missing server entry");

    assert!(entries.contains_key("pid"));
    assert!(matches!(entries.get("version"), Some(StatValue::Text(_))));
}
