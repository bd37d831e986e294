use cirrus_fs::{DeadProp, PropStore};
use tempfile::TempDir;

fn prop(name: &str, value: &str) -> DeadProp {
    DeadProp {
        name: name.to_string(),
        prefix: Some("Z".to_string()),
        namespace: Some("urn:example".to_string()),
        value: value.to_string(),
    }
}

#[test]
fn save_then_get_roundtrips() {
    let store = PropStore::open_in_memory().unwrap();
    assert!(store.get("uid-1").unwrap().is_none());

    store
        .save("uid-1", &[prop("author", "<Z:author>me</Z:author>")])
        .unwrap();
    let set = store.get("uid-1").unwrap().unwrap();
    assert_eq!(set.version, 1);
    assert_eq!(set.props.len(), 1);
    assert_eq!(set.props[0].name, "author");
    assert_eq!(set.props[0].value, "<Z:author>me</Z:author>");
}

#[test]
fn saves_bump_the_version() {
    let store = PropStore::open_in_memory().unwrap();
    store.save("uid-1", &[prop("a", "1")]).unwrap();
    let second = store.save("uid-1", &[prop("a", "2"), prop("b", "3")]).unwrap();
    assert_eq!(second.version, 2);

    let set = store.get("uid-1").unwrap().unwrap();
    assert_eq!(set.version, 2);
    assert_eq!(set.props.len(), 2);
}

#[test]
fn an_empty_set_is_still_a_record() {
    // An empty save marks a node as imported; it must read back as
    // Some(empty), not None.
    let store = PropStore::open_in_memory().unwrap();
    store.save("uid-1", &[]).unwrap();
    let set = store.get("uid-1").unwrap().unwrap();
    assert!(set.props.is_empty());
    assert_eq!(set.version, 1);
}

#[test]
fn delete_reports_whether_a_record_existed() {
    let store = PropStore::open_in_memory().unwrap();
    store.save("uid-1", &[prop("a", "1")]).unwrap();

    assert!(store.delete("uid-1").unwrap());
    assert!(store.get("uid-1").unwrap().is_none());
    assert!(!store.delete("uid-1").unwrap());
}

#[test]
fn records_are_keyed_by_uid_not_path() {
    let store = PropStore::open_in_memory().unwrap();
    store.save("uid-old", &[prop("a", "1")]).unwrap();

    // A different node is a different record, whatever path it lives at.
    assert!(store.get("uid-new").unwrap().is_none());
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("props.db");

    {
        let store = PropStore::open(&db).unwrap();
        store.save("uid-1", &[prop("author", "me")]).unwrap();
    }

    let store = PropStore::open(&db).unwrap();
    let set = store.get("uid-1").unwrap().unwrap();
    assert_eq!(set.props[0].value, "me");
    assert_eq!(set.version, 1);
}
