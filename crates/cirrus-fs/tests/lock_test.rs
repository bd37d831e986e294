use cirrus_fs::{
    BridgeError, LockDepth, LockError, LockRequest, LockScope, LockStore, TOKEN_PREFIX,
};
use std::time::Duration;
use tempfile::TempDir;

fn request<'a>(path: &'a str, principal: &'a str) -> LockRequest<'a> {
    LockRequest {
        path,
        principal,
        timeout_secs: 3600,
        scope: LockScope::Exclusive,
        depth: LockDepth::Zero,
        provisional: false,
        owner: None,
    }
}

#[test]
fn created_locks_are_discoverable_by_token() {
    let store = LockStore::open_in_memory().unwrap();
    let lock = store.create_lock(&request("/doc.txt", "alice")).unwrap();

    assert!(lock.token.starts_with(TOKEN_PREFIX));
    assert_eq!(lock.path, "/doc.txt");
    let found = store.get_lock(&lock.token).unwrap().unwrap();
    assert_eq!(found, lock);
}

#[test]
fn token_validation_trims_bracket_syntax() {
    let store = LockStore::open_in_memory().unwrap();
    let lock = store.create_lock(&request("/doc.txt", "alice")).unwrap();

    let wire = format!("<{}>", lock.token);
    assert!(store.validate_token("/doc.txt", &wire).unwrap());
    assert!(store.validate_token("/doc.txt", &lock.token).unwrap());
    assert!(!store.validate_token("/other.txt", &wire).unwrap());
    assert!(!store
        .validate_token("/doc.txt", "<opaquelocktoken:bogus>")
        .unwrap());
}

#[test]
fn second_lock_on_same_path_conflicts() {
    let store = LockStore::open_in_memory().unwrap();
    store.create_lock(&request("/doc.txt", "alice")).unwrap();

    let err = store.create_lock(&request("/doc.txt", "bob")).unwrap_err();
    match err {
        LockError::Conflict(existing) => assert_eq!(existing.path, "/doc.txt"),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn ancestor_infinity_lock_covers_the_subtree() {
    let store = LockStore::open_in_memory().unwrap();
    let mut deep = request("/A", "alice");
    deep.depth = LockDepth::Infinity;
    store.create_lock(&deep).unwrap();

    // Any lock below /A conflicts, regardless of its own requested depth.
    assert!(matches!(
        store.create_lock(&request("/A/b.txt", "bob")),
        Err(LockError::Conflict(_))
    ));
    // A sibling tree is unaffected.
    store.create_lock(&request("/B/b.txt", "bob")).unwrap();
}

#[test]
fn depth_zero_ancestor_does_not_cover_children() {
    let store = LockStore::open_in_memory().unwrap();
    store.create_lock(&request("/A", "alice")).unwrap();
    store.create_lock(&request("/A/b.txt", "bob")).unwrap();
}

#[test]
fn infinity_request_conflicts_with_descendant_locks() {
    let store = LockStore::open_in_memory().unwrap();
    store.create_lock(&request("/A/b.txt", "alice")).unwrap();

    let mut deep = request("/A", "bob");
    deep.depth = LockDepth::Infinity;
    assert!(matches!(
        store.create_lock(&deep),
        Err(LockError::Conflict(_))
    ));
    // Without the subtree, the same path is free.
    store.create_lock(&request("/A", "bob")).unwrap();
}

#[test]
fn locks_expire_and_tokens_are_not_resurrected() {
    let store = LockStore::open_in_memory().unwrap();
    let mut short = request("/doc.txt", "alice");
    short.timeout_secs = 0;
    let lock = store.create_lock(&short).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert!(!store.is_locked("/doc.txt", None).unwrap());
    assert!(store.get_lock(&lock.token).unwrap().is_none());
    assert!(store.refresh_lock(&lock.token, 3600).unwrap().is_none());

    // The path is lockable again, under a fresh token.
    let next = store.create_lock(&request("/doc.txt", "bob")).unwrap();
    assert_ne!(next.token, lock.token);
}

#[test]
fn refresh_extends_expiry() {
    let store = LockStore::open_in_memory().unwrap();
    let mut short = request("/doc.txt", "alice");
    short.timeout_secs = 1;
    let lock = store.create_lock(&short).unwrap();

    let refreshed = store.refresh_lock(&lock.token, 7200).unwrap().unwrap();
    assert!(refreshed.expires_at > lock.expires_at);
    assert_eq!(refreshed.timeout_secs, 7200);
}

#[test]
fn path_purge_is_exact() {
    let store = LockStore::open_in_memory().unwrap();
    let at_a = store.create_lock(&request("/a", "alice")).unwrap();
    let below = store.create_lock(&request("/a/b", "alice")).unwrap();
    let sibling = store.create_lock(&request("/ab", "alice")).unwrap();

    assert_eq!(store.delete_locks_for_path("/a").unwrap(), 1);
    assert!(store.get_lock(&at_a.token).unwrap().is_none());
    assert!(store.get_lock(&below.token).unwrap().is_some());
    assert!(store.get_lock(&sibling.token).unwrap().is_some());
}

#[test]
fn access_policy_lets_owners_through_without_a_token() {
    let store = LockStore::open_in_memory().unwrap();
    let lock = store.create_lock(&request("/doc.txt", "alice")).unwrap();

    store.check_access("/doc.txt", Some("alice"), None).unwrap();
    assert!(matches!(
        store.check_access("/doc.txt", Some("bob"), None),
        Err(BridgeError::Locked(_))
    ));
    assert!(matches!(
        store.check_access("/doc.txt", None, None),
        Err(BridgeError::Locked(_))
    ));
    // A valid token authorizes whoever presents it.
    let wire = format!("<{}>", lock.token);
    store
        .check_access("/doc.txt", Some("bob"), Some(&wire))
        .unwrap();
    assert!(matches!(
        store.check_access("/doc.txt", Some("bob"), Some("<bad>")),
        Err(BridgeError::Locked(_))
    ));
}

#[test]
fn covering_includes_infinity_ancestors_only() {
    let store = LockStore::open_in_memory().unwrap();
    let mut deep = request("/A", "alice");
    deep.depth = LockDepth::Infinity;
    store.create_lock(&deep).unwrap();
    store.create_lock(&request("/B", "alice")).unwrap();

    let covering = store.locks_covering("/A/deep/file.txt").unwrap();
    assert_eq!(covering.len(), 1);
    assert_eq!(covering[0].path, "/A");
    assert!(store.locks_covering("/B/file.txt").unwrap().is_empty());
}

#[test]
fn lock_unlock_relock_cycle() {
    let store = LockStore::open_in_memory().unwrap();

    let first = store.create_lock(&request("/doc.txt", "alice")).unwrap();
    assert!(matches!(
        store.create_lock(&request("/doc.txt", "bob")),
        Err(LockError::Conflict(_))
    ));

    assert!(store.delete_lock(&format!("<{}>", first.token)).unwrap());
    let second = store.create_lock(&request("/doc.txt", "bob")).unwrap();
    assert_ne!(second.token, first.token);
}

#[test]
fn store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("locks.db");

    let token = {
        let store = LockStore::open(&db).unwrap();
        store.create_lock(&request("/doc.txt", "alice")).unwrap().token
    };

    let store = LockStore::open(&db).unwrap();
    let found = store.get_lock(&token).unwrap().unwrap();
    assert_eq!(found.path, "/doc.txt");
    assert_eq!(found.principal, "alice");
    assert!(store.is_locked("/doc.txt", None).unwrap());
}

#[test]
fn is_locked_can_ignore_one_token() {
    let store = LockStore::open_in_memory().unwrap();
    let lock = store.create_lock(&request("/doc.txt", "alice")).unwrap();

    assert!(store.is_locked("/doc.txt", None).unwrap());
    assert!(!store
        .is_locked("/doc.txt", Some(&format!("<{}>", lock.token)))
        .unwrap());
}

#[test]
fn user_and_global_listings_purge_lazily() {
    let store = LockStore::open_in_memory().unwrap();
    let mut short = request("/gone.txt", "alice");
    short.timeout_secs = 0;
    store.create_lock(&short).unwrap();
    store.create_lock(&request("/kept.txt", "alice")).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    let mine = store.locks_for_user("alice").unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].path, "/kept.txt");
    assert_eq!(store.all_locks().unwrap().len(), 1);
}
