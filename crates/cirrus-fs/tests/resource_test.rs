use cirrus_fs::{
    BridgeError, DeadProp, LockDepth, LockRequest, LockScope, LockStore, MountConfig,
    MutationAuth, PropStore, UploadSource, Volume, REMOTE_PROP_NAMESPACE,
};
use cirrus_remote::MemoryRemote;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

async fn volume_for(remote: MemoryRemote) -> Arc<Volume> {
    volume_with_config(remote, MountConfig::default()).await
}

async fn volume_with_config(remote: MemoryRemote, config: MountConfig) -> Arc<Volume> {
    Volume::with_stores(
        Arc::new(remote),
        config,
        Arc::new(LockStore::open_in_memory().unwrap()),
        Arc::new(PropStore::open_in_memory().unwrap()),
    )
    .await
    .unwrap()
}

fn alice() -> MutationAuth {
    MutationAuth::for_principal("alice")
}

fn source(bytes: &[u8]) -> UploadSource {
    UploadSource {
        content: Box::pin(Cursor::new(bytes.to_vec())),
        size_hint: Some(bytes.len() as u64),
        mime: None,
    }
}

fn lock_request<'a>(path: &'a str, principal: &'a str) -> LockRequest<'a> {
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

async fn read_back(volume: &Arc<Volume>, path: &str) -> Vec<u8> {
    let (_, mut stream) = volume.resource(path).unwrap().download().await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn root_always_exists_as_a_collection() {
    let volume = volume_for(MemoryRemote::new()).await;
    let root = volume.resource("/").unwrap();
    assert!(root.exists().await.unwrap());
    let node = root.node().await.unwrap();
    assert!(node.is_folder());
    assert!(node.name.is_empty());
    assert_eq!(root.canonical_path().await.unwrap(), "/");
}

#[tokio::test]
async fn mkcol_requires_the_parent_tree() {
    let volume = volume_for(MemoryRemote::new()).await;

    let err = volume
        .resource("/a/b")
        .unwrap()
        .create_folder(&alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::TreeIncomplete(_)));

    volume
        .resource("/a")
        .unwrap()
        .create_folder(&alice())
        .await
        .unwrap();
    volume
        .resource("/a/b")
        .unwrap()
        .create_folder(&alice())
        .await
        .unwrap();
}

#[tokio::test]
async fn mkcol_refuses_occupied_paths() {
    let remote = MemoryRemote::new();
    remote.add_folder(&remote.root(), "docs");
    let volume = volume_for(remote).await;

    let err = volume
        .resource("/docs")
        .unwrap()
        .create_folder(&alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Conflict(_)));

    let err = volume
        .resource("/")
        .unwrap()
        .create_folder(&alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Conflict(_)));
}

#[tokio::test]
async fn put_stores_and_overwrites_rotating_identity() {
    let remote = MemoryRemote::new();
    let volume = volume_for(remote.clone()).await;
    let resource = volume.resource("/f.txt").unwrap();

    let first = resource.write(&alice(), source(b"one")).await.unwrap();
    assert_eq!(read_back(&volume, "/f.txt").await, b"one");

    // Give the first node a dead property, then overwrite.
    resource
        .patch_dead_props(
            &alice(),
            vec![DeadProp {
                name: "color".to_string(),
                prefix: None,
                namespace: Some("urn:example".to_string()),
                value: "blue".to_string(),
            }],
            vec![],
        )
        .await
        .unwrap();

    let second = resource.write(&alice(), source(b"two!")).await.unwrap();
    assert_ne!(second.uid, first.uid);
    assert_eq!(read_back(&volume, "/f.txt").await, b"two!");
    assert!(!remote.contains(&first.uid));
    // The replaced node's properties went with it.
    assert!(volume.props().get(&first.uid).unwrap().is_none());
}

#[tokio::test]
async fn put_on_a_collection_is_rejected() {
    let remote = MemoryRemote::new();
    remote.add_folder(&remote.root(), "docs");
    let volume = volume_for(remote).await;

    let err = volume
        .resource("/docs")
        .unwrap()
        .write(&alice(), source(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::MethodNotAllowed(_)));
}

#[tokio::test]
async fn put_requires_the_parent_tree() {
    let volume = volume_for(MemoryRemote::new()).await;
    let err = volume
        .resource("/missing/f.txt")
        .unwrap()
        .write(&alice(), source(b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::TreeIncomplete(_)));
}

#[tokio::test]
async fn delete_clears_locks_and_metadata() {
    let remote = MemoryRemote::new();
    let volume = volume_for(remote.clone()).await;
    let resource = volume.resource("/f.txt").unwrap();
    let node = resource.write(&alice(), source(b"data")).await.unwrap();

    resource
        .patch_dead_props(
            &alice(),
            vec![DeadProp {
                name: "note".to_string(),
                prefix: None,
                namespace: Some("urn:example".to_string()),
                value: "keep".to_string(),
            }],
            vec![],
        )
        .await
        .unwrap();
    volume
        .locks()
        .create_lock(&lock_request("/f.txt", "alice"))
        .unwrap();

    resource.delete(&alice()).await.unwrap();

    assert!(!remote.contains(&node.uid));
    assert!(volume.props().get(&node.uid).unwrap().is_none());
    assert!(volume.locks().locks_at_path("/f.txt").unwrap().is_empty());
    assert!(!resource.exists().await.unwrap());

    // A fresh resource at the same path is a different node with no
    // inherited metadata.
    let reborn = resource.write(&alice(), source(b"new")).await.unwrap();
    assert_ne!(reborn.uid, node.uid);
    assert!(resource.dead_props().await.unwrap().is_empty());
}

#[tokio::test]
async fn folder_delete_discards_descendant_metadata() {
    let remote = MemoryRemote::new();
    let docs = remote.add_folder(&remote.root(), "docs");
    let inner = remote.add_file(&docs, "inner.txt", b"x");
    let volume = volume_for(remote.clone()).await;

    volume
        .props()
        .save(
            &inner,
            &[DeadProp {
                name: "note".to_string(),
                prefix: None,
                namespace: None,
                value: "x".to_string(),
            }],
        )
        .unwrap();

    volume
        .resource("/docs")
        .unwrap()
        .delete(&alice())
        .await
        .unwrap();
    assert!(volume.props().get(&inner).unwrap().is_none());
    assert!(volume.props().get(&docs).unwrap().is_none());
}

#[tokio::test]
async fn delete_is_refused_for_foreign_locks() {
    let remote = MemoryRemote::new();
    remote.add_file(&remote.root(), "f.txt", b"x");
    let volume = volume_for(remote).await;
    let lock = volume
        .locks()
        .create_lock(&lock_request("/f.txt", "bob"))
        .unwrap();

    let resource = volume.resource("/f.txt").unwrap();
    let err = resource.delete(&alice()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Locked(_)));

    // The lock owner passes without re-presenting the token; anyone with
    // the token passes too.
    let err = resource
        .delete(&MutationAuth::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Locked(_)));
    resource
        .delete(&alice().with_token(format!("<{}>", lock.token)))
        .await
        .unwrap();
}

#[tokio::test]
async fn copy_streams_a_file_and_keeps_the_source() {
    let remote = MemoryRemote::new();
    let a = remote.add_folder(&remote.root(), "a");
    remote.add_folder(&remote.root(), "b");
    remote.add_file(&a, "f.txt", b"payload");
    let volume = volume_for(remote).await;

    volume
        .resource("/a/f.txt")
        .unwrap()
        .copy_to("/b/f.txt", &alice())
        .await
        .unwrap();

    assert_eq!(read_back(&volume, "/a/f.txt").await, b"payload");
    assert_eq!(read_back(&volume, "/b/f.txt").await, b"payload");
}

#[tokio::test]
async fn copy_recurses_into_collections() {
    let remote = MemoryRemote::new();
    let a = remote.add_folder(&remote.root(), "a");
    remote.add_file(&a, "f1.txt", b"one");
    let sub = remote.add_folder(&a, "sub");
    remote.add_file(&sub, "f2.txt", b"two");
    let volume = volume_for(remote).await;

    volume
        .resource("/a")
        .unwrap()
        .copy_to("/c", &alice())
        .await
        .unwrap();

    assert_eq!(read_back(&volume, "/c/f1.txt").await, b"one");
    assert_eq!(read_back(&volume, "/c/sub/f2.txt").await, b"two");
    assert_eq!(read_back(&volume, "/a/f1.txt").await, b"one");
}

#[tokio::test]
async fn copy_refuses_self_containment() {
    let remote = MemoryRemote::new();
    remote.add_folder(&remote.root(), "a");
    let volume = volume_for(remote).await;
    let resource = volume.resource("/a").unwrap();

    assert!(matches!(
        resource.copy_to("/a", &alice()).await.unwrap_err(),
        BridgeError::Forbidden(_)
    ));
    assert!(matches!(
        resource.copy_to("/a/inside", &alice()).await.unwrap_err(),
        BridgeError::Forbidden(_)
    ));
}

#[tokio::test]
async fn copy_displaces_only_empty_collections() {
    let remote = MemoryRemote::new();
    let a = remote.add_folder(&remote.root(), "a");
    remote.add_file(&a, "f.txt", b"x");
    let full = remote.add_folder(&remote.root(), "full");
    remote.add_file(&full, "occupant.txt", b"y");
    remote.add_folder(&remote.root(), "empty");
    let volume = volume_for(remote).await;

    let err = volume
        .resource("/a/f.txt")
        .unwrap()
        .copy_to("/full", &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Forbidden(_)));

    volume
        .resource("/a/f.txt")
        .unwrap()
        .copy_to("/empty", &alice())
        .await
        .unwrap();
    assert_eq!(read_back(&volume, "/empty").await, b"x");
}

#[tokio::test]
async fn move_relocates_a_file_and_purges_its_locks() {
    let remote = MemoryRemote::new();
    let a = remote.add_folder(&remote.root(), "A");
    remote.add_folder(&remote.root(), "B");
    let file = remote.add_file(&a, "file.txt", b"data");
    let volume = volume_for(remote).await;
    volume
        .locks()
        .create_lock(&lock_request("/A/file.txt", "alice"))
        .unwrap();

    volume
        .resource("/A/file.txt")
        .unwrap()
        .move_to("/B/file.txt", &alice())
        .await
        .unwrap();

    // Same node, new path; the old path is gone and its locks with it.
    let moved = volume.resource("/B/file.txt").unwrap().node().await.unwrap();
    assert_eq!(moved.uid, file);
    assert!(!volume.resource("/A/file.txt").unwrap().exists().await.unwrap());
    assert!(volume
        .locks()
        .locks_at_path("/A/file.txt")
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn move_renames_within_a_folder() {
    let remote = MemoryRemote::new();
    let file = remote.add_file(&remote.root(), "old.txt", b"data");
    let volume = volume_for(remote).await;

    volume
        .resource("/old.txt")
        .unwrap()
        .move_to("/new.txt", &alice())
        .await
        .unwrap();

    let node = volume.resource("/new.txt").unwrap().node().await.unwrap();
    assert_eq!(node.uid, file);
    assert_eq!(node.name, "new.txt");
}

#[tokio::test]
async fn move_displaces_an_existing_file() {
    let remote = MemoryRemote::new();
    remote.add_file(&remote.root(), "src.txt", b"new");
    let old = remote.add_file(&remote.root(), "dst.txt", b"old");
    let volume = volume_for(remote.clone()).await;

    volume
        .resource("/src.txt")
        .unwrap()
        .move_to("/dst.txt", &alice())
        .await
        .unwrap();

    assert!(!remote.contains(&old));
    assert_eq!(read_back(&volume, "/dst.txt").await, b"new");
    assert!(!volume.resource("/src.txt").unwrap().exists().await.unwrap());
}

#[tokio::test]
async fn collections_do_not_move() {
    let remote = MemoryRemote::new();
    remote.add_folder(&remote.root(), "a");
    let volume = volume_for(remote).await;

    let err = volume
        .resource("/a")
        .unwrap()
        .move_to("/b", &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::MethodNotAllowed(_)));
}

#[tokio::test]
async fn move_requires_destination_parent_tree() {
    let remote = MemoryRemote::new();
    remote.add_file(&remote.root(), "f.txt", b"x");
    let volume = volume_for(remote).await;

    let err = volume
        .resource("/f.txt")
        .unwrap()
        .move_to("/missing/f.txt", &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::TreeIncomplete(_)));
}

#[tokio::test]
async fn properties_hydrate_once_from_remote_metadata() {
    let remote = MemoryRemote::new();
    let uid = remote.add_file(&remote.root(), "f.txt", b"x");
    remote.set_attribute(&uid, "origin", "scanner");
    let volume = volume_for(remote.clone()).await;
    let resource = volume.resource("/f.txt").unwrap();

    let props = resource.dead_props().await.unwrap();
    assert_eq!(props.len(), 1);
    assert_eq!(props[0].name, "origin");
    assert_eq!(props[0].value, "scanner");
    assert_eq!(props[0].namespace.as_deref(), Some(REMOTE_PROP_NAMESPACE));

    // The local record is now authoritative: later backend changes are
    // not re-imported.
    remote.set_attribute(&uid, "late", "ignored");
    let props = resource.dead_props().await.unwrap();
    assert_eq!(props.len(), 1);
}

#[tokio::test]
async fn patch_sets_and_removes_properties() {
    let remote = MemoryRemote::new();
    remote.add_file(&remote.root(), "f.txt", b"x");
    let volume = volume_for(remote).await;
    let resource = volume.resource("/f.txt").unwrap();

    let set = vec![
        DeadProp {
            name: "color".to_string(),
            prefix: None,
            namespace: Some("urn:example".to_string()),
            value: "blue".to_string(),
        },
        DeadProp {
            name: "shape".to_string(),
            prefix: None,
            namespace: Some("urn:example".to_string()),
            value: "round".to_string(),
        },
    ];
    resource.patch_dead_props(&alice(), set, vec![]).await.unwrap();

    let props = resource
        .patch_dead_props(
            &alice(),
            vec![DeadProp {
                name: "color".to_string(),
                prefix: None,
                namespace: Some("urn:example".to_string()),
                value: "red".to_string(),
            }],
            vec![(Some("urn:example".to_string()), "shape".to_string())],
        )
        .await
        .unwrap();

    assert_eq!(props.len(), 1);
    assert_eq!(props[0].name, "color");
    assert_eq!(props[0].value, "red");
}

#[tokio::test]
async fn metadata_follows_a_move_by_identity() {
    let remote = MemoryRemote::new();
    remote.add_folder(&remote.root(), "B");
    remote.add_file(&remote.root(), "f.txt", b"x");
    let volume = volume_for(remote).await;

    volume
        .resource("/f.txt")
        .unwrap()
        .patch_dead_props(
            &alice(),
            vec![DeadProp {
                name: "sticky".to_string(),
                prefix: None,
                namespace: None,
                value: "yes".to_string(),
            }],
            vec![],
        )
        .await
        .unwrap();

    volume
        .resource("/f.txt")
        .unwrap()
        .move_to("/B/f.txt", &alice())
        .await
        .unwrap();

    let props = volume
        .resource("/B/f.txt")
        .unwrap()
        .dead_props()
        .await
        .unwrap();
    assert!(props.iter().any(|p| p.name == "sticky" && p.value == "yes"));
}

#[tokio::test]
async fn quota_exhaustion_surfaces_as_insufficient_storage() {
    let remote = MemoryRemote::new();
    remote.set_quota(Some(2));
    let volume = volume_for(remote).await;

    let err = volume
        .resource("/big.bin")
        .unwrap()
        .write(&alice(), source(b"too large"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InsufficientStorage));
}

#[tokio::test]
async fn read_only_mounts_refuse_mutation() {
    let remote = MemoryRemote::new();
    remote.add_file(&remote.root(), "f.txt", b"x");
    let mut config = MountConfig::default();
    config.read_only = true;
    let volume = volume_with_config(remote, config).await;

    let resource = volume.resource("/f.txt").unwrap();
    assert!(matches!(
        resource.write(&alice(), source(b"y")).await.unwrap_err(),
        BridgeError::Forbidden(_)
    ));
    assert!(matches!(
        resource.delete(&alice()).await.unwrap_err(),
        BridgeError::Forbidden(_)
    ));
    assert!(matches!(
        resource.move_to("/g.txt", &alice()).await.unwrap_err(),
        BridgeError::Forbidden(_)
    ));
    // Reads still work.
    assert_eq!(read_back(&volume, "/f.txt").await, b"x");
}

#[tokio::test]
async fn canonical_paths_slash_collections_only() {
    let remote = MemoryRemote::new();
    let docs = remote.add_folder(&remote.root(), "docs");
    remote.add_file(&docs, "f.txt", b"x");
    let volume = volume_for(remote).await;

    assert_eq!(
        volume
            .resource("/docs")
            .unwrap()
            .canonical_path()
            .await
            .unwrap(),
        "/docs/"
    );
    assert_eq!(
        volume
            .resource("/docs/f.txt")
            .unwrap()
            .canonical_path()
            .await
            .unwrap(),
        "/docs/f.txt"
    );
}

#[tokio::test]
async fn degraded_nodes_project_into_usable_snapshots() {
    let remote = MemoryRemote::new();
    let uid = remote.add_file(&remote.root(), "f.txt", b"payload");
    remote.mark_degraded(&uid);
    let volume = volume_for(remote).await;

    let node = volume.resource("/f.txt").unwrap().node().await.unwrap();
    assert_eq!(node.uid, uid);
    assert_eq!(node.name, "f.txt");
    assert_eq!(node.size, 0); // degraded field falls back to zero
}

#[tokio::test]
async fn listing_a_file_is_not_allowed() {
    let remote = MemoryRemote::new();
    remote.add_file(&remote.root(), "f.txt", b"x");
    let volume = volume_for(remote).await;

    let err = volume.resource("/f.txt").unwrap().listing().await.unwrap_err();
    assert!(matches!(err, BridgeError::MethodNotAllowed(_)));

    let listing = volume.resource("/").unwrap().listing().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "f.txt");
}
