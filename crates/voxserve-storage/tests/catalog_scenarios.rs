//! End-to-end store scenarios spanning users, datasets, shares, and tags.

use tempfile::TempDir;
use voxserve_core::CatalogError;
use voxserve_storage::CatalogStore;

fn open_store() -> (TempDir, CatalogStore) {
    let temp = TempDir::new().unwrap();
    let store = CatalogStore::open(temp.path().join("catalog.db")).unwrap();
    (temp, store)
}

#[test]
fn share_lifecycle_round_trip() {
    let (_temp, store) = open_store();

    store.create_user("m1", "Manager", "hash-m1", true).unwrap();
    store.create_user("u1", "Owner", "hash-u1", false).unwrap();
    store.create_user("u2", "Reader", "hash-u2", false).unwrap();

    // u1 registers a private dataset
    let id = store
        .create_dataset("u1", "A", "drosophila nightly", "/data/a.xml", false)
        .unwrap();

    // The manager's private listing shows it with its owner
    let private = store.list_private().unwrap();
    assert_eq!(private.len(), 1);
    assert_eq!(private[0].name, "A");
    assert_eq!(private[0].owner_id, "u1");

    // Read-only share for u2 surfaces in u2's shared listing
    store.grant_share(id, "u2", true, false).unwrap();
    let shared = store.list_shared("u2").unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].id, id);

    // Revoking removes it again
    store.revoke_share(id, "u2").unwrap();
    assert!(store.list_shared("u2").unwrap().is_empty());

    // Removing u1 while the dataset exists is disallowed (no cascade)
    assert!(matches!(
        store.remove_user("u1"),
        Err(CatalogError::Conflict(_))
    ));
    assert!(store.get_user("u1").is_ok());
    assert!(store.get_dataset(id).is_ok());

    // Once the dataset is gone, the user can be removed
    store.remove_dataset(id).unwrap();
    store.remove_user("u1").unwrap();
    assert!(matches!(
        store.get_user("u1"),
        Err(CatalogError::NotFound(_))
    ));
}

#[test]
fn tags_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("catalog.db");

    let id = {
        let store = CatalogStore::open(&path).unwrap();
        store.create_user("u1", "Owner", "h", false).unwrap();
        let id = store
            .create_dataset("u1", "stack", "", "/data/stack.xml", true)
            .unwrap();
        store.add_tag(id, "confocal").unwrap();
        store.add_tag(id, "2016").unwrap();
        id
    };

    // A fresh handle over the same file sees the same records
    let store = CatalogStore::open(&path).unwrap();
    let ds = store.get_dataset(id).unwrap();
    assert!(ds.tags.contains("confocal"));
    assert!(ds.tags.contains("2016"));
    assert_eq!(store.list_public_by_tag("confocal").unwrap().len(), 1);
}
