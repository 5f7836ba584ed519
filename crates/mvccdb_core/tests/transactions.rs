//! End-to-end transaction flows over the database façade.

use mvccdb_core::{CoreError, TransactionId};
use mvccdb_storage::StorageBackend;
use mvccdb_testkit::prelude::*;

#[test]
fn passthrough_put_get_del() {
    let (db, _) = memory_db();

    db.put(b"k", b"v1").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"v1");

    db.del(b"k").unwrap();
    assert!(matches!(db.get(b"k"), Err(CoreError::KeyNotFound)));
}

#[test]
fn rollback_discards_staged_writes() {
    let (db, backend) = memory_db();

    db.begin().unwrap();
    db.put(b"k", b"v1").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"v1");
    db.rollback().unwrap();

    assert!(matches!(db.get(b"k"), Err(CoreError::KeyNotFound)));
    assert!(backend.is_empty());
}

#[test]
fn commit_applies_net_effect() {
    let (db, backend) = memory_db();

    db.begin().unwrap();
    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.del(b"a").unwrap();
    db.commit().unwrap();

    let snapshot = backend.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[b"b".as_slice()], b"2");
}

#[test]
fn disjoint_prepared_children_both_merge() {
    let (db, backend) = memory_db();

    db.begin().unwrap();
    let c1 = db.prepare(TransactionId::new(1)).unwrap();
    let c2 = db.prepare(TransactionId::new(2)).unwrap();

    c1.put(b"x", b"1").unwrap();
    c2.put(b"y", b"2").unwrap();

    assert!(c1.check_and_update().unwrap().is_empty());
    assert!(c2.check_and_update().unwrap().is_empty());
    db.commit().unwrap();

    assert_eq!(backend.get(b"x").unwrap(), b"1");
    assert_eq!(backend.get(b"y").unwrap(), b"2");
}

#[test]
fn conflicting_prepared_children_first_committer_wins() {
    let (db, backend) = seeded_db([(b"k".to_vec(), b"v0".to_vec())]);

    db.begin().unwrap();
    let c1 = db.prepare(TransactionId::new(1)).unwrap();
    let c2 = db.prepare(TransactionId::new(2)).unwrap();

    assert_eq!(c1.get(b"k").unwrap(), b"v0");
    assert_eq!(c2.get(b"k").unwrap(), b"v0");
    c1.put(b"k", b"v1").unwrap();
    c2.put(b"k", b"v2").unwrap();

    assert!(c1.check_and_update().unwrap().is_empty());
    let err = c2.check_and_update().unwrap_err();
    assert!(matches!(
        err,
        CoreError::ConflictWithSibling(t) if t == TransactionId::new(1)
    ));

    c2.reset().unwrap();
    db.commit().unwrap();

    assert_eq!(backend.get(b"k").unwrap(), b"v1");
}

#[test]
fn commit_blocked_until_child_merges() {
    let (db, backend) = memory_db();

    db.begin().unwrap();
    let child = db.prepare(TransactionId::new(1)).unwrap();
    child.put(b"k", b"v").unwrap();

    assert!(matches!(db.commit(), Err(CoreError::PreparedDbIsDirty)));
    assert!(backend.is_empty());
    assert!(db.is_in_transaction());
    assert_eq!(child.get(b"k").unwrap(), b"v");

    assert!(child.check_and_update().unwrap().is_empty());
    db.commit().unwrap();
    assert_eq!(backend.get(b"k").unwrap(), b"v");
}

#[test]
fn loser_rereads_and_succeeds_after_reset() {
    let (db, backend) = seeded_db([(b"k".to_vec(), b"v0".to_vec())]);

    db.begin().unwrap();
    let c1 = db.prepare(TransactionId::new(1)).unwrap();
    let c2 = db.prepare(TransactionId::new(2)).unwrap();

    c1.get(b"k").unwrap();
    c2.get(b"k").unwrap();
    c1.put(b"k", b"v1").unwrap();
    c2.put(b"k", b"v2").unwrap();

    assert!(c1.check_and_update().unwrap().is_empty());
    assert!(c2.check_and_update().is_err());

    // Re-execute the loser against the merged state.
    c2.reset().unwrap();
    assert_eq!(c2.get(b"k").unwrap(), b"v1");
    c2.put(b"k", b"v2").unwrap();

    // This time the merge supplants the first child's write.
    let supplanted = c2.check_and_update().unwrap();
    assert_eq!(supplanted, vec![TransactionId::new(1)]);

    db.commit().unwrap();
    assert_eq!(backend.get(b"k").unwrap(), b"v2");
}

#[test]
fn reads_inside_child_are_snapshotted_at_first_touch() {
    let (db, _) = seeded_db([(b"k".to_vec(), b"v0".to_vec())]);

    db.begin().unwrap();
    let c1 = db.prepare(TransactionId::new(1)).unwrap();
    let c2 = db.prepare(TransactionId::new(2)).unwrap();

    // c2 touches k before c1's merge lands.
    assert_eq!(c2.get(b"k").unwrap(), b"v0");

    c1.put(b"k", b"v1").unwrap();
    assert!(c1.check_and_update().unwrap().is_empty());

    // c2 keeps its snapshot; a fresh sibling sees the merged value.
    assert_eq!(c2.get(b"k").unwrap(), b"v0");
    let c3 = db.prepare(TransactionId::new(3)).unwrap();
    assert_eq!(c3.get(b"k").unwrap(), b"v1");
}

#[test]
fn sequential_transactions_reuse_the_root() {
    let (db, backend) = memory_db();

    db.begin().unwrap();
    db.put(b"a", b"1").unwrap();
    db.commit().unwrap();

    db.begin().unwrap();
    db.del(b"a").unwrap();
    db.put(b"b", b"2").unwrap();
    db.commit().unwrap();

    let snapshot = backend.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[b"b".as_slice()], b"2");
}

#[test]
fn concurrent_disjoint_children_merge_from_threads() {
    let (db, backend) = memory_db();
    db.begin().unwrap();

    let c1 = db.prepare(TransactionId::new(1)).unwrap();
    let c2 = db.prepare(TransactionId::new(2)).unwrap();

    let t1 = std::thread::spawn(move || {
        for i in 0..32u8 {
            c1.put(&[b'a', i], &[i]).unwrap();
        }
        c1.check_and_update().unwrap()
    });
    let t2 = std::thread::spawn(move || {
        for i in 0..32u8 {
            c2.put(&[b'b', i], &[i]).unwrap();
        }
        c2.check_and_update().unwrap()
    });

    assert!(t1.join().unwrap().is_empty());
    assert!(t2.join().unwrap().is_empty());

    db.commit().unwrap();
    assert_eq!(backend.len(), 64);
    assert_eq!(backend.get(b"a\x05").unwrap(), [5u8]);
    assert_eq!(backend.get(b"b\x1f").unwrap(), [31u8]);
}

#[test]
fn file_backed_database_survives_reopen() {
    use mvccdb_core::Database;
    use mvccdb_storage::FileBackend;
    use std::sync::Arc;

    let fixture = file_db();
    fixture.db.begin().unwrap();
    fixture.db.put(b"k", b"v").unwrap();
    fixture.db.commit().unwrap();

    let path = fixture.path.clone();
    let backend = Arc::new(FileBackend::open(&path).unwrap());
    let reopened = Database::open(backend);
    assert_eq!(reopened.get(b"k").unwrap(), b"v");
}
