//! Database and collection lifecycle tests.

mod common;

use common::{Harness, FAST};
use tierkv_core::limits::KVS_COUNT_MAX;
use tierkv_core::{
    CompactFlags, ErrorKind, Kvdb, KvsCreateConfig, MediaClass, MediaPolicy,
};

#[test]
fn create_open_destroy() {
    let h = Harness::new();
    assert_eq!(
        Kvdb::open(&h.rt, h.home(), &[]).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    h.create(&[]);
    assert_eq!(
        Kvdb::create(&h.rt, h.home(), &[]).unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );

    let db = h.open(FAST);
    assert_eq!(
        Kvdb::open(&h.rt, h.home(), &[]).unwrap_err().kind(),
        ErrorKind::Busy
    );
    assert_eq!(
        Kvdb::destroy(&h.rt, h.home()).unwrap_err().kind(),
        ErrorKind::Busy
    );

    db.close().unwrap();
    db.close().unwrap();
    Kvdb::destroy(&h.rt, h.home()).unwrap();
    assert!(!h.home().exists());
    assert_eq!(
        Kvdb::destroy(&h.rt, h.home()).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn bad_open_params() {
    let h = Harness::new();
    h.create(&[]);
    for params in [
        &["durability.enabled=maybe"][..],
        &["compaction.samp_lwm_pct=150", "compaction.samp_hwm_pct=120"],
        &["unknown=1"],
        &["read_only"],
    ] {
        assert_eq!(
            Kvdb::open(&h.rt, h.home(), params).unwrap_err().kind(),
            ErrorKind::InvalidArgument,
            "{params:?}"
        );
    }
    h.open(FAST).close().unwrap();
}

#[test]
fn collections_are_listed_sorted_and_persist() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    for name in ["zeta", "alpha", "mid-1", "under_score"] {
        db.create_collection(name, &[]).unwrap();
    }
    assert_eq!(
        db.create_collection("alpha", &[]).unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );
    let long = "x".repeat(33);
    for bad in ["", "has space", "dot.ted", long.as_str()] {
        assert_eq!(
            db.create_collection(bad, &[]).unwrap_err().kind(),
            ErrorKind::InvalidArgument,
            "{bad:?}"
        );
    }
    assert_eq!(
        db.create_collection("p", &["prefix.length=33"])
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );

    let expected = vec!["alpha", "mid-1", "under_score", "zeta"];
    assert_eq!(db.collection_names().unwrap(), expected);
    db.open_collection("zeta", &[]).unwrap().put(b"k", b"v").unwrap();
    db.close().unwrap();

    let db = h.open(FAST);
    assert_eq!(db.collection_names().unwrap(), expected);
    let zeta = db.open_collection("zeta", &[]).unwrap();
    assert_eq!(zeta.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
    assert_eq!(
        db.open_collection("omega", &[]).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(db.drop_collection("omega").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn collection_limit() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    for i in 0..KVS_COUNT_MAX {
        db.create_collection(&format!("c{i}"), &[]).unwrap();
    }
    assert_eq!(
        db.create_collection("one-more", &[]).unwrap_err().kind(),
        ErrorKind::ResourceExhausted
    );

    db.drop_collection("c0").unwrap();
    db.create_collection("one-more", &[]).unwrap();
    assert_eq!(db.collection_names().unwrap().len(), KVS_COUNT_MAX);
}

#[test]
fn media_policies_follow_configured_tiers() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    assert_eq!(
        db.create_collection("p", &["mclass.policy=pmem_only"])
            .unwrap_err()
            .kind(),
        ErrorKind::NotSupported
    );
    assert_eq!(
        db.create_collection_with("s", KvsCreateConfig::new().policy(MediaPolicy::StagingOnly))
            .unwrap_err()
            .kind(),
        ErrorKind::NotSupported
    );
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();
    assert_eq!(kvs.media_class(), MediaClass::Capacity);
    assert_eq!(
        db.mclass_info(MediaClass::Pmem).unwrap_err().kind(),
        ErrorKind::NotSupported
    );
}

#[test]
fn staging_tier_holds_auto_collections() {
    let h = Harness::new();
    let staging = h.dir.path().join("fast");
    let param = format!("storage.staging.path={}", staging.display());
    Kvdb::create(&h.rt, h.home(), &[param.as_str()]).unwrap();
    assert!(staging.is_dir());

    let db = h.open(FAST);
    db.create_collection("auto", &[]).unwrap();
    db.create_collection("bulk", &["mclass.policy=capacity_only"])
        .unwrap();
    let auto = db.open_collection("auto", &[]).unwrap();
    let bulk = db.open_collection("bulk", &[]).unwrap();
    assert_eq!(auto.media_class(), MediaClass::Staging);
    assert_eq!(bulk.media_class(), MediaClass::Capacity);

    let before = db.mclass_info(MediaClass::Staging).unwrap();
    assert_eq!(before.path, staging);
    for i in 0..100u32 {
        auto.put(&i.to_be_bytes(), &[7u8; 100]).unwrap();
    }
    db.flush().unwrap();
    let after = db.mclass_info(MediaClass::Staging).unwrap();
    assert!(after.used_bytes >= before.used_bytes + 100 * 100);
    assert!(after.allocated_bytes >= after.used_bytes);
    assert_eq!(after.allocated_bytes % 4096, 0);

    db.close().unwrap();
    Kvdb::destroy(&h.rt, h.home()).unwrap();
    assert!(!staging.exists());
    assert!(!h.home().exists());
}

#[test]
fn read_only_rejects_writes() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    db.open_collection("c", &[]).unwrap().put(b"k", b"v").unwrap();
    db.close().unwrap();

    let db = h.open(&["read_only=true"]);
    assert!(db.is_read_only());
    let kvs = db.open_collection("c", &[]).unwrap();
    assert_eq!(kvs.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));

    let invalid_state = |r: tierkv_core::CoreResult<()>| {
        assert_eq!(r.unwrap_err().kind(), ErrorKind::InvalidState);
    };
    invalid_state(kvs.put(b"k", b"w"));
    invalid_state(kvs.delete(b"k"));
    invalid_state(db.create_collection("d", &[]));
    invalid_state(db.drop_collection("c"));
    invalid_state(db.compact(CompactFlags::default()));

    let txn = db.transaction().unwrap();
    txn.begin().unwrap();
    assert_eq!(kvs.get_in_txn(&txn, b"k").unwrap().as_deref(), Some(&b"v"[..]));
    invalid_state(kvs.put_with(Some(&txn), b"k", b"w", Default::default()));
    txn.commit().unwrap();

    db.sync().unwrap();
    db.close().unwrap();
    let db = h.open(FAST);
    let kvs = db.open_collection("c", &[]).unwrap();
    assert_eq!(kvs.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));
}

#[test]
fn closed_database_invalidates_handles() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();
    let txn = db.transaction().unwrap();
    db.close().unwrap();

    assert_eq!(kvs.get(b"k").unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(txn.begin().unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(db.collection_names().unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(db.transaction().unwrap_err().kind(), ErrorKind::InvalidHandle);
    assert_eq!(db.sync().unwrap_err().kind(), ErrorKind::InvalidHandle);
}

#[test]
fn stats_count_operations() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();
    kvs.put(b"a", b"12345").unwrap();
    kvs.get(b"a").unwrap();
    kvs.delete(b"a").unwrap();

    let stats = db.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.bytes_written, 5);
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.bytes_read, 5);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.commits, 2);

    db.sync().unwrap();
    assert_eq!(db.stats().checkpoints, 1);
}
