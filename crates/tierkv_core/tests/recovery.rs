//! Crash recovery tests.
//!
//! A crash is simulated by copying the home directory while the database
//! is still open, then opening the copy.

mod common;

use common::{segment_file, wal_file, Harness, FAST};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use tierkv_core::{ErrorKind, Kvdb, PutFlags};

fn truncate(path: &Path, len: u64) {
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_len(len)
        .unwrap();
}

#[test]
fn committed_transactions_replay_from_wal() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();

    kvs.put(b"single", b"1").unwrap();
    let txn = db.transaction().unwrap();
    txn.begin().unwrap();
    kvs.put_with(Some(&txn), b"multi-a", b"2", PutFlags::default()).unwrap();
    kvs.put_with(Some(&txn), b"multi-b", b"3", PutFlags::default()).unwrap();
    kvs.delete_in_txn(&txn, b"single").unwrap();
    txn.commit().unwrap();

    let pending = db.transaction().unwrap();
    pending.begin().unwrap();
    kvs.put_with(Some(&pending), b"uncommitted", b"x", PutFlags::default()).unwrap();

    let image = h.crash_image(db.home());
    truncate(&segment_file(&image, 1), 0);

    let recovered = Kvdb::open(&h.rt, &image, FAST).unwrap();
    let c = recovered.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"single").unwrap(), None);
    assert_eq!(c.get(b"multi-a").unwrap().as_deref(), Some(&b"2"[..]));
    assert_eq!(c.get(b"multi-b").unwrap().as_deref(), Some(&b"3"[..]));
    assert_eq!(c.get(b"uncommitted").unwrap(), None);

    c.put(b"after", b"4").unwrap();
    c.put(b"multi-a", b"5").unwrap();
    assert_eq!(c.get(b"multi-a").unwrap().as_deref(), Some(&b"5"[..]));
}

#[test]
fn torn_wal_tail_drops_last_transaction() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();
    kvs.put(b"first", b"1").unwrap();
    kvs.put(b"second", b"2").unwrap();

    let image = h.crash_image(db.home());
    truncate(&segment_file(&image, 1), 0);
    let wal = wal_file(&image);
    let len = fs::metadata(&wal).unwrap().len();
    truncate(&wal, len - 3);

    let recovered = Kvdb::open(&h.rt, &image, FAST).unwrap();
    let c = recovered.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"first").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(c.get(b"second").unwrap(), None);

    c.put(b"third", b"3").unwrap();
    recovered.close().unwrap();

    let reopened = Kvdb::open(&h.rt, &image, FAST).unwrap();
    let c = reopened.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"first").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(c.get(b"second").unwrap(), None);
    assert_eq!(c.get(b"third").unwrap().as_deref(), Some(&b"3"[..]));
}

#[test]
fn corrupt_segment_fails_open() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    db.open_collection("c", &[]).unwrap().put(b"key", b"value").unwrap();
    db.close().unwrap();

    let segment = segment_file(&h.home(), 1);
    let mut data = fs::read(&segment).unwrap();
    data[19 + b"key".len()] ^= 0xff;
    fs::write(&segment, data).unwrap();

    assert_eq!(
        Kvdb::open(&h.rt, h.home(), FAST).unwrap_err().kind(),
        ErrorKind::IoFailure
    );
    Kvdb::destroy(&h.rt, h.home()).unwrap();
    assert!(!h.home().exists());
}

#[test]
fn clean_reopen_continues_sequences() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();
    kvs.put(b"k", b"v1").unwrap();
    kvs.put(b"gone", b"x").unwrap();
    kvs.delete(b"gone").unwrap();
    db.close().unwrap();

    let db = h.open(FAST);
    let kvs = db.open_collection("c", &[]).unwrap();
    assert_eq!(kvs.get(b"k").unwrap().as_deref(), Some(&b"v1"[..]));
    assert_eq!(kvs.get(b"gone").unwrap(), None);

    let txn = db.transaction().unwrap();
    txn.begin().unwrap();
    kvs.put(b"k", b"v2").unwrap();
    kvs.put_with(Some(&txn), b"k", b"v3", PutFlags::default()).unwrap();
    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::Conflict);
    assert_eq!(kvs.get(b"k").unwrap().as_deref(), Some(&b"v2"[..]));
}

#[test]
fn randomized_contents_survive_crash_and_reopen() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("plain", &[]).unwrap();
    db.create_collection("packed", &["prefix.length=2"]).unwrap();
    let plain = db.open_collection("plain", &[]).unwrap();
    let packed = db
        .open_collection("packed", &["compression.value.algorithm=zstd"])
        .unwrap();

    let mut rng = StdRng::seed_from_u64(0x7ee7);
    let mut model: BTreeMap<(bool, Vec<u8>), Vec<u8>> = BTreeMap::new();
    for _ in 0..300 {
        let to_packed = rng.gen_bool(0.5);
        let key: Vec<u8> = (0..rng.gen_range(2..12))
            .map(|_| rng.gen_range(b'a'..=b'f'))
            .collect();
        let kvs = if to_packed { &packed } else { &plain };
        if rng.gen_ratio(1, 5) {
            kvs.delete(&key).unwrap();
            model.remove(&(to_packed, key));
        } else {
            let fill = rng.gen::<u8>();
            let value = vec![fill; rng.gen_range(0..2048)];
            kvs.put(&key, &value).unwrap();
            model.insert((to_packed, key), value);
        }
    }

    let verify = |db: &Kvdb| {
        let plain = db.open_collection("plain", &[]).unwrap();
        let packed = db.open_collection("packed", &[]).unwrap();
        for ((to_packed, key), value) in &model {
            let kvs = if *to_packed { &packed } else { &plain };
            assert_eq!(kvs.get(key).unwrap().as_ref(), Some(value), "{key:?}");
        }
        let count = |kvs: &tierkv_core::Kvs| {
            let mut cursor = kvs.cursor(Default::default()).unwrap();
            std::iter::from_fn(|| cursor.read().unwrap()).count()
        };
        assert_eq!(count(&plain) + count(&packed), model.len());
    };

    let image = h.crash_image(db.home());
    truncate(&segment_file(&image, 2), 0);
    verify(&Kvdb::open(&h.rt, &image, FAST).unwrap());

    db.close().unwrap();
    verify(&h.open(FAST));
}

#[test]
fn dropped_collection_stays_dropped() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    db.create_collection("keep", &[]).unwrap();
    db.open_collection("c", &[]).unwrap().put(b"k", b"v").unwrap();
    db.open_collection("keep", &[]).unwrap().put(b"k", b"v").unwrap();
    db.drop_collection("c").unwrap();

    let image = h.crash_image(db.home());
    let recovered = Kvdb::open(&h.rt, &image, FAST).unwrap();
    assert_eq!(recovered.collection_names().unwrap(), vec!["keep"]);
    let keep = recovered.open_collection("keep", &[]).unwrap();
    assert_eq!(keep.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));

    recovered.create_collection("c", &[]).unwrap();
    let c = recovered.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"k").unwrap(), None);
}

#[test]
fn partially_stored_transaction_completes_from_wal() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();

    let txn = db.transaction().unwrap();
    txn.begin().unwrap();
    kvs.put_with(Some(&txn), b"a", b"1", PutFlags::default()).unwrap();
    kvs.put_with(Some(&txn), b"b", b"2", PutFlags::default()).unwrap();
    txn.commit().unwrap();

    // Keep only the record for "a": a crash between the two appends.
    let image = h.crash_image(db.home());
    let segment = segment_file(&image, 1);
    assert_eq!(fs::metadata(&segment).unwrap().len(), 50);
    truncate(&segment, 25);

    let recovered = Kvdb::open(&h.rt, &image, FAST).unwrap();
    let c = recovered.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(c.get(b"b").unwrap().as_deref(), Some(&b"2"[..]));
    recovered.close().unwrap();

    let reopened = Kvdb::open(&h.rt, &image, FAST).unwrap();
    let c = reopened.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"b").unwrap().as_deref(), Some(&b"2"[..]));
}

#[test]
fn read_only_open_leaves_crash_image_untouched() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();
    kvs.put(b"first", b"1").unwrap();
    kvs.put(b"second", b"2").unwrap();

    let image = h.crash_image(db.home());
    let segment = segment_file(&image, 1);
    fs::write(&segment, [9, 0, 0]).unwrap();
    let wal = wal_file(&image);
    let wal_len = fs::metadata(&wal).unwrap().len();
    truncate(&wal, wal_len - 3);
    let wal_before = fs::read(&wal).unwrap();

    let ro = Kvdb::open(&h.rt, &image, &["read_only=true"]).unwrap();
    let c = ro.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"first").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(c.get(b"second").unwrap(), None);
    ro.close().unwrap();

    assert_eq!(fs::read(&wal).unwrap(), wal_before);
    assert_eq!(fs::read(&segment).unwrap(), [9, 0, 0]);

    let rw = Kvdb::open(&h.rt, &image, FAST).unwrap();
    let c = rw.open_collection("c", &[]).unwrap();
    assert_eq!(c.get(b"first").unwrap().as_deref(), Some(&b"1"[..]));
    assert!(fs::metadata(&wal).unwrap().len() < wal_len - 3);
}

#[test]
fn synced_pairs_survive_crash_and_reopen() {
    let h = Harness::new();
    let db = h.fresh(FAST);
    db.create_collection("c", &[]).unwrap();
    let kvs = db.open_collection("c", &[]).unwrap();

    let mut rng = StdRng::seed_from_u64(1000);
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    while model.len() < 1000 {
        let key: Vec<u8> = (0..rng.gen_range(8..16)).map(|_| rng.gen()).collect();
        let value: Vec<u8> = (0..rng.gen_range(0..256)).map(|_| rng.gen()).collect();
        if model.contains_key(&key) {
            continue;
        }
        kvs.put(&key, &value).unwrap();
        model.insert(key, value);
    }
    db.sync().unwrap();

    let verify = |db: &Kvdb| {
        let kvs = db.open_collection("c", &[]).unwrap();
        for (key, value) in &model {
            assert_eq!(kvs.get(key).unwrap().as_ref(), Some(value), "{key:?}");
        }
        let mut cursor = kvs.cursor(Default::default()).unwrap();
        assert_eq!(std::iter::from_fn(|| cursor.read().unwrap()).count(), 1000);
    };

    let image = h.crash_image(db.home());
    verify(&Kvdb::open(&h.rt, &image, FAST).unwrap());

    db.close().unwrap();
    verify(&h.open(FAST));
}
