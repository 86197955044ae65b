//! Runtime lifecycle tests.

mod common;

use common::Harness;
use tierkv_core::{ErrorKind, Kvdb, Runtime};

#[test]
fn runtime_lifecycle() {
    let h = Harness::new();
    assert_eq!(
        Runtime::init(None, &[]).unwrap_err().kind(),
        ErrorKind::InvalidState
    );

    h.create(&[]);
    let db = h.open(&[]);
    assert_eq!(h.rt.finalize().unwrap_err().kind(), ErrorKind::Busy);

    db.close().unwrap();
    h.rt.finalize().unwrap();
    h.rt.finalize().unwrap();
    assert_eq!(
        Kvdb::open(&h.rt, h.home(), &[]).unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    assert_eq!(
        Kvdb::create(&h.rt, h.dir.path().join("other"), &[])
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidState
    );

    let again = Runtime::init(None, &["logging.level=3"]).unwrap();
    let db = Kvdb::open(&again, h.home(), &[]).unwrap();
    db.close().unwrap();
    again.finalize().unwrap();
}

#[test]
fn bad_runtime_params_leave_no_runtime() {
    let h = Harness::new();
    h.rt.finalize().unwrap();
    assert_eq!(
        Runtime::init(None, &["no.such.key=1"]).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    Runtime::init(None, &[]).unwrap().finalize().unwrap();
}
