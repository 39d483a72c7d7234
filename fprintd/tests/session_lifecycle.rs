//! Exercises `DeviceSession` end to end through its public API: claim
//! exclusivity, the identify fallback path, garbage collection under a
//! full device, and bulk deletion with a partial failure.

use std::sync::Arc;
use std::time::Duration;

use fprintd::device::capability::{Features, GalleryPrint};
use fprintd::device::claim::OperationName;
use fprintd::device::mock::MockCapability;
use fprintd::device::session::{DeviceEvent, DeviceSession};
use fprintd::device::state_machine::OperationState;
use fprintd::error::FprintError;
use fprintd::finger::Finger;
use fprintd::store::{DeviceIdentity, MemoryStore, Print, PrintStore};

fn features(identify: bool, storage_list: bool) -> Features {
    Features { has_identify: identify, has_storage: true, has_storage_list: storage_list }
}

async fn wait_for_done(events: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> String {
    for _ in 0..20 {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(DeviceEvent::EnrollStatus { result, done: true })) => return result,
            Ok(Ok(DeviceEvent::VerifyStatus { result, done: true })) => return result,
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    panic!("no terminal event observed in time");
}

#[tokio::test]
async fn a_second_caller_cannot_claim_or_act_on_an_already_claimed_device() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(DeviceSession::new(
        Arc::new(MockCapability::new("mock", "dev-0", 1, features(false, false))),
        store,
    ));

    session.claim("caller-a", "alice").unwrap();
    session.open().await.unwrap();

    let err = session.claim("caller-b", "bob").unwrap_err();
    assert_eq!(err, FprintError::AlreadyInUse);

    let err = session.claims.check("caller-b", OperationName::VerifyStart).unwrap_err();
    assert_eq!(err, FprintError::AlreadyInUse);

    session.release("caller-a");
    assert!(session.claims.session().is_none());
    assert!(session.claim("caller-b", "bob").is_ok());
}

#[tokio::test]
async fn identify_falls_back_across_multiple_enrolled_prints() {
    let store = Arc::new(MemoryStore::new());
    let template = vec![4, 2];
    let capability = MockCapability::new("mock", "dev-0", 1, features(true, false))
        .with_onboard_prints(vec![GalleryPrint { finger: Finger::RightThumb, username: "gus".into(), template: template.clone() }]);
    let session = Arc::new(DeviceSession::new(Arc::new(capability), store.clone()));
    session.open().await.unwrap();

    for (finger, tpl) in [(Finger::LeftThumb, vec![1]), (Finger::RightThumb, template)] {
        let print = Print::new(
            "gus",
            finger,
            session.identity().clone(),
            chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            tpl,
        );
        store.save(&print).unwrap();
    }

    let mut events = session.subscribe();
    session.verify_start(Finger::Unknown, "gus").await.unwrap();
    assert_eq!(session.current_state(), OperationState::Identify);

    assert_eq!(wait_for_done(&mut events).await, "verify-match");
}

#[tokio::test]
async fn enrollment_evicts_the_oldest_print_when_the_device_reports_full() {
    let store = Arc::new(MemoryStore::new());
    let capability = MockCapability::new("mock", "dev-0", 1, features(false, true))
        .with_onboard_prints(vec![GalleryPrint { finger: Finger::LeftIndexFinger, username: "hank".into(), template: vec![7] }]);
    capability.push_enroll_result(Err(fprintd::device::capability::CapabilityError::DataFull));
    let session = Arc::new(DeviceSession::new(Arc::new(capability), store));
    session.open().await.unwrap();

    let mut events = session.subscribe();
    session.enroll_start(Finger::RightLittleFinger, "ivy").await.unwrap();

    assert_eq!(wait_for_done(&mut events).await, "enroll-completed-ok");
    assert_eq!(session.current_state(), OperationState::Open);
}

#[tokio::test]
async fn bulk_delete_reports_device_failure_but_still_clears_the_store() {
    let store = Arc::new(MemoryStore::new());
    let capability = MockCapability::new("mock", "dev-0", 1, features(false, true));
    capability.set_delete_should_fail(true);
    let session = Arc::new(DeviceSession::new(Arc::new(capability), store.clone()));
    session.open().await.unwrap();

    for finger in [Finger::LeftThumb, Finger::RightThumb] {
        let print = Print::new(
            "jill",
            finger,
            session.identity().clone(),
            chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            vec![1],
        );
        store.save(&print).unwrap();
    }

    let err = session.delete_enrolled_fingers("jill").await.unwrap_err();
    assert_eq!(err, FprintError::PrintsNotDeletedFromDevice);

    let device = DeviceIdentity::new("mock", "dev-0");
    assert!(store.discover_prints(&device, "jill").unwrap().is_empty());
}
