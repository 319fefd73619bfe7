//! Online validation and profile image delivery.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use digital_id_validator::{FixedClock, OnlineVerdict, ValidatorEvent};

use crate::fixtures::*;

async fn next_event(rx: &mut broadcast::Receiver<ValidatorEvent>) -> ValidatorEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn valid_credential_starts_image_download() {
    let (_stub, services) =
        StubServices::new(OnlineReply::Valid(Some("SN-77".to_string()))).into_collaborators();
    let validator = validator(store_with_issuers(), services, Arc::new(FixedClock::new(noon())));
    let mut events = validator.subscribe();

    let verdict = validator.online_validate("0cc175b9c0f1b6a8").await.unwrap();
    assert_eq!(
        verdict,
        OnlineVerdict {
            valid: true,
            reason: None,
            serial_number: Some("SN-77".to_string()),
        }
    );

    assert_eq!(next_event(&mut events).await, ValidatorEvent::DownloadProgress(0.5));
    assert_eq!(next_event(&mut events).await, ValidatorEvent::DownloadProgress(1.0));
    assert_eq!(
        next_event(&mut events).await,
        ValidatorEvent::ProfileImage(Some(vec![0xFF, 0xD8, 0xFF, 0xE0]))
    );
}

#[tokio::test]
async fn valid_credential_without_serial_skips_image() {
    let (_stub, services) = StubServices::new(OnlineReply::Valid(None)).into_collaborators();
    let validator = validator(store_with_issuers(), services, Arc::new(FixedClock::new(noon())));
    let mut events = validator.subscribe();

    let verdict = validator.online_validate("abc").await.unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.serial_number, None);

    tokio::task::yield_now().await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn rejected_credential_reports_invalid_message() {
    let (_stub, services) = StubServices::new(OnlineReply::Rejected).into_collaborators();
    let validator = validator(store_with_issuers(), services, Arc::new(FixedClock::new(noon())));
    let mut events = validator.subscribe();

    let verdict = validator.online_validate("abc").await.unwrap();
    assert!(!verdict.valid);
    assert_eq!(verdict.reason.as_deref(), Some(INVALID_ID_MESSAGE));

    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn unavailable_service_reports_server_message() {
    let (_stub, services) = StubServices::new(OnlineReply::Unavailable).into_collaborators();
    let validator = validator(store_with_issuers(), services, Arc::new(FixedClock::new(noon())));
    let mut events = validator.subscribe();

    let verdict = validator.online_validate("abc").await.unwrap();
    assert!(!verdict.valid);
    assert_eq!(verdict.reason.as_deref(), Some(SERVER_ERROR_MESSAGE));

    assert_eq!(
        next_event(&mut events).await,
        ValidatorEvent::ServiceAvailabilityChanged(false)
    );
}

#[tokio::test]
async fn concurrent_online_validation_is_dropped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut stub = StubServices::new(OnlineReply::Valid(None));
    stub.gate = Some((entered.clone(), release.clone()));
    let (stub, services) = stub.into_collaborators();
    let validator = validator(store_with_issuers(), services, Arc::new(FixedClock::new(noon())));

    let first = {
        let validator = validator.clone();
        tokio::spawn(async move { validator.online_validate("first").await })
    };
    entered.notified().await;

    assert_eq!(validator.online_validate("second").await, None);
    assert_eq!(stub.validate_calls.load(Ordering::SeqCst), 1);

    release.notify_one();
    let verdict = first.await.unwrap().unwrap();
    assert!(verdict.valid);

    // Latch is released once the first request finishes.
    release.notify_one();
    let verdict = validator.online_validate("third").await.unwrap();
    assert!(verdict.valid);
    assert_eq!(stub.validate_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_image_download_publishes_empty_image() {
    let mut stub = StubServices::new(OnlineReply::Valid(None));
    stub.image = None;
    let (_stub, services) = stub.into_collaborators();
    let validator = validator(store_with_issuers(), services, Arc::new(FixedClock::new(noon())));
    let mut events = validator.subscribe();

    assert!(validator.fetch_profile_image("SN-1").await);

    assert_eq!(next_event(&mut events).await, ValidatorEvent::DownloadProgress(0.5));
    assert_eq!(next_event(&mut events).await, ValidatorEvent::ProfileImage(None));
}
