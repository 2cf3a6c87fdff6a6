//! Integration tests for concurrent share listing and volumes

mod common;

use std::time::Duration;

use ::common::prelude::*;
use ::common::session::SessionError;
use ::common::testkit::TestDrive;

/// An account with `count` shares on one volume, each root named
///  `share-<n>`
fn drive_with_shares(count: usize) -> (TestDrive, String, Vec<String>) {
    common::init_tracing();
    let mut drive = TestDrive::new(common::USERNAME, common::PASSWORD);
    let email = drive.primary_email();
    let volume = drive.add_volume();
    let shares = (0..count)
        .map(|n| drive.add_share(&volume, &email, &format!("share-{}", n)).0)
        .collect();
    (drive, volume, shares)
}

fn config(max_workers: usize, policy: ListPolicy) -> ListerConfig {
    ListerConfig {
        max_workers,
        policy,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_workers_bounded_by_share_count() {
    let (drive, _, shares) = drive_with_shares(3);
    let session = drive.session().await.unwrap();

    let listing = ShareLister::new(&session).list(None, false).await.unwrap();
    assert_eq!(listing.workers, 3);
    assert_eq!(listing.shares.len(), 3);
    assert!(listing.is_complete());
    assert!(drive.drive().max_in_flight() <= 3);
    for share_id in &shares {
        assert_eq!(drive.drive().share_calls(share_id), 1);
    }
}

#[tokio::test]
async fn test_pool_bounded_by_max_workers() {
    let (drive, _, shares) = drive_with_shares(25);
    drive.drive().set_latency(Duration::from_millis(10));
    let session = drive.session().await.unwrap();

    let listing = ShareLister::new(&session)
        .with_config(config(4, ListPolicy::BestEffort))
        .list(None, false)
        .await
        .unwrap();

    assert_eq!(listing.workers, 4);
    assert_eq!(listing.shares.len(), 25);
    assert!(drive.drive().max_in_flight() <= 4);
    assert_eq!(drive.drive().total_share_calls(), 25);
    for share_id in &shares {
        assert_eq!(drive.drive().share_calls(share_id), 1);
    }

    let ordered: Vec<String> = listing
        .into_request_order()
        .iter()
        .map(|share| share.share_id().to_string())
        .collect();
    assert_eq!(ordered, shares);
}

#[tokio::test]
async fn test_best_effort_reports_failures() {
    let (drive, _, shares) = drive_with_shares(3);
    drive.drive().fail_share(&shares[1]);
    let session = drive.session().await.unwrap();

    let listing = ShareLister::new(&session).list(None, false).await.unwrap();
    assert_eq!(listing.shares.len(), 2);
    assert!(!listing.is_complete());
    assert_eq!(listing.failures.len(), 1);

    let (failed, err) = &listing.failures[0];
    assert_eq!(failed, &shares[1]);
    assert!(matches!(
        err,
        DriveError::Api(ApiError::Status { status: 500, .. })
    ));
    assert!(listing
        .shares
        .iter()
        .all(|share| share.share_id() != shares[1]));
}

#[tokio::test]
async fn test_fail_fast_returns_first_error() {
    let (drive, _, shares) = drive_with_shares(5);
    drive.drive().fail_share(&shares[2]);
    let session = drive.session().await.unwrap();

    let result = ShareLister::new(&session)
        .with_config(config(2, ListPolicy::FailFast))
        .list(None, false)
        .await;
    assert!(matches!(
        result,
        Err(DriveError::Api(ApiError::Status { status: 500, .. }))
    ));
}

#[tokio::test]
async fn test_policy_comes_from_session() {
    let (drive, _, shares) = drive_with_shares(2);
    drive.drive().fail_share(&shares[0]);

    let locked = LockedSession::restore(drive.api(), drive.crypto(), drive.issue_tokens())
        .await
        .unwrap()
        .with_lister_config(config(10, ListPolicy::FailFast));
    let session = locked.unlock(&drive.key_pass()).unwrap();

    assert!(session.list_shares(None, false).await.is_err());
    assert!(session.list_share_roots(false).await.is_err());
}

#[tokio::test]
async fn test_empty_listing() {
    let (drive, _, _) = drive_with_shares(0);
    let session = drive.session().await.unwrap();

    let listing = session.list_shares(None, false).await.unwrap();
    assert_eq!(listing.workers, 0);
    assert!(listing.shares.is_empty());
    assert!(listing.is_complete());
}

#[tokio::test]
async fn test_external_cancellation() {
    let (drive, _, _) = drive_with_shares(4);
    drive.drive().set_latency(Duration::from_secs(5));
    let session = drive.session().await.unwrap();

    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let started = tokio::time::Instant::now();
    let result = ShareLister::new(&session)
        .with_cancel(cancel)
        .list(None, false)
        .await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(DriveError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_deadline() {
    let (drive, _, _) = drive_with_shares(3);
    drive.drive().set_latency(Duration::from_secs(30));
    let session = drive.session().await.unwrap();

    let result = ShareLister::new(&session)
        .with_config(ListerConfig {
            deadline_secs: Some(1),
            ..Default::default()
        })
        .list(None, false)
        .await;
    assert!(matches!(
        result,
        Err(DriveError::TimedOut(deadline)) if deadline == Duration::from_secs(1)
    ));
}

#[tokio::test]
async fn test_deleted_shares_only_on_request() {
    let (mut drive, _, shares) = drive_with_shares(3);
    drive.delete_share(&shares[0]);
    let session = drive.session().await.unwrap();

    let active = session.list_shares(None, false).await.unwrap();
    assert_eq!(active.shares.len(), 2);

    let all = session.list_shares(None, true).await.unwrap();
    assert_eq!(all.shares.len(), 3);
}

#[tokio::test]
async fn test_volumes() {
    let (mut drive, first, first_shares) = drive_with_shares(2);
    let email = drive.primary_email();
    let second = drive.add_volume();
    let (other_share, _) = drive.add_share(&second, &email, "Photos backup");
    let session = drive.session().await.unwrap();

    let volumes = session.volumes().await.unwrap();
    assert_eq!(volumes.len(), 2);

    let volume = session.volume(&first).await.unwrap();
    assert_eq!(volume.volume_id(), first);
    assert_eq!(volume.record().share_id, first_shares[0]);

    let metadata = volume.list_share_metadata(false).await.unwrap();
    assert_eq!(metadata.len(), 2);
    assert!(volume
        .share_metadata(&other_share, false)
        .await
        .unwrap()
        .is_none());
    let main = volume
        .share_metadata(&first_shares[0], false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(main.share_type.to_string(), "main");
    assert_eq!(main.flags.to_string(), "primary");

    assert!(volume.share(&other_share).await.unwrap().is_none());
    let share = volume.share(&first_shares[1]).await.unwrap().unwrap();
    assert_eq!(share.root_link().name(), "share-1");

    let listing = volume.shares(false).await.unwrap();
    let mut ids: Vec<String> = listing
        .shares
        .iter()
        .map(|share| share.share_id().to_string())
        .collect();
    ids.sort();
    let mut expected = first_shares.clone();
    expected.sort();
    assert_eq!(ids, expected);

    let filtered = session.list_shares(Some(&second), false).await.unwrap();
    assert_eq!(filtered.shares.len(), 1);
    assert_eq!(filtered.shares[0].share_id(), other_share);

    let main_share = volume.main_share().await.unwrap();
    assert_eq!(main_share.root_link().name(), "share-0");
}

#[tokio::test]
async fn test_not_logged_in_is_distinguishable() {
    let err = DriveError::from(SessionError::NotLoggedIn);
    assert!(err.is_not_logged_in());
    assert!(DriveError::from(ApiError::Unauthorized).is_not_logged_in());
    assert!(!DriveError::FileNotFound("x".to_string()).is_not_logged_in());
}
