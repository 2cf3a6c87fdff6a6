//! Integration tests for the keyring derivation chain

mod common;

use ::common::crypto::CryptoError;
use ::common::prelude::*;
use ::common::testkit::LinkSpec;

#[tokio::test]
async fn test_share_key_ring_from_owning_address() {
    let tree = common::tree();
    let session = tree.drive.session().await.unwrap();
    let share = session.share(&tree.share).await.unwrap();

    let address_id = tree.drive.address_id(&tree.email).unwrap();
    assert_eq!(share.address_id(), address_id);
    assert_eq!(share.volume_id(), tree.volume);
    assert_ne!(share.key_ring(), session.address_key_ring(&address_id).unwrap());
    assert_eq!(share.root_link().link_id(), tree.root);
}

#[tokio::test]
async fn test_share_of_foreign_address() {
    let mut tree = common::tree();
    tree.drive.add_foreign_signer("bob@elsewhere.test");
    let (foreign, _) = tree
        .drive
        .add_share(&tree.volume, "bob@elsewhere.test", "Bob's files");

    let session = tree.drive.session().await.unwrap();
    assert!(matches!(
        session.share(&foreign).await,
        Err(DriveError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_unknown_signer_is_key_not_found() {
    let mut tree = common::tree();
    tree.drive.add_foreign_signer("mallory@evil.test");
    tree.drive.add_link(
        &tree.share,
        &tree.documents,
        LinkSpec::file("evil.txt", 1).signed_by("mallory@evil.test"),
    );

    let session = tree.drive.session().await.unwrap();
    let share = session.share(&tree.share).await.unwrap();

    // the folder above still decrypts
    let documents = share.resolve_path("Documents", false).await.unwrap();
    let err = documents.list_children(false).await.unwrap_err();
    assert!(
        matches!(&err, DriveError::KeyNotFound(message) if message.contains("mallory@evil.test")),
        "unexpected error: {err}"
    );

    // a listing that fails part way exposes nothing
    assert!(share
        .resolve_path("Documents/notes.txt", false)
        .await
        .is_err());
}

#[tokio::test]
async fn test_signer_without_key_ring() {
    let mut tree = common::tree();
    let retired = "retired@example.com";
    tree.drive.add_inactive_address(retired);
    tree.drive.add_link(
        &tree.share,
        &tree.root,
        LinkSpec::folder("Archive").name_signed_by(retired),
    );

    let session = tree.drive.session().await.unwrap();
    assert!(session.address(retired).is_some());
    assert!(session.address_key_ring_for(retired).is_none());

    let share = session.share(&tree.share).await.unwrap();
    assert!(matches!(
        share.resolve_path("Archive", false).await,
        Err(DriveError::KeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_undecryptable_name_is_never_exposed() {
    let mut tree = common::tree();
    tree.drive.corrupt_name(&tree.photos);

    let session = tree.drive.session().await.unwrap();
    let share = session.share(&tree.share).await.unwrap();

    let documents = share.resolve_path("Documents", false).await.unwrap();
    assert!(matches!(
        documents.list_children(false).await,
        Err(DriveError::Crypto(CryptoError::Decrypt(_)))
    ));
    assert!(matches!(
        share.resolve_path("Documents/Photos/cat.png", false).await,
        Err(DriveError::Crypto(_))
    ));
    // root + Documents only
    assert_eq!(share.materialized(), 2);
}

#[tokio::test]
async fn test_file_uses_active_revision() {
    let tree = common::tree();
    let session = tree.drive.session().await.unwrap();
    let share = session.share(&tree.share).await.unwrap();

    let cat = share
        .resolve_path("Documents/Photos/cat.png", false)
        .await
        .unwrap();
    let revision = &cat.record().file_properties.as_ref().unwrap().active_revision;

    assert_eq!(cat.record().size, 0);
    assert_eq!(cat.size(), revision.size);
    assert_eq!(cat.modify_time(), revision.create_time);
    assert_ne!(cat.modify_time(), cat.record().modify_time);
    assert_ne!(cat.content_key_ring(), cat.node_key_ring());

    let photos = cat.parent().unwrap();
    assert_eq!(photos.content_key_ring(), photos.node_key_ring());
    assert_eq!(photos.modify_time(), photos.record().modify_time);
}

#[tokio::test]
async fn test_extended_attributes() {
    let mut tree = common::tree();
    tree.drive.add_link(
        &tree.share,
        &tree.documents,
        LinkSpec::file("report.pdf", 10).with_xattr(
            r#"{"Common":{"ModificationTime":"2024-01-01T00:00:00+0000","Size":10,"BlockSizes":[10]}}"#,
        ),
    );

    let session = tree.drive.session().await.unwrap();
    let share = session.share(&tree.share).await.unwrap();

    let report = share
        .resolve_path("Documents/report.pdf", false)
        .await
        .unwrap();
    let xattr = report.extended_attributes().unwrap().unwrap();
    assert_eq!(xattr.common.size, Some(10));
    assert_eq!(xattr.common.block_sizes, vec![10]);
    assert_eq!(
        xattr.common.modification_time.as_deref(),
        Some("2024-01-01T00:00:00+0000")
    );

    let notes = share.resolve_path("Documents/notes.txt", false).await.unwrap();
    assert!(notes.extended_attributes().unwrap().is_none());
    let documents = notes.parent().unwrap();
    assert!(documents.extended_attributes().unwrap().is_none());
}
