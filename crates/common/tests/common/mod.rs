//! Shared fixtures for drive integration tests
#![allow(dead_code)]

use std::sync::Once;

use common::testkit::{LinkSpec, TestDrive};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct horse battery staple";
pub const ROOT_NAME: &str = "My files";
pub const CAT_SIZE: i64 = 2048;

static TRACING: Once = Once::new();

/// Log to the test writer, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// One account with a single share laid out as
///
/// ```text
/// My files/
///   Documents/
///     Photos/
///       cat.png
///     notes.txt
///   old.txt      (trashed)
/// ```
pub struct Tree {
    pub drive: TestDrive,
    pub email: String,
    pub volume: String,
    pub share: String,
    pub root: String,
    pub documents: String,
    pub photos: String,
    pub cat: String,
    pub notes: String,
    pub trashed: String,
}

pub fn tree() -> Tree {
    init_tracing();

    let mut drive = TestDrive::new(USERNAME, PASSWORD);
    let email = drive.primary_email();
    let volume = drive.add_volume();
    let (share, root) = drive.add_share(&volume, &email, ROOT_NAME);

    let documents = drive.add_folder(&share, &root, "Documents");
    let photos = drive.add_folder(&share, &documents, "Photos");
    let cat = drive.add_file(&share, &photos, "cat.png", CAT_SIZE);
    let notes = drive.add_file(&share, &documents, "notes.txt", 12);
    let trashed = drive.add_link(&share, &root, LinkSpec::file("old.txt", 3).trashed());

    Tree {
        drive,
        email,
        volume,
        share,
        root,
        documents,
        photos,
        cat,
        notes,
        trashed,
    }
}
