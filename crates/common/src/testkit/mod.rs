/// In-process doubles for the two external capabilities
///
/// [`SealedCrypto`] is a working keyring backend and [`MemoryDrive`] an
/// in-memory api; [`TestDrive`] fills the drive with a fully encrypted
/// account so sessions walk the real derivation chain.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestDrive;
///
/// #[tokio::test]
/// async fn test_resolve() -> anyhow::Result<()> {
///     let mut drive = TestDrive::new("alice", "hunter2");
///     let email = drive.primary_email();
///     let volume = drive.add_volume();
///     let (share, root) = drive.add_share(&volume, &email, "My files");
///     let docs = drive.add_folder(&share, &root, "Documents");
///     drive.add_file(&share, &docs, "notes.txt", 12);
///
///     let session = drive.session().await?;
///     let link = session.share(&share).await?
///         .resolve_path("Documents/notes.txt", false)
///         .await?;
///     assert_eq!(link.size(), 12);
///     Ok(())
/// }
/// ```
mod drive;
mod sealed;

pub use drive::{LinkSpec, MemoryDrive, TestDrive};
pub use sealed::{SealedCrypto, SealedKeyRing};
