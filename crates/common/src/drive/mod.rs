//! Drive tree
//!
//! ```text
//! Session
//!   └─ Volume ─┬─ Share (share keyring) ── root Link ─┬─ Link (folder) ── ...
//!              └─ Share ...                           └─ Link (file)
//! ```
//!
//! - **[`Share`]**: one tree; derives its keyring from the owning address
//!   and owns an arena of every [`Link`] materialized so far.
//! - **[`Link`]**: a decrypted node. Children hold a handle to their parent
//!   inside the arena, never an owning pointer, so the tree has no cycles.
//! - **Path resolution**: [`Share::resolve_path`], [`Link::resolve_path`] and
//!   [`crate::session::Session::resolve_path`] walk the tree top-down,
//!   decrypting child names and comparing them to each path segment.
//! - **[`ShareLister`]**: loads many shares at once under a bounded pool of
//!   workers.

mod link;
mod lister;
mod resolve;
mod share;
mod volume;

use std::time::Duration;

use crate::api::ApiError;
use crate::crypto::CryptoError;
use crate::session::SessionError;

pub use link::{Link, XAttr, XAttrCommon};
pub use lister::{CancelToken, ListPolicy, ListerConfig, ShareLister, ShareListing};
pub use resolve::ShareRoots;
pub use share::Share;
pub use volume::Volume;

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("drive error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("not a folder: {0}")]
    NotAFolder(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("link {link_id} does not belong under {expected:?}")]
    ParentMismatch {
        link_id: String,
        expected: Option<String>,
    },
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0} lister worker(s) panicked")]
    WorkerPanicked(usize),
}

impl DriveError {
    /// True when the caller should re-authenticate
    pub fn is_not_logged_in(&self) -> bool {
        match self {
            DriveError::Session(e) => e.is_not_logged_in(),
            DriveError::Api(ApiError::Unauthorized) => true,
            _ => false,
        }
    }
}
