//! Sessions
//!
//! A session moves through two states:
//!
//! - **[`LockedSession`]**: tokens are valid and the user / address records
//!   are loaded, but no key material is available.
//! - **[`Session`]**: produced by [`LockedSession::unlock`]; holds the user
//!   keyring and one keyring per address. These maps never change after
//!   unlock and are shared by every resolver and lister task.
//!
//! There is no half-unlocked state: either both maps exist or the caller
//! still holds a [`LockedSession`].
//!
//! [`SessionManager`] wires a [`SessionStore`] to the api and crypto
//! backends for restore, login, token refresh and logout.

mod manager;
#[allow(clippy::module_inception)]
mod session;
mod store;

use std::time::Duration;

use crate::api::ApiError;
use crate::crypto::CryptoError;

pub use manager::SessionManager;
pub use session::{LockedSession, LoginRequest, Session};
pub use store::{Credentials, FileSessionStore, MemorySessionStore, SessionStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("missing {0}")]
    MissingCredential(&'static str),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("two factor code required")]
    TwoFactorRequired,
    #[error("user has no keys")]
    NoUserKey,
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True when the caller should re-authenticate rather than
    ///  report an internal failure
    pub fn is_not_logged_in(&self) -> bool {
        matches!(self, SessionError::NotLoggedIn)
    }
}
