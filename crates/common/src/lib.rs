/**
 * Wire-level records and the authenticated client
 *  capability this crate consumes. Nothing in here
 *  talks to the network itself.
 */
pub mod api;
/**
 * Loadable settings for sessions and bulk listing.
 */
pub mod config;
/**
 * The keyring capability: unlocking, deriving and
 *  decrypting with opaque key material.
 *  - Salted key pass handling
 */
pub mod crypto;
/**
 * Encrypted tree navigation: shares, links, path
 *  resolution and the concurrent share lister.
 */
pub mod drive;
/**
 * Unlocked sessions, their on-disk credentials
 *  and the login / restore / logout lifecycle.
 */
pub mod session;
/**
 * In-process test doubles: a sealed keyring backend
 *  and an in-memory drive api. Behind the `testkit`
 *  feature.
 */
#[cfg(feature = "testkit")]
pub mod testkit;

pub mod prelude {
    pub use crate::api::{ApiError, DriveApi, LinkType, Tokens};
    pub use crate::config::DriveConfig;
    pub use crate::crypto::{Crypto, CryptoError, SaltedKeyPass};
    pub use crate::drive::{
        CancelToken, DriveError, Link, ListPolicy, ListerConfig, Share, ShareLister, ShareListing,
        Volume,
    };
    pub use crate::session::{
        Credentials, FileSessionStore, LockedSession, LoginRequest, Session, SessionError,
        SessionManager, SessionStore,
    };
}
