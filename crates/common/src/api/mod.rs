//! Drive API capability
//!
//! Everything the resolver needs from the remote service goes through
//! [`DriveApi`]. Implementations own transport, authentication headers and
//! token refresh; this crate only decides *which* records to fetch and in
//! what order.
//!
//! - **Identity bootstrap**: [`DriveApi::get_user`], [`DriveApi::get_addresses`],
//!   [`DriveApi::get_salts`]
//! - **Tree records**: shares, links and child listings
//! - **Session lifecycle**: login, second factor, resume and revoke
//!
//! The in-memory implementation used by the tests is `testkit::MemoryDrive`,
//! built with the `testkit` feature.

mod types;

use async_trait::async_trait;

pub use types::{
    Address, AddressKey, AddressStatus, AddressType, Auth, EncryptedKey, FileProperties,
    LinkRecord, LinkState, LinkType, PasswordMode, RevisionRecord, Salt, ShareFlags,
    ShareMetadata, ShareRecord, ShareState, ShareType, Tokens, User, UserKey, VolumeRecord,
    VolumeState,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
}

#[async_trait]
pub trait DriveApi: Send + Sync + std::fmt::Debug + 'static {
    /// Authenticate with a username and password
    async fn login(&self, username: &str, password: &str) -> Result<Auth, ApiError>;

    /// Submit a TOTP code for an account with two factor enabled
    async fn submit_two_factor(&self, code: &str) -> Result<(), ApiError>;

    /// Re-attach the client to previously issued tokens
    async fn resume(&self, tokens: &Tokens) -> Result<(), ApiError>;

    /// Revoke the server side session for `uid`
    async fn revoke(&self, uid: &str) -> Result<(), ApiError>;

    async fn get_user(&self) -> Result<User, ApiError>;

    async fn get_addresses(&self) -> Result<Vec<Address>, ApiError>;

    async fn get_salts(&self) -> Result<Vec<Salt>, ApiError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>, ApiError>;

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, ApiError>;

    /// List share metadata across all volumes
    ///
    /// # Arguments
    /// * `all` - include deleted shares
    async fn list_shares(&self, all: bool) -> Result<Vec<ShareMetadata>, ApiError>;

    async fn get_share(&self, share_id: &str) -> Result<ShareRecord, ApiError>;

    async fn get_link(&self, share_id: &str, link_id: &str) -> Result<LinkRecord, ApiError>;

    /// List the children of a folder link
    ///
    /// # Arguments
    /// * `all` - include trashed children
    async fn list_children(
        &self,
        share_id: &str,
        link_id: &str,
        all: bool,
    ) -> Result<Vec<LinkRecord>, ApiError>;
}
