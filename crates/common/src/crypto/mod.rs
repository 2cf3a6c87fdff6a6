//! Keyring capability
//!
//! The resolver never touches key material directly. Every unlock,
//! derivation and decryption is delegated to a [`Crypto`] backend whose
//! `KeyRing` type stays opaque to the rest of the crate.
//!
//! # Trust chain
//!
//! ```text
//! salted key pass --unlock--> user keyring --unlock--> address keyrings
//!                                                           |
//!                         share key  <--derive(address, address)
//!                             |
//!                 root node key  <--derive(share, signer address)
//!                             |
//!                child node key  <--derive(parent node, signer address)
//! ```
//!
//! A node key can only be derived once its parent's key is known, so the
//! tree is always decrypted top-down.

mod keypass;

use std::collections::HashMap;

use crate::api::{Address, EncryptedKey, Salt, User};

pub use keypass::SaltedKeyPass;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("crypto error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("empty key pass")]
    EmptyKeyPass,
    #[error("no salt for key {0}")]
    MissingSalt(String),
    #[error("failed to unlock key {0}")]
    Locked(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("signature verification failed: {0}")]
    Verification(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Keyrings produced by a successful unlock
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockedKeyRings<K> {
    pub user: K,
    /// Address id to address keyring
    pub addresses: HashMap<String, K>,
}

/// Backend for all key operations
///
/// Implementations must be deterministic for a given input: unlocking the
/// same keys with the same key pass yields equal keyrings.
pub trait Crypto: Send + Sync + std::fmt::Debug + 'static {
    type KeyRing: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static;

    /// Salt a password for the user key `key_id`
    fn salt_key_pass(
        &self,
        password: &[u8],
        salts: &[Salt],
        key_id: &str,
    ) -> Result<SaltedKeyPass, CryptoError>;

    /// Unlock the user keyring and one keyring per address
    fn unlock(
        &self,
        user: &User,
        addresses: &[Address],
        key_pass: &SaltedKeyPass,
    ) -> Result<UnlockedKeyRings<Self::KeyRing>, CryptoError>;

    /// Unwrap `key` with `parent`, verifying the passphrase signature
    ///  against `signer`
    fn derive_key_ring(
        &self,
        key: &EncryptedKey,
        parent: &Self::KeyRing,
        signer: &Self::KeyRing,
    ) -> Result<Self::KeyRing, CryptoError>;

    /// Decrypt an armored message with `key_ring` and verify it
    ///  against `verifier`
    fn decrypt(
        &self,
        message: &str,
        key_ring: &Self::KeyRing,
        verifier: &Self::KeyRing,
    ) -> Result<Vec<u8>, CryptoError>;
}
