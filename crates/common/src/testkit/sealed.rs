//! A real, if simple, keyring backend
//!
//! Every keyring is a 256-bit ChaCha20-Poly1305 key. A sealed message is
//! `base64(nonce || ciphertext) "." hex(signature)` where the signature is
//! a BLAKE3 keyed hash of the plaintext under the signer's key. Nonces are
//! derived from the key and plaintext, so sealing is deterministic.
//!
//! Wrong parents fail to decrypt and wrong signers fail to verify, which
//! is what the derivation chain needs to be exercised for real.

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::api::{Address, EncryptedKey, Salt, User};
use crate::crypto::{Crypto, CryptoError, SaltedKeyPass, UnlockedKeyRings};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

const SEED_CONTEXT: &str = "pdrive testkit 2024 keyring seed";
const KEY_PASS_CONTEXT: &str = "pdrive testkit 2024 salted key pass";
const NONCE_CONTEXT: &str = "pdrive testkit 2024 nonce";

#[derive(Clone, PartialEq, Eq)]
pub struct SealedKeyRing([u8; KEY_SIZE]);

impl fmt::Debug for SealedKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedKeyRing({})", self.fingerprint())
    }
}

impl SealedKeyRing {
    /// Deterministic keyring for a fixture label
    pub fn from_seed(seed: &str) -> Self {
        Self(blake3::derive_key(SEED_CONTEXT, seed.as_bytes()))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = data.try_into().map_err(|_| {
            anyhow::anyhow!("invalid key size, expected {}, got {}", KEY_SIZE, data.len())
        })?;
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(&self.0).as_bytes()[..8])
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    fn sign(&self, data: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.0, data)
    }

    /// Encrypt `plaintext` to this keyring, signed by `signer`
    pub fn seal(&self, plaintext: &[u8], signer: &SealedKeyRing) -> String {
        let mut nonce_input = Vec::with_capacity(KEY_SIZE + plaintext.len());
        nonce_input.extend_from_slice(&self.0);
        nonce_input.extend_from_slice(plaintext);
        let nonce_bytes = blake3::derive_key(NONCE_CONTEXT, &nonce_input);
        let nonce = Nonce::from_slice(&nonce_bytes[..NONCE_SIZE]);

        // Sealing only fails for plaintexts beyond the cipher's length limit
        let ciphertext = self.cipher().encrypt(nonce, plaintext).unwrap_or_default();

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        format!(
            "{}.{}",
            STANDARD.encode(out),
            signer.sign(plaintext).to_hex()
        )
    }

    /// Decrypt a sealed message and verify it against `verifier`
    pub fn open(&self, message: &str, verifier: &SealedKeyRing) -> Result<Vec<u8>, CryptoError> {
        let (body, signature) = message
            .split_once('.')
            .ok_or_else(|| CryptoError::Decrypt("malformed sealed message".to_string()))?;
        let data = STANDARD.decode(body)?;
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::Decrypt("sealed message too short".to_string()));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        let plaintext = self
            .cipher()
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| CryptoError::Decrypt(format!("not sealed to {}", self.fingerprint())))?;

        let expected = blake3::Hash::from_hex(signature)
            .map_err(|_| CryptoError::Verification("malformed signature".to_string()))?;
        // blake3::Hash compares in constant time
        if verifier.sign(&plaintext) != expected {
            return Err(CryptoError::Verification(format!(
                "not signed by {}",
                verifier.fingerprint()
            )));
        }
        Ok(plaintext)
    }

    /// Wrap `self` for `parent`, signed by `signer`
    pub fn wrap(&self, parent: &SealedKeyRing, signer: &SealedKeyRing) -> EncryptedKey {
        let sealed = parent.seal(&self.0, signer);
        let (passphrase, signature) = sealed
            .split_once('.')
            .map(|(body, signature)| (body.to_string(), signature.to_string()))
            .unwrap_or_default();
        EncryptedKey {
            key: self.fingerprint(),
            passphrase,
            passphrase_signature: signature,
        }
    }

    fn unwrap_key(
        key: &EncryptedKey,
        parent: &SealedKeyRing,
        signer: &SealedKeyRing,
    ) -> Result<Self, CryptoError> {
        let message = format!("{}.{}", key.passphrase, key.passphrase_signature);
        let child = Self::from_slice(&parent.open(&message, signer)?)?;
        if child.fingerprint() != key.key {
            return Err(CryptoError::Verification(format!(
                "unwrapped key {} does not match {}",
                child.fingerprint(),
                key.key
            )));
        }
        Ok(child)
    }
}

/// [`Crypto`] backend built on [`SealedKeyRing`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedCrypto;

impl SealedCrypto {
    /// Key pass used as the key that locks user private keys
    pub fn pass_key(key_pass: &SaltedKeyPass) -> Result<SealedKeyRing, CryptoError> {
        SealedKeyRing::from_slice(key_pass.as_bytes())
    }

    /// Salt `password` with raw salt bytes
    pub fn salt(password: &[u8], salt: &[u8]) -> SaltedKeyPass {
        let mut input = Vec::with_capacity(password.len() + salt.len());
        input.extend_from_slice(password);
        input.extend_from_slice(salt);
        SaltedKeyPass::new(blake3::derive_key(KEY_PASS_CONTEXT, &input).to_vec())
    }
}

impl Crypto for SealedCrypto {
    type KeyRing = SealedKeyRing;

    fn salt_key_pass(
        &self,
        password: &[u8],
        salts: &[Salt],
        key_id: &str,
    ) -> Result<SaltedKeyPass, CryptoError> {
        let salt = salts
            .iter()
            .find(|salt| salt.id == key_id)
            .and_then(|salt| salt.key_salt.as_deref())
            .ok_or_else(|| CryptoError::MissingSalt(key_id.to_string()))?;
        Ok(Self::salt(password, &STANDARD.decode(salt)?))
    }

    fn unlock(
        &self,
        user: &User,
        addresses: &[Address],
        key_pass: &SaltedKeyPass,
    ) -> Result<UnlockedKeyRings<SealedKeyRing>, CryptoError> {
        if key_pass.is_empty() {
            return Err(CryptoError::EmptyKeyPass);
        }
        let pass_key = Self::pass_key(key_pass)?;

        let primary = user
            .primary_key()
            .ok_or_else(|| CryptoError::Locked(format!("user {} has no keys", user.id)))?;
        let user_key_ring = pass_key
            .open(&primary.private_key, &pass_key)
            .and_then(|bytes| SealedKeyRing::from_slice(&bytes))
            .map_err(|_| CryptoError::Locked(primary.id.clone()))?;

        let mut address_key_rings = HashMap::new();
        for address in addresses {
            let active = address.keys.iter().filter(|key| key.active);
            let Some(key) = active.clone().find(|key| key.primary).or_else(|| active.clone().next())
            else {
                continue;
            };

            // Keys with a token are locked by the user key, older keys by
            //  the key pass directly
            let key_ring = match &key.token {
                Some(token) => user_key_ring.open(token, &user_key_ring),
                None => pass_key.open(&key.private_key, &pass_key),
            }
            .and_then(|bytes| SealedKeyRing::from_slice(&bytes))
            .map_err(|_| CryptoError::Locked(key.id.clone()))?;
            address_key_rings.insert(address.id.clone(), key_ring);
        }

        Ok(UnlockedKeyRings {
            user: user_key_ring,
            addresses: address_key_rings,
        })
    }

    fn derive_key_ring(
        &self,
        key: &EncryptedKey,
        parent: &SealedKeyRing,
        signer: &SealedKeyRing,
    ) -> Result<SealedKeyRing, CryptoError> {
        SealedKeyRing::unwrap_key(key, parent, signer)
    }

    fn decrypt(
        &self,
        message: &str,
        key_ring: &SealedKeyRing,
        verifier: &SealedKeyRing,
    ) -> Result<Vec<u8>, CryptoError> {
        key_ring.open(message, verifier)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let key = SealedKeyRing::from_seed("key");
        let signer = SealedKeyRing::from_seed("signer");

        let sealed = key.seal(b"Documents", &signer);
        assert_eq!(key.open(&sealed, &signer).unwrap(), b"Documents");
        assert_eq!(sealed, key.seal(b"Documents", &signer));
    }

    #[test]
    fn test_open_wrong_key() {
        let key = SealedKeyRing::from_seed("key");
        let other = SealedKeyRing::from_seed("other");
        let sealed = key.seal(b"name", &key);

        assert!(matches!(
            other.open(&sealed, &key),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn test_open_wrong_signer() {
        let key = SealedKeyRing::from_seed("key");
        let signer = SealedKeyRing::from_seed("signer");
        let sealed = key.seal(b"name", &signer);

        assert!(matches!(
            key.open(&sealed, &key),
            Err(CryptoError::Verification(_))
        ));
    }

    #[test]
    fn test_wrap_and_derive() {
        let crypto = SealedCrypto;
        let parent = SealedKeyRing::from_seed("parent");
        let signer = SealedKeyRing::from_seed("signer");
        let child = SealedKeyRing::from_seed("child");

        let wrapped = child.wrap(&parent, &signer);
        assert_eq!(wrapped.key, child.fingerprint());
        assert_eq!(
            crypto.derive_key_ring(&wrapped, &parent, &signer).unwrap(),
            child
        );
        assert!(crypto.derive_key_ring(&wrapped, &child, &signer).is_err());
        assert!(crypto.derive_key_ring(&wrapped, &parent, &parent).is_err());
    }

    #[test]
    fn test_salt_key_pass() {
        let crypto = SealedCrypto;
        let salts = vec![
            Salt {
                id: "k1".to_string(),
                key_salt: Some(STANDARD.encode(b"salt")),
            },
            Salt {
                id: "k2".to_string(),
                key_salt: None,
            },
        ];

        let key_pass = crypto.salt_key_pass(b"hunter2", &salts, "k1").unwrap();
        assert_eq!(key_pass, SealedCrypto::salt(b"hunter2", b"salt"));
        assert_eq!(key_pass.as_bytes().len(), KEY_SIZE);

        assert!(matches!(
            crypto.salt_key_pass(b"hunter2", &salts, "k2"),
            Err(CryptoError::MissingSalt(id)) if id == "k2"
        ));
    }
}
