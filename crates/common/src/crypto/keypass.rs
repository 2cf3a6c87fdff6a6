use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::CryptoError;

/// A passphrase salted and bound to one user key
///
/// This is the only secret a restored session needs to unlock its keys.
/// It is carried as opaque bytes and persisted as standard base64.
#[derive(Clone, PartialEq, Eq)]
pub struct SaltedKeyPass(Vec<u8>);

impl SaltedKeyPass {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Ok(Self(STANDARD.decode(encoded)?))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SaltedKeyPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SaltedKeyPass(<{} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_base64_encoding() {
        let key_pass = SaltedKeyPass::new(b"salted".to_vec());
        assert_eq!(key_pass.to_base64(), "c2FsdGVk");

        let decoded = SaltedKeyPass::from_base64("c2FsdGVk").unwrap();
        assert_eq!(decoded, key_pass);
    }

    #[test]
    fn test_invalid_base64() {
        let result = SaltedKeyPass::from_base64("not base64!");
        assert!(matches!(result, Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let key_pass = SaltedKeyPass::new(b"secret".to_vec());
        assert_eq!(format!("{:?}", key_pass), "SaltedKeyPass(<6 bytes>)");
        assert!(SaltedKeyPass::new(Vec::new()).is_empty());
    }
}
