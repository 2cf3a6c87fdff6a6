use std::fmt;

use serde::{Deserialize, Serialize};

// Numeric status codes as the server reports them. Unknown
//  codes are kept rather than rejected so a newer server
//  never breaks listing.
macro_rules! status_code {
    ($(#[$meta:meta])* $name:ident { $($konst:ident = $value:expr => $label:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u8);

        impl $name {
            $(pub const $konst: $name = $name($value);)+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match *self {
                    $($name::$konst => f.write_str($label),)+
                    $name(code) => write!(f, "Unknown ({})", code),
                }
            }
        }
    };
}

status_code!(
    /// Origin of an address on the account
    AddressType {
        ORIGINAL = 1 => "original",
        ALIAS = 2 => "alias",
        CUSTOM = 3 => "custom",
        PREMIUM = 4 => "premium",
        EXTERNAL = 5 => "external",
    }
);

status_code!(
    AddressStatus {
        DISABLED = 0 => "disabled",
        ENABLED = 1 => "enabled",
        DELETING = 2 => "deleting",
    }
);

status_code!(
    ShareType {
        MAIN = 1 => "main",
        STANDARD = 2 => "standard",
        DEVICE = 3 => "device",
    }
);

status_code!(
    ShareState {
        ACTIVE = 1 => "active",
        DELETED = 2 => "deleted",
    }
);

status_code!(
    ShareFlags {
        NONE = 0 => "none",
        PRIMARY = 1 => "primary",
    }
);

status_code!(
    VolumeState {
        ACTIVE = 1 => "active",
        LOCKED = 3 => "locked",
    }
);

/// Session tokens handed out by the auth endpoints
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tokens {
    pub uid: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("uid", &self.uid)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordMode {
    /// The login password also unlocks the keys
    One,
    /// A separate mailbox password unlocks the keys
    Two,
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub tokens: Tokens,
    pub password_mode: PasswordMode,
    pub two_factor_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKey {
    pub id: String,
    pub private_key: String,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub email: String,
    pub keys: Vec<UserKey>,
    pub used_space: i64,
    pub max_space: i64,
}

impl User {
    /// The key the key pass is salted for. Falls back to the
    ///  first key when none is flagged primary.
    pub fn primary_key(&self) -> Option<&UserKey> {
        self.keys
            .iter()
            .find(|key| key.primary)
            .or_else(|| self.keys.first())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressKey {
    pub id: String,
    pub private_key: String,
    /// Key passphrase encrypted to the user key
    pub token: Option<String>,
    pub signature: Option<String>,
    pub primary: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub email: String,
    pub address_type: AddressType,
    pub status: AddressStatus,
    pub order: u32,
    pub keys: Vec<AddressKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt {
    /// Id of the user key this salt applies to
    pub id: String,
    pub key_salt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub volume_id: String,
    pub state: VolumeState,
    pub used_space: i64,
    /// `None` for unlimited volumes
    pub max_space: Option<i64>,
    /// Main share of the volume
    pub share_id: String,
}

/// Share summary as returned by the bulk share listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMetadata {
    pub share_id: String,
    /// Root link of the share
    pub link_id: String,
    pub volume_id: String,
    pub share_type: ShareType,
    pub state: ShareState,
    pub creator: String,
    pub flags: ShareFlags,
    pub locked: bool,
}

/// A key wrapped for a parent keyring and signed by an address
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub key: String,
    pub passphrase: String,
    pub passphrase_signature: String,
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Full share record, including the share key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRecord {
    #[serde(flatten)]
    pub metadata: ShareMetadata,
    /// Address whose keyring unlocks the share key
    pub address_id: String,
    pub key: EncryptedKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Folder,
    File,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::Folder => f.write_str("folder"),
            LinkType::File => f.write_str("file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Draft,
    Active,
    Trashed,
    Deleted,
}

impl LinkState {
    /// Trashed and deleted links are only listed on request
    pub fn is_trashed(&self) -> bool {
        matches!(self, LinkState::Trashed | LinkState::Deleted)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Draft => "draft",
            LinkState::Active => "active",
            LinkState::Trashed => "trashed",
            LinkState::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub id: String,
    pub size: i64,
    pub create_time: i64,
    pub signature_email: String,
    /// Encrypted extended attributes (JSON once decrypted)
    pub xattr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    pub content_key: EncryptedKey,
    pub active_revision: RevisionRecord,
}

/// An encrypted file or folder node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub link_id: String,
    /// `None` for the root link of a share
    pub parent_link_id: Option<String>,
    pub link_type: LinkType,
    /// Encrypted name
    pub name: String,
    pub name_signature_email: String,
    pub signature_email: String,
    pub node_key: EncryptedKey,
    pub state: LinkState,
    pub mime_type: String,
    pub size: i64,
    pub create_time: i64,
    pub modify_time: i64,
    /// Zero when the link never expires
    pub expiration_time: i64,
    /// Present on files only
    pub file_properties: Option<FileProperties>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_status_code_display() {
        assert_eq!(AddressType::ALIAS.to_string(), "alias");
        assert_eq!(AddressType(9).to_string(), "Unknown (9)");
        assert_eq!(AddressStatus::DISABLED.to_string(), "disabled");
        assert_eq!(ShareType::DEVICE.to_string(), "device");
        assert_eq!(ShareState::DELETED.to_string(), "deleted");
        assert_eq!(ShareFlags::PRIMARY.to_string(), "primary");
        assert_eq!(ShareFlags(4).to_string(), "Unknown (4)");
        assert_eq!(VolumeState::LOCKED.to_string(), "locked");
    }

    #[test]
    fn test_status_codes_serialize_as_numbers() {
        let json = serde_json::to_string(&ShareState::ACTIVE).unwrap();
        assert_eq!(json, "1");
        let state: ShareState = serde_json::from_str("2").unwrap();
        assert_eq!(state, ShareState::DELETED);
    }

    #[test]
    fn test_primary_key_fallback() {
        let mut user = User {
            id: "user".to_string(),
            name: "alice".to_string(),
            display_name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            keys: vec![
                UserKey {
                    id: "k1".to_string(),
                    private_key: String::new(),
                    primary: false,
                },
                UserKey {
                    id: "k2".to_string(),
                    private_key: String::new(),
                    primary: true,
                },
            ],
            used_space: 0,
            max_space: 0,
        };
        assert_eq!(user.primary_key().map(|k| k.id.as_str()), Some("k2"));

        user.keys[1].primary = false;
        assert_eq!(user.primary_key().map(|k| k.id.as_str()), Some("k1"));

        user.keys.clear();
        assert!(user.primary_key().is_none());
    }

    #[test]
    fn test_tokens_debug_redacts_secrets() {
        let tokens = Tokens {
            uid: "uid".to_string(),
            access_token: "very-secret".to_string(),
            refresh_token: "also-secret".to_string(),
        };
        let debug = format!("{:?}", tokens);
        assert!(debug.contains("uid"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("also-secret"));
    }
}
