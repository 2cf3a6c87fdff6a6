use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;

use crate::api::{
    Address, AddressKey, AddressStatus, AddressType, ApiError, Auth, DriveApi, FileProperties,
    LinkRecord, LinkState, LinkType, PasswordMode, RevisionRecord, Salt, ShareFlags,
    ShareMetadata, ShareRecord, ShareState, ShareType, Tokens, User, UserKey, VolumeRecord,
    VolumeState,
};
use crate::crypto::SaltedKeyPass;
use crate::session::{Credentials, LockedSession, Session, SessionError};

use super::{SealedCrypto, SealedKeyRing};

const BASE_TIME: i64 = 1_700_000_000;

#[derive(Debug, Default)]
struct DriveState {
    username: String,
    password: String,
    password_mode: Option<PasswordMode>,
    two_factor_code: Option<String>,

    // uid -> access token
    sessions: HashMap<String, String>,
    current: Option<String>,
    awaiting_two_factor: bool,
    next_session: u64,
    fail_revoke: bool,

    user: Option<User>,
    addresses: Vec<Address>,
    salts: Vec<Salt>,
    volumes: Vec<VolumeRecord>,
    shares: Vec<ShareRecord>,
    // share id -> links in server order
    links: HashMap<String, Vec<LinkRecord>>,

    failing_shares: HashSet<String>,
    latency: Option<Duration>,
    children_latency: Option<Duration>,
    share_calls: HashMap<String, usize>,
}

impl DriveState {
    fn authorized(&self) -> Result<(), ApiError> {
        match &self.current {
            Some(_) if !self.awaiting_two_factor => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }

    fn issue_session(&mut self) -> Tokens {
        self.next_session += 1;
        let tokens = Tokens {
            uid: format!("uid-{}", self.next_session),
            access_token: format!("access-{}", self.next_session),
            refresh_token: format!("refresh-{}", self.next_session),
        };
        self.sessions
            .insert(tokens.uid.clone(), tokens.access_token.clone());
        tokens
    }

    fn link_mut(&mut self, link_id: &str) -> Option<&mut LinkRecord> {
        self.links
            .values_mut()
            .flat_map(|links| links.iter_mut())
            .find(|link| link.link_id == link_id)
    }
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory [`DriveApi`] for one account
///
/// Clones share state. Populate it through [`TestDrive`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDrive {
    state: Arc<RwLock<DriveState>>,
    counters: Arc<Counters>,
}

impl MemoryDrive {
    /// Make every `get_share` for `share_id` fail with a server error
    pub fn fail_share(&self, share_id: &str) {
        self.state.write().failing_shares.insert(share_id.to_string());
    }

    /// Delay every `get_share` call
    pub fn set_latency(&self, latency: Duration) {
        self.state.write().latency = Some(latency);
    }

    /// Delay every `list_children` call
    pub fn set_children_latency(&self, latency: Duration) {
        self.state.write().children_latency = Some(latency);
    }

    pub fn fail_revoke(&self, fail: bool) {
        self.state.write().fail_revoke = fail;
    }

    /// Highest number of concurrent `get_share` calls seen
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn share_calls(&self, share_id: &str) -> usize {
        self.state
            .read()
            .share_calls
            .get(share_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_share_calls(&self) -> usize {
        self.state.read().share_calls.values().sum()
    }

    pub fn is_active(&self, uid: &str) -> bool {
        self.state.read().sessions.contains_key(uid)
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    async fn login(&self, username: &str, password: &str) -> Result<Auth, ApiError> {
        let mut state = self.state.write();
        if state.username != username || state.password != password {
            return Err(ApiError::Unauthorized);
        }
        let tokens = state.issue_session();
        state.current = Some(tokens.uid.clone());
        state.awaiting_two_factor = state.two_factor_code.is_some();
        Ok(Auth {
            tokens,
            password_mode: state.password_mode.unwrap_or(PasswordMode::One),
            two_factor_enabled: state.two_factor_code.is_some(),
        })
    }

    async fn submit_two_factor(&self, code: &str) -> Result<(), ApiError> {
        let mut state = self.state.write();
        if state.current.is_none() || state.two_factor_code.as_deref() != Some(code) {
            return Err(ApiError::Unauthorized);
        }
        state.awaiting_two_factor = false;
        Ok(())
    }

    async fn resume(&self, tokens: &Tokens) -> Result<(), ApiError> {
        let mut state = self.state.write();
        let valid = state
            .sessions
            .get(&tokens.uid)
            .map_or(false, |access| *access == tokens.access_token);
        if !valid {
            return Err(ApiError::Unauthorized);
        }
        state.current = Some(tokens.uid.clone());
        state.awaiting_two_factor = false;
        Ok(())
    }

    async fn revoke(&self, uid: &str) -> Result<(), ApiError> {
        let mut state = self.state.write();
        if state.fail_revoke {
            return Err(ApiError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        if state.sessions.remove(uid).is_none() {
            return Err(ApiError::Unauthorized);
        }
        if state.current.as_deref() == Some(uid) {
            state.current = None;
        }
        Ok(())
    }

    async fn get_user(&self) -> Result<User, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        state
            .user
            .clone()
            .ok_or_else(|| ApiError::NotFound("user".to_string()))
    }

    async fn get_addresses(&self) -> Result<Vec<Address>, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        Ok(state.addresses.clone())
    }

    async fn get_salts(&self) -> Result<Vec<Salt>, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        Ok(state.salts.clone())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        Ok(state.volumes.clone())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        state
            .volumes
            .iter()
            .find(|volume| volume.volume_id == volume_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("volume {}", volume_id)))
    }

    async fn list_shares(&self, all: bool) -> Result<Vec<ShareMetadata>, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        Ok(state
            .shares
            .iter()
            .filter(|share| all || share.metadata.state != ShareState::DELETED)
            .map(|share| share.metadata.clone())
            .collect())
    }

    async fn get_share(&self, share_id: &str) -> Result<ShareRecord, ApiError> {
        let latency = {
            let mut state = self.state.write();
            state.authorized()?;
            *state.share_calls.entry(share_id.to_string()).or_default() += 1;
            state.latency
        };

        let _in_flight = InFlight::enter(&self.counters);
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }

        let state = self.state.read();
        if state.failing_shares.contains(share_id) {
            return Err(ApiError::Status {
                status: 500,
                message: format!("share {} unavailable", share_id),
            });
        }
        state
            .shares
            .iter()
            .find(|share| share.metadata.share_id == share_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("share {}", share_id)))
    }

    async fn get_link(&self, share_id: &str, link_id: &str) -> Result<LinkRecord, ApiError> {
        let state = self.state.read();
        state.authorized()?;
        state
            .links
            .get(share_id)
            .and_then(|links| links.iter().find(|link| link.link_id == link_id))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("link {}", link_id)))
    }

    async fn list_children(
        &self,
        share_id: &str,
        link_id: &str,
        all: bool,
    ) -> Result<Vec<LinkRecord>, ApiError> {
        let latency = self.state.read().children_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.read();
        state.authorized()?;
        let links = state
            .links
            .get(share_id)
            .ok_or_else(|| ApiError::NotFound(format!("share {}", share_id)))?;
        Ok(links
            .iter()
            .filter(|link| link.parent_link_id.as_deref() == Some(link_id))
            .filter(|link| all || !link.state.is_trashed())
            .cloned()
            .collect())
    }
}

/// Description of a link to add to a [`TestDrive`]
#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub name: String,
    pub link_type: LinkType,
    pub size: i64,
    pub state: LinkState,
    /// Signs the node key; defaults to the share creator
    pub signer: Option<String>,
    /// Signs the name; defaults to `signer`
    pub name_signer: Option<String>,
    pub mime_type: String,
    pub xattr: Option<String>,
}

impl LinkSpec {
    pub fn folder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            link_type: LinkType::Folder,
            size: 0,
            state: LinkState::Active,
            signer: None,
            name_signer: None,
            mime_type: "Folder".to_string(),
            xattr: None,
        }
    }

    pub fn file(name: &str, size: i64) -> Self {
        Self {
            link_type: LinkType::File,
            size,
            mime_type: "application/octet-stream".to_string(),
            ..Self::folder(name)
        }
    }

    pub fn signed_by(mut self, email: &str) -> Self {
        self.signer = Some(email.to_string());
        self
    }

    pub fn name_signed_by(mut self, email: &str) -> Self {
        self.name_signer = Some(email.to_string());
        self
    }

    pub fn trashed(mut self) -> Self {
        self.state = LinkState::Trashed;
        self
    }

    pub fn with_xattr(mut self, json: &str) -> Self {
        self.xattr = Some(json.to_string());
        self
    }
}

/// Builds a consistent encrypted account inside a [`MemoryDrive`]
///
/// Every key, share and link is sealed with [`SealedKeyRing`] exactly the
///  way a client would need to unwrap it, so sessions created against the
///  drive walk the full derivation chain.
#[derive(Debug)]
pub struct TestDrive {
    drive: MemoryDrive,
    key_pass: SaltedKeyPass,
    user_key: SealedKeyRing,
    // email -> signing keyring, including addresses the account does not own
    signers: HashMap<String, SealedKeyRing>,
    // address id -> keyring
    address_keys: HashMap<String, SealedKeyRing>,
    // share id -> (keyring, creator email)
    share_keys: HashMap<String, (SealedKeyRing, String)>,
    // link id -> node keyring
    node_keys: HashMap<String, SealedKeyRing>,
    next_id: u64,
}

impl TestDrive {
    /// An account whose login password unlocks its keys, with one
    ///  address named after `username`
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_options(username, password, None, None)
    }

    /// # Arguments
    /// * `mailbox_password` - switch to two password mode
    /// * `two_factor_code` - require this code after login
    pub fn with_options(
        username: &str,
        password: &str,
        mailbox_password: Option<&str>,
        two_factor_code: Option<&str>,
    ) -> Self {
        let salt = format!("{}-salt", username);
        let key_password = mailbox_password.unwrap_or(password);
        let key_pass = SealedCrypto::salt(key_password.as_bytes(), salt.as_bytes());
        let pass_key = SealedKeyRing::from_slice(key_pass.as_bytes())
            .unwrap_or_else(|_| SealedKeyRing::from_seed(key_password));
        let user_key = SealedKeyRing::from_seed(&format!("{}/user", username));

        let user = User {
            id: format!("user-{}", username),
            name: username.to_string(),
            display_name: username.to_string(),
            email: username.to_string(),
            keys: vec![UserKey {
                id: "user-key-1".to_string(),
                private_key: pass_key.seal(user_key.bytes(), &pass_key),
                primary: true,
            }],
            used_space: 0,
            max_space: 5 * 1024 * 1024 * 1024,
        };

        let drive = MemoryDrive::default();
        {
            let mut state = drive.state.write();
            state.username = username.to_string();
            state.password = password.to_string();
            state.password_mode = Some(match mailbox_password {
                Some(_) => PasswordMode::Two,
                None => PasswordMode::One,
            });
            state.two_factor_code = two_factor_code.map(str::to_string);
            state.salts = vec![Salt {
                id: "user-key-1".to_string(),
                key_salt: Some(STANDARD.encode(salt.as_bytes())),
            }];
            state.user = Some(user);
        }

        let mut test_drive = Self {
            drive,
            key_pass,
            user_key,
            signers: HashMap::new(),
            address_keys: HashMap::new(),
            share_keys: HashMap::new(),
            node_keys: HashMap::new(),
            next_id: 0,
        };
        let email = if username.contains('@') {
            username.to_string()
        } else {
            format!("{}@example.com", username)
        };
        test_drive.add_address(&email);
        test_drive
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn signer(&self, email: &str) -> SealedKeyRing {
        self.signers
            .get(email)
            .cloned()
            .unwrap_or_else(|| SealedKeyRing::from_seed(&format!("unknown/{}", email)))
    }

    fn push_address(&mut self, email: &str, active: bool) -> String {
        let address_id = self.next_id("address");
        let key = SealedKeyRing::from_seed(&format!("address/{}", email));
        let order = self.drive.state.read().addresses.len() as u32 + 1;

        let address = Address {
            id: address_id.clone(),
            email: email.to_string(),
            address_type: if order == 1 {
                AddressType::ORIGINAL
            } else {
                AddressType::ALIAS
            },
            status: if active {
                AddressStatus::ENABLED
            } else {
                AddressStatus::DISABLED
            },
            order,
            keys: vec![AddressKey {
                id: format!("{}-key", address_id),
                private_key: String::new(),
                token: Some(self.user_key.seal(key.bytes(), &self.user_key)),
                signature: None,
                primary: true,
                active,
            }],
        };
        self.drive.state.write().addresses.push(address);
        self.signers.insert(email.to_string(), key.clone());
        if active {
            self.address_keys.insert(address_id.clone(), key);
        }
        address_id
    }

    /// Add an address owned by the account; returns its id
    pub fn add_address(&mut self, email: &str) -> String {
        self.push_address(email, true)
    }

    /// Add an address whose only key is inactive, so no keyring is
    ///  unlocked for it
    pub fn add_inactive_address(&mut self, email: &str) -> String {
        self.push_address(email, false)
    }

    /// Register a signer the account knows nothing about
    pub fn add_foreign_signer(&mut self, email: &str) {
        self.signers.insert(
            email.to_string(),
            SealedKeyRing::from_seed(&format!("foreign/{}", email)),
        );
    }

    pub fn primary_email(&self) -> String {
        self.drive
            .state
            .read()
            .addresses
            .first()
            .map(|address| address.email.clone())
            .unwrap_or_default()
    }

    pub fn address_id(&self, email: &str) -> Option<String> {
        self.drive
            .state
            .read()
            .addresses
            .iter()
            .find(|address| address.email == email)
            .map(|address| address.id.clone())
    }

    pub fn add_volume(&mut self) -> String {
        let volume_id = self.next_id("volume");
        self.drive.state.write().volumes.push(VolumeRecord {
            volume_id: volume_id.clone(),
            state: VolumeState::ACTIVE,
            used_space: 0,
            max_space: None,
            share_id: String::new(),
        });
        volume_id
    }

    /// Add a share owned by `email` whose root folder is named `root_name`
    ///
    /// The first share on a volume becomes its main share. Returns the
    ///  share id and root link id.
    pub fn add_share(&mut self, volume_id: &str, email: &str, root_name: &str) -> (String, String) {
        let share_id = self.next_id("share");
        let root_link_id = self.next_id("link");
        let share_key = SealedKeyRing::from_seed(&format!("share/{}", share_id));
        let address_key = self.signer(email);
        let address_id = self.address_id(email).unwrap_or_default();

        let main = {
            let mut state = self.drive.state.write();
            match state
                .volumes
                .iter_mut()
                .find(|volume| volume.volume_id == volume_id)
            {
                Some(volume) if volume.share_id.is_empty() => {
                    volume.share_id = share_id.clone();
                    true
                }
                _ => false,
            }
        };

        let record = ShareRecord {
            metadata: ShareMetadata {
                share_id: share_id.clone(),
                link_id: root_link_id.clone(),
                volume_id: volume_id.to_string(),
                share_type: if main {
                    ShareType::MAIN
                } else {
                    ShareType::STANDARD
                },
                state: ShareState::ACTIVE,
                creator: email.to_string(),
                flags: if main {
                    ShareFlags::PRIMARY
                } else {
                    ShareFlags::NONE
                },
                locked: false,
            },
            address_id,
            key: share_key.wrap(&address_key, &address_key),
        };

        self.share_keys
            .insert(share_id.clone(), (share_key.clone(), email.to_string()));
        {
            let mut state = self.drive.state.write();
            state.shares.push(record);
            state.links.insert(share_id.clone(), Vec::new());
        }

        let root = self.build_link(
            &share_id,
            &root_link_id,
            None,
            &share_key,
            LinkSpec::folder(root_name).signed_by(email),
        );
        self.drive
            .state
            .write()
            .links
            .entry(share_id.clone())
            .or_default()
            .push(root);

        (share_id, root_link_id)
    }

    fn build_link(
        &mut self,
        share_id: &str,
        link_id: &str,
        parent_link_id: Option<&str>,
        parent_key: &SealedKeyRing,
        spec: LinkSpec,
    ) -> LinkRecord {
        let creator = self
            .share_keys
            .get(share_id)
            .map(|(_, creator)| creator.clone())
            .unwrap_or_default();
        let signer_email = spec.signer.clone().unwrap_or(creator);
        let name_signer_email = spec
            .name_signer
            .clone()
            .unwrap_or_else(|| signer_email.clone());
        let signer = self.signer(&signer_email);
        let name_signer = self.signer(&name_signer_email);

        let node_key = SealedKeyRing::from_seed(&format!("node/{}", link_id));
        self.node_keys.insert(link_id.to_string(), node_key.clone());
        let create_time = BASE_TIME + self.next_id as i64;

        let file_properties = match spec.link_type {
            LinkType::Folder => None,
            LinkType::File => {
                let content_key = SealedKeyRing::from_seed(&format!("content/{}", link_id));
                Some(FileProperties {
                    content_key: content_key.wrap(&node_key, &signer),
                    active_revision: RevisionRecord {
                        id: format!("{}-revision", link_id),
                        size: spec.size,
                        create_time: create_time + 60,
                        signature_email: signer_email.clone(),
                        xattr: spec
                            .xattr
                            .as_ref()
                            .map(|json| content_key.seal(json.as_bytes(), &signer)),
                    },
                })
            }
        };

        LinkRecord {
            link_id: link_id.to_string(),
            parent_link_id: parent_link_id.map(str::to_string),
            link_type: spec.link_type,
            name: parent_key.seal(spec.name.as_bytes(), &name_signer),
            name_signature_email: name_signer_email,
            signature_email: signer_email,
            node_key: node_key.wrap(parent_key, &signer),
            state: spec.state,
            mime_type: spec.mime_type,
            // files report revision totals here; the active revision wins
            size: 0,
            create_time,
            modify_time: create_time,
            expiration_time: 0,
            file_properties,
        }
    }

    /// Add a link under `parent_link_id`; returns the new link id
    pub fn add_link(&mut self, share_id: &str, parent_link_id: &str, spec: LinkSpec) -> String {
        let link_id = self.next_id("link");
        let parent_key = self
            .node_keys
            .get(parent_link_id)
            .cloned()
            .unwrap_or_else(|| SealedKeyRing::from_seed(&format!("missing/{}", parent_link_id)));
        let record = self.build_link(share_id, &link_id, Some(parent_link_id), &parent_key, spec);
        self.drive
            .state
            .write()
            .links
            .entry(share_id.to_string())
            .or_default()
            .push(record);
        link_id
    }

    pub fn add_folder(&mut self, share_id: &str, parent_link_id: &str, name: &str) -> String {
        self.add_link(share_id, parent_link_id, LinkSpec::folder(name))
    }

    pub fn add_file(&mut self, share_id: &str, parent_link_id: &str, name: &str, size: i64) -> String {
        self.add_link(share_id, parent_link_id, LinkSpec::file(name, size))
    }

    /// Re-seal a link's name under an unrelated key
    pub fn corrupt_name(&mut self, link_id: &str) {
        let garbage = SealedKeyRing::from_seed("corrupt");
        if let Some(link) = self.drive.state.write().link_mut(link_id) {
            link.name = garbage.seal(b"corrupt", &garbage);
        }
    }

    pub fn trash(&mut self, link_id: &str) {
        if let Some(link) = self.drive.state.write().link_mut(link_id) {
            link.state = LinkState::Trashed;
        }
    }

    pub fn delete_share(&mut self, share_id: &str) {
        let mut state = self.drive.state.write();
        if let Some(share) = state
            .shares
            .iter_mut()
            .find(|share| share.metadata.share_id == share_id)
        {
            share.metadata.state = ShareState::DELETED;
        }
    }

    pub fn drive(&self) -> &MemoryDrive {
        &self.drive
    }

    pub fn api(&self) -> Arc<dyn DriveApi> {
        Arc::new(self.drive.clone())
    }

    pub fn crypto(&self) -> Arc<SealedCrypto> {
        Arc::new(SealedCrypto)
    }

    pub fn key_pass(&self) -> SaltedKeyPass {
        self.key_pass.clone()
    }

    /// Expected keyring of an owned address
    pub fn address_key(&self, address_id: &str) -> Option<&SealedKeyRing> {
        self.address_keys.get(address_id)
    }

    pub fn user_key(&self) -> &SealedKeyRing {
        &self.user_key
    }

    /// Open a server session without going through login
    pub fn issue_tokens(&self) -> Tokens {
        self.drive.state.write().issue_session()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.issue_tokens(), &self.key_pass)
    }

    /// Restore and unlock a fresh session
    pub async fn session(&self) -> Result<Session<SealedCrypto>, SessionError> {
        let locked = LockedSession::restore(self.api(), self.crypto(), self.issue_tokens()).await?;
        locked.unlock(&self.key_pass)
    }
}
