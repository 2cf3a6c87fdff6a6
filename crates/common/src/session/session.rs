use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{Address, DriveApi, PasswordMode, Tokens, User};
use crate::crypto::{Crypto, CryptoError, SaltedKeyPass};
use crate::drive::{DriveError, ListerConfig};

use super::SessionError;

/// Username / password login input
///
/// Prompting is the caller's job; an absent two factor code or mailbox
/// password surfaces as an error once the server says it is needed.
#[derive(Clone, Default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Needed for accounts in two password mode
    pub mailbox_password: Option<String>,
    pub two_factor_code: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .field("mailbox_password", &"<hidden>")
            .field("two_factor_code", &self.two_factor_code)
            .finish()
    }
}

fn require(value: &str, name: &'static str) -> Result<(), SessionError> {
    if value.is_empty() {
        return Err(SessionError::MissingCredential(name));
    }
    Ok(())
}

/// An authenticated session whose keys are still locked
pub struct LockedSession<C: Crypto> {
    api: Arc<dyn DriveApi>,
    crypto: Arc<C>,
    tokens: Tokens,
    user: User,
    addresses: Vec<Address>,
    lister: ListerConfig,
    timeout: Option<Duration>,
}

impl<C: Crypto> fmt::Debug for LockedSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedSession")
            .field("uid", &self.tokens.uid)
            .field("user", &self.user.name)
            .field("addresses", &self.addresses.len())
            .finish()
    }
}

impl<C: Crypto> LockedSession<C> {
    /// Re-attach to stored tokens and load the identity records
    pub async fn restore(
        api: Arc<dyn DriveApi>,
        crypto: Arc<C>,
        tokens: Tokens,
    ) -> Result<Self, SessionError> {
        require(&tokens.uid, "uid")?;
        require(&tokens.access_token, "access token")?;
        require(&tokens.refresh_token, "refresh token")?;

        tracing::debug!(uid = %tokens.uid, "resuming session");
        api.resume(&tokens).await?;

        tracing::debug!("fetching user");
        let user = api.get_user().await?;
        tracing::debug!("fetching addresses");
        let addresses = api.get_addresses().await?;

        Ok(Self {
            api,
            crypto,
            tokens,
            user,
            addresses,
            lister: ListerConfig::default(),
            timeout: None,
        })
    }

    /// Log in and salt the key pass for the primary user key
    ///
    /// Returns the locked session along with the salted key pass, which is
    ///  what a caller persists to restore the session later.
    pub async fn login(
        api: Arc<dyn DriveApi>,
        crypto: Arc<C>,
        request: &LoginRequest,
    ) -> Result<(Self, SaltedKeyPass), SessionError> {
        require(&request.username, "username")?;
        require(&request.password, "password")?;

        tracing::debug!(username = %request.username, "logging in");
        let auth = api.login(&request.username, &request.password).await?;

        if auth.two_factor_enabled {
            let code = request
                .two_factor_code
                .as_deref()
                .filter(|code| !code.is_empty())
                .ok_or(SessionError::TwoFactorRequired)?;
            api.submit_two_factor(code).await?;
        }

        let password = match auth.password_mode {
            PasswordMode::One => request.password.as_str(),
            PasswordMode::Two => request
                .mailbox_password
                .as_deref()
                .filter(|password| !password.is_empty())
                .ok_or(SessionError::MissingCredential("mailbox password"))?,
        };

        let user = api.get_user().await?;
        let salts = api.get_salts().await?;
        let key_id = user.primary_key().ok_or(SessionError::NoUserKey)?.id.clone();
        let key_pass = crypto.salt_key_pass(password.as_bytes(), &salts, &key_id)?;
        let addresses = api.get_addresses().await?;

        Ok((
            Self {
                api,
                crypto,
                tokens: auth.tokens,
                user,
                addresses,
                lister: ListerConfig::default(),
                timeout: None,
            },
            key_pass,
        ))
    }

    /// Listing behavior carried into the unlocked session
    pub fn with_lister_config(mut self, lister: ListerConfig) -> Self {
        self.lister = lister;
        self
    }

    /// Bound on each path resolution and child listing of the unlocked
    ///  session; unbounded when unset
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tokens(&self) -> &Tokens {
        &self.tokens
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Derive the user keyring and every address keyring
    ///
    /// Borrowing `self` means the same locked session can be unlocked again;
    ///  a deterministic backend yields identical keyrings each time.
    pub fn unlock(&self, key_pass: &SaltedKeyPass) -> Result<Session<C>, SessionError> {
        if key_pass.is_empty() {
            return Err(CryptoError::EmptyKeyPass.into());
        }

        tracing::debug!(uid = %self.tokens.uid, "unlocking keys");
        let unlocked = self.crypto.unlock(&self.user, &self.addresses, key_pass)?;

        let addresses_by_email = self
            .addresses
            .iter()
            .enumerate()
            .map(|(index, address)| (address.email.clone(), index))
            .collect();

        tracing::debug!(
            addresses = self.addresses.len(),
            unlocked = unlocked.addresses.len(),
            "session unlocked"
        );

        Ok(Session(Arc::new(SessionInner {
            api: self.api.clone(),
            crypto: self.crypto.clone(),
            tokens: self.tokens.clone(),
            user: self.user.clone(),
            addresses: self.addresses.clone(),
            addresses_by_email,
            user_key_ring: unlocked.user,
            address_key_rings: unlocked.addresses,
            lister: self.lister.clone(),
            timeout: self.timeout,
        })))
    }
}

struct SessionInner<C: Crypto> {
    api: Arc<dyn DriveApi>,
    crypto: Arc<C>,
    tokens: Tokens,
    user: User,
    addresses: Vec<Address>,
    // email -> index into `addresses`
    addresses_by_email: HashMap<String, usize>,
    user_key_ring: C::KeyRing,
    // address id -> keyring
    address_key_rings: HashMap<String, C::KeyRing>,
    lister: ListerConfig,
    timeout: Option<Duration>,
}

/// An unlocked session
///
/// Cheap to clone; every clone shares the same immutable keyrings.
pub struct Session<C: Crypto>(Arc<SessionInner<C>>);

impl<C: Crypto> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<C: Crypto> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("uid", &self.0.tokens.uid)
            .field("user", &self.0.user.name)
            .field("address_key_rings", &self.0.address_key_rings.len())
            .finish()
    }
}

impl<C: Crypto> Session<C> {
    pub fn api(&self) -> &Arc<dyn DriveApi> {
        &self.0.api
    }

    pub fn crypto(&self) -> &C {
        &self.0.crypto
    }

    pub fn tokens(&self) -> &Tokens {
        &self.0.tokens
    }

    pub fn user(&self) -> &User {
        &self.0.user
    }

    pub fn addresses(&self) -> &[Address] {
        &self.0.addresses
    }

    pub fn address(&self, email: &str) -> Option<&Address> {
        self.0
            .addresses_by_email
            .get(email)
            .map(|index| &self.0.addresses[*index])
    }

    pub fn user_key_ring(&self) -> &C::KeyRing {
        &self.0.user_key_ring
    }

    pub fn address_key_ring(&self, address_id: &str) -> Option<&C::KeyRing> {
        self.0.address_key_rings.get(address_id)
    }

    /// Keyring of the address registered under `email`
    pub fn address_key_ring_for(&self, email: &str) -> Option<&C::KeyRing> {
        self.address(email)
            .and_then(|address| self.address_key_ring(&address.id))
    }

    /// Like [`Session::address_key_ring_for`], but a miss is a hard
    ///  failure naming what was missing
    pub(crate) fn signer_key_ring(&self, email: &str) -> Result<&C::KeyRing, DriveError> {
        let address = self
            .address(email)
            .ok_or_else(|| DriveError::KeyNotFound(format!("no address for {}", email)))?;
        self.address_key_ring(&address.id).ok_or_else(|| {
            DriveError::KeyNotFound(format!("no keyring for address {}", address.id))
        })
    }

    pub fn lister_config(&self) -> &ListerConfig {
        &self.0.lister
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.0.timeout
    }

    /// Run a tree operation under the session timeout
    pub(crate) async fn bounded<T, F>(&self, fut: F) -> Result<T, DriveError>
    where
        F: Future<Output = Result<T, DriveError>>,
    {
        match self.0.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| DriveError::TimedOut(timeout))?,
            None => fut.await,
        }
    }

    /// True when both handles share the same unlocked state
    pub fn same_session(&self, other: &Session<C>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
