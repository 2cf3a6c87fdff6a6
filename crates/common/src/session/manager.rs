use std::future::Future;
use std::sync::Arc;

use crate::api::{DriveApi, Tokens};
use crate::config::DriveConfig;
use crate::crypto::Crypto;

use super::{Credentials, LockedSession, LoginRequest, Session, SessionError, SessionStore};

/// Restores, creates and tears down sessions for one credential store
pub struct SessionManager<C: Crypto, S: SessionStore> {
    api: Arc<dyn DriveApi>,
    crypto: Arc<C>,
    store: S,
    config: DriveConfig,
}

impl<C: Crypto, S: SessionStore> std::fmt::Debug for SessionManager<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("account", &self.store.account())
            .field("config", &self.config)
            .finish()
    }
}

impl<C: Crypto, S: SessionStore> SessionManager<C, S> {
    pub fn new(api: Arc<dyn DriveApi>, crypto: Arc<C>, store: S, config: DriveConfig) -> Self {
        Self {
            api,
            crypto,
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        let timeout = self.config.timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| SessionError::TimedOut(timeout))?
    }

    /// Unlock a session from the stored credentials
    ///
    /// `NotLoggedIn` when the current account has nothing stored.
    pub async fn restore(&self) -> Result<Session<C>, SessionError> {
        let credentials = self.store.load()?.ok_or(SessionError::NotLoggedIn)?;
        let key_pass = credentials.key_pass()?;

        let locked = self
            .timed(LockedSession::restore(
                self.api.clone(),
                self.crypto.clone(),
                credentials.tokens,
            ))
            .await?
            .with_lister_config(self.config.lister.clone())
            .with_timeout(self.config.timeout());

        let session = locked.unlock(&key_pass)?;
        tracing::info!(
            account = %self.store.account(),
            user = %session.user().name,
            "session restored"
        );
        Ok(session)
    }

    /// Interactive login; credentials are persisted before unlocking
    pub async fn login(&self, request: &LoginRequest) -> Result<Session<C>, SessionError> {
        let (locked, key_pass) = self
            .timed(LockedSession::login(
                self.api.clone(),
                self.crypto.clone(),
                request,
            ))
            .await?;
        let locked = locked
            .with_lister_config(self.config.lister.clone())
            .with_timeout(self.config.timeout());

        self.store
            .save(&Credentials::new(locked.tokens().clone(), &key_pass))?;

        let session = locked.unlock(&key_pass)?;
        tracing::info!(
            account = %self.store.account(),
            user = %session.user().name,
            "logged in"
        );
        Ok(session)
    }

    /// Persist rotated tokens, keeping the stored key pass
    pub fn refreshed(&self, tokens: &Tokens) -> Result<(), SessionError> {
        let credentials = self.store.load()?.ok_or(SessionError::NotLoggedIn)?;
        self.store.save(&credentials.with_tokens(tokens.clone()))?;
        tracing::debug!(uid = %tokens.uid, "tokens refreshed");
        Ok(())
    }

    /// Revoke the server session and forget the stored credentials
    ///
    /// With `force` a failed revoke is logged and the local credentials are
    ///  removed anyway. The session's keyrings are dropped with it.
    pub async fn logout(&self, session: Option<Session<C>>, force: bool) -> Result<(), SessionError> {
        let uid = match &session {
            Some(session) => Some(session.tokens().uid.clone()),
            None => self.store.load()?.map(|c| c.tokens.uid),
        };

        if let Some(uid) = uid {
            let revoked = self
                .timed(async { self.api.revoke(&uid).await.map_err(SessionError::from) })
                .await;
            match revoked {
                Ok(()) => {}
                Err(e) if force => {
                    tracing::warn!(error = %e, "failed to revoke session, removing it anyway")
                }
                Err(e) => return Err(e),
            }
        }

        self.store.delete()?;
        drop(session);
        tracing::info!(account = %self.store.account(), "logged out");
        Ok(())
    }

    pub fn accounts(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.store.list()?)
    }
}
