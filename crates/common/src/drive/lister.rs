//! Concurrent share loading
//!
//! ```text
//!  producer ──work queue (bounded)──▶ worker 1..=N ──result queue──▶ caller
//!                                         │
//!                          supervisor joins workers, then drops
//!                          its result sender to close the queue
//! ```
//!
//! `N` is `min(max_workers, share count)`. Every share id is handed out
//! exactly once. A single [`CancelToken`] stops the producer and every
//! worker, including one blocked on the work queue or in the middle of a
//! fetch.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::crypto::Crypto;
use crate::session::Session;

use super::{DriveError, Share};

/// What to do when one share of a bulk listing fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListPolicy {
    /// Log the failure, keep going and report it in [`ShareListing::failures`]
    #[default]
    BestEffort,
    /// Cancel the remaining work and return the first error
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListerConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub policy: ListPolicy,
    /// Bound on a whole listing, unbounded when unset
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

fn default_max_workers() -> usize {
    10
}

impl Default for ListerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            policy: ListPolicy::default(),
            deadline_secs: None,
        }
    }
}

impl ListerConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Cooperative cancellation shared between a caller and background tasks
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives in `self`, so this only returns once cancelled
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

// Stops the workers if the listing future is dropped part way
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Shares loaded by a [`ShareLister`]
pub struct ShareListing<C: Crypto> {
    /// Loaded shares, in the order they finished
    pub shares: Vec<Share<C>>,
    /// Share ids that failed under [`ListPolicy::BestEffort`]
    pub failures: Vec<(String, DriveError)>,
    /// Number of workers the listing ran with
    pub workers: usize,
    // Request position of each entry in `shares`
    positions: Vec<usize>,
}

impl<C: Crypto> std::fmt::Debug for ShareListing<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareListing")
            .field("shares", &self.shares.len())
            .field("failures", &self.failures)
            .field("workers", &self.workers)
            .finish()
    }
}

impl<C: Crypto> ShareListing<C> {
    fn new(workers: usize) -> Self {
        Self {
            shares: Vec::new(),
            failures: Vec::new(),
            workers,
            positions: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Loaded shares in the order their ids were requested
    pub fn into_request_order(self) -> Vec<Share<C>> {
        self.into_parts().0
    }

    /// Loaded shares in request order, and the failures beside them
    pub fn into_parts(self) -> (Vec<Share<C>>, Vec<(String, DriveError)>) {
        let mut shares: Vec<(usize, Share<C>)> =
            self.positions.into_iter().zip(self.shares).collect();
        shares.sort_by_key(|(position, _)| *position);
        let shares = shares.into_iter().map(|(_, share)| share).collect();
        (shares, self.failures)
    }
}

type LoadResult<C> = (usize, String, Result<Share<C>, DriveError>);

/// Loads many shares in parallel under a bounded worker pool
pub struct ShareLister<C: Crypto> {
    session: Session<C>,
    config: ListerConfig,
    cancel: CancelToken,
}

impl<C: Crypto> ShareLister<C> {
    /// A lister using the session's configured policy
    pub fn new(session: &Session<C>) -> Self {
        Self {
            session: session.clone(),
            config: session.lister_config().clone(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: ListerConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancelling `cancel` aborts the listing with [`DriveError::Cancelled`]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// List share metadata once, optionally keep one volume, then load
    ///  every remaining share
    ///
    /// # Arguments
    /// * `volume_filter` - only load shares of this volume
    /// * `include_trashed` - include deleted shares
    pub async fn list(
        &self,
        volume_filter: Option<&str>,
        include_trashed: bool,
    ) -> Result<ShareListing<C>, DriveError> {
        let metadata = self.session.api().list_shares(include_trashed).await?;
        let share_ids: Vec<String> = metadata
            .into_iter()
            .filter(|m| volume_filter.map_or(true, |volume_id| m.volume_id == volume_id))
            .map(|m| m.share_id)
            .collect();
        tracing::debug!(
            shares = share_ids.len(),
            volume = ?volume_filter,
            include_trashed,
            "listing shares"
        );
        self.fetch(share_ids).await
    }

    /// Load each of `share_ids` exactly once
    pub async fn fetch(&self, share_ids: Vec<String>) -> Result<ShareListing<C>, DriveError> {
        let total = share_ids.len();
        if total == 0 {
            return Ok(ShareListing::new(0));
        }
        let workers = self.config.max_workers.max(1).min(total);

        let stop = CancelToken::new();
        let _guard = CancelOnDrop(stop.clone());

        let (work_tx, work_rx) = flume::bounded::<(usize, String)>(workers);
        let (result_tx, result_rx) = flume::unbounded::<LoadResult<C>>();

        let producer_stop = stop.clone();
        let producer_ids = share_ids.clone();
        tokio::spawn(async move {
            for item in producer_ids.into_iter().enumerate() {
                tokio::select! {
                    biased;
                    _ = producer_stop.cancelled() => break,
                    sent = work_tx.send_async(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // dropping work_tx closes the work queue
        });

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let session = self.session.clone();
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let stop = stop.clone();
            handles.push(tokio::spawn(async move {
                let mut loaded = 0usize;
                loop {
                    let (index, share_id) = tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        next = work_rx.recv_async() => match next {
                            Ok(item) => item,
                            Err(_) => break,
                        },
                    };
                    let result = tokio::select! {
                        biased;
                        _ = stop.cancelled() => Err(DriveError::Cancelled),
                        result = Share::load(&session, &share_id) => result,
                    };
                    loaded += 1;
                    if result_tx.send((index, share_id, result)).is_err() {
                        break;
                    }
                }
                tracing::debug!(worker, loaded, "lister worker finished");
            }));
        }
        drop(work_rx);

        let supervisor = tokio::spawn(async move {
            let mut panicked = 0usize;
            for handle in handles {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        panicked += 1;
                    }
                }
            }
            drop(result_tx);
            panicked
        });

        let policy = self.config.policy;
        let external = self.cancel.clone();
        let collect = async {
            let mut listing = ShareListing::new(workers);
            let mut seen = vec![false; total];
            loop {
                let next = tokio::select! {
                    biased;
                    _ = external.cancelled() => return Err(DriveError::Cancelled),
                    next = result_rx.recv_async() => next,
                };
                let Ok((index, share_id, result)) = next else {
                    break;
                };
                seen[index] = true;
                match result {
                    Ok(share) => {
                        listing.shares.push(share);
                        listing.positions.push(index);
                    }
                    Err(e) if policy == ListPolicy::FailFast => {
                        tracing::debug!(share_id = %share_id, error = %e, "share failed, cancelling listing");
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(share_id = %share_id, error = %e, "skipping share");
                        listing.failures.push((share_id, e));
                    }
                }
            }
            Ok((listing, seen))
        };

        let collected = match self.config.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, collect)
                .await
                .unwrap_or(Err(DriveError::TimedOut(deadline))),
            None => collect.await,
        };
        let (mut listing, seen) = match collected {
            Ok(collected) => collected,
            Err(e) => {
                stop.cancel();
                return Err(e);
            }
        };

        let panicked = supervisor.await.map_err(anyhow::Error::from)?;
        let missing: Vec<String> = share_ids
            .into_iter()
            .zip(seen)
            .filter(|(_, seen)| !seen)
            .map(|(share_id, _)| share_id)
            .collect();
        if !missing.is_empty() {
            if policy == ListPolicy::FailFast {
                return Err(DriveError::WorkerPanicked(panicked));
            }
            for share_id in missing {
                tracing::warn!(share_id = %share_id, panicked, "share lost to a panicked worker");
                listing
                    .failures
                    .push((share_id, DriveError::WorkerPanicked(panicked)));
            }
        }

        tracing::info!(
            loaded = listing.shares.len(),
            failed = listing.failures.len(),
            workers,
            "share listing finished"
        );
        Ok(listing)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lister_config_defaults() {
        let config = ListerConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.policy, ListPolicy::BestEffort);
        assert_eq!(config.deadline(), None);
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());

        // already cancelled resolves immediately
        token.cancelled().await;
    }
}
