use crate::api::{ShareMetadata, VolumeRecord, VolumeState};
use crate::crypto::Crypto;
use crate::session::Session;

use super::{DriveError, Share, ShareLister, ShareListing};

/// A storage volume and the shares that live on it
pub struct Volume<C: Crypto> {
    session: Session<C>,
    record: VolumeRecord,
}

impl<C: Crypto> Clone for Volume<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            record: self.record.clone(),
        }
    }
}

impl<C: Crypto> std::fmt::Debug for Volume<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume").field("record", &self.record).finish()
    }
}

impl<C: Crypto> Volume<C> {
    pub fn record(&self) -> &VolumeRecord {
        &self.record
    }

    pub fn volume_id(&self) -> &str {
        &self.record.volume_id
    }

    pub fn state(&self) -> VolumeState {
        self.record.state
    }

    /// Metadata of every share on this volume
    ///
    /// # Arguments
    /// * `all` - include deleted shares
    pub async fn list_share_metadata(&self, all: bool) -> Result<Vec<ShareMetadata>, DriveError> {
        let shares = self.session.api().list_shares(all).await?;
        Ok(shares
            .into_iter()
            .filter(|share| share.volume_id == self.record.volume_id)
            .collect())
    }

    /// Metadata of one share, `None` if it is not on this volume
    pub async fn share_metadata(
        &self,
        share_id: &str,
        all: bool,
    ) -> Result<Option<ShareMetadata>, DriveError> {
        Ok(self
            .list_share_metadata(all)
            .await?
            .into_iter()
            .find(|share| share.share_id == share_id))
    }

    /// Load a share, `None` if it belongs to another volume
    pub async fn share(&self, share_id: &str) -> Result<Option<Share<C>>, DriveError> {
        let share = Share::load(&self.session, share_id).await?;
        if share.volume_id() != self.record.volume_id {
            tracing::debug!(
                share_id,
                volume_id = %share.volume_id(),
                expected = %self.record.volume_id,
                "share is on another volume"
            );
            return Ok(None);
        }
        Ok(Some(share))
    }

    /// Load every share on this volume concurrently
    pub async fn shares(&self, include_trashed: bool) -> Result<ShareListing<C>, DriveError> {
        ShareLister::new(&self.session)
            .list(Some(&self.record.volume_id), include_trashed)
            .await
    }

    /// The volume's main share
    pub async fn main_share(&self) -> Result<Share<C>, DriveError> {
        Share::load(&self.session, &self.record.share_id).await
    }
}

impl<C: Crypto> Session<C> {
    pub async fn volumes(&self) -> Result<Vec<Volume<C>>, DriveError> {
        let records = self.api().list_volumes().await?;
        Ok(records
            .into_iter()
            .map(|record| Volume {
                session: self.clone(),
                record,
            })
            .collect())
    }

    pub async fn volume(&self, volume_id: &str) -> Result<Volume<C>, DriveError> {
        let record = self.api().get_volume(volume_id).await?;
        Ok(Volume {
            session: self.clone(),
            record,
        })
    }

    /// Share metadata across all volumes
    pub async fn list_share_metadata(&self, all: bool) -> Result<Vec<ShareMetadata>, DriveError> {
        Ok(self.api().list_shares(all).await?)
    }

    pub async fn share(&self, share_id: &str) -> Result<Share<C>, DriveError> {
        Share::load(self, share_id).await
    }

    /// Load every accessible share concurrently, optionally limited to
    ///  one volume
    pub async fn list_shares(
        &self,
        volume_filter: Option<&str>,
        include_trashed: bool,
    ) -> Result<ShareListing<C>, DriveError> {
        ShareLister::new(self)
            .list(volume_filter, include_trashed)
            .await
    }
}
