use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{LinkRecord, LinkState, LinkType};
use crate::crypto::{Crypto, CryptoError};
use crate::session::Session;

use super::{DriveError, Share};

/// Index of a materialized link inside its share's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LinkHandle(pub(crate) usize);

/// A link whose keys and name have all been derived
///
/// Only ever built through [`LinkNode::derive`]; a record that fails any
///  step never becomes a node.
pub(crate) struct LinkNode<C: Crypto> {
    pub(crate) parent: Option<LinkHandle>,
    pub(crate) record: LinkRecord,
    pub(crate) name: String,
    pub(crate) size: i64,
    pub(crate) modify_time: i64,
    /// Decrypts this link's children and serves as their parent keyring
    pub(crate) node_key_ring: C::KeyRing,
    pub(crate) content_key_ring: C::KeyRing,
}

impl<C: Crypto> LinkNode<C> {
    pub(crate) fn derive(
        session: &Session<C>,
        parent: Option<LinkHandle>,
        parent_key_ring: &C::KeyRing,
        record: LinkRecord,
    ) -> Result<Self, DriveError> {
        let crypto = session.crypto();
        let link_id = record.link_id.as_str();

        let signer = session.signer_key_ring(&record.signature_email)?;
        let node_key_ring = crypto.derive_key_ring(&record.node_key, parent_key_ring, signer)?;
        tracing::debug!(link_id, signer = %record.signature_email, "derived node keyring");

        let name_signer = session.signer_key_ring(&record.name_signature_email)?;
        let name = crypto.decrypt(&record.name, parent_key_ring, name_signer)?;
        let name = String::from_utf8(name)
            .map_err(|_| CryptoError::Decrypt(format!("name of link {} is not utf-8", link_id)))?;

        let (content_key_ring, size, modify_time) = match record.link_type {
            LinkType::Folder => (node_key_ring.clone(), record.size, record.modify_time),
            LinkType::File => {
                let properties = record.file_properties.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("file link {} has no file properties", link_id)
                })?;
                let content_key_ring =
                    crypto.derive_key_ring(&properties.content_key, &node_key_ring, signer)?;
                let revision = &properties.active_revision;
                (content_key_ring, revision.size, revision.create_time)
            }
        };

        tracing::debug!(link_id, link_type = %record.link_type, "link decrypted");
        Ok(Self {
            parent,
            record,
            name,
            size,
            modify_time,
            node_key_ring,
            content_key_ring,
        })
    }
}

/// Decrypted extended attributes of a file revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XAttr {
    #[serde(default)]
    pub common: XAttrCommon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XAttrCommon {
    #[serde(default)]
    pub modification_time: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub block_sizes: Vec<i64>,
}

/// A decrypted file or folder
///
/// Holds its share, which in turn owns the arena every link of the tree
///  lives in. Clones are cheap.
pub struct Link<C: Crypto> {
    pub(crate) share: Share<C>,
    pub(crate) handle: LinkHandle,
    pub(crate) node: Arc<LinkNode<C>>,
}

impl<C: Crypto> Clone for Link<C> {
    fn clone(&self) -> Self {
        Self {
            share: self.share.clone(),
            handle: self.handle,
            node: self.node.clone(),
        }
    }
}

impl<C: Crypto> fmt::Debug for Link<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("link_id", &self.node.record.link_id)
            .field("name", &self.node.name)
            .field("type", &self.node.record.link_type)
            .field("state", &self.node.record.state)
            .finish()
    }
}

impl<C: Crypto> Link<C> {
    pub fn share(&self) -> &Share<C> {
        &self.share
    }

    pub fn link_id(&self) -> &str {
        &self.node.record.link_id
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn link_type(&self) -> LinkType {
        self.node.record.link_type
    }

    pub fn is_folder(&self) -> bool {
        self.link_type() == LinkType::Folder
    }

    pub fn state(&self) -> LinkState {
        self.node.record.state
    }

    pub fn mime_type(&self) -> &str {
        &self.node.record.mime_type
    }

    /// For files, the size of the active revision
    pub fn size(&self) -> i64 {
        self.node.size
    }

    pub fn create_time(&self) -> i64 {
        self.node.record.create_time
    }

    /// For files, the creation time of the active revision
    pub fn modify_time(&self) -> i64 {
        self.node.modify_time
    }

    pub fn expiration_time(&self) -> i64 {
        self.node.record.expiration_time
    }

    pub fn record(&self) -> &LinkRecord {
        &self.node.record
    }

    /// Keyring children are derived from (the name keyring)
    pub fn node_key_ring(&self) -> &C::KeyRing {
        &self.node.node_key_ring
    }

    pub fn content_key_ring(&self) -> &C::KeyRing {
        &self.node.content_key_ring
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// Parent link, `None` for the share root
    pub fn parent(&self) -> Option<Link<C>> {
        self.node.parent.map(|handle| self.share.link_at(handle))
    }

    /// Names from the share root down to this link, joined by `/`
    pub fn path(&self) -> String {
        let mut names = vec![self.node.name.clone()];
        let mut parent = self.node.parent;
        while let Some(handle) = parent {
            let node = self.share.node_at(handle);
            names.push(node.name.clone());
            parent = node.parent;
        }
        names.reverse();
        names.join("/")
    }

    /// Fetch and decrypt the children of a folder
    ///
    /// Fails on the first child that cannot be decrypted; no partial
    ///  listing is returned.
    pub async fn list_children(&self, include_trashed: bool) -> Result<Vec<Link<C>>, DriveError> {
        self.share
            .session()
            .bounded(self.children(include_trashed))
            .await
    }

    pub(crate) async fn children(&self, include_trashed: bool) -> Result<Vec<Link<C>>, DriveError> {
        if !self.is_folder() {
            return Err(DriveError::NotAFolder(self.path()));
        }

        let records = self
            .share
            .session()
            .api()
            .list_children(self.share.share_id(), self.link_id(), include_trashed)
            .await?;
        tracing::debug!(
            link_id = %self.link_id(),
            children = records.len(),
            include_trashed,
            "listing children"
        );

        records
            .into_iter()
            .map(|record| self.share.materialize_child(self, record))
            .collect()
    }

    /// Decrypt the active revision's extended attributes
    ///
    /// `None` for folders and for revisions that carry none.
    pub fn extended_attributes(&self) -> Result<Option<XAttr>, DriveError> {
        let Some(properties) = &self.node.record.file_properties else {
            return Ok(None);
        };
        let revision = &properties.active_revision;
        let Some(message) = &revision.xattr else {
            return Ok(None);
        };

        let session = self.share.session();
        let verifier = session.signer_key_ring(&revision.signature_email)?;
        let plaintext = session
            .crypto()
            .decrypt(message, &self.node.content_key_ring, verifier)?;
        let xattr = serde_json::from_slice(&plaintext).map_err(|e| {
            anyhow::anyhow!("invalid extended attributes on {}: {}", self.link_id(), e)
        })?;
        Ok(Some(xattr))
    }
}
