use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::{LinkRecord, ShareMetadata, ShareRecord};
use crate::crypto::Crypto;
use crate::session::Session;

use super::link::{LinkHandle, LinkNode};
use super::{DriveError, Link};

/// Every link of one share materialized so far
///
/// Nodes are only ever appended or replaced in place, so a handle stays
///  valid for the life of the share.
struct LinkArena<C: Crypto> {
    nodes: Vec<Arc<LinkNode<C>>>,
    by_id: HashMap<String, LinkHandle>,
}

impl<C: Crypto> LinkArena<C> {
    fn with_root(root: LinkNode<C>) -> Self {
        let mut by_id = HashMap::new();
        by_id.insert(root.record.link_id.clone(), LinkHandle(0));
        Self {
            nodes: vec![Arc::new(root)],
            by_id,
        }
    }

    fn insert(&mut self, node: LinkNode<C>) -> (LinkHandle, Arc<LinkNode<C>>) {
        let node = Arc::new(node);
        match self.by_id.get(&node.record.link_id) {
            Some(handle) => {
                self.nodes[handle.0] = node.clone();
                (*handle, node)
            }
            None => {
                let handle = LinkHandle(self.nodes.len());
                self.by_id.insert(node.record.link_id.clone(), handle);
                self.nodes.push(node.clone());
                (handle, node)
            }
        }
    }
}

struct ShareInner<C: Crypto> {
    session: Session<C>,
    record: ShareRecord,
    key_ring: C::KeyRing,
    links: RwLock<LinkArena<C>>,
}

/// The root of one encrypted tree
pub struct Share<C: Crypto>(Arc<ShareInner<C>>);

impl<C: Crypto> Clone for Share<C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<C: Crypto> fmt::Debug for Share<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("share_id", &self.0.record.metadata.share_id)
            .field("volume_id", &self.0.record.metadata.volume_id)
            .field("links", &self.0.links.read().nodes.len())
            .finish()
    }
}

impl<C: Crypto> Share<C> {
    /// Fetch a share, derive its keyring and decrypt its root link
    pub async fn load(session: &Session<C>, share_id: &str) -> Result<Self, DriveError> {
        let api = session.api();
        let record = api.get_share(share_id).await?;

        let address_key_ring = session.address_key_ring(&record.address_id).ok_or_else(|| {
            DriveError::KeyNotFound(format!(
                "share {} belongs to address {}",
                share_id, record.address_id
            ))
        })?;
        let key_ring = session.crypto().derive_key_ring(
            &record.key,
            address_key_ring,
            address_key_ring,
        )?;
        tracing::debug!(share_id, address_id = %record.address_id, "derived share keyring");

        let root_record = api.get_link(share_id, &record.metadata.link_id).await?;
        if root_record.link_id != record.metadata.link_id {
            return Err(anyhow::anyhow!(
                "asked for root link {} of share {}, got {}",
                record.metadata.link_id,
                share_id,
                root_record.link_id
            )
            .into());
        }
        let root = LinkNode::derive(session, None, &key_ring, root_record)?;
        tracing::debug!(share_id, root = %root.name, "share loaded");

        Ok(Self(Arc::new(ShareInner {
            session: session.clone(),
            record,
            key_ring,
            links: RwLock::new(LinkArena::with_root(root)),
        })))
    }

    pub fn session(&self) -> &Session<C> {
        &self.0.session
    }

    pub fn record(&self) -> &ShareRecord {
        &self.0.record
    }

    pub fn metadata(&self) -> &ShareMetadata {
        &self.0.record.metadata
    }

    pub fn share_id(&self) -> &str {
        &self.0.record.metadata.share_id
    }

    pub fn volume_id(&self) -> &str {
        &self.0.record.metadata.volume_id
    }

    pub fn address_id(&self) -> &str {
        &self.0.record.address_id
    }

    /// Keyring derived from the owning address; parent keyring of the root
    pub fn key_ring(&self) -> &C::KeyRing {
        &self.0.key_ring
    }

    pub fn root_link(&self) -> Link<C> {
        self.link_at(LinkHandle(0))
    }

    /// Resolve `path` relative to the root link
    pub async fn resolve_path(
        &self,
        path: &str,
        include_trashed: bool,
    ) -> Result<Link<C>, DriveError> {
        self.root_link().resolve_path(path, include_trashed).await
    }

    /// Number of links materialized so far, root included
    pub fn materialized(&self) -> usize {
        self.0.links.read().nodes.len()
    }

    /// Open a link by id
    ///
    /// Links already materialized are returned as is. Otherwise the record
    ///  is fetched and decrypted, which requires its parent to have been
    ///  materialized first (`ParentMismatch` if not).
    pub async fn link(&self, link_id: &str) -> Result<Link<C>, DriveError> {
        let known = self.0.links.read().by_id.get(link_id).copied();
        if let Some(handle) = known {
            return Ok(self.link_at(handle));
        }

        let record = self
            .session()
            .api()
            .get_link(self.share_id(), link_id)
            .await?;
        let parent = record
            .parent_link_id
            .as_deref()
            .and_then(|id| self.0.links.read().by_id.get(id).copied());
        match parent {
            Some(handle) => self.materialize_child(&self.link_at(handle), record),
            None => Err(DriveError::ParentMismatch {
                link_id: record.link_id,
                expected: record.parent_link_id,
            }),
        }
    }

    pub(crate) fn node_at(&self, handle: LinkHandle) -> Arc<LinkNode<C>> {
        self.0.links.read().nodes[handle.0].clone()
    }

    pub(crate) fn link_at(&self, handle: LinkHandle) -> Link<C> {
        Link {
            share: self.clone(),
            handle,
            node: self.node_at(handle),
        }
    }

    /// Decrypt `record` as a child of `parent` and add it to the arena
    ///
    /// The record must name `parent` as its parent; a node can only be
    ///  materialized below a node that already is.
    pub(crate) fn materialize_child(
        &self,
        parent: &Link<C>,
        record: LinkRecord,
    ) -> Result<Link<C>, DriveError> {
        if record.parent_link_id.as_deref() != Some(parent.link_id()) {
            return Err(DriveError::ParentMismatch {
                link_id: record.link_id,
                expected: Some(parent.link_id().to_string()),
            });
        }

        let node = LinkNode::derive(
            &self.0.session,
            Some(parent.handle),
            parent.node_key_ring(),
            record,
        )?;
        let (handle, node) = self.0.links.write().insert(node);
        Ok(Link {
            share: self.clone(),
            handle,
            node,
        })
    }
}
