use crate::crypto::Crypto;
use crate::session::Session;

use super::{DriveError, Link, ShareLister};

/// Split a path into segments
///
/// Leading and trailing slashes are dropped, so `""`, `"/"` and `"a/"`
///  normalize to `[]`, `[]` and `["a"]`. An empty segment anywhere else
///  (`"a//b"`) is rejected.
pub(crate) fn split_path(path: &str) -> Result<Vec<&str>, DriveError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(DriveError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

impl<C: Crypto> Link<C> {
    /// Resolve `path` relative to this link
    ///
    /// Each segment is matched against the decrypted names of the current
    ///  folder's children, case-sensitively; the first match in listing
    ///  order wins. The whole walk runs under the session timeout.
    pub async fn resolve_path(
        &self,
        path: &str,
        include_trashed: bool,
    ) -> Result<Link<C>, DriveError> {
        let segments = split_path(path)?;
        tracing::debug!(from = %self.link_id(), path, "resolving path");
        self.share()
            .session()
            .bounded(self.resolve_segments(&segments, include_trashed))
            .await
    }

    pub(crate) async fn resolve_segments(
        &self,
        segments: &[&str],
        include_trashed: bool,
    ) -> Result<Link<C>, DriveError> {
        let mut current = self.clone();
        for (depth, segment) in segments.iter().enumerate() {
            if !current.is_folder() {
                return Err(DriveError::NotAFolder(current.path()));
            }

            let children = current.children(include_trashed).await?;
            match children.into_iter().find(|child| child.name() == *segment) {
                Some(child) => {
                    tracing::debug!(segment, link_id = %child.link_id(), "matched path segment");
                    current = child;
                }
                None => {
                    let missing = segments[..=depth].join("/");
                    return Err(DriveError::FileNotFound(missing));
                }
            }
        }
        Ok(current)
    }
}

/// Share root links in listing order, and the shares that failed to load
pub type ShareRoots<C> = (Vec<Link<C>>, Vec<(String, DriveError)>);

impl<C: Crypto> Session<C> {
    /// Root links of every accessible share, in share listing order
    ///
    /// Shares that fail to load are handled per the session's list policy;
    ///  under best effort they come back beside the roots.
    pub async fn list_share_roots(&self, include_trashed: bool) -> Result<ShareRoots<C>, DriveError> {
        let (shares, failures) = ShareLister::new(self)
            .list(None, include_trashed)
            .await?
            .into_parts();
        let roots = shares.iter().map(|share| share.root_link()).collect();
        Ok((roots, failures))
    }

    /// Resolve a path whose first segment names a share
    ///
    /// The first segment is matched against decrypted share root names; the
    ///  rest is resolved inside that share. When no loaded share matches
    ///  and some shares failed to load, the first of those failures is
    ///  returned rather than `FileNotFound`, since the share asked for may
    ///  be among them.
    pub async fn resolve_path(
        &self,
        path: &str,
        include_trashed: bool,
    ) -> Result<Link<C>, DriveError> {
        let segments = split_path(path)?;
        let Some((share_name, rest)) = segments.split_first() else {
            return Err(DriveError::InvalidPath(path.to_string()));
        };

        self.bounded(async {
            let (roots, mut failures) = self.list_share_roots(include_trashed).await?;
            let Some(root) = roots.into_iter().find(|root| root.name() == *share_name) else {
                if failures.is_empty() {
                    return Err(DriveError::FileNotFound((*share_name).to_string()));
                }
                tracing::warn!(
                    share = %share_name,
                    failed = failures.len(),
                    "share not found among the shares that loaded"
                );
                let (_, first) = failures.swap_remove(0);
                return Err(first);
            };
            tracing::debug!(share = %root.share().share_id(), path, "resolved share name");

            root.resolve_segments(rest, include_trashed)
                .await
                .map_err(|e| match e {
                    DriveError::FileNotFound(missing) => {
                        DriveError::FileNotFound(format!("{}/{}", share_name, missing))
                    }
                    e => e,
                })
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_path() {
        assert!(split_path("").unwrap().is_empty());
        assert!(split_path("/").unwrap().is_empty());
        assert!(split_path("//").unwrap().is_empty());
        assert_eq!(split_path("a").unwrap(), vec!["a"]);
        assert_eq!(split_path("/a/b/").unwrap(), vec!["a", "b"]);
        assert_eq!(split_path("Documents/Photos/").unwrap(), vec!["Documents", "Photos"]);
        assert_eq!(split_path("with space/x").unwrap(), vec!["with space", "x"]);
    }

    #[test]
    fn test_split_path_rejects_empty_segments() {
        assert!(matches!(
            split_path("a//b"),
            Err(DriveError::InvalidPath(path)) if path == "a//b"
        ));
    }
}
