use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SyncError;
use super::paths::split_path;
use super::records::FileRecord;
use super::store::{Status, StoreSnapshot};
use super::tree::FolderTree;

/// The last published listing of one bucket, kept on disk so a restart can
/// show files before the first refresh lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCache {
    pub bucket: String,
    pub status: Status,
    pub files: Vec<FileRecord>,
    /// Every persisted folder path, parents before children. Unnamed
    /// placeholders are never written.
    pub folders: Vec<String>,
}

impl ListingCache {
    /// `None` unless the snapshot belongs to a bucket and holds a
    /// successful listing.
    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Option<Self> {
        if snapshot.status != Status::Success {
            return None;
        }
        let folders = &snapshot.folders;
        Some(Self {
            bucket: snapshot.bucket.clone()?,
            status: snapshot.status,
            files: snapshot.files.clone(),
            folders: folders
                .descendants(folders.root())
                .into_iter()
                .map(|id| folders.node(id))
                .filter(|node| !node.editing)
                .map(|node| node.path.clone())
                .collect(),
        })
    }

    pub fn tree(&self) -> FolderTree {
        let mut tree = FolderTree::default();
        for path in &self.folders {
            tree.insert_path(&split_path(path));
        }
        tree
    }
}

pub fn cache_path(dir: &Path, bucket: &str) -> PathBuf {
    let file_name: String = bucket
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => ch,
            _ => '_',
        })
        .collect();
    dir.join(format!("{file_name}.json"))
}

/// A missing cache file is not an error.
pub async fn load(path: &Path) -> Result<Option<ListingCache>, SyncError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let cache = serde_json::from_slice(&raw)?;
    debug!(path = %path.display(), "listing cache loaded");
    Ok(Some(cache))
}

pub async fn save(path: &Path, cache: &ListingCache) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_vec(cache)?;
    tokio::fs::write(path, raw).await?;
    debug!(path = %path.display(), count = cache.files.len(), "listing cache saved");
    Ok(())
}
