use std::sync::Arc;
use std::time::Duration;

use bucketview_core::{Acl, PutResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SyncError;
use super::cache::ListingCache;
use super::paths::{Location, folder_key_prefix, marker_key, normalize_folder_path, object_key};
use super::records::{FileRecord, UrlBase, build_listing, files_in};
use super::remote::{RemoteError, StorageClient};
use super::tree::{FolderNode, FolderTree, NodeId};
use super::upload::guess_content_type;

pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";
const DEFAULT_MOVE_GRACE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Initial,
    Loading,
    Success,
    Error,
}

/// A connected bucket: the client plus where its public links point.
#[derive(Clone)]
pub struct Session {
    pub client: Arc<dyn StorageClient>,
    pub bucket: String,
    pub urls: UrlBase,
}

impl Session {
    pub fn new(client: Arc<dyn StorageClient>, urls: UrlBase) -> Self {
        Self {
            client,
            bucket: urls.bucket.clone(),
            urls,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Delay before the listing refresh that follows a move.
    pub move_grace: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            move_grace: DEFAULT_MOVE_GRACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub status: Status,
    pub bucket: Option<String>,
    pub files: Vec<FileRecord>,
    pub folders: FolderTree,
    pub current_folder: String,
    pub page: Option<u32>,
    pub current_file: Option<FileRecord>,
}

impl StoreSnapshot {
    pub fn files_in_current(&self) -> Vec<&FileRecord> {
        files_in(&self.files, &self.current_folder)
    }

    pub fn subfolders(&self) -> Vec<&FolderNode> {
        let Some(id) = self.folders.find_path(&self.current_folder) else {
            return Vec::new();
        };
        self.folders
            .children_of(id)
            .iter()
            .map(|child| self.folders.node(*child))
            .collect()
    }
}

struct StoreState {
    session: Option<Session>,
    // Bumped on connect/disconnect so late listings for an old session are dropped.
    generation: u64,
    status: Status,
    files: Vec<FileRecord>,
    folders: FolderTree,
    location: Location,
    current_file: Option<String>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            session: None,
            generation: 0,
            status: Status::Initial,
            files: Vec::new(),
            folders: FolderTree::default(),
            location: Location::root(),
            current_file: None,
        }
    }

    fn reset(&mut self, session: Option<Session>) {
        let generation = self.generation + 1;
        *self = Self {
            session,
            generation,
            ..Self::new()
        };
    }

    fn current_node(&self) -> NodeId {
        self.folders
            .find_path(&self.location.path)
            .unwrap_or_else(|| self.folders.root())
    }

    fn file(&self, key: &str) -> Option<&FileRecord> {
        self.files.iter().find(|file| file.data.key == key)
    }

    // An unnamed child of the viewed folder, else any unnamed folder.
    fn placeholder(&self) -> Option<NodeId> {
        let current = self.current_node();
        self.folders
            .children_of(current)
            .iter()
            .copied()
            .find(|child| self.folders.node(*child).editing)
            .or_else(|| self.folders.search(|node| node.editing))
    }

    fn snapshot(&self) -> StoreSnapshot {
        let current = self.current_node();
        let current_folder = self.folders.node(current).path.clone();
        let page = (current_folder == self.location.path)
            .then_some(self.location.page)
            .flatten();
        StoreSnapshot {
            status: self.status,
            bucket: self.session.as_ref().map(|session| session.bucket.clone()),
            files: self.files.clone(),
            folders: self.folders.clone(),
            current_folder,
            page,
            current_file: self
                .current_file
                .as_deref()
                .and_then(|key| self.file(key))
                .cloned(),
        }
    }
}

/// Shared handle over the browsing state of one bucket. Cloning is cheap;
/// every clone sees the same state.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: RwLock<StoreState>,
    options: StoreOptions,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl SyncStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState::new()),
                options,
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub async fn connect(&self, session: Session) {
        info!(bucket = %session.bucket, "connected");
        self.inner.state.write().await.reset(Some(session));
    }

    pub async fn disconnect(&self) {
        let mut state = self.inner.state.write().await;
        if let Some(session) = state.session.as_ref() {
            info!(bucket = %session.bucket, "disconnected");
        }
        state.reset(None);
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.session.is_some()
    }

    pub(crate) async fn session(&self) -> Option<Session> {
        self.inner.state.read().await.session.clone()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.state.read().await.snapshot()
    }

    pub async fn status(&self) -> Status {
        self.inner.state.read().await.status
    }

    /// Seeds a fresh session with a listing saved by an earlier run. Ignored
    /// once a refresh has started or when the cache names another bucket.
    pub async fn restore(&self, cache: ListingCache) -> bool {
        let mut state = self.inner.state.write().await;
        let bucket_matches = state
            .session
            .as_ref()
            .is_some_and(|session| session.bucket == cache.bucket);
        if !bucket_matches || state.status != Status::Initial {
            return false;
        }
        state.folders = cache.tree();
        state.files = cache.files;
        state.status = cache.status;
        debug!(bucket = %cache.bucket, count = state.files.len(), "listing restored from cache");
        true
    }

    /// Resolved path of the folder being viewed.
    pub async fn current_folder(&self) -> String {
        let state = self.inner.state.read().await;
        state.folders.node(state.current_node()).path.clone()
    }

    pub async fn files_in_current(&self) -> Vec<FileRecord> {
        self.snapshot()
            .await
            .files_in_current()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Re-lists the bucket. Failures are logged and leave the previous
    /// listing in place with an error status.
    pub async fn refresh(&self) -> StoreSnapshot {
        match self.try_refresh().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "listing refresh failed");
                self.snapshot().await
            }
        }
    }

    pub async fn try_refresh(&self) -> Result<StoreSnapshot, SyncError> {
        let (session, generation) = {
            let mut state = self.inner.state.write().await;
            let Some(session) = state.session.clone() else {
                return Ok(state.snapshot());
            };
            state.status = Status::Loading;
            (session, state.generation)
        };

        debug!(bucket = %session.bucket, "listing bucket");
        let listing = session
            .client
            .list(&session.bucket)
            .await
            .map(|objects| build_listing(objects, &session.urls));

        let mut state = self.inner.state.write().await;
        if state.generation != generation {
            debug!(bucket = %session.bucket, "dropping listing for a closed session");
            return Ok(state.snapshot());
        }
        let listing = match listing {
            Ok(listing) => listing,
            Err(err) => {
                state.status = Status::Error;
                return Err(err.into());
            }
        };

        let count = listing.files.len();
        let mut folders = listing.tree;
        folders.absorb(&state.folders.pending_skeleton());
        state.files = listing.files;
        state.folders = folders;
        state.status = Status::Success;
        if let Some(key) = state.current_file.clone()
            && state.file(&key).is_none()
        {
            state.current_file = None;
        }
        info!(bucket = %session.bucket, count, "listing refreshed");
        Ok(state.snapshot())
    }

    /// Points the view at a route. Unknown folders resolve to root. A file
    /// route selects the file and views its folder; an unknown file
    /// resolves to root. Folder routes clear the selection.
    pub async fn navigate(&self, route: &str) -> StoreSnapshot {
        let mut state = self.inner.state.write().await;
        let location = Location::parse(route);
        match location.file.clone() {
            Some(key) if state.file(&key).is_some() => {
                state.current_file = Some(key);
                state.location = location;
            }
            Some(_) => {
                state.current_file = None;
                state.location = Location::root();
            }
            None => {
                state.current_file = None;
                state.location = location;
            }
        }
        state.snapshot()
    }

    /// Like [`navigate`](Self::navigate) for a folder route, but refuses
    /// folders the listing does not know.
    pub async fn open_folder(&self, route: &str) -> Result<StoreSnapshot, SyncError> {
        let mut state = self.inner.state.write().await;
        let location = Location::parse(route);
        if state.folders.find_path(&location.path).is_none() {
            return Err(SyncError::FolderNotFound(location.path));
        }
        state.current_file = None;
        state.location = Location {
            file: None,
            ..location
        };
        Ok(state.snapshot())
    }

    /// Selects a file and views the folder holding it.
    pub async fn select_file(&self, key: &str) -> Option<FileRecord> {
        let mut state = self.inner.state.write().await;
        let selected = state.file(key).cloned();
        if let Some(file) = selected.as_ref() {
            state.current_file = Some(file.data.key.clone());
            state.location = Location {
                path: file.folder.clone(),
                page: None,
                file: Some(file.data.key.clone()),
            };
        }
        selected
    }

    /// Adds an unnamed placeholder to the current folder unless it already
    /// has one.
    pub async fn create_folder(&self) -> StoreSnapshot {
        let mut state = self.inner.state.write().await;
        let current = state.current_node();
        let has_placeholder = state
            .folders
            .children_of(current)
            .iter()
            .any(|child| state.folders.node(*child).editing);
        if !has_placeholder {
            state.folders.add_child(current, "", true);
        }
        state.snapshot()
    }

    /// Names the placeholder and persists it as a directory marker. The
    /// placeholder in the viewed folder wins over any other.
    pub async fn make_folder(&self, name: &str) -> Result<Option<PutResponse>, SyncError> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(SyncError::InvalidFolderName(name.to_string()));
        }

        let (session, marker) = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;
            let placeholder = state.placeholder().ok_or(SyncError::NoEditingFolder)?;
            let folders = &mut state.folders;
            let parent = folders
                .parent_of(placeholder)
                .ok_or(SyncError::NoEditingFolder)?;
            if let Some(existing) = folders.find_child(parent, name)
                && existing != placeholder
            {
                return Err(SyncError::FolderExists(folders.node(existing).path.clone()));
            }
            folders.rename(placeholder, name);
            folders.set_editing(placeholder, false);
            let marker = folder_key_prefix(&folders.node(placeholder).path);
            (state.session.clone(), marker)
        };

        let Some(session) = session else {
            return Ok(None);
        };
        match session
            .client
            .put(
                &session.bucket,
                &marker,
                Vec::new(),
                Acl::PublicRead,
                Some(DIRECTORY_CONTENT_TYPE),
            )
            .await
        {
            Ok(response) => {
                info!(bucket = %session.bucket, key = %marker, "folder created");
                Ok(Some(response))
            }
            Err(err) => {
                warn!(bucket = %session.bucket, key = %marker, error = %err, "folder marker upload failed");
                self.refresh().await;
                Ok(None)
            }
        }
    }

    /// Drops the unnamed placeholder, if any.
    pub async fn remove_editing_folder(&self) -> bool {
        let mut state = self.inner.state.write().await;
        let Some(placeholder) = state.placeholder() else {
            return false;
        };
        match state.folders.parent_of(placeholder) {
            Some(parent) => state.folders.remove_child(parent, placeholder),
            None => false,
        }
    }

    pub async fn delete_folder(&self, path: &str) -> Result<(), SyncError> {
        let path = normalize_folder_path(path);
        let (session, markers) = {
            let mut guard = self.inner.state.write().await;
            let state = &mut *guard;
            let node = state
                .folders
                .find_path(&path)
                .ok_or_else(|| SyncError::FolderNotFound(path.clone()))?;
            let parent = state
                .folders
                .parent_of(node)
                .ok_or(SyncError::RootFolder)?;
            if state.files.iter().any(|file| file.is_within(&path)) {
                return Err(SyncError::FolderNotEmpty(path));
            }

            // Deepest markers first.
            let mut markers: Vec<String> = state
                .folders
                .descendants(node)
                .into_iter()
                .rev()
                .map(|id| state.folders.node(id))
                .filter(|folder| !folder.editing)
                .filter_map(|folder| marker_key(&folder.path))
                .collect();
            markers.extend(marker_key(&path));

            state.folders.remove_child(parent, node);
            let nested = format!("{path}/");
            if state.location.path == path || state.location.path.starts_with(&nested) {
                state.location = Location::root();
            }
            (state.session.clone(), markers)
        };

        let Some(session) = session else {
            return Ok(());
        };
        for marker in &markers {
            if let Err(err) = session.client.delete(&session.bucket, marker).await {
                warn!(bucket = %session.bucket, key = %marker, error = %err, "folder marker delete failed");
            }
        }
        info!(bucket = %session.bucket, path = %path, count = markers.len(), "folder deleted");
        self.refresh().await;
        Ok(())
    }

    pub async fn delete_file(&self, key: &str) -> Result<(), SyncError> {
        let session = {
            let mut state = self.inner.state.write().await;
            let index = state
                .files
                .iter()
                .position(|file| file.data.key == key)
                .ok_or_else(|| SyncError::FileNotFound(key.to_string()))?;
            state.files.remove(index);
            if state.current_file.as_deref() == Some(key) {
                state.current_file = None;
            }
            state.session.clone()
        };

        let Some(session) = session else {
            return Ok(());
        };
        match session.client.delete(&session.bucket, key).await {
            Ok(()) => info!(bucket = %session.bucket, key, "file deleted"),
            Err(err) => {
                warn!(bucket = %session.bucket, key, error = %err, "file delete failed");
                self.refresh().await;
            }
        }
        Ok(())
    }

    /// Moves a file by copying it next to its new folder and deleting the
    /// original. A refresh follows after the configured grace period.
    pub async fn move_file(&self, key: &str, target_folder: &str) -> Result<(), SyncError> {
        let target = normalize_folder_path(target_folder);
        let (session, record) = {
            let state = self.inner.state.read().await;
            let record = state
                .file(key)
                .cloned()
                .ok_or_else(|| SyncError::FileNotFound(key.to_string()))?;
            if state.folders.find_path(&target).is_none() {
                return Err(SyncError::FolderNotFound(target));
            }
            (state.session.clone(), record)
        };
        if record.folder == target {
            return Ok(());
        }
        let Some(session) = session else {
            return Ok(());
        };

        let dest = object_key(&target, &record.filename);
        if let Err(err) = copy_or_reupload(&session, &record, &dest).await {
            warn!(bucket = %session.bucket, key, dest = %dest, error = %err, "move failed");
            return Ok(());
        }
        if let Err(err) = session.client.delete(&session.bucket, key).await {
            warn!(bucket = %session.bucket, key, error = %err, "original delete failed after copy");
        }

        {
            let mut state = self.inner.state.write().await;
            if let Some(file) = state.files.iter_mut().find(|file| file.data.key == key) {
                file.relocate(&target, &session.urls);
            }
            if state.current_file.as_deref() == Some(key) {
                state.current_file = None;
            }
        }
        info!(bucket = %session.bucket, key, dest = %dest, "file moved");
        self.schedule_refresh().await;
        Ok(())
    }

    async fn schedule_refresh(&self) {
        let store = self.clone();
        let grace = self.inner.options.move_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            store.refresh().await;
        });
        let mut background = self.inner.background.lock().await;
        background.retain(|handle| !handle.is_finished());
        background.push(handle);
    }

    #[cfg(test)]
    async fn pending_refreshes(&self) -> usize {
        self.inner.background.lock().await.len()
    }

    /// Waits for refreshes scheduled by earlier moves.
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.inner.background.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "scheduled refresh did not finish");
            }
        }
    }
}

async fn copy_or_reupload(
    session: &Session,
    record: &FileRecord,
    dest: &str,
) -> Result<(), RemoteError> {
    let source = &record.data.key;
    match session
        .client
        .copy(&session.bucket, source, dest, Acl::PublicRead)
        .await
    {
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(bucket = %session.bucket, key = %source, error = %err, "server-side copy failed, re-uploading");
            let body = session.client.fetch(&record.url).await?;
            session
                .client
                .put(
                    &session.bucket,
                    dest,
                    body,
                    Acl::PublicRead,
                    Some(guess_content_type(&record.filename)),
                )
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
