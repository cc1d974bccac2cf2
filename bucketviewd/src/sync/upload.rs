use std::path::Path;
use std::sync::Arc;

use bucketview_core::{Acl, PutResponse};
use futures_util::future::join_all;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::SyncError;
use super::paths::{folder_key_prefix, format_date_token};
use super::store::SyncStore;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            content_type: None,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, SyncError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("path has no file name: {}", path.display()),
                )
            })?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(name, bytes))
    }

    fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or_else(|| guess_content_type(&self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Initial,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadItem {
    pub id: u64,
    pub name: String,
    pub size: usize,
    pub status: UploadStatus,
    pub key: Option<String>,
    pub response: Option<PutResponse>,
    pub error: Option<String>,
    #[serde(skip)]
    file: LocalFile,
}

impl UploadItem {
    fn is_pending(&self) -> bool {
        matches!(self.status, UploadStatus::Initial | UploadStatus::Loading)
    }
}

// Issues date tokens that never repeat within one queue.
#[derive(Debug, Default)]
struct TokenClock {
    last: Option<(OffsetDateTime, u16)>,
}

impl TokenClock {
    fn next(&mut self, now: OffsetDateTime) -> String {
        let second = now - Duration::nanoseconds(i64::from(now.nanosecond()));
        let fraction = (u32::from(now.millisecond()) * 65536 / 1000) as u16;
        let mut candidate = (second, fraction);
        if let Some(last) = self.last
            && candidate <= last
        {
            candidate = match last.1.checked_add(1) {
                Some(fraction) => (last.0, fraction),
                None => (last.0 + Duration::SECOND, 0),
            };
        }
        self.last = Some(candidate);
        format_date_token(candidate.0, candidate.1)
    }
}

struct QueueState {
    items: Vec<UploadItem>,
    next_id: u64,
    clock: TokenClock,
}

/// Local files waiting to be put into the bucket, dispatched concurrently.
#[derive(Clone)]
pub struct UploadQueue {
    store: SyncStore,
    state: Arc<Mutex<QueueState>>,
}

impl UploadQueue {
    pub fn new(store: SyncStore) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(QueueState {
                items: Vec::new(),
                next_id: 1,
                clock: TokenClock::default(),
            })),
        }
    }

    pub async fn items(&self) -> Vec<UploadItem> {
        self.state.lock().await.items.clone()
    }

    /// Appends files and uploads every item that has not started yet.
    pub async fn add(&self, files: Vec<LocalFile>) -> Vec<UploadItem> {
        {
            let mut state = self.state.lock().await;
            for file in files {
                let id = state.next_id;
                state.next_id += 1;
                state.items.push(UploadItem {
                    id,
                    name: file.name.clone(),
                    size: file.bytes.len(),
                    status: UploadStatus::Initial,
                    key: None,
                    response: None,
                    error: None,
                    file,
                });
            }
        }
        self.dispatch().await;
        self.items().await
    }

    async fn dispatch(&self) {
        let Some(session) = self.store.session().await else {
            debug!("upload queued without a connected bucket");
            return;
        };
        let prefix = folder_key_prefix(&self.store.current_folder().await);

        let batch: Vec<(u64, String, LocalFile)> = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state
                .items
                .iter_mut()
                .filter(|item| item.status == UploadStatus::Initial)
                .map(|item| {
                    let token = state.clock.next(OffsetDateTime::now_utc());
                    let key = format!("{prefix}{token}-{}", item.file.name);
                    item.status = UploadStatus::Loading;
                    item.key = Some(key.clone());
                    (item.id, key, item.file.clone())
                })
                .collect()
        };
        if batch.is_empty() {
            return;
        }
        info!(bucket = %session.bucket, count = batch.len(), "uploading files");

        let uploads = batch.into_iter().map(|(id, key, file)| {
            let session = session.clone();
            async move {
                let result = session
                    .client
                    .put(
                        &session.bucket,
                        &key,
                        file.bytes.clone(),
                        Acl::PublicRead,
                        Some(file.content_type()),
                    )
                    .await;
                (id, key, result)
            }
        });
        let results = join_all(uploads).await;

        let settled = {
            let mut state = self.state.lock().await;
            for (id, key, result) in results {
                let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
                    continue;
                };
                match result {
                    Ok(response) => {
                        debug!(key = %key, "upload finished");
                        item.status = UploadStatus::Success;
                        item.response = Some(response);
                    }
                    Err(err) => {
                        warn!(key = %key, error = %err, "upload failed");
                        item.status = UploadStatus::Error;
                        item.error = Some(err.to_string());
                    }
                }
            }
            !state.items.iter().any(UploadItem::is_pending)
        };
        if settled {
            self.store.refresh().await;
        }
    }

    /// Refreshes the listing and forgets every item.
    pub async fn close(&self) {
        self.store.refresh().await;
        self.state.lock().await.items.clear();
    }
}

pub fn guess_content_type(filename: &str) -> &'static str {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
