use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bucketview_core::S3Client;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::sync::SyncError;
use crate::sync::cache::{self, ListingCache};
use crate::sync::store::{Session, Status, StoreOptions, SyncStore};
use crate::sync::upload::UploadQueue;

pub struct Runtime {
    settings: Settings,
    store: SyncStore,
    uploads: UploadQueue,
    cache_file: Option<PathBuf>,
}

impl Runtime {
    /// Builds the store and connects it when the settings name a bucket.
    /// A listing cached by an earlier run is restored right away.
    pub async fn bootstrap(settings: Settings) -> anyhow::Result<Self> {
        let store = SyncStore::new(StoreOptions {
            move_grace: settings.move_grace,
        });
        let mut cache_file = None;
        match settings.storage() {
            Some(storage) => {
                let client =
                    S3Client::new(storage.s3_config()).context("invalid storage endpoint")?;
                store
                    .connect(Session::new(Arc::new(client), storage.url_base()))
                    .await;
                cache_file = settings
                    .cache_dir
                    .as_deref()
                    .map(|dir| cache::cache_path(dir, &storage.bucket));
            }
            None => info!("storage settings incomplete, staying idle"),
        }
        if let Some(path) = cache_file.as_deref() {
            match cache::load(path).await {
                Ok(Some(cached)) => {
                    store.restore(cached).await;
                }
                Ok(None) => debug!(path = %path.display(), "no listing cache yet"),
                Err(err) => warn!(path = %path.display(), error = %err, "ignoring listing cache"),
            }
        }
        let uploads = UploadQueue::new(store.clone());
        Ok(Self {
            settings,
            store,
            uploads,
            cache_file,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn uploads(&self) -> &UploadQueue {
        &self.uploads
    }

    pub async fn require_connected(&self) -> anyhow::Result<()> {
        if self.store.is_connected().await {
            return Ok(());
        }
        Err::<(), _>(SyncError::NotConnected).context(
            "set BUCKETVIEW_ENDPOINT, BUCKETVIEW_ACCESS_KEY_ID, \
             BUCKETVIEW_SECRET_ACCESS_KEY and BUCKETVIEW_BUCKET",
        )
    }

    /// Re-lists the bucket every poll interval until Ctrl-C.
    pub async fn watch(&self) -> anyhow::Result<()> {
        self.require_connected().await?;
        let poll_interval = self.settings.poll_interval;
        info!(poll_secs = poll_interval.as_secs(), "watching bucket");

        let store = self.store.clone();
        let poll_handle = tokio::spawn(async move {
            let mut last_count = None;
            loop {
                let snapshot = store.refresh().await;
                if snapshot.status == Status::Error {
                    warn!("poll refresh failed, keeping previous listing");
                } else if last_count != Some(snapshot.files.len()) {
                    info!(
                        count = snapshot.files.len(),
                        folders = snapshot.folders.folder_paths().len(),
                        "listing changed"
                    );
                    last_count = Some(snapshot.files.len());
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        let res = tokio::signal::ctrl_c().await;
        poll_handle.abort();
        res.context("failed waiting for shutdown signal")?;
        info!("shutting down");
        Ok(())
    }

    /// Lets scheduled refreshes finish, saves a successful listing, then
    /// drops the session.
    pub async fn shutdown(self) {
        self.store.settle().await;
        if let Some(path) = self.cache_file.as_deref()
            && let Some(cached) = ListingCache::from_snapshot(&self.store.snapshot().await)
            && let Err(err) = cache::save(path, &cached).await
        {
            warn!(path = %path.display(), error = %err, "listing cache not saved");
        }
        self.store.disconnect().await;
    }
}
