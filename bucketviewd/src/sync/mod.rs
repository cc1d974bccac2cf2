pub mod cache;
pub mod paths;
pub mod records;
pub mod remote;
pub mod store;
pub mod tree;
pub mod upload;

use thiserror::Error;

use self::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Remote(#[from] RemoteError),
    #[error("folder {0} still contains files")]
    FolderNotEmpty(String),
    #[error("no folder is being created")]
    NoEditingFolder,
    #[error("invalid folder name: {0:?}")]
    InvalidFolderName(String),
    #[error("folder already exists: {0}")]
    FolderExists(String),
    #[error("folder not found: {0}")]
    FolderNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("the root folder cannot be deleted")]
    RootFolder,
    #[error("storage is not configured")]
    NotConnected,
    #[error("listing cache is unreadable: {0}")]
    Cache(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
