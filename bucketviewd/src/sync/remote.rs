use async_trait::async_trait;
use bucketview_core::{Acl, CopyResponse, ObjectEntry, PutResponse, S3Client, S3Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    S3(#[from] S3Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Object-store operations the store and the upload queue depend on.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Every object in the bucket, across all listing pages.
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectEntry>, RemoteError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        acl: Acl,
        content_type: Option<&str>,
    ) -> Result<PutResponse, RemoteError>;

    async fn copy(
        &self,
        bucket: &str,
        source: &str,
        dest: &str,
        acl: Acl,
    ) -> Result<CopyResponse, RemoteError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), RemoteError>;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}

#[async_trait]
impl StorageClient for S3Client {
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectEntry>, RemoteError> {
        Ok(self.list_objects_all(bucket, None).await?)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        acl: Acl,
        content_type: Option<&str>,
    ) -> Result<PutResponse, RemoteError> {
        Ok(self
            .put_object(bucket, key, body, Some(acl), content_type)
            .await?)
    }

    async fn copy(
        &self,
        bucket: &str,
        source: &str,
        dest: &str,
        acl: Acl,
    ) -> Result<CopyResponse, RemoteError> {
        Ok(self.copy_object(bucket, source, dest, Some(acl)).await?)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), RemoteError> {
        Ok(self.delete_object(bucket, key).await?)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        Ok(S3Client::fetch(self, url).await?)
    }
}
