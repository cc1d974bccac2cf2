use std::fmt;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{Builder, Region, RequestChecksumCalculation};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{EncodingType, ObjectCannedAcl};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::S3Error;
use crate::object::{ObjectEntry, encode_key, rfc3339};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PAGE_SIZE: i32 = 1000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const PROVIDER_NAME: &str = "bucketview";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    Private,
    PublicRead,
}

impl Acl {
    pub fn as_str(self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }

    fn canned(self) -> ObjectCannedAcl {
        match self {
            Acl::Private => ObjectCannedAcl::Private,
            Acl::PublicRead => ObjectCannedAcl::PublicRead,
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub credentials: Credentials,
    /// `true` addresses objects as `endpoint/bucket/key`, `false` as
    /// `bucket.endpoint/key`.
    pub path_style: bool,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
}

impl S3Config {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: DEFAULT_REGION.to_string(),
            credentials,
            path_style: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResponse {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// S3-compatible bucket client. Signed calls go through the AWS SDK;
/// public links are fetched with a plain HTTP client.
#[derive(Clone)]
pub struct S3Client {
    sdk: Client,
    http: reqwest::Client,
    endpoint: Url,
    path_style: bool,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self, S3Error> {
        Self::with_http(reqwest::Client::new(), config)
    }

    pub fn with_http(http: reqwest::Client, config: S3Config) -> Result<Self, S3Error> {
        let endpoint = Url::parse(&prefix_scheme(&config.endpoint))?;
        if endpoint.host_str().is_none() {
            return Err(S3Error::MissingHost(config.endpoint));
        }
        let region = match config.region.trim() {
            "" => DEFAULT_REGION.to_string(),
            region => region.to_string(),
        };
        let credentials = aws_sdk_s3::config::Credentials::new(
            config.credentials.access_key_id,
            config.credentials.secret_access_key,
            None,
            None,
            PROVIDER_NAME,
        );

        let sdk_config = Builder::new()
            .behavior_version_latest()
            .region(Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(endpoint.as_str().trim_end_matches('/'))
            .force_path_style(config.path_style)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)))
            .build();

        Ok(Self {
            sdk: Client::from_conf(sdk_config),
            http,
            endpoint,
            path_style: config.path_style,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Unsigned address of an object, as used for public links.
    pub fn object_url(&self, bucket: &str, key: &str) -> Result<Url, S3Error> {
        let host = self
            .endpoint
            .host_str()
            .ok_or_else(|| S3Error::MissingHost(self.endpoint.to_string()))?;
        let authority = match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let base_path = self.endpoint.path().trim_end_matches('/');
        let raw = if self.path_style {
            format!(
                "{}://{authority}{base_path}/{bucket}/{}",
                self.endpoint.scheme(),
                encode_key(key)
            )
        } else {
            format!(
                "{}://{bucket}.{authority}{base_path}/{}",
                self.endpoint.scheme(),
                encode_key(key)
            )
        };
        Ok(Url::parse(&raw)?)
    }

    /// Every object in the bucket. Keys are requested url-encoded so that
    /// whitespace and control characters survive the XML round trip.
    pub async fn list_objects_all(
        &self,
        bucket: &str,
        page_size: Option<i32>,
    ) -> Result<Vec<ObjectEntry>, S3Error> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let mut continuation_token: Option<String> = None;
        let mut items = Vec::new();

        loop {
            let mut request = self
                .sdk
                .list_objects_v2()
                .bucket(bucket)
                .max_keys(page_size)
                .encoding_type(EncodingType::Url);
            if let Some(token) = continuation_token.as_deref() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|err| S3Error::from_sdk("ListObjectsV2", err))?;
            let encoding = output.encoding_type();
            items.extend(
                output
                    .contents()
                    .iter()
                    .map(|object| ObjectEntry::from_listed(object, encoding)),
            );

            match output.next_continuation_token() {
                Some(next) if output.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(next.to_string());
                }
                _ => break,
            }
        }
        Ok(items)
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        acl: Option<Acl>,
        content_type: Option<&str>,
    ) -> Result<PutResponse, S3Error> {
        let output = self
            .sdk
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_acl(acl.map(Acl::canned))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|err| S3Error::from_sdk("PutObject", err))?;
        Ok(PutResponse {
            etag: output.e_tag().map(|etag| etag.trim_matches('"').to_string()),
            version_id: output.version_id().map(str::to_string),
        })
    }

    pub async fn copy_object(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
        acl: Option<Acl>,
    ) -> Result<CopyResponse, S3Error> {
        let output = self
            .sdk
            .copy_object()
            .bucket(bucket)
            .key(dest_key)
            .copy_source(copy_source(bucket, source_key))
            .set_acl(acl.map(Acl::canned))
            .send()
            .await
            .map_err(|err| S3Error::from_sdk("CopyObject", err))?;
        let result = output.copy_object_result();
        Ok(CopyResponse {
            etag: result
                .and_then(|result| result.e_tag())
                .map(|etag| etag.trim_matches('"').to_string()),
            last_modified: result
                .and_then(|result| result.last_modified())
                .and_then(rfc3339),
        })
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.sdk
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| S3Error::from_sdk("DeleteObject", err))?;
        Ok(())
    }

    /// Downloads an object through its public address without signing.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, S3Error> {
        let url = Url::parse(url)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(S3Error::Api {
                status: status.as_u16(),
                code: status
                    .canonical_reason()
                    .unwrap_or("HttpError")
                    .to_string(),
                message,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", encode_key(key))
}

fn prefix_scheme(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str, path_style: bool) -> S3Client {
        let mut config = S3Config::new(endpoint, Credentials::new("AKID", "secret"));
        config.path_style = path_style;
        S3Client::new(config).unwrap()
    }

    #[test]
    fn path_style_url_keeps_bucket_in_path() {
        let client = client("http://localhost:9000", true);
        let url = client.object_url("b", "docs/a b.txt").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/b/docs/a%20b.txt");
    }

    #[test]
    fn virtual_host_url_moves_bucket_into_host() {
        let client = client("s3.example.com", false);
        let url = client.object_url("b", "docs/a.txt").unwrap();
        assert_eq!(url.as_str(), "https://b.s3.example.com/docs/a.txt");
    }

    #[test]
    fn copy_source_escapes_key_segments() {
        assert_eq!(copy_source("b", "docs/a b.txt"), "b/docs/a%20b.txt");
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let debug = format!("{:?}", Credentials::new("AKID", "secret"));
        assert!(debug.contains("AKID"));
        assert!(!debug.contains("secret\""));
    }

    #[test]
    fn rejects_endpoint_without_host() {
        let config = S3Config::new("http://", Credentials::new("AKID", "secret"));
        assert!(S3Client::new(config).is_err());
    }
}
