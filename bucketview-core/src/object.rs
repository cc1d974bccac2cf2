use aws_sdk_s3::primitives::DateTime;
use aws_sdk_s3::types::{EncodingType, Object};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// RFC 3986 unreserved characters plus the key delimiter.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// One object as reported by a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
            etag: None,
        }
    }

    pub fn last_modified_unix(&self) -> Option<i64> {
        let value = self.last_modified.as_deref()?;
        OffsetDateTime::parse(value, &Rfc3339)
            .ok()
            .map(|parsed| parsed.unix_timestamp())
    }

    /// `encoding` is the listing's reported key encoding; url-encoded keys
    /// are decoded back to their stored form.
    pub(crate) fn from_listed(object: &Object, encoding: Option<&EncodingType>) -> Self {
        let raw = object.key().unwrap_or_default();
        let key = match encoding {
            Some(EncodingType::Url) => decode_listed_key(raw),
            _ => raw.to_string(),
        };
        Self {
            key,
            size: object.size().unwrap_or(0).max(0) as u64,
            last_modified: object.last_modified().and_then(rfc3339),
            etag: object
                .e_tag()
                .map(|etag| etag.trim_matches('"').to_string()),
        }
    }
}

/// Path-escapes a key, leaving `/` between segments intact.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

// S3 form-encodes listed keys: `+` is a space, a literal plus is `%2B`.
fn decode_listed_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match percent_decode_str(&spaced).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

pub(crate) fn rfc3339(value: &DateTime) -> Option<String> {
    let millis = value.to_millis().ok()?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()?
        .format(&Rfc3339)
        .ok()
}
