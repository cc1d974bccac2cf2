mod client;
mod error;
mod object;

pub use client::{Acl, CopyResponse, Credentials, PutResponse, S3Client, S3Config};
pub use error::{ApiErrorClass, S3Error};
pub use object::{ObjectEntry, encode_key};
