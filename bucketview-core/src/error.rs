use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum S3Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("{operation} failed: {message}")]
    Sdk {
        operation: &'static str,
        message: String,
    },
    #[error("endpoint has no host: {0}")]
    MissingHost(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl S3Error {
    /// Maps an SDK failure. Service responses keep their status and S3
    /// error code; dispatch and timeout failures keep their full context.
    pub(crate) fn from_sdk<E>(operation: &'static str, err: SdkError<E>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if let SdkError::ServiceError(service) = &err {
            let status = service.raw().status().as_u16();
            let inner = service.err();
            return S3Error::Api {
                status,
                code: inner
                    .code()
                    .map(str::to_string)
                    .unwrap_or_else(|| status.to_string()),
                message: inner.message().unwrap_or_default().to_string(),
            };
        }
        S3Error::Sdk {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            S3Error::Api { status, code, .. } => Some(classify_api_error(*status, code)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, S3Error::Api { status: 404, .. })
    }
}

pub(crate) fn classify_api_error(status: u16, code: &str) -> ApiErrorClass {
    match status {
        401 | 403 => ApiErrorClass::Auth,
        429 => ApiErrorClass::RateLimit,
        _ if code == "SlowDown" => ApiErrorClass::RateLimit,
        408 | 409 | 425 | 500..=599 => ApiErrorClass::Transient,
        _ => ApiErrorClass::Permanent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_throttling_and_auth() {
        assert_eq!(classify_api_error(503, "SlowDown"), ApiErrorClass::RateLimit);
        assert_eq!(classify_api_error(403, "AccessDenied"), ApiErrorClass::Auth);
        assert_eq!(classify_api_error(502, "BadGateway"), ApiErrorClass::Transient);
        assert_eq!(classify_api_error(404, "NoSuchKey"), ApiErrorClass::Permanent);
    }

    #[test]
    fn not_found_is_permanent_and_detected() {
        let err = S3Error::Api {
            status: 404,
            code: "NoSuchKey".to_string(),
            message: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }
}
