use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::prelude::X509Error;

use super::types::ReasonCode;

/// CRL-related errors
#[derive(Error, Debug)]
pub enum CrlError {
    #[error("No trust anchor found for issuer: {issuer}")]
    NoTrustAnchor { issuer: String },

    #[error("Forward checking is not supported")]
    ForwardCheckingUnsupported,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Malformed {extension} extension: {reason}")]
    MalformedExtension {
        extension: &'static str,
        reason: String,
    },

    #[error("CRL contains unsupported critical extension {0}")]
    UnsupportedCriticalExtension(String),

    #[error("Distribution point mismatch: {0}")]
    DistributionPointMismatch(String),

    #[error("CRL issuer could not be verified: {0}")]
    CrlIssuerUnverifiable(String),

    #[error("No valid CRL found for certificate {serial} issued by {issuer}")]
    CrlNotFound {
        issuer: String,
        serial: String,
        #[source]
        cause: Option<Box<CrlError>>,
    },

    #[error("Certificate {serial} issued by {issuer} was revoked on {date}, reason: {reason}")]
    Revoked {
        issuer: String,
        serial: String,
        reason: ReasonCode,
        date: DateTime<Utc>,
    },

    #[error("Revocation status of certificate {serial} issued by {issuer} could not be determined")]
    StatusUndetermined { issuer: String, serial: String },

    #[error("Certification path building failed: {0}")]
    Path(String),

    #[error("CRL download from {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("CRL parsing failed: {0}")]
    Parse(#[from] X509Error),

    #[error("DER decoding failed: {0}")]
    Decode(#[from] der::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid CRL URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout while fetching CRL")]
    Timeout,

    #[error("CRL fetched from {0} is expired")]
    Expired(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<walkdir::Error> for CrlError {
    fn from(e: walkdir::Error) -> Self {
        CrlError::Io(e.into())
    }
}

impl CrlError {
    pub(crate) fn malformed(extension: &'static str, reason: impl ToString) -> Self {
        Self::MalformedExtension {
            extension,
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that carry a final revocation verdict rather
    /// than a failure to obtain one.
    pub fn is_determination(&self) -> bool {
        matches!(self, Self::Revoked { .. } | Self::StatusUndetermined { .. })
    }

    /// Attaches `cause` to a `CrlNotFound` that has none yet.
    pub(crate) fn with_cause(self, cause: Option<CrlError>) -> Self {
        match self {
            Self::CrlNotFound {
                issuer,
                serial,
                cause: None,
            } => Self::CrlNotFound {
                issuer,
                serial,
                cause: cause.map(Box::new),
            },
            other => other,
        }
    }

    /// Returns true if this is the "no usable CRL" condition that download
    /// retries and the soft-fail policy act upon.
    pub fn is_crl_not_found(&self) -> bool {
        matches!(self, Self::CrlNotFound { .. })
    }
}

impl From<url::ParseError> for CrlError {
    fn from(e: url::ParseError) -> Self {
        CrlError::InvalidUrl(e.to_string())
    }
}

/// Convenient Result type alias
pub type CrlResult<T> = Result<T, CrlError>;
