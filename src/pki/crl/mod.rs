//! Certificate Revocation List (CRL) checking
//!
//! This module decides whether a certificate of a certification path is
//! revoked according to RFC 5280 §6.3.
//!
//! # Features
//! - Distribution point matching, including indirect CRLs and
//!   nameRelativeToCRLIssuer
//! - Delta CRL reconciliation and reason code masking
//! - Verification of CRL signers through their own certification paths
//! - On-demand download of CRLs with a bounded cache, and a soft-fail policy
//!   for unreachable issuers
//! - Scheduled periodic CRL refresh

pub mod cache;
pub mod checker;
pub mod clock;
pub mod delta;
pub mod errors;
pub mod fetcher;
pub mod issuer;
pub mod parser;
pub mod processor;
pub mod scheduler;
pub mod softfail;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export public types
pub use cache::CrlCache;
pub use checker::{
    CheckerOptions, PathRevocationCheck, ProcessingDirection, RevocationChecker,
    RevocationCheckerBuilder, ValidityModel,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{CrlError, CrlResult};
pub use fetcher::{CrlDownloader, HttpCrlDownloader};
pub use scheduler::{CrlRefreshScheduler, CrlSchedulerConfig};
pub use softfail::{FailureTracker, SoftFailDecision, SoftFailPolicy};
pub use store::{CrlSelector, CrlSource, NamedCrlSources, RefreshingCrlStore, StaticCrlStore};
pub use types::{
    CertStatus, CrlView, DistributionPoint, DistributionPointName, IssuingDistributionPoint,
    Reason, ReasonCode, ReasonFlags, ReasonsMask, RevocationInfo, RevokedEntry,
};
