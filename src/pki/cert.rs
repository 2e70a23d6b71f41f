//! Read-only certificate view consumed by the revocation engine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flagset::{FlagSet, flags};

use crate::pki::crl::errors::CrlResult;
use crate::pki::crl::types::DistributionPoint;
use crate::pki::name::DistinguishedName;

flags! {
    /// KeyUsage bits, numbered as in RFC 5280 §4.2.1.3.
    pub enum KeyUsageBit: u16 {
        DigitalSignature = 1 << 0,
        NonRepudiation = 1 << 1,
        KeyEncipherment = 1 << 2,
        DataEncipherment = 1 << 3,
        KeyAgreement = 1 << 4,
        KeyCertSign = 1 << 5,
        CrlSign = 1 << 6,
        EncipherOnly = 1 << 7,
        DecipherOnly = 1 << 8,
    }
}

pub type KeyUsage = FlagSet<KeyUsageBit>;

/// A DER encoded SubjectPublicKeyInfo.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Arc<[u8]>);

impl PublicKey {
    pub fn new(spki: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(spki.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = &self.0[..self.0.len().min(8)];
        write!(f, "PublicKey({}..)", hex::encode(prefix))
    }
}

/// A certificate serial number as big-endian magnitude bytes.
///
/// Leading zero octets are dropped so that DER encodings with and without a
/// sign octet compare equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SerialNumber(Vec<u8>);

impl SerialNumber {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(bytes.len().saturating_sub(1));
        let trimmed = bytes.get(start..).unwrap_or_default();
        if trimmed.is_empty() {
            Self(vec![0])
        } else {
            Self(trimmed.to_vec())
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<u64> for SerialNumber {
    fn from(value: u64) -> Self {
        Self::from_bytes(&value.to_be_bytes())
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({self})")
    }
}

/// Identity of a certificate: issuer name and serial number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertId {
    pub issuer: DistinguishedName,
    pub serial: SerialNumber,
}

impl fmt::Display for CertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.issuer, self.serial)
    }
}

/// Accessors over an already parsed certificate.
pub trait CertificateView: Send + Sync + fmt::Debug {
    fn issuer(&self) -> &DistinguishedName;

    fn subject(&self) -> &DistinguishedName;

    fn serial(&self) -> &SerialNumber;

    fn not_before(&self) -> DateTime<Utc>;

    fn not_after(&self) -> DateTime<Utc>;

    /// The cA flag of the BasicConstraints extension, false when absent.
    fn is_ca(&self) -> bool;

    /// The KeyUsage extension, `None` when the certificate carries none.
    fn key_usage(&self) -> Option<KeyUsage>;

    fn subject_key_id(&self) -> Option<&[u8]>;

    fn authority_key_id(&self) -> Option<&[u8]>;

    fn public_key(&self) -> &PublicKey;

    /// The CRLDistributionPoints extension. `Ok(None)` when absent, an error
    /// when present but undecodable.
    fn crl_distribution_points(&self) -> CrlResult<Option<Vec<DistributionPoint>>>;

    /// The FreshestCRL extension, with the same conventions as
    /// [`CertificateView::crl_distribution_points`].
    fn freshest_crl(&self) -> CrlResult<Option<Vec<DistributionPoint>>> {
        Ok(None)
    }

    /// Verifies this certificate's signature with `key`.
    fn verify_signed_by(&self, key: &PublicKey) -> bool;

    fn id(&self) -> CertId {
        CertId {
            issuer: self.issuer().clone(),
            serial: self.serial().clone(),
        }
    }

    /// A certificate without a KeyUsage extension is not restricted.
    fn permits_crl_signing(&self) -> bool {
        self.key_usage()
            .is_none_or(|ku| ku.contains(KeyUsageBit::CrlSign))
    }

    fn is_self_issued(&self) -> bool {
        self.issuer() == self.subject()
    }

    fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.not_before() <= instant && instant <= self.not_after()
    }
}
