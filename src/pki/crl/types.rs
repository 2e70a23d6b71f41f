use std::fmt;

use chrono::{DateTime, Utc};
use flagset::{FlagSet, flags};
use num_bigint::BigUint;
use serde::Serialize;

use crate::pki::cert::{PublicKey, SerialNumber};
use crate::pki::name::{DistinguishedName, GeneralName, Rdn};

use super::errors::{CrlError, CrlResult};

flags! {
    /// ReasonFlags values as defined in RFC 5280 §4.2.1.13.
    pub enum Reason: u16 {
        Unused = 1 << 0,
        KeyCompromise = 1 << 1,
        CaCompromise = 1 << 2,
        AffiliationChanged = 1 << 3,
        Superseded = 1 << 4,
        CessationOfOperation = 1 << 5,
        CertificateHold = 1 << 6,
        PrivilegeWithdrawn = 1 << 7,
        AaCompromise = 1 << 8,
    }
}

pub type ReasonFlags = FlagSet<Reason>;

/// CRLReason codes carried by the reasonCode CRL entry extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReasonCode {
    Unspecified = 0,
    KeyCompromise = 1,
    #[serde(rename = "cACompromise")]
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    #[serde(rename = "removeFromCRL")]
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    #[serde(rename = "aACompromise")]
    AaCompromise = 10,
}

impl ReasonCode {
    /// Reasons that revoke the certificate regardless of the revocation
    /// date.
    pub fn is_retroactive(self) -> bool {
        matches!(
            self,
            ReasonCode::Unspecified
                | ReasonCode::KeyCompromise
                | ReasonCode::CaCompromise
                | ReasonCode::AaCompromise
        )
    }
}

impl TryFrom<u8> for ReasonCode {
    type Error = CrlError;

    fn try_from(value: u8) -> CrlResult<Self> {
        Ok(match value {
            0 => ReasonCode::Unspecified,
            1 => ReasonCode::KeyCompromise,
            2 => ReasonCode::CaCompromise,
            3 => ReasonCode::AffiliationChanged,
            4 => ReasonCode::Superseded,
            5 => ReasonCode::CessationOfOperation,
            6 => ReasonCode::CertificateHold,
            8 => ReasonCode::RemoveFromCrl,
            9 => ReasonCode::PrivilegeWithdrawn,
            10 => ReasonCode::AaCompromise,
            other => {
                return Err(CrlError::malformed(
                    "reasonCode",
                    format!("unknown CRL reason {other}"),
                ));
            }
        })
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReasonCode::Unspecified => "unspecified",
            ReasonCode::KeyCompromise => "keyCompromise",
            ReasonCode::CaCompromise => "cACompromise",
            ReasonCode::AffiliationChanged => "affiliationChanged",
            ReasonCode::Superseded => "superseded",
            ReasonCode::CessationOfOperation => "cessationOfOperation",
            ReasonCode::CertificateHold => "certificateHold",
            ReasonCode::RemoveFromCrl => "removeFromCRL",
            ReasonCode::PrivilegeWithdrawn => "privilegeWithdrawn",
            ReasonCode::AaCompromise => "aACompromise",
        };
        f.write_str(name)
    }
}

/// The set of revocation reasons for which the status of a certificate has
/// been conclusively established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReasonsMask(ReasonFlags);

impl ReasonsMask {
    pub fn none() -> Self {
        Self(ReasonFlags::default())
    }

    pub fn all() -> Self {
        Self(ReasonFlags::full())
    }

    pub fn from_flags(flags: ReasonFlags) -> Self {
        Self(flags)
    }

    pub fn flags(&self) -> ReasonFlags {
        self.0
    }

    pub fn add_reasons(&mut self, other: &ReasonsMask) {
        self.0 |= other.0;
    }

    pub fn intersect(&self, other: &ReasonsMask) -> ReasonsMask {
        Self(self.0 & other.0)
    }

    /// True if this mask holds at least one reason not already in `mask`.
    pub fn has_new_reasons(&self, mask: &ReasonsMask) -> bool {
        !(self.0 - mask.0).is_empty()
    }

    pub fn is_all_reasons(&self) -> bool {
        self.0.is_full()
    }
}

/// Details of a revocation found in a CRL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationInfo {
    pub reason: ReasonCode,
    pub date: DateTime<Utc>,
}

/// Revocation status of a single certificate while its CRLs are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertStatus {
    #[default]
    Unrevoked,
    Revoked(RevocationInfo),
    Undetermined,
}

impl CertStatus {
    pub fn is_unrevoked(&self) -> bool {
        matches!(self, CertStatus::Unrevoked)
    }

    pub fn revocation(&self) -> Option<RevocationInfo> {
        match self {
            CertStatus::Revoked(info) => Some(*info),
            _ => None,
        }
    }

    /// Clears a removeFromCRL marker left by entry lookup.
    pub fn settle(&mut self) {
        if let CertStatus::Revoked(info) = self
            && info.reason == ReasonCode::RemoveFromCrl
        {
            *self = CertStatus::Unrevoked;
        }
    }
}

/// The distributionPoint field of a DistributionPoint or
/// IssuingDistributionPoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionPointName {
    FullName(Vec<GeneralName>),
    RelativeToIssuer(Rdn),
}

impl DistributionPointName {
    /// Resolves this name to general names, expanding a relative name
    /// against each of `bases`.
    pub fn resolve(&self, bases: &[DistinguishedName]) -> Vec<GeneralName> {
        match self {
            DistributionPointName::FullName(names) => names.clone(),
            DistributionPointName::RelativeToIssuer(rdn) => bases
                .iter()
                .map(|base| GeneralName::DirectoryName(base.with_rdn(rdn)))
                .collect(),
        }
    }
}

/// A DistributionPoint from the CRLDistributionPoints or FreshestCRL
/// extension of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributionPoint {
    pub name: Option<DistributionPointName>,
    pub reasons: Option<ReasonFlags>,
    pub crl_issuer: Option<Vec<GeneralName>>,
}

impl DistributionPoint {
    pub fn with_full_name(names: Vec<GeneralName>) -> Self {
        Self {
            name: Some(DistributionPointName::FullName(names)),
            ..Self::default()
        }
    }

    /// The distribution point assumed for certificates whose CRLs are not
    /// announced: full name set to the certificate issuer.
    pub fn for_issuer(issuer: &DistinguishedName) -> Self {
        Self::with_full_name(vec![GeneralName::DirectoryName(issuer.clone())])
    }

    pub fn with_reasons(mut self, reasons: ReasonFlags) -> Self {
        self.reasons = Some(reasons);
        self
    }

    pub fn with_crl_issuer(mut self, names: Vec<GeneralName>) -> Self {
        self.crl_issuer = Some(names);
        self
    }

    pub fn full_names(&self) -> &[GeneralName] {
        match &self.name {
            Some(DistributionPointName::FullName(names)) => names,
            _ => &[],
        }
    }
}

/// The IssuingDistributionPoint CRL extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IssuingDistributionPoint {
    pub distribution_point: Option<DistributionPointName>,
    pub only_contains_user_certs: bool,
    pub only_contains_ca_certs: bool,
    pub only_contains_attribute_certs: bool,
    pub only_some_reasons: Option<ReasonFlags>,
    pub indirect_crl: bool,
}

/// A revoked certificate entry of a CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: SerialNumber,
    pub revocation_date: DateTime<Utc>,
    /// Raw reasonCode value, decoded when the entry is applied.
    pub reason_code: Option<u8>,
    pub certificate_issuer: Option<Vec<GeneralName>>,
}

impl RevokedEntry {
    pub fn new(serial: SerialNumber, revocation_date: DateTime<Utc>) -> Self {
        Self {
            serial,
            revocation_date,
            reason_code: None,
            certificate_issuer: None,
        }
    }

    pub fn with_reason(mut self, reason: ReasonCode) -> Self {
        self.reason_code = Some(reason as u8);
        self
    }

    pub fn with_certificate_issuer(mut self, names: Vec<GeneralName>) -> Self {
        self.certificate_issuer = Some(names);
        self
    }

    /// The reason of this entry, `unspecified` when none is given.
    pub fn reason(&self) -> CrlResult<ReasonCode> {
        self.reason_code
            .map_or(Ok(ReasonCode::Unspecified), ReasonCode::try_from)
    }
}

/// CRL extensions the revocation engine interprets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrlExtensions {
    pub issuing_distribution_point: Option<IssuingDistributionPoint>,
    pub crl_number: Option<BigUint>,
    /// The DeltaCRLIndicator, present only on delta CRLs.
    pub base_crl_number: Option<BigUint>,
    /// Encoded AuthorityKeyIdentifier extension value.
    pub authority_key_id: Option<Vec<u8>>,
    pub freshest_crl: Option<Vec<DistributionPoint>>,
    /// Dotted OIDs of every extension marked critical.
    pub critical: Vec<String>,
}

/// Accessors over an already parsed CRL.
pub trait CrlView: Send + Sync + fmt::Debug {
    fn issuer(&self) -> &DistinguishedName;

    fn this_update(&self) -> DateTime<Utc>;

    fn next_update(&self) -> Option<DateTime<Utc>>;

    fn entries(&self) -> &[RevokedEntry];

    fn extensions(&self) -> &CrlExtensions;

    fn verify_signature(&self, key: &PublicKey) -> bool;

    fn issuing_distribution_point(&self) -> Option<&IssuingDistributionPoint> {
        self.extensions().issuing_distribution_point.as_ref()
    }

    fn is_delta(&self) -> bool {
        self.extensions().base_crl_number.is_some()
    }

    fn is_indirect(&self) -> bool {
        self.issuing_distribution_point()
            .is_some_and(|idp| idp.indirect_crl)
    }

    /// A CRL is usable at `instant` until its nextUpdate passes.
    fn is_current_at(&self, instant: DateTime<Utc>) -> bool {
        self.next_update().is_none_or(|next| next > instant)
    }
}
