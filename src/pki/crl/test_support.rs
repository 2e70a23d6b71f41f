//! In-memory certificates and CRLs for unit tests. Signatures are modelled
//! as equality between the verifying key and the key recorded as signer.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use num_bigint::BigUint;

use crate::pki::cert::{CertificateView, KeyUsage, PublicKey, SerialNumber};
use crate::pki::name::DistinguishedName;

use super::errors::CrlResult;
use super::types::{
    CrlExtensions, CrlView, DistributionPoint, IssuingDistributionPoint, RevokedEntry,
};

pub fn dn(name: &str) -> DistinguishedName {
    name.parse().expect("valid test name")
}

pub fn key(label: &str) -> PublicKey {
    PublicKey::new(label.as_bytes().to_vec())
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
pub struct FakeCert {
    pub issuer: DistinguishedName,
    pub subject: DistinguishedName,
    pub serial: SerialNumber,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub ca: bool,
    pub key_usage: Option<KeyUsage>,
    pub key: PublicKey,
    pub signer: PublicKey,
    pub dps: Option<Vec<DistributionPoint>>,
}

impl FakeCert {
    pub fn new(subject: &str, issuer: &str, serial: u64) -> Self {
        Self {
            issuer: dn(issuer),
            subject: dn(subject),
            serial: SerialNumber::from(serial),
            not_before: t0() - Duration::days(365),
            not_after: t0() + Duration::days(365),
            ca: false,
            key_usage: None,
            key: key(subject),
            signer: key(issuer),
            dps: None,
        }
    }

    pub fn ca(mut self) -> Self {
        self.ca = true;
        self
    }

    pub fn key_usage(mut self, usage: KeyUsage) -> Self {
        self.key_usage = Some(usage);
        self
    }

    pub fn dps(mut self, dps: Vec<DistributionPoint>) -> Self {
        self.dps = Some(dps);
        self
    }

    pub fn arc(self) -> Arc<dyn CertificateView> {
        Arc::new(self)
    }
}

impl CertificateView for FakeCert {
    fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }
    fn subject(&self) -> &DistinguishedName {
        &self.subject
    }
    fn serial(&self) -> &SerialNumber {
        &self.serial
    }
    fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }
    fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
    fn is_ca(&self) -> bool {
        self.ca
    }
    fn key_usage(&self) -> Option<KeyUsage> {
        self.key_usage
    }
    fn subject_key_id(&self) -> Option<&[u8]> {
        None
    }
    fn authority_key_id(&self) -> Option<&[u8]> {
        None
    }
    fn public_key(&self) -> &PublicKey {
        &self.key
    }
    fn crl_distribution_points(&self) -> CrlResult<Option<Vec<DistributionPoint>>> {
        Ok(self.dps.clone())
    }
    fn verify_signed_by(&self, key: &PublicKey) -> bool {
        *key == self.signer
    }
}

#[derive(Debug, Clone)]
pub struct FakeCrl {
    pub issuer: DistinguishedName,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub entries: Vec<RevokedEntry>,
    pub extensions: CrlExtensions,
    pub signer: PublicKey,
}

impl FakeCrl {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: dn(issuer),
            this_update: t0() - Duration::hours(1),
            next_update: Some(t0() + Duration::days(7)),
            entries: Vec::new(),
            extensions: CrlExtensions {
                crl_number: Some(BigUint::from(1u32)),
                ..CrlExtensions::default()
            },
            signer: key(issuer),
        }
    }

    pub fn entry(mut self, entry: RevokedEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn number(mut self, number: u32) -> Self {
        self.extensions.crl_number = Some(BigUint::from(number));
        self
    }

    pub fn delta_of(mut self, base: u32) -> Self {
        self.extensions.base_crl_number = Some(BigUint::from(base));
        self
    }

    pub fn idp(mut self, idp: IssuingDistributionPoint) -> Self {
        self.extensions.issuing_distribution_point = Some(idp);
        self
    }

    pub fn aki(mut self, aki: &[u8]) -> Self {
        self.extensions.authority_key_id = Some(aki.to_vec());
        self
    }

    pub fn critical(mut self, oid: &str) -> Self {
        self.extensions.critical.push(oid.to_string());
        self
    }

    pub fn signed_with(mut self, key: PublicKey) -> Self {
        self.signer = key;
        self
    }

    pub fn arc(self) -> Arc<dyn CrlView> {
        Arc::new(self)
    }
}

impl CrlView for FakeCrl {
    fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }
    fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }
    fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }
    fn entries(&self) -> &[RevokedEntry] {
        &self.entries
    }
    fn extensions(&self) -> &CrlExtensions {
        &self.extensions
    }
    fn verify_signature(&self, key: &PublicKey) -> bool {
        *key == self.signer
    }
}
