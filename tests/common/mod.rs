#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use num_bigint::BigUint;
use pkix_revocation::pki::{
    CertificateView, DistinguishedName, PublicKey, SerialNumber, TrustAnchor, TrustAnchorSet,
    cert::KeyUsage,
    crl::{
        CrlResult, CrlView, DistributionPoint, IssuingDistributionPoint, ReasonCode,
        RevokedEntry, types::CrlExtensions,
    },
    truststore::CertificationPath,
};

pub const ROOT: &str = "CN=Root CA, O=Example";
pub const CA: &str = "CN=Issuing CA, O=Example";

pub fn dn(name: &str) -> DistinguishedName {
    name.parse().expect("valid test name")
}

/// Signatures are modelled as the signer's name used as key material.
pub fn key(name: &str) -> PublicKey {
    PublicKey::new(format!("key:{name}").into_bytes())
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

pub fn revoked(serial: u64, reason: ReasonCode) -> RevokedEntry {
    RevokedEntry::new(SerialNumber::from(serial), now() - Duration::days(2)).with_reason(reason)
}

#[derive(Debug, Clone)]
pub struct TestCert {
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

impl TestCert {
    pub fn new(subject: &str, issuer: &str, serial: u64) -> Self {
        Self {
            issuer: dn(issuer),
            subject: dn(subject),
            serial: SerialNumber::from(serial),
            not_before: now() - Duration::days(90),
            not_after: now() + Duration::days(275),
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

impl CertificateView for TestCert {
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
pub struct TestCrl {
    pub issuer: DistinguishedName,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub entries: Vec<RevokedEntry>,
    pub extensions: CrlExtensions,
    pub signer: PublicKey,
}

impl TestCrl {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: dn(issuer),
            this_update: now() - Duration::hours(6),
            next_update: Some(now() + Duration::days(1)),
            entries: Vec::new(),
            extensions: CrlExtensions {
                crl_number: Some(BigUint::from(1u32)),
                authority_key_id: Some(key(issuer).as_bytes().to_vec()),
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
        self.extensions.critical.push("2.5.29.27".to_string());
        self
    }

    pub fn idp(mut self, idp: IssuingDistributionPoint) -> Self {
        self.extensions.issuing_distribution_point = Some(idp);
        self.extensions.critical.push("2.5.29.28".to_string());
        self
    }

    pub fn aki(mut self, aki: &[u8]) -> Self {
        self.extensions.authority_key_id = Some(aki.to_vec());
        self
    }

    pub fn freshest(mut self, points: Vec<DistributionPoint>) -> Self {
        self.extensions.freshest_crl = Some(points);
        self
    }

    pub fn critical(mut self, oid: &str) -> Self {
        self.extensions.critical.push(oid.to_string());
        self
    }

    pub fn signed_by(mut self, signer: &str) -> Self {
        self.signer = key(signer);
        self
    }

    pub fn arc(self) -> Arc<dyn CrlView> {
        Arc::new(self)
    }
}

impl CrlView for TestCrl {
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

pub fn root_anchor() -> TrustAnchor {
    TrustAnchor::NameAndKey {
        name: dn(ROOT),
        key: key(ROOT),
    }
}

pub fn anchors() -> Arc<TrustAnchorSet> {
    Arc::new(TrustAnchorSet::new(vec![root_anchor()]))
}

pub fn issuing_ca() -> Arc<dyn CertificateView> {
    TestCert::new(CA, ROOT, 100).ca().arc()
}

/// Path root -> issuing CA -> `leaf`.
pub fn path_to(leaf: Arc<dyn CertificateView>) -> CertificationPath {
    CertificationPath::new(vec![leaf, issuing_ca()], root_anchor())
}
