//! DER adapters exposing certificates and CRLs to the revocation engine.
//!
//! Parsing and signature verification use `x509-parser`. The structures it
//! leaves undecoded (distribution points, CRL numbers, certificate issuers
//! of CRL entries) as well as names are decoded with `x509-cert`.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use der::{Decode, Tag, Tagged};
use num_bigint::BigUint;
use tracing::debug;
use x509_cert::ext::pkix::crl::dp::DistributionPoint as X509DistributionPoint;
use x509_cert::ext::pkix::crl::{
    BaseCrlNumber, CrlDistributionPoints, CrlNumber, FreshestCrl, IssuingDistributionPoint as X509Idp,
};
use x509_cert::ext::pkix::name::{
    DistributionPointName as X509DpName, GeneralName as X509GeneralName,
};
use x509_cert::name::Name;
use x509_parser::extensions::ParsedExtension;
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::pki::cert::{CertificateView, KeyUsage, PublicKey, SerialNumber};
use crate::pki::crl::errors::{CrlError, CrlResult};
use crate::pki::crl::types::{
    CrlExtensions, CrlView, DistributionPoint, DistributionPointName, IssuingDistributionPoint,
    ReasonFlags, RevokedEntry,
};
use crate::pki::name::{Attribute, DistinguishedName, GeneralName, Rdn};

const OID_CRL_DISTRIBUTION_POINTS: &str = "2.5.29.31";
const OID_FRESHEST_CRL: &str = "2.5.29.46";
const OID_CRL_NUMBER: &str = "2.5.29.20";
const OID_DELTA_CRL_INDICATOR: &str = "2.5.29.27";
const OID_ISSUING_DISTRIBUTION_POINT: &str = "2.5.29.28";
const OID_AUTHORITY_KEY_IDENTIFIER: &str = "2.5.29.35";
const OID_REASON_CODE: &str = "2.5.29.21";
const OID_CERTIFICATE_ISSUER: &str = "2.5.29.29";

/// Reason code value stored for an entry whose reasonCode could not be
/// decoded, rejected when the entry is applied.
const UNDECODABLE_REASON: u8 = u8::MAX;

fn asn1_time_to_chrono(asn1_time: ASN1Time) -> DateTime<Utc> {
    let system_time: SystemTime = asn1_time.to_datetime().into();
    DateTime::<Utc>::from(system_time)
}

fn attribute_value(value: &der::Any) -> String {
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::TeletexString
        | Tag::VisibleString => String::from_utf8_lossy(value.value()).into_owned(),
        Tag::BmpString => {
            let units: Vec<u16> = value
                .value()
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => format!("#{}", hex::encode(value.value())),
    }
}

fn directory_name(name: &Name) -> DistinguishedName {
    DistinguishedName::new(
        name.0
            .iter()
            .map(|rdn| {
                Rdn::new(
                    rdn.0
                        .iter()
                        .map(|atv| Attribute::new(atv.oid.to_string(), attribute_value(&atv.value)))
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Decodes the raw encoding of an `x509-parser` name.
fn parse_name(raw: &[u8]) -> CrlResult<DistinguishedName> {
    Ok(directory_name(&Name::from_der(raw)?))
}

fn general_name(name: &X509GeneralName) -> GeneralName {
    match name {
        X509GeneralName::DirectoryName(dn) => GeneralName::DirectoryName(directory_name(dn)),
        X509GeneralName::UniformResourceIdentifier(uri) => GeneralName::Uri(uri.to_string()),
        X509GeneralName::DnsName(dns) => GeneralName::DnsName(dns.to_string()),
        X509GeneralName::Rfc822Name(email) => GeneralName::Rfc822Name(email.to_string()),
        X509GeneralName::IpAddress(ip) => GeneralName::IpAddress(ip.as_bytes().to_vec()),
        X509GeneralName::OtherName(other) => {
            GeneralName::Other(format!("otherName:{}", other.type_id))
        }
        X509GeneralName::RegisteredId(oid) => GeneralName::Other(format!("registeredID:{oid}")),
        X509GeneralName::EdiPartyName(_) => GeneralName::Other("ediPartyName".to_string()),
    }
}

fn general_names(names: &[X509GeneralName]) -> Vec<GeneralName> {
    names.iter().map(general_name).collect()
}

fn distribution_point_name(name: &X509DpName) -> DistributionPointName {
    match name {
        X509DpName::FullName(names) => DistributionPointName::FullName(general_names(names)),
        X509DpName::NameRelativeToCRLIssuer(rdn) => DistributionPointName::RelativeToIssuer(
            Rdn::new(
                rdn.0
                    .iter()
                    .map(|atv| Attribute::new(atv.oid.to_string(), attribute_value(&atv.value)))
                    .collect(),
            ),
        ),
    }
}

fn reason_flags(flags: x509_cert::ext::pkix::crl::dp::ReasonFlags) -> ReasonFlags {
    ReasonFlags::new_truncated(flags.bits())
}

fn distribution_point(dp: &X509DistributionPoint) -> DistributionPoint {
    DistributionPoint {
        name: dp.distribution_point.as_ref().map(distribution_point_name),
        reasons: dp.reasons.map(reason_flags),
        crl_issuer: dp.crl_issuer.as_deref().map(general_names),
    }
}

fn issuing_distribution_point(idp: &X509Idp) -> IssuingDistributionPoint {
    IssuingDistributionPoint {
        distribution_point: idp.distribution_point.as_ref().map(distribution_point_name),
        only_contains_user_certs: idp.only_contains_user_certs,
        only_contains_ca_certs: idp.only_contains_ca_certs,
        only_contains_attribute_certs: idp.only_contains_attribute_certs,
        only_some_reasons: idp.only_some_reasons.map(reason_flags),
        indirect_crl: idp.indirect_crl,
    }
}

/// Decoded DistributionPoint list, or the reason it could not be decoded.
type DecodedPoints = Option<Result<Vec<DistributionPoint>, String>>;

fn decode_points(value: &[u8], freshest: bool) -> Result<Vec<DistributionPoint>, String> {
    let points = if freshest {
        FreshestCrl::from_der(value).map(|f| f.0)
    } else {
        CrlDistributionPoints::from_der(value).map(|c| c.0)
    };
    points
        .map(|points| points.iter().map(distribution_point).collect())
        .map_err(|e| e.to_string())
}

fn decoded_points(points: &DecodedPoints, extension: &'static str) -> CrlResult<Option<Vec<DistributionPoint>>> {
    match points {
        None => Ok(None),
        Some(Ok(points)) => Ok(Some(points.clone())),
        Some(Err(reason)) => Err(CrlError::malformed(extension, reason)),
    }
}

/// A certificate parsed from DER.
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    der: Arc<[u8]>,
    issuer: DistinguishedName,
    subject: DistinguishedName,
    serial: SerialNumber,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    ca: bool,
    key_usage: Option<KeyUsage>,
    subject_key_id: Option<Vec<u8>>,
    authority_key_id: Option<Vec<u8>>,
    public_key: PublicKey,
    distribution_points: DecodedPoints,
    freshest_crl: DecodedPoints,
}

impl ParsedCertificate {
    /// Create a certificate from DER-encoded bytes
    pub fn from_der(der: impl AsRef<[u8]>) -> CrlResult<Self> {
        let der_bytes = der.as_ref();
        let (_, cert) = X509Certificate::from_der(der_bytes).map_err(|e| CrlError::Parse(e.into()))?;

        let mut ca = false;
        let mut key_usage = None;
        let mut subject_key_id = None;
        let mut authority_key_id = None;
        let mut distribution_points = None;
        let mut freshest_crl = None;

        for ext in cert.tbs_certificate.extensions() {
            match ext.oid.to_id_string().as_str() {
                OID_CRL_DISTRIBUTION_POINTS => {
                    distribution_points = Some(decode_points(ext.value, false));
                    continue;
                }
                OID_FRESHEST_CRL => {
                    freshest_crl = Some(decode_points(ext.value, true));
                    continue;
                }
                _ => {}
            }
            match ext.parsed_extension() {
                ParsedExtension::BasicConstraints(bc) => ca = bc.ca,
                ParsedExtension::KeyUsage(ku) => key_usage = Some(KeyUsage::new_truncated(ku.flags)),
                ParsedExtension::SubjectKeyIdentifier(ski) => subject_key_id = Some(ski.0.to_vec()),
                ParsedExtension::AuthorityKeyIdentifier(aki) => {
                    authority_key_id = aki.key_identifier.as_ref().map(|id| id.0.to_vec());
                }
                _ => {}
            }
        }

        Ok(Self {
            der: Arc::from(der_bytes),
            issuer: parse_name(cert.issuer().as_raw())?,
            subject: parse_name(cert.subject().as_raw())?,
            serial: SerialNumber::from_bytes(cert.tbs_certificate.raw_serial()),
            not_before: asn1_time_to_chrono(cert.validity().not_before),
            not_after: asn1_time_to_chrono(cert.validity().not_after),
            ca,
            key_usage,
            subject_key_id,
            authority_key_id,
            public_key: PublicKey::new(cert.public_key().raw.to_vec()),
            distribution_points,
            freshest_crl,
        })
    }

    /// Parses every certificate of a PEM buffer.
    pub fn from_pem(pem: &[u8]) -> CrlResult<Vec<Self>> {
        let mut certs = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| CrlError::Configuration(format!("invalid PEM: {e}")))?;
            if block.label == "CERTIFICATE" {
                certs.push(Self::from_der(&block.contents)?);
            }
        }
        Ok(certs)
    }

    /// Parses a PEM buffer or a single DER certificate.
    pub fn parse_any(bytes: &[u8]) -> CrlResult<Vec<Self>> {
        if bytes.starts_with(b"-----BEGIN") {
            Self::from_pem(bytes)
        } else {
            Ok(vec![Self::from_der(bytes)?])
        }
    }

    /// Loads certificates from a PEM or DER file.
    pub fn load(path: &Path) -> CrlResult<Vec<Self>> {
        Self::parse_any(&std::fs::read(path)?)
    }

    pub fn into_view(self) -> Arc<dyn CertificateView> {
        Arc::new(self)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

impl CertificateView for ParsedCertificate {
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
        self.subject_key_id.as_deref()
    }

    fn authority_key_id(&self) -> Option<&[u8]> {
        self.authority_key_id.as_deref()
    }

    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn crl_distribution_points(&self) -> CrlResult<Option<Vec<DistributionPoint>>> {
        decoded_points(&self.distribution_points, "cRLDistributionPoints")
    }

    fn freshest_crl(&self) -> CrlResult<Option<Vec<DistributionPoint>>> {
        decoded_points(&self.freshest_crl, "freshestCRL")
    }

    fn verify_signed_by(&self, key: &PublicKey) -> bool {
        let Ok((_, cert)) = X509Certificate::from_der(&self.der) else {
            return false;
        };
        let Ok((_, spki)) = SubjectPublicKeyInfo::from_der(key.as_bytes()) else {
            return false;
        };
        cert.verify_signature(Some(&spki)).is_ok()
    }
}

/// A CRL parsed from DER.
#[derive(Debug, Clone)]
pub struct ParsedCrl {
    der: Arc<[u8]>,
    issuer: DistinguishedName,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    entries: Vec<RevokedEntry>,
    extensions: CrlExtensions,
}

impl ParsedCrl {
    /// Create a CRL from DER-encoded bytes.
    ///
    /// CRLs whose nextUpdate does not follow thisUpdate are rejected.
    pub fn from_der(der: impl AsRef<[u8]>) -> CrlResult<Self> {
        let der_bytes = der.as_ref();
        let (_, crl) =
            CertificateRevocationList::from_der(der_bytes).map_err(|e| CrlError::Parse(e.into()))?;
        let tbs = &crl.tbs_cert_list;

        let this_update = asn1_time_to_chrono(tbs.this_update);
        let next_update = tbs.next_update.map(asn1_time_to_chrono);
        if let Some(next) = next_update
            && next <= this_update
        {
            return Err(CrlError::malformed(
                "nextUpdate",
                format!("{next} does not follow thisUpdate {this_update}"),
            ));
        }

        let mut extensions = CrlExtensions::default();
        for ext in tbs.extensions() {
            let oid = ext.oid.to_id_string();
            if ext.critical {
                extensions.critical.push(oid.clone());
            }
            match oid.as_str() {
                OID_ISSUING_DISTRIBUTION_POINT => {
                    extensions.issuing_distribution_point =
                        Some(issuing_distribution_point(&X509Idp::from_der(ext.value)?));
                }
                OID_CRL_NUMBER => {
                    let number = CrlNumber::from_der(ext.value)?;
                    extensions.crl_number = Some(BigUint::from_bytes_be(number.0.as_bytes()));
                }
                OID_DELTA_CRL_INDICATOR => {
                    let base = BaseCrlNumber::from_der(ext.value)?;
                    extensions.base_crl_number = Some(BigUint::from_bytes_be(base.0.as_bytes()));
                }
                OID_AUTHORITY_KEY_IDENTIFIER => {
                    extensions.authority_key_id = Some(ext.value.to_vec());
                }
                OID_FRESHEST_CRL => {
                    let points = decode_points(ext.value, true)
                        .map_err(|reason| CrlError::malformed("freshestCRL", reason))?;
                    extensions.freshest_crl = Some(points);
                }
                _ => {}
            }
        }

        let mut entries = Vec::with_capacity(tbs.revoked_certificates.len());
        for revoked in &tbs.revoked_certificates {
            let mut entry = RevokedEntry::new(
                SerialNumber::from_bytes(&revoked.user_certificate.to_bytes_be()),
                asn1_time_to_chrono(revoked.revocation_date),
            );
            for ext in revoked.extensions() {
                match ext.oid.to_id_string().as_str() {
                    // ENUMERATED, encoded as 0x0A 0x01 <reason>
                    OID_REASON_CODE => {
                        entry.reason_code = Some(match ext.value {
                            [0x0A, 0x01, code] => *code,
                            _ => UNDECODABLE_REASON,
                        });
                    }
                    OID_CERTIFICATE_ISSUER => {
                        let names = Vec::<X509GeneralName>::from_der(ext.value)?;
                        entry.certificate_issuer = Some(general_names(&names));
                    }
                    _ => {}
                }
            }
            entries.push(entry);
        }

        debug!(
            "Parsed CRL with {} entries (number: {:?})",
            entries.len(),
            extensions.crl_number
        );

        Ok(Self {
            der: Arc::from(der_bytes),
            issuer: parse_name(tbs.issuer.as_raw())?,
            this_update,
            next_update,
            entries,
            extensions,
        })
    }

    /// Loads a CRL from a PEM (`X509 CRL`) or DER file.
    pub fn load(path: &Path) -> CrlResult<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.starts_with(b"-----BEGIN") {
            for block in Pem::iter_from_buffer(&bytes) {
                let block =
                    block.map_err(|e| CrlError::Configuration(format!("invalid PEM: {e}")))?;
                if block.label == "X509 CRL" {
                    return Self::from_der(&block.contents);
                }
            }
            Err(CrlError::Configuration(format!(
                "no X509 CRL block in {}",
                path.display()
            )))
        } else {
            Self::from_der(&bytes)
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn into_view(self) -> Arc<dyn CrlView> {
        Arc::new(self)
    }
}

impl CrlView for ParsedCrl {
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
        let Ok((_, crl)) = CertificateRevocationList::from_der(&self.der) else {
            return false;
        };
        let Ok((_, spki)) = SubjectPublicKeyInfo::from_der(key.as_bytes()) else {
            return false;
        };
        match x509_parser::verify::verify_signature(
            &spki,
            &crl.signature_algorithm,
            &crl.signature_value,
            crl.tbs_cert_list.as_ref(),
        ) {
            Ok(()) => true,
            Err(e) => {
                debug!("CRL signature verification failed: {:?}", e);
                false
            }
        }
    }
}
