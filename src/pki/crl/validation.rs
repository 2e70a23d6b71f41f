//! Checks applied to a single CRL: validity window, critical extensions and
//! the lookup of a certificate among the revoked entries.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::pki::cert::CertificateView;
use crate::pki::name::{DistinguishedName, directory_names};

use super::errors::{CrlError, CrlResult};
use super::types::{CertStatus, CrlView, RevocationInfo};

pub const OID_ISSUING_DISTRIBUTION_POINT: &str = "2.5.29.28";
pub const OID_DELTA_CRL_INDICATOR: &str = "2.5.29.27";

/// Critical CRL extensions this crate understands.
const SUPPORTED_CRITICAL: &[&str] = &[OID_ISSUING_DISTRIBUTION_POINT, OID_DELTA_CRL_INDICATOR];

/// Check if a CRL is usable at `instant`.
///
/// - thisUpdate must not be after `instant`
/// - nextUpdate, when present, must be after `instant`
pub fn is_valid_at(crl: &dyn CrlView, instant: DateTime<Utc>) -> bool {
    if instant < crl.this_update() {
        warn!(
            "CRL of {} has thisUpdate in the future: {} (validation time: {})",
            crl.issuer(),
            crl.this_update(),
            instant
        );
        return false;
    }

    if !crl.is_current_at(instant) {
        debug!(
            "CRL of {} is expired (nextUpdate: {:?})",
            crl.issuer(),
            crl.next_update()
        );
        return false;
    }

    true
}

/// Rejects CRLs carrying critical extensions other than
/// IssuingDistributionPoint and DeltaCRLIndicator.
pub fn check_critical_extensions(crl: &dyn CrlView) -> CrlResult<()> {
    match crl
        .extensions()
        .critical
        .iter()
        .find(|oid| !SUPPORTED_CRITICAL.contains(&oid.as_str()))
    {
        Some(oid) => {
            warn!("CRL of {} has unsupported critical extension {oid}", crl.issuer());
            Err(CrlError::UnsupportedCriticalExtension(oid.clone()))
        }
        None => Ok(()),
    }
}

/// Looks up `cert` among the entries of `crl` and records a revocation in
/// `status`.
///
/// For indirect CRLs the issuer an entry belongs to starts as the CRL issuer
/// and changes at every entry carrying a certificateIssuer extension. A
/// direct CRL is only consulted when it was issued by the certificate
/// issuer.
///
/// An entry revokes when `instant` is not before its revocation date, or
/// when its reason makes the revocation retroactive.
pub fn apply_revocation_entries(
    crl: &dyn CrlView,
    cert: &dyn CertificateView,
    instant: DateTime<Utc>,
    status: &mut CertStatus,
) -> CrlResult<()> {
    let indirect = crl.is_indirect();
    if !indirect && crl.issuer() != cert.issuer() {
        debug!(
            "Skipping direct CRL of {} for certificate issued by {}",
            crl.issuer(),
            cert.issuer()
        );
        return Ok(());
    }

    let mut current_issuer: Option<&DistinguishedName> = Some(crl.issuer());
    for entry in crl.entries() {
        if indirect && let Some(names) = &entry.certificate_issuer {
            current_issuer = directory_names(names).next();
        }

        if entry.serial != *cert.serial() || current_issuer != Some(cert.issuer()) {
            continue;
        }

        let reason = entry.reason()?;
        if instant >= entry.revocation_date || reason.is_retroactive() {
            info!(
                "Certificate {} issued by {} is listed on CRL of {} ({reason}, {})",
                cert.serial(),
                cert.issuer(),
                crl.issuer(),
                entry.revocation_date
            );
            *status = CertStatus::Revoked(RevocationInfo {
                reason,
                date: entry.revocation_date,
            });
        } else {
            debug!(
                "Entry for {} is dated {} after lookup time {instant}",
                cert.serial(),
                entry.revocation_date
            );
        }
        break;
    }

    Ok(())
}
