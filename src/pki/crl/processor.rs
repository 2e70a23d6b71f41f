//! Processing of one distribution point of a certificate (RFC 5280 §6.3.3).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::pki::cert::{CertId, CertificateView};
use crate::pki::name::{DistinguishedName, GeneralName, directory_names};
use crate::pki::truststore::PathRevocation;

use super::delta::{DeltaReconciler, ReconciledCrl};
use super::errors::{CrlError, CrlResult};
use super::issuer::{CrlIssuerResolver, ResolveRequest, Signer};
use super::store::{CrlSelector, CrlSource, NamedCrlSources};
use super::types::{
    CertStatus, CrlView, DistributionPoint, DistributionPointName, ReasonsMask,
};

/// State shared by every distribution point of one certificate check.
pub struct CheckContext<'a> {
    pub cert: &'a dyn CertificateView,
    /// Instant used for CRL selection and entry lookup.
    pub instant: DateTime<Utc>,
    /// Under the chain model a CRL issued after the certificate expired is
    /// still acceptable.
    pub chain_model: bool,
    pub use_deltas: bool,
    pub sources: &'a [Arc<dyn CrlSource>],
    /// Consulted for delta CRLs named by the FreshestCRL of a base CRL.
    pub named_sources: &'a NamedCrlSources,
    pub signer: &'a Signer,
    pub on_path: &'a HashSet<CertId>,
    pub resolver: &'a CrlIssuerResolver,
    pub revocation: &'a dyn PathRevocation,
}

pub struct DistributionPointProcessor<'a> {
    ctx: &'a CheckContext<'a>,
}

impl<'a> DistributionPointProcessor<'a> {
    pub fn new(ctx: &'a CheckContext<'a>) -> Self {
        Self { ctx }
    }

    /// Processes the complete CRLs of `dp` until the certificate is revoked
    /// or every reason is covered.
    ///
    /// Returns an error when none of the candidate CRLs could be used; the
    /// error of the last rejected candidate is reported.
    pub fn process(
        &self,
        dp: &DistributionPoint,
        status: &mut CertStatus,
        mask: &mut ReasonsMask,
    ) -> CrlResult<()> {
        let crls = self.select_complete_crls(dp)?;
        if crls.is_empty() {
            return Err(self.not_found());
        }

        let mut valid_crl_found = false;
        let mut last_error = None;

        for crl in crls {
            if !status.is_unrevoked() || mask.is_all_reasons() {
                break;
            }
            match self.process_crl(dp, crl, status, mask) {
                Ok(true) => valid_crl_found = true,
                Ok(false) => {}
                Err(e) => {
                    debug!("CRL rejected for distribution point: {e}");
                    last_error = Some(e);
                }
            }
        }

        if valid_crl_found {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| self.not_found()))
        }
    }

    /// Returns `Ok(false)` when the CRL was skipped because it covers no
    /// new reason.
    fn process_crl(
        &self,
        dp: &DistributionPoint,
        crl: Arc<dyn CrlView>,
        status: &mut CertStatus,
        mask: &mut ReasonsMask,
    ) -> CrlResult<bool> {
        let cert = self.ctx.cert;

        let interim = interim_reasons_mask(crl.as_ref(), dp);
        if !interim.has_new_reasons(mask) {
            debug!("CRL of {} covers no new reasons, skipping", crl.issuer());
            return Ok(false);
        }

        let request = ResolveRequest {
            signer: self.ctx.signer,
            instant: self.ctx.instant,
            on_path: self.ctx.on_path,
            revocation: self.ctx.revocation,
        };
        let keys = self.ctx.resolver.resolve(crl.as_ref(), &request)?;
        let key = keys
            .into_iter()
            .find(|key| crl.verify_signature(key))
            .ok_or_else(|| {
                CrlError::CrlIssuerUnverifiable(format!(
                    "no candidate key verifies the CRL of {}",
                    crl.issuer()
                ))
            })?;

        let delta = if self.ctx.use_deltas {
            let mut sources = self.ctx.sources.to_vec();
            if let Some(points) = &crl.extensions().freshest_crl {
                for source in self.ctx.named_sources.for_points(points) {
                    if !sources.iter().any(|known| Arc::ptr_eq(known, &source)) {
                        sources.push(source);
                    }
                }
            }
            DeltaReconciler::new(&sources).find_verified(crl.as_ref(), self.ctx.instant, &key)?
        } else {
            None
        };

        verify_crl_issuer(dp, cert, crl.as_ref())?;
        verify_crl_scope(dp, cert, crl.as_ref())?;

        ReconciledCrl::new(crl, delta).lookup(cert, self.ctx.instant, status)?;

        mask.add_reasons(&interim);
        Ok(true)
    }

    fn select_complete_crls(&self, dp: &DistributionPoint) -> CrlResult<Vec<Arc<dyn CrlView>>> {
        let cert = self.ctx.cert;
        let issuers = crl_issuer_names(dp, cert.issuer())?;

        let mut selector = CrlSelector::new()
            .issuer_names(issuers)
            .certificate_checking(cert.id())
            .complete_only()
            .valid_at(self.ctx.instant);
        if !self.ctx.chain_model {
            selector = selector.this_update_before(cert.not_after());
        }

        let mut crls = Vec::new();
        for source in self.ctx.sources {
            crls.extend(source.find(&selector)?);
        }
        debug!(
            "Selected {} complete CRLs for certificate {}",
            crls.len(),
            cert.id()
        );
        Ok(crls)
    }

    fn not_found(&self) -> CrlError {
        CrlError::CrlNotFound {
            issuer: self.ctx.cert.issuer().to_string(),
            serial: self.ctx.cert.serial().to_string(),
            cause: None,
        }
    }
}

/// Issuer names the CRLs of `dp` are expected to come from.
fn crl_issuer_names(
    dp: &DistributionPoint,
    cert_issuer: &DistinguishedName,
) -> CrlResult<Vec<DistinguishedName>> {
    match &dp.crl_issuer {
        Some(names) => {
            let issuers: Vec<_> = directory_names(names).cloned().collect();
            if issuers.is_empty() {
                return Err(CrlError::Configuration(
                    "cRLIssuer of distribution point contains no directory name".to_string(),
                ));
            }
            Ok(issuers)
        }
        None if dp.name.is_none() => Err(CrlError::Configuration(
            "distribution point has neither a name nor a cRLIssuer".to_string(),
        )),
        None => Ok(vec![cert_issuer.clone()]),
    }
}

/// Reasons a CRL covers for `dp`: the DP reasons intersected with the IDP
/// onlySomeReasons, an absent side standing for all reasons.
pub fn interim_reasons_mask(crl: &dyn CrlView, dp: &DistributionPoint) -> ReasonsMask {
    let dp_reasons = dp
        .reasons
        .map_or(ReasonsMask::all(), ReasonsMask::from_flags);
    let idp_reasons = crl
        .issuing_distribution_point()
        .and_then(|idp| idp.only_some_reasons)
        .map_or(ReasonsMask::all(), ReasonsMask::from_flags);
    dp_reasons.intersect(&idp_reasons)
}

/// The CRL must come from the cRLIssuer named by `dp`, in which case it
/// must be indirect, or else from the certificate issuer.
pub fn verify_crl_issuer(
    dp: &DistributionPoint,
    cert: &dyn CertificateView,
    crl: &dyn CrlView,
) -> CrlResult<()> {
    match &dp.crl_issuer {
        Some(names) => {
            if !directory_names(names).any(|name| name == crl.issuer()) {
                return Err(CrlError::DistributionPointMismatch(format!(
                    "CRL issuer {} does not match the cRLIssuer of the distribution point",
                    crl.issuer()
                )));
            }
            if !crl.is_indirect() {
                return Err(CrlError::DistributionPointMismatch(
                    "distribution point contains cRLIssuer but CRL is not indirect".to_string(),
                ));
            }
            Ok(())
        }
        None if crl.issuer() == cert.issuer() => Ok(()),
        None => Err(CrlError::DistributionPointMismatch(format!(
            "CRL issuer {} is not the certificate issuer {}",
            crl.issuer(),
            cert.issuer()
        ))),
    }
}

/// Checks the IssuingDistributionPoint of the CRL against `dp` and the
/// certificate type.
pub fn verify_crl_scope(
    dp: &DistributionPoint,
    cert: &dyn CertificateView,
    crl: &dyn CrlView,
) -> CrlResult<()> {
    let Some(idp) = crl.issuing_distribution_point() else {
        return Ok(());
    };

    if let Some(idp_name) = &idp.distribution_point {
        let idp_names = idp_name.resolve(std::slice::from_ref(crl.issuer()));

        let dp_names: Vec<GeneralName> = match &dp.name {
            Some(DistributionPointName::FullName(names)) => names.clone(),
            Some(name @ DistributionPointName::RelativeToIssuer(_)) => {
                let bases: Vec<DistinguishedName> = match &dp.crl_issuer {
                    Some(names) => directory_names(names).cloned().collect(),
                    None => vec![cert.issuer().clone()],
                };
                name.resolve(&bases)
            }
            None => match &dp.crl_issuer {
                Some(names) => names.clone(),
                None => {
                    return Err(CrlError::DistributionPointMismatch(
                        "either the cRLIssuer or the distributionPoint field must be present"
                            .to_string(),
                    ));
                }
            },
        };

        if !dp_names.iter().any(|name| idp_names.contains(name)) {
            warn!(
                "No name of the distribution point matches the issuing distribution point of CRL {}",
                crl.issuer()
            );
            return Err(CrlError::DistributionPointMismatch(
                "issuing distribution point name does not match the distribution point".to_string(),
            ));
        }
    }

    if idp.only_contains_user_certs && cert.is_ca() {
        return Err(CrlError::DistributionPointMismatch(
            "CRL only contains user certificates but certificate is a CA".to_string(),
        ));
    }
    if idp.only_contains_ca_certs && !cert.is_ca() {
        return Err(CrlError::DistributionPointMismatch(
            "CRL only contains CA certificates but certificate is an end entity".to_string(),
        ));
    }
    if idp.only_contains_attribute_certs {
        return Err(CrlError::DistributionPointMismatch(
            "CRL only contains attribute certificates".to_string(),
        ));
    }

    Ok(())
}
