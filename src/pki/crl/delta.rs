//! Delta CRL discovery and base/delta reconciliation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use tracing::{debug, warn};

use crate::pki::cert::{CertificateView, PublicKey};

use super::errors::CrlResult;
use super::store::{CrlSelector, CrlSource};
use super::types::{CertStatus, CrlView};
use super::validation::{apply_revocation_entries, check_critical_extensions};

pub struct DeltaReconciler<'a> {
    sources: &'a [Arc<dyn CrlSource>],
}

impl<'a> DeltaReconciler<'a> {
    pub fn new(sources: &'a [Arc<dyn CrlSource>]) -> Self {
        Self { sources }
    }

    /// Delta CRLs that may extend `base`: same issuer and scope, a CRL
    /// number above the base and a base number not above it.
    pub fn candidates(
        &self,
        base: &dyn CrlView,
        instant: DateTime<Utc>,
    ) -> CrlResult<Vec<Arc<dyn CrlView>>> {
        let mut selector = CrlSelector::new()
            .issuer_names([base.issuer().clone()])
            .delta_only()
            .issuing_distribution_point(base.issuing_distribution_point().cloned())
            .valid_at(instant);
        if let Some(number) = &base.extensions().crl_number {
            selector = selector
                .min_crl_number(number + BigUint::from(1u32))
                .max_base_crl_number(number.clone());
        }

        let mut found = Vec::new();
        for source in self.sources {
            found.extend(source.find(&selector)?);
        }
        debug!("Found {} delta CRL candidates for {}", found.len(), base.issuer());
        Ok(found)
    }

    /// The first candidate whose signature verifies with `key`.
    pub fn find_verified(
        &self,
        base: &dyn CrlView,
        instant: DateTime<Utc>,
        key: &PublicKey,
    ) -> CrlResult<Option<Arc<dyn CrlView>>> {
        Ok(self
            .candidates(base, instant)?
            .into_iter()
            .find(|delta| delta.verify_signature(key)))
    }
}

/// A delta may only extend a base with the same issuer, the same
/// IssuingDistributionPoint (or none on both) and the same
/// AuthorityKeyIdentifier, present on both.
pub fn is_consistent(base: &dyn CrlView, delta: &dyn CrlView) -> bool {
    if base.issuer() != delta.issuer() {
        return false;
    }
    if base.issuing_distribution_point() != delta.issuing_distribution_point() {
        return false;
    }
    match (
        &base.extensions().authority_key_id,
        &delta.extensions().authority_key_id,
    ) {
        (Some(base_aki), Some(delta_aki)) => base_aki == delta_aki,
        _ => false,
    }
}

/// A complete CRL together with the delta accepted for it.
#[derive(Debug, Clone)]
pub struct ReconciledCrl {
    base: Arc<dyn CrlView>,
    delta: Option<Arc<dyn CrlView>>,
}

impl ReconciledCrl {
    /// Combines `base` with `delta`, discarding a delta that cannot extend
    /// the base.
    pub fn new(base: Arc<dyn CrlView>, delta: Option<Arc<dyn CrlView>>) -> Self {
        let delta = delta.filter(|delta| {
            let consistent = is_consistent(base.as_ref(), delta.as_ref());
            if !consistent {
                warn!(
                    "Discarding delta CRL of {}: issuer, scope or authority key does not match its base",
                    delta.issuer()
                );
            }
            consistent
        });
        Self { base, delta }
    }

    pub fn base(&self) -> &Arc<dyn CrlView> {
        &self.base
    }

    pub fn delta(&self) -> Option<&Arc<dyn CrlView>> {
        self.delta.as_ref()
    }

    /// The CRLs in lookup order: delta first.
    pub fn layers(&self) -> impl Iterator<Item = &Arc<dyn CrlView>> {
        self.delta.iter().chain(std::iter::once(&self.base))
    }

    /// Applies the entries of the delta, then of the base while the
    /// certificate is still unrevoked. A removeFromCRL result ends as
    /// unrevoked.
    ///
    /// Nothing is applied unless every layer passes the critical extension
    /// check.
    pub fn lookup(
        &self,
        cert: &dyn CertificateView,
        instant: DateTime<Utc>,
        status: &mut CertStatus,
    ) -> CrlResult<()> {
        for crl in self.layers() {
            check_critical_extensions(crl.as_ref())?;
        }

        if let Some(delta) = &self.delta {
            apply_revocation_entries(delta.as_ref(), cert, instant, status)?;
        }
        if status.is_unrevoked() {
            apply_revocation_entries(self.base.as_ref(), cert, instant, status)?;
        }
        status.settle();
        Ok(())
    }
}
