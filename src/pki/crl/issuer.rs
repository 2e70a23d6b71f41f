//! Resolution of the keys allowed to sign a CRL.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::pki::cert::{CertId, CertificateView, PublicKey};
use crate::pki::name::DistinguishedName;
use crate::pki::truststore::{
    CertificateSource, PathBuilder, PathRevocation, RevocationContext, TrustAnchor,
};

use super::errors::{CrlError, CrlResult};
use super::types::CrlView;

/// The already trusted issuer of the certificate under check.
#[derive(Debug, Clone)]
pub struct Signer {
    pub name: DistinguishedName,
    pub key: PublicKey,
    pub certificate: Option<Arc<dyn CertificateView>>,
}

impl Signer {
    pub fn from_anchor(anchor: &TrustAnchor) -> Self {
        Self {
            name: anchor.subject().clone(),
            key: anchor.public_key().clone(),
            certificate: anchor.certificate().cloned(),
        }
    }

    pub fn from_certificate(cert: &Arc<dyn CertificateView>) -> Self {
        Self {
            name: cert.subject().clone(),
            key: cert.public_key().clone(),
            certificate: Some(Arc::clone(cert)),
        }
    }

    fn certificate_id(&self) -> Option<CertId> {
        self.certificate.as_ref().map(|cert| cert.id())
    }
}

/// Everything needed to validate a CRL signer found in a certificate
/// source.
pub struct ResolveRequest<'a> {
    pub signer: &'a Signer,
    pub instant: DateTime<Utc>,
    pub on_path: &'a HashSet<CertId>,
    pub revocation: &'a dyn PathRevocation,
}

#[derive(Clone, Default)]
pub struct CrlIssuerResolver {
    sources: Vec<Arc<dyn CertificateSource>>,
    path_builder: Option<Arc<dyn PathBuilder>>,
}

impl CrlIssuerResolver {
    pub fn new(
        sources: Vec<Arc<dyn CertificateSource>>,
        path_builder: Option<Arc<dyn PathBuilder>>,
    ) -> Self {
        Self {
            sources,
            path_builder,
        }
    }

    /// Returns the public keys that may have signed `crl`.
    ///
    /// The default signer is trusted as is when its name is the CRL issuer.
    /// Any other certificate named after the CRL issuer must chain to a
    /// trust anchor; the chain is checked for revocation unless the
    /// candidate is already on the path under validation. A candidate whose
    /// key usage forbids CRL signing is dropped.
    pub fn resolve(
        &self,
        crl: &dyn CrlView,
        request: &ResolveRequest<'_>,
    ) -> CrlResult<Vec<PublicKey>> {
        let issuer = crl.issuer();
        let signer = request.signer;
        let signer_id = signer.certificate_id();

        let mut candidates: Vec<(Arc<dyn CertificateView>, PublicKey)> = Vec::new();
        let mut keys = Vec::new();
        let mut last_error = None;

        if signer.name == *issuer {
            match &signer.certificate {
                Some(cert) => candidates.push((Arc::clone(cert), signer.key.clone())),
                None => keys.push(signer.key.clone()),
            }
        }

        for source in &self.sources {
            for cert in source.find_by_subject(issuer) {
                let id = cert.id();
                if signer_id.as_ref() == Some(&id) {
                    continue;
                }
                if candidates.iter().any(|(known, _)| known.id() == id) {
                    continue;
                }
                match self.validate_candidate(&cert, request) {
                    Ok(key) => candidates.push((cert, key)),
                    Err(e) => {
                        debug!("CRL signer candidate {id} rejected: {e}");
                        last_error = Some(e);
                    }
                }
            }
        }

        for (cert, key) in candidates {
            if cert.permits_crl_signing() {
                keys.push(key);
            } else {
                warn!(
                    "Certificate {} may not sign CRLs (cRLSign not asserted)",
                    cert.id()
                );
                last_error = Some(CrlError::CrlIssuerUnverifiable(format!(
                    "key usage of {} does not permit CRL signing",
                    cert.subject()
                )));
            }
        }

        if keys.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                CrlError::CrlIssuerUnverifiable(format!(
                    "cannot find a valid issuer certificate for CRL of {issuer}"
                ))
            }));
        }
        Ok(keys)
    }

    fn validate_candidate(
        &self,
        cert: &Arc<dyn CertificateView>,
        request: &ResolveRequest<'_>,
    ) -> CrlResult<PublicKey> {
        let builder = self.path_builder.as_ref().ok_or_else(|| {
            CrlError::CrlIssuerUnverifiable(format!(
                "no path builder configured to validate {}",
                cert.subject()
            ))
        })?;

        let revocation = (!request.on_path.contains(&cert.id())).then_some(RevocationContext {
            checker: request.revocation,
            on_path: request.on_path,
        });
        if revocation.is_none() {
            debug!(
                "{} is already on the path, building its path without revocation checking",
                cert.id()
            );
        }

        builder
            .build(cert, request.instant, revocation)
            .map_err(|e| {
                CrlError::CrlIssuerUnverifiable(format!(
                    "certification path for CRL signer {} failed: {e}",
                    cert.subject()
                ))
            })?;
        Ok(cert.public_key().clone())
    }
}
