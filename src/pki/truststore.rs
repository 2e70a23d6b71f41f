use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::pki::cert::{CertId, CertificateView, PublicKey};
use crate::pki::crl::errors::{CrlError, CrlResult};
use crate::pki::name::DistinguishedName;
use crate::pki::x509::ParsedCertificate;

const MAX_PATH_LENGTH: usize = 10;

/// A trusted certificate, or a bare name and key.
#[derive(Debug, Clone)]
pub enum TrustAnchor {
    Certificate(Arc<dyn CertificateView>),
    NameAndKey {
        name: DistinguishedName,
        key: PublicKey,
    },
}

impl TrustAnchor {
    pub fn subject(&self) -> &DistinguishedName {
        match self {
            Self::Certificate(cert) => cert.subject(),
            Self::NameAndKey { name, .. } => name,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        match self {
            Self::Certificate(cert) => cert.public_key(),
            Self::NameAndKey { key, .. } => key,
        }
    }

    pub fn certificate(&self) -> Option<&Arc<dyn CertificateView>> {
        match self {
            Self::Certificate(cert) => Some(cert),
            Self::NameAndKey { .. } => None,
        }
    }

    fn is(&self, cert: &dyn CertificateView) -> bool {
        self.subject() == cert.subject() && self.public_key() == cert.public_key()
    }
}

/// The configured trust anchors.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorSet {
    anchors: Vec<TrustAnchor>,
}

impl TrustAnchorSet {
    pub fn new(anchors: Vec<TrustAnchor>) -> Self {
        Self { anchors }
    }

    pub fn from_certificates(certs: impl IntoIterator<Item = Arc<dyn CertificateView>>) -> Self {
        Self::new(certs.into_iter().map(TrustAnchor::Certificate).collect())
    }

    pub fn push(&mut self, anchor: TrustAnchor) {
        self.anchors.push(anchor);
    }

    pub fn find_by_subject<'a, 'b>(
        &'a self,
        subject: &'b DistinguishedName,
    ) -> impl Iterator<Item = &'a TrustAnchor> + 'b
    where
        'a: 'b,
    {
        self.anchors.iter().filter(move |a| a.subject() == subject)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.iter()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// Lookup of certificates by subject name.
pub trait CertificateSource: Send + Sync {
    fn find_by_subject(&self, subject: &DistinguishedName) -> Vec<Arc<dyn CertificateView>>;
}

/// In-memory certificate store.
///
/// Certificates are kept in memory only and may be loaded from a directory
/// of `.der`, `.crt` or `.pem` files.
#[derive(Debug, Clone, Default)]
pub struct MemoryCertStore {
    cache: Arc<DashMap<CertId, Arc<dyn CertificateView>>>,
}

impl MemoryCertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding every certificate found below `base_path`.
    pub async fn load<P: AsRef<Path>>(base_path: P) -> CrlResult<Self> {
        let store = Self::new();
        store.load_from_disk(base_path.as_ref()).await?;
        Ok(store)
    }

    /// Return the amount of certificates currently cached.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn add(&self, cert: Arc<dyn CertificateView>) {
        self.cache.insert(cert.id(), cert);
    }

    /// Adds DER or PEM encoded certificates, skipping the unparsable ones.
    ///
    /// Returns the number of certificates added.
    pub fn add_encoded<I, D>(&self, encoded: I) -> usize
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut count = 0;
        for bytes in encoded {
            match ParsedCertificate::parse_any(bytes.as_ref()) {
                Ok(certs) => {
                    for cert in certs {
                        self.add(cert.into_view());
                        count += 1;
                    }
                }
                Err(e) => warn!("Skipping unparsable certificate: {e}"),
            }
        }
        count
    }

    pub fn remove(&self, id: &CertId) -> bool {
        self.cache.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn CertificateView>> + '_ {
        self.cache.iter().map(|e| Arc::clone(e.value()))
    }

    async fn load_from_disk(&self, base_path: &Path) -> CrlResult<()> {
        let mut count = 0;

        for entry in WalkDir::new(base_path) {
            let entry = entry?;
            let path = entry.path();

            if path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| {
                    ext.eq_ignore_ascii_case("der")
                        || ext.eq_ignore_ascii_case("pem")
                        || ext.eq_ignore_ascii_case("crt")
                })
                && let Ok(bytes) = fs::read(path).await
            {
                count += self.add_encoded([bytes]);
            }
        }
        info!("Loaded {count} certificates from {}", base_path.display());
        Ok(())
    }
}

impl CertificateSource for MemoryCertStore {
    fn find_by_subject(&self, subject: &DistinguishedName) -> Vec<Arc<dyn CertificateView>> {
        self.cache
            .iter()
            .filter(|e| e.value().subject() == subject)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }
}

/// A certification path: certificates ordered from the end entity toward
/// the trust anchor, which is held separately.
#[derive(Debug, Clone)]
pub struct CertificationPath {
    certificates: Vec<Arc<dyn CertificateView>>,
    anchor: TrustAnchor,
}

impl CertificationPath {
    pub fn new(certificates: Vec<Arc<dyn CertificateView>>, anchor: TrustAnchor) -> Self {
        Self {
            certificates,
            anchor,
        }
    }

    /// End entity first.
    pub fn certificates(&self) -> &[Arc<dyn CertificateView>] {
        &self.certificates
    }

    pub fn anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    pub fn end_entity(&self) -> Option<&Arc<dyn CertificateView>> {
        self.certificates.first()
    }

    pub fn ids(&self) -> impl Iterator<Item = CertId> + '_ {
        self.certificates.iter().map(|cert| cert.id())
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// Revocation checking of a whole path, given the certificates already
/// being validated further up the call stack.
pub trait PathRevocation: Send + Sync {
    fn check_path_with(
        &self,
        path: &CertificationPath,
        on_path: &HashSet<CertId>,
    ) -> CrlResult<()>;
}

/// Revocation checking requested from a [`PathBuilder`].
#[derive(Clone, Copy)]
pub struct RevocationContext<'a> {
    pub checker: &'a dyn PathRevocation,
    pub on_path: &'a HashSet<CertId>,
}

/// Builds and validates a certification path from a certificate to a trust
/// anchor.
pub trait PathBuilder: Send + Sync {
    fn build(
        &self,
        target: &Arc<dyn CertificateView>,
        time: DateTime<Utc>,
        revocation: Option<RevocationContext<'_>>,
    ) -> CrlResult<CertificationPath>;
}

/// [`PathBuilder`] searching issuers in certificate sources.
#[derive(Clone)]
pub struct StorePathBuilder {
    anchors: Arc<TrustAnchorSet>,
    sources: Vec<Arc<dyn CertificateSource>>,
    max_length: usize,
}

impl StorePathBuilder {
    pub fn new(anchors: Arc<TrustAnchorSet>, sources: Vec<Arc<dyn CertificateSource>>) -> Self {
        Self {
            anchors,
            sources,
            max_length: MAX_PATH_LENGTH,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    fn anchor_for(&self, cert: &dyn CertificateView) -> Option<&TrustAnchor> {
        self.anchors
            .find_by_subject(cert.issuer())
            .find(|anchor| cert.verify_signed_by(anchor.public_key()))
    }

    // Try to find an issuer certificate for the given certificate
    fn find_issuer_cert(
        &self,
        cert: &dyn CertificateView,
        used: &HashSet<CertId>,
    ) -> Option<Arc<dyn CertificateView>> {
        self.sources
            .iter()
            .flat_map(|source| source.find_by_subject(cert.issuer()))
            .find(|candidate| {
                !used.contains(&candidate.id()) && cert.verify_signed_by(candidate.public_key())
            })
    }

    // Try to build a certificate chain up to a trust anchor
    fn build_chain(&self, target: &Arc<dyn CertificateView>) -> CrlResult<CertificationPath> {
        if let Some(anchor) = self.anchors.iter().find(|a| a.is(target.as_ref())) {
            return Ok(CertificationPath::new(Vec::new(), anchor.clone()));
        }

        let mut chain = Vec::new();
        let mut used = HashSet::new();
        let mut current = Arc::clone(target);

        loop {
            if !used.insert(current.id()) {
                return Err(CrlError::Path("certificate chain contains a cycle".to_string()));
            }
            chain.push(Arc::clone(&current));
            if chain.len() > self.max_length {
                return Err(CrlError::Path("certificate chain too long".to_string()));
            }

            if let Some(anchor) = self.anchor_for(current.as_ref()) {
                return Ok(CertificationPath::new(chain, anchor.clone()));
            }

            if current.is_self_issued() {
                return Err(CrlError::NoTrustAnchor {
                    issuer: current.issuer().to_string(),
                });
            }

            current = self.find_issuer_cert(current.as_ref(), &used).ok_or_else(|| {
                CrlError::Path(format!(
                    "cannot find issuer for certificate: {}",
                    current.subject()
                ))
            })?;
        }
    }

    /// Verify the validity periods and CA flags of a built path
    fn verify_chain(&self, path: &CertificationPath, time: DateTime<Utc>) -> CrlResult<()> {
        for (i, cert) in path.certificates().iter().enumerate() {
            if !cert.is_valid_at(time) {
                return Err(CrlError::Path(format!(
                    "certificate {} is not valid at {time}",
                    cert.subject()
                )));
            }
            if i > 0 && !cert.is_ca() {
                return Err(CrlError::Path(format!(
                    "issuing certificate {} is not a CA",
                    cert.subject()
                )));
            }
        }
        Ok(())
    }
}

impl PathBuilder for StorePathBuilder {
    fn build(
        &self,
        target: &Arc<dyn CertificateView>,
        time: DateTime<Utc>,
        revocation: Option<RevocationContext<'_>>,
    ) -> CrlResult<CertificationPath> {
        let path = self.build_chain(target)?;
        self.verify_chain(&path, time)?;
        debug!(
            "Built path of length {} for {} to anchor {}",
            path.len(),
            target.subject(),
            path.anchor().subject()
        );

        if let Some(context) = revocation {
            context.checker.check_path_with(&path, context.on_path)?;
        }
        Ok(path)
    }
}
