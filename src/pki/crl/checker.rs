//! Path-level CRL revocation checking (RFC 5280 §6.3).
//!
//! A [`RevocationChecker`] holds configuration, CRL sources and the caches
//! shared between validations. Each path validation obtains a
//! [`PathRevocationCheck`] that carries the working issuer state while the
//! path is walked from the trust anchor toward the end entity.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::pki::cert::{CertId, CertificateView};
use crate::pki::name::GeneralName;
use crate::pki::truststore::{
    CertificateSource, CertificationPath, PathBuilder, PathRevocation, TrustAnchorSet,
};

use super::cache::CrlCache;
use super::clock::{Clock, SystemClock};
use super::errors::{CrlError, CrlResult};
use super::fetcher::CrlDownloader;
use super::issuer::{CrlIssuerResolver, Signer};
use super::parser::downloadable_crl_uris;
use super::processor::{CheckContext, DistributionPointProcessor};
use super::softfail::{FailureTracker, SoftFailDecision, SoftFailPolicy};
use super::store::{CrlSource, NamedCrlSources, StaticCrlStore};
use super::types::{CertStatus, DistributionPoint, ReasonsMask};

/// Which instant the validity of CRLs is judged at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidityModel {
    /// Every certificate is checked at the validation time.
    #[default]
    Pkix,
    /// Every CA certificate is checked at the time it issued its
    /// subordinate in the path.
    Chain,
}

/// Order in which certificates of a path are presented to the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingDirection {
    /// From the trust anchor toward the end entity.
    Reverse,
    /// From the end entity toward the trust anchor. Not supported.
    Forward,
}

#[derive(Debug, Clone, Default)]
pub struct CheckerOptions {
    pub check_end_entity_only: bool,
    pub validation_time: Option<DateTime<Utc>>,
    pub validity_model: ValidityModel,
    pub use_deltas: bool,
    pub crl_download: bool,
}

/// Shared CRL revocation checker.
pub struct RevocationChecker {
    anchors: Arc<TrustAnchorSet>,
    crl_sources: Vec<Arc<dyn CrlSource>>,
    named_sources: NamedCrlSources,
    resolver: CrlIssuerResolver,
    downloader: Option<Arc<dyn CrlDownloader>>,
    cache: CrlCache,
    failures: FailureTracker,
    clock: Arc<dyn Clock>,
    options: CheckerOptions,
}

pub struct RevocationCheckerBuilder {
    anchors: Arc<TrustAnchorSet>,
    crl_sources: Vec<Arc<dyn CrlSource>>,
    named_sources: NamedCrlSources,
    cert_sources: Vec<Arc<dyn CertificateSource>>,
    path_builder: Option<Arc<dyn PathBuilder>>,
    downloader: Option<Arc<dyn CrlDownloader>>,
    cache_capacity: Option<usize>,
    soft_fail: SoftFailPolicy,
    clock: Arc<dyn Clock>,
    options: CheckerOptions,
}

impl RevocationCheckerBuilder {
    pub fn new(anchors: Arc<TrustAnchorSet>) -> Self {
        Self {
            anchors,
            crl_sources: Vec::new(),
            named_sources: NamedCrlSources::new(),
            cert_sources: Vec::new(),
            path_builder: None,
            downloader: None,
            cache_capacity: None,
            soft_fail: SoftFailPolicy::default(),
            clock: Arc::new(SystemClock),
            options: CheckerOptions::default(),
        }
    }

    pub fn crl_source(mut self, source: Arc<dyn CrlSource>) -> Self {
        self.crl_sources.push(source);
        self
    }

    /// Registers a source consulted only for certificates naming `name` in
    /// a distribution point, a FreshestCRL point or a cRLIssuer.
    pub fn named_crl_source(mut self, name: GeneralName, source: Arc<dyn CrlSource>) -> Self {
        self.named_sources.insert(name, source);
        self
    }

    /// Adds a source of candidate CRL signer certificates.
    pub fn certificate_source(mut self, source: Arc<dyn CertificateSource>) -> Self {
        self.cert_sources.push(source);
        self
    }

    pub fn path_builder(mut self, builder: Arc<dyn PathBuilder>) -> Self {
        self.path_builder = Some(builder);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn CrlDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn soft_fail(mut self, policy: SoftFailPolicy) -> Self {
        self.soft_fail = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(mut self, options: CheckerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn check_end_entity_only(mut self, enabled: bool) -> Self {
        self.options.check_end_entity_only = enabled;
        self
    }

    pub fn validation_time(mut self, time: DateTime<Utc>) -> Self {
        self.options.validation_time = Some(time);
        self
    }

    pub fn validity_model(mut self, model: ValidityModel) -> Self {
        self.options.validity_model = model;
        self
    }

    pub fn use_deltas(mut self, enabled: bool) -> Self {
        self.options.use_deltas = enabled;
        self
    }

    pub fn crl_download(mut self, enabled: bool) -> Self {
        self.options.crl_download = enabled;
        self
    }

    pub fn build(self) -> CrlResult<RevocationChecker> {
        if self.options.crl_download && self.downloader.is_none() {
            return Err(CrlError::Configuration(
                "CRL download enabled without a downloader".to_string(),
            ));
        }
        if self.anchors.is_empty() {
            warn!("Revocation checker built without trust anchors");
        }

        Ok(RevocationChecker {
            anchors: self.anchors,
            crl_sources: self.crl_sources,
            named_sources: self.named_sources,
            resolver: CrlIssuerResolver::new(self.cert_sources, self.path_builder),
            downloader: self.downloader,
            cache: self
                .cache_capacity
                .map_or_else(CrlCache::default, CrlCache::new),
            failures: FailureTracker::new(self.soft_fail, Arc::clone(&self.clock)),
            clock: self.clock,
            options: self.options,
        })
    }
}

impl RevocationChecker {
    pub fn builder(anchors: Arc<TrustAnchorSet>) -> RevocationCheckerBuilder {
        RevocationCheckerBuilder::new(anchors)
    }

    pub fn options(&self) -> &CheckerOptions {
        &self.options
    }

    pub fn cache(&self) -> &CrlCache {
        &self.cache
    }

    pub fn failure_tracker(&self) -> &FailureTracker {
        &self.failures
    }

    /// Starts checking `path`.
    pub fn begin<'a>(
        &'a self,
        path: &'a CertificationPath,
        direction: ProcessingDirection,
    ) -> CrlResult<PathRevocationCheck<'a>> {
        self.begin_with(path, direction, &HashSet::new())
    }

    fn begin_with<'a>(
        &'a self,
        path: &'a CertificationPath,
        direction: ProcessingDirection,
        outer: &HashSet<CertId>,
    ) -> CrlResult<PathRevocationCheck<'a>> {
        if direction == ProcessingDirection::Forward {
            return Err(CrlError::ForwardCheckingUnsupported);
        }
        let validation_time = self.validation_time()?;

        let mut on_path = outer.clone();
        on_path.extend(path.ids());

        Ok(PathRevocationCheck {
            checker: self,
            path,
            validation_time,
            on_path,
            signer: None,
        })
    }

    /// Checks every certificate of `path`, anchor side first.
    pub fn check_path(&self, path: &CertificationPath) -> CrlResult<()> {
        self.check_path_with(path, &HashSet::new())
    }

    fn validation_time(&self) -> CrlResult<DateTime<Utc>> {
        let now = self.clock.now();
        match self.options.validation_time {
            Some(time) if time > now => Err(CrlError::Configuration(format!(
                "validation time {time} is in the future"
            ))),
            Some(time) => Ok(time),
            None => Ok(now),
        }
    }

    /// Runs the distribution points of `cert` and maps the outcome to a
    /// verdict.
    fn check_crls(
        &self,
        cert: &dyn CertificateView,
        instant: DateTime<Utc>,
        signer: &Signer,
        on_path: &HashSet<CertId>,
        extra: Option<Arc<dyn CrlSource>>,
    ) -> CrlResult<()> {
        let dps = cert.crl_distribution_points()?.unwrap_or_default();
        let freshest = cert.freshest_crl()?.unwrap_or_default();

        let mut sources = self.crl_sources.clone();
        sources.extend(self.named_sources.for_points(dps.iter().chain(&freshest)));
        sources.extend(extra);

        let ctx = CheckContext {
            cert,
            instant,
            chain_model: self.options.validity_model == ValidityModel::Chain,
            use_deltas: self.options.use_deltas,
            sources: &sources,
            named_sources: &self.named_sources,
            signer,
            on_path,
            resolver: &self.resolver,
            revocation: self,
        };
        let processor = DistributionPointProcessor::new(&ctx);

        let mut status = CertStatus::Unrevoked;
        let mut mask = ReasonsMask::none();
        let mut valid_crl_found = false;
        // Last CRL rejected for a reason other than absence.
        let mut last_error = None;

        let default_dp = DistributionPoint::for_issuer(cert.issuer());
        for (dp, is_default) in dps.iter().map(|dp| (dp, false)).chain([(&default_dp, true)]) {
            if !status.is_unrevoked() || mask.is_all_reasons() {
                break;
            }
            match processor.process(dp, &mut status, &mut mask) {
                Ok(()) => valid_crl_found = true,
                Err(e) => {
                    if is_default {
                        debug!("Issuer CRLs of {} not usable: {e}", cert.id());
                    } else {
                        debug!("Distribution point of {} not usable: {e}", cert.id());
                    }
                    if !e.is_crl_not_found() {
                        last_error = Some(e);
                    }
                }
            }
        }

        if !valid_crl_found {
            return Err(last_error.unwrap_or_else(|| CrlError::CrlNotFound {
                issuer: cert.issuer().to_string(),
                serial: cert.serial().to_string(),
                cause: None,
            }));
        }

        if status.is_unrevoked() && !mask.is_all_reasons() {
            status = CertStatus::Undetermined;
        }

        match status {
            CertStatus::Revoked(info) => {
                info!(
                    "Certificate {} revoked on {} ({})",
                    cert.id(),
                    info.date,
                    info.reason
                );
                Err(CrlError::Revoked {
                    issuer: cert.issuer().to_string(),
                    serial: cert.serial().to_string(),
                    reason: info.reason,
                    date: info.date,
                })
            }
            CertStatus::Unrevoked => Ok(()),
            CertStatus::Undetermined => Err(CrlError::StatusUndetermined {
                issuer: cert.issuer().to_string(),
                serial: cert.serial().to_string(),
            }),
        }
    }

    /// Downloads the CRLs of the certificate's distribution points, cached
    /// copies first. Also returns the last download failure.
    fn download_crls(
        &self,
        cert: &dyn CertificateView,
        instant: DateTime<Utc>,
    ) -> CrlResult<(Option<Arc<dyn CrlSource>>, Option<CrlError>)> {
        let Some(downloader) = self.downloader.as_ref().filter(|_| self.options.crl_download)
        else {
            return Ok((None, None));
        };
        let Some(dps) = cert.crl_distribution_points()? else {
            return Ok((None, None));
        };

        let mut store = StaticCrlStore::default();
        let mut last_error = None;
        for name in downloadable_crl_uris(&dps) {
            if let Some(crl) = self.cache.get(&name, instant) {
                store.push(crl);
                continue;
            }
            let Some(uri) = name.as_uri() else {
                continue;
            };
            match downloader.fetch(uri) {
                Ok(crl) => {
                    self.cache.insert(name.clone(), Arc::clone(&crl));
                    store.push(crl);
                }
                Err(e) => {
                    warn!("CRL download from {uri} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        let downloaded = (!store.is_empty()).then(|| Arc::new(store) as Arc<dyn CrlSource>);
        Ok((downloaded, last_error))
    }

    fn apply_soft_fail(&self, cert: &dyn CertificateView, error: CrlError) -> CrlResult<()> {
        match self.failures.record_failure(cert.issuer()) {
            SoftFailDecision::Pass => Ok(()),
            SoftFailDecision::Fail => Err(error),
        }
    }
}

impl PathRevocation for RevocationChecker {
    fn check_path_with(
        &self,
        path: &CertificationPath,
        on_path: &HashSet<CertId>,
    ) -> CrlResult<()> {
        let mut check = self.begin_with(path, ProcessingDirection::Reverse, on_path)?;
        for cert in path.certificates().iter().rev() {
            check.check(cert)?;
        }
        Ok(())
    }
}

/// Revocation checking state for one certification path.
pub struct PathRevocationCheck<'a> {
    checker: &'a RevocationChecker,
    path: &'a CertificationPath,
    validation_time: DateTime<Utc>,
    on_path: HashSet<CertId>,
    signer: Option<Signer>,
}

impl PathRevocationCheck<'_> {
    /// The issuer state the next certificate is checked against.
    pub fn working_signer(&self) -> Option<&Signer> {
        self.signer.as_ref()
    }

    /// Checks `cert`, the next certificate of the path.
    #[instrument(skip_all, fields(cert = %cert.id()))]
    pub fn check(&mut self, cert: &Arc<dyn CertificateView>) -> CrlResult<()> {
        let signer = match self.signer.take() {
            Some(signer) => signer,
            None => self.seed(cert.as_ref())?,
        };

        let result = if self.checker.options.check_end_entity_only && cert.is_ca() {
            debug!("Skipping CA certificate {}", cert.id());
            Ok(())
        } else {
            self.check_certificate(cert.as_ref(), &signer)
        };

        match result {
            Ok(()) => {
                self.signer = Some(Signer::from_certificate(cert));
                Ok(())
            }
            Err(e) => {
                if !e.is_determination() {
                    warn!("Revocation status of {} not established: {e}", cert.id());
                }
                self.signer = Some(signer);
                Err(e)
            }
        }
    }

    fn seed(&self, cert: &dyn CertificateView) -> CrlResult<Signer> {
        let mut matching = self.checker.anchors.find_by_subject(cert.issuer()).peekable();
        let first = matching.peek().cloned();
        let anchor = matching
            .find(|anchor| cert.verify_signed_by(anchor.public_key()))
            .or(first)
            .ok_or_else(|| CrlError::NoTrustAnchor {
                issuer: cert.issuer().to_string(),
            })?;
        debug!("Seeding revocation check from trust anchor {}", anchor.subject());
        Ok(Signer::from_anchor(anchor))
    }

    /// Instant at which `cert` is checked. Under the chain model a CA
    /// certificate is checked when its subordinate in the path was issued.
    fn instant_for(&self, cert: &dyn CertificateView) -> DateTime<Utc> {
        if self.checker.options.validity_model != ValidityModel::Chain {
            return self.validation_time;
        }
        let id = cert.id();
        let certs = self.path.certificates();
        match certs.iter().position(|c| c.id() == id) {
            Some(index) if index > 0 => certs[index - 1].not_before(),
            _ => self.validation_time,
        }
    }

    fn check_certificate(&self, cert: &dyn CertificateView, signer: &Signer) -> CrlResult<()> {
        let checker = self.checker;
        let instant = self.instant_for(cert);

        let error = match checker.check_crls(cert, instant, signer, &self.on_path, None) {
            Ok(()) => {
                checker.failures.record_success(cert.issuer());
                return Ok(());
            }
            Err(e) if e.is_crl_not_found() => e,
            Err(e) => return Err(e),
        };

        let (downloaded, download_error) = checker.download_crls(cert, instant)?;
        let error = match downloaded {
            Some(downloaded) => {
                debug!("Retrying {} with downloaded CRLs", cert.id());
                match checker.check_crls(cert, instant, signer, &self.on_path, Some(downloaded)) {
                    Ok(()) => {
                        checker.failures.record_success(cert.issuer());
                        return Ok(());
                    }
                    Err(e) if e.is_crl_not_found() => e,
                    Err(e) => return Err(e),
                }
            }
            None => error.with_cause(download_error),
        };

        checker.apply_soft_fail(cert, error)
    }
}
