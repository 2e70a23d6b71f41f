//! CRL sources and the selector used to query them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use tracing::{debug, warn};

use crate::pki::cert::CertId;
use crate::pki::name::{DistinguishedName, GeneralName};

use super::errors::CrlResult;
use super::types::{CrlView, DistributionPoint, IssuingDistributionPoint};

/// Predicate over CRLs, built by the distribution point processor.
///
/// An unset field does not constrain the selection.
#[derive(Debug, Clone, Default)]
pub struct CrlSelector {
    issuer_names: Vec<DistinguishedName>,
    certificate_checking: Option<CertId>,
    min_crl_number: Option<BigUint>,
    max_base_crl_number: Option<BigUint>,
    complete_only: bool,
    delta_only: bool,
    only_indirect: bool,
    issuing_distribution_point: Option<Option<IssuingDistributionPoint>>,
    valid_at: Option<DateTime<Utc>>,
    this_update_before: Option<DateTime<Utc>>,
}

impl CrlSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issuer_names(mut self, names: impl IntoIterator<Item = DistinguishedName>) -> Self {
        self.issuer_names = names.into_iter().collect();
        self
    }

    /// Records the certificate the CRLs are wanted for. Sources may use it
    /// to narrow their lookup; the selector itself does not filter on it.
    pub fn certificate_checking(mut self, id: CertId) -> Self {
        self.certificate_checking = Some(id);
        self
    }

    pub fn min_crl_number(mut self, number: BigUint) -> Self {
        self.min_crl_number = Some(number);
        self
    }

    pub fn max_base_crl_number(mut self, number: BigUint) -> Self {
        self.max_base_crl_number = Some(number);
        self
    }

    pub fn complete_only(mut self) -> Self {
        self.complete_only = true;
        self.delta_only = false;
        self
    }

    pub fn delta_only(mut self) -> Self {
        self.delta_only = true;
        self.complete_only = false;
        self
    }

    pub fn only_indirect(mut self) -> Self {
        self.only_indirect = true;
        self
    }

    /// Requires the IssuingDistributionPoint to equal `idp`, where `None`
    /// requires the extension to be absent.
    pub fn issuing_distribution_point(mut self, idp: Option<IssuingDistributionPoint>) -> Self {
        self.issuing_distribution_point = Some(idp);
        self
    }

    pub fn valid_at(mut self, instant: DateTime<Utc>) -> Self {
        self.valid_at = Some(instant);
        self
    }

    pub fn this_update_before(mut self, instant: DateTime<Utc>) -> Self {
        self.this_update_before = Some(instant);
        self
    }

    pub fn get_certificate_checking(&self) -> Option<&CertId> {
        self.certificate_checking.as_ref()
    }

    pub fn matches(&self, crl: &dyn CrlView) -> bool {
        if !self.issuer_names.is_empty() && !self.issuer_names.contains(crl.issuer()) {
            return false;
        }

        let extensions = crl.extensions();
        if self.complete_only && crl.is_delta() {
            return false;
        }
        if self.delta_only && !crl.is_delta() {
            return false;
        }
        if self.only_indirect && !crl.is_indirect() {
            return false;
        }

        if let Some(min) = &self.min_crl_number {
            match &extensions.crl_number {
                Some(number) if number >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = &self.max_base_crl_number {
            match &extensions.base_crl_number {
                Some(base) if base <= max => {}
                _ => return false,
            }
        }

        if let Some(expected) = &self.issuing_distribution_point
            && expected.as_ref() != crl.issuing_distribution_point()
        {
            return false;
        }

        if let Some(instant) = self.valid_at
            && !crl.is_current_at(instant)
        {
            return false;
        }
        if let Some(limit) = self.this_update_before
            && crl.this_update() >= limit
        {
            return false;
        }

        true
    }
}

/// A queryable collection of CRLs.
pub trait CrlSource: Send + Sync {
    /// Returns the CRLs matching `selector`, in insertion order.
    fn find(&self, selector: &CrlSelector) -> CrlResult<Vec<Arc<dyn CrlView>>>;
}

/// A fixed set of CRLs supplied up front.
#[derive(Debug, Clone, Default)]
pub struct StaticCrlStore {
    crls: Vec<Arc<dyn CrlView>>,
}

impl StaticCrlStore {
    pub fn new(crls: impl IntoIterator<Item = Arc<dyn CrlView>>) -> Self {
        Self {
            crls: crls.into_iter().collect(),
        }
    }

    pub fn push(&mut self, crl: Arc<dyn CrlView>) {
        self.crls.push(crl);
    }

    pub fn len(&self) -> usize {
        self.crls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crls.is_empty()
    }
}

impl CrlSource for StaticCrlStore {
    fn find(&self, selector: &CrlSelector) -> CrlResult<Vec<Arc<dyn CrlView>>> {
        Ok(self
            .crls
            .iter()
            .filter(|crl| selector.matches(crl.as_ref()))
            .cloned()
            .collect())
    }
}

/// CRL sources registered under a general name, consulted when a
/// distribution point or FreshestCRL point carries that name.
#[derive(Clone, Default)]
pub struct NamedCrlSources {
    sources: HashMap<GeneralName, Arc<dyn CrlSource>>,
}

impl NamedCrlSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: GeneralName, source: Arc<dyn CrlSource>) {
        self.sources.insert(name, source);
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sources registered under a full name or cRLIssuer of `points`,
    /// each at most once.
    pub fn for_points<'a>(
        &self,
        points: impl IntoIterator<Item = &'a DistributionPoint>,
    ) -> Vec<Arc<dyn CrlSource>> {
        let mut found: Vec<Arc<dyn CrlSource>> = Vec::new();
        if self.sources.is_empty() {
            return found;
        }
        let names = points.into_iter().flat_map(|dp| {
            dp.full_names()
                .iter()
                .chain(dp.crl_issuer.iter().flatten())
        });
        for name in names {
            if let Some(source) = self.sources.get(name)
                && !found.iter().any(|known| Arc::ptr_eq(known, source))
            {
                debug!("Using CRL source registered for {name}");
                found.push(Arc::clone(source));
            }
        }
        found
    }
}

/// CRLs keyed by the URL they were fetched from, replaced in place by the
/// refresh scheduler.
#[derive(Debug, Default)]
pub struct RefreshingCrlStore {
    entries: RwLock<Vec<(String, Arc<dyn CrlView>)>>,
}

impl RefreshingCrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `crl` for `url`, keeping the original insertion position when
    /// the URL is already known.
    pub fn replace(&self, url: &str, crl: Arc<dyn CrlView>) {
        let Ok(mut entries) = self.entries.write() else {
            warn!("CRL store lock poisoned, dropping update for {url}");
            return;
        };
        match entries.iter_mut().find(|(known, _)| known == url) {
            Some(slot) => slot.1 = crl,
            None => entries.push((url.to_string(), crl)),
        }
        debug!("Stored CRL from {url}");
    }

    pub fn remove(&self, url: &str) -> bool {
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|(known, _)| known != url);
                entries.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(url, _)| url.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CrlSource for RefreshingCrlStore {
    fn find(&self, selector: &CrlSelector) -> CrlResult<Vec<Arc<dyn CrlView>>> {
        let entries = self.entries.read().map_err(|_| {
            super::errors::CrlError::Configuration("CRL store lock poisoned".to_string())
        })?;
        let found: Vec<_> = entries
            .iter()
            .map(|(_, crl)| crl)
            .filter(|crl| selector.matches(crl.as_ref()))
            .cloned()
            .collect();
        if found.is_empty()
            && let Some(cert) = selector.get_certificate_checking()
        {
            debug!("No refreshed CRL matches the lookup for {cert}");
        }
        Ok(found)
    }
}
