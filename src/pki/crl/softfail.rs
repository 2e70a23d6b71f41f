//! Tolerance for issuers whose CRLs cannot be obtained.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::pki::name::DistinguishedName;

use super::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftFailPolicy {
    pub enabled: bool,
    /// Failures younger than this are logged as warnings, older ones as
    /// errors.
    pub fail_log_max_time: Duration,
    /// Failures at least this old are no longer tolerated.
    pub fail_hard_max_time: Option<Duration>,
}

impl Default for SoftFailPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            fail_log_max_time: Duration::hours(24),
            fail_hard_max_time: None,
        }
    }
}

/// Outcome of consulting the soft-fail policy for a missing CRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftFailDecision {
    Pass,
    Fail,
}

/// Remembers, per issuer, when CRLs first became unavailable.
#[derive(Debug)]
pub struct FailureTracker {
    policy: SoftFailPolicy,
    clock: Arc<dyn Clock>,
    first_failure: DashMap<DistinguishedName, DateTime<Utc>>,
}

impl FailureTracker {
    pub fn new(policy: SoftFailPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            first_failure: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &SoftFailPolicy {
        &self.policy
    }

    /// Records a failure to obtain a CRL from `issuer` and decides whether
    /// it may be tolerated.
    pub fn record_failure(&self, issuer: &DistinguishedName) -> SoftFailDecision {
        if !self.policy.enabled {
            return SoftFailDecision::Fail;
        }

        let now = self.clock.now();
        let first = *self.first_failure.entry(issuer.clone()).or_insert(now);
        let elapsed = now - first;

        if let Some(hard) = self.policy.fail_hard_max_time
            && elapsed >= hard
        {
            error!(
                "No CRL available for {issuer} since {first}, exceeding the hard limit of {}s",
                hard.num_seconds()
            );
            return SoftFailDecision::Fail;
        }

        if elapsed < self.policy.fail_log_max_time {
            warn!("No CRL available for {issuer} since {first}, soft-failing");
        } else {
            error!(
                "No CRL available for {issuer} since {first} ({}s), soft-failing",
                elapsed.num_seconds()
            );
        }
        SoftFailDecision::Pass
    }

    /// Forgets the failure record of `issuer` after a successful check.
    pub fn record_success(&self, issuer: &DistinguishedName) {
        if self.first_failure.remove(issuer).is_some() {
            info!("CRLs for {issuer} are available again");
        }
    }

    pub fn first_failure(&self, issuer: &DistinguishedName) -> Option<DateTime<Utc>> {
        self.first_failure.get(issuer).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::crl::clock::ManualClock;
    use crate::pki::crl::test_support::{dn, t0};

    fn tracker(hard: Option<i64>) -> (Arc<ManualClock>, FailureTracker) {
        let clock = Arc::new(ManualClock::new(t0()));
        let policy = SoftFailPolicy {
            enabled: true,
            fail_log_max_time: Duration::minutes(10),
            fail_hard_max_time: hard.map(Duration::minutes),
        };
        (clock.clone(), FailureTracker::new(policy, clock))
    }

    #[test]
    fn test_disabled_policy_fails() {
        let tracker = FailureTracker::new(
            SoftFailPolicy::default(),
            Arc::new(ManualClock::new(t0())),
        );
        assert_eq!(tracker.record_failure(&dn("CN=CA")), SoftFailDecision::Fail);
    }

    #[test]
    fn test_passes_until_hard_limit() {
        let (clock, tracker) = tracker(Some(60));
        let issuer = dn("CN=CA");

        assert_eq!(tracker.record_failure(&issuer), SoftFailDecision::Pass);
        assert_eq!(tracker.first_failure(&issuer), Some(t0()));

        clock.advance(Duration::minutes(30));
        assert_eq!(tracker.record_failure(&issuer), SoftFailDecision::Pass);
        assert_eq!(tracker.first_failure(&issuer), Some(t0()));

        clock.advance(Duration::minutes(30));
        assert_eq!(tracker.record_failure(&issuer), SoftFailDecision::Fail);
    }

    #[test]
    fn test_without_hard_limit_always_passes() {
        let (clock, tracker) = tracker(None);
        let issuer = dn("CN=CA");
        tracker.record_failure(&issuer);
        clock.advance(Duration::days(365));
        assert_eq!(tracker.record_failure(&issuer), SoftFailDecision::Pass);
    }

    #[test]
    fn test_failures_are_per_issuer_and_cleared_on_success() {
        let (clock, tracker) = tracker(Some(60));
        tracker.record_failure(&dn("CN=CA1"));
        clock.advance(Duration::minutes(90));

        assert_eq!(tracker.record_failure(&dn("CN=CA2")), SoftFailDecision::Pass);
        assert_eq!(tracker.record_failure(&dn("CN=CA1")), SoftFailDecision::Fail);

        tracker.record_success(&dn("CN=CA1"));
        assert!(tracker.first_failure(&dn("CN=CA1")).is_none());
        assert_eq!(tracker.record_failure(&dn("CN=CA1")), SoftFailDecision::Pass);
    }
}
