mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use mockall::mock;
use pkix_revocation::pki::{
    CertificateView, GeneralName, MemoryCertStore, StorePathBuilder,
    cert::{KeyUsage, KeyUsageBit},
    crl::{
        CrlDownloader, CrlError, CrlResult, CrlView, DistributionPoint, IssuingDistributionPoint,
        ManualClock, ProcessingDirection, Reason, ReasonCode, RevocationChecker,
        RevocationCheckerBuilder, RevokedEntry, SoftFailPolicy, StaticCrlStore,
    },
    SerialNumber,
    truststore::CertificateSource,
};

mock! {
    pub Downloader {}

    impl CrlDownloader for Downloader {
        fn fetch(&self, uri: &str) -> CrlResult<Arc<dyn CrlView>>;
    }
}

const CRL_URL: &str = "http://crl.example.com/issuing.crl";
const CRL_AUTHORITY: &str = "CN=CRL Authority, O=Example";

fn checker_with(crls: Vec<Arc<dyn CrlView>>) -> RevocationCheckerBuilder {
    let mut all = vec![TestCrl::new(ROOT).arc()];
    all.extend(crls);
    RevocationChecker::builder(anchors())
        .clock(Arc::new(ManualClock::new(now())))
        .use_deltas(true)
        .crl_source(Arc::new(StaticCrlStore::new(all)))
}

fn leaf(serial: u64) -> Arc<dyn CertificateView> {
    TestCert::new("CN=leaf.example.com", CA, serial).arc()
}

fn uri_dp(uri: &str) -> DistributionPoint {
    DistributionPoint::with_full_name(vec![GeneralName::Uri(uri.to_string())])
}

fn expect_revoked(result: CrlResult<()>) -> (ReasonCode, chrono::DateTime<chrono::Utc>) {
    match result {
        Err(CrlError::Revoked { reason, date, .. }) => (reason, date),
        other => panic!("expected a revocation, got {other:?}"),
    }
}

#[test]
fn single_crl_without_entry_passes() {
    let crl = TestCrl::new(CA)
        .entry(revoked(8, ReasonCode::KeyCompromise))
        .arc();
    let checker = checker_with(vec![crl]).build().unwrap();

    assert!(checker.check_path(&path_to(leaf(7))).is_ok());
}

#[test]
fn listed_serial_is_revoked_with_reason_and_date() {
    let crl = TestCrl::new(CA)
        .entry(revoked(7, ReasonCode::KeyCompromise))
        .arc();
    let checker = checker_with(vec![crl]).build().unwrap();

    let (reason, date) = expect_revoked(checker.check_path(&path_to(leaf(7))));
    assert_eq!(reason, ReasonCode::KeyCompromise);
    assert_eq!(date, now() - Duration::days(2));
}

#[test]
fn second_distribution_point_is_tried_after_first_fails() {
    let unreachable = uri_dp("http://unreachable.example.com/ca.crl")
        .with_crl_issuer(vec![GeneralName::DirectoryName(dn("CN=Missing Issuer"))]);
    let cert = TestCert::new("CN=leaf.example.com", CA, 7)
        .dps(vec![unreachable, uri_dp(CRL_URL)])
        .arc();
    let checker = checker_with(vec![TestCrl::new(CA).arc()]).build().unwrap();

    assert!(checker.check_path(&path_to(cert)).is_ok());
}

fn key_compromise_only() -> IssuingDistributionPoint {
    IssuingDistributionPoint {
        only_some_reasons: Some(Reason::KeyCompromise.into()),
        ..IssuingDistributionPoint::default()
    }
}

#[test]
fn delta_crl_entry_revokes_when_consistent() {
    let base = TestCrl::new(CA).number(5).idp(key_compromise_only()).arc();
    let delta = TestCrl::new(CA)
        .number(6)
        .delta_of(5)
        .idp(key_compromise_only())
        .entry(revoked(7, ReasonCode::CaCompromise))
        .arc();
    let checker = checker_with(vec![base, delta]).build().unwrap();

    let (reason, _) = expect_revoked(checker.check_path(&path_to(leaf(7))));
    assert_eq!(reason, ReasonCode::CaCompromise);
}

#[test]
fn delta_with_mismatched_authority_key_is_discarded() {
    let base = TestCrl::new(CA).number(5).idp(key_compromise_only()).arc();
    let delta = TestCrl::new(CA)
        .number(6)
        .delta_of(5)
        .idp(key_compromise_only())
        .aki(b"another key")
        .entry(revoked(7, ReasonCode::CaCompromise))
        .arc();
    let checker = checker_with(vec![base, delta]).build().unwrap();

    assert!(matches!(
        checker.check_path(&path_to(leaf(7))),
        Err(CrlError::StatusUndetermined { .. })
    ));
}

#[test]
fn deltas_are_ignored_unless_enabled() {
    let base = TestCrl::new(CA).number(5).arc();
    let delta = TestCrl::new(CA)
        .number(6)
        .delta_of(5)
        .entry(revoked(7, ReasonCode::Superseded))
        .arc();
    let checker = checker_with(vec![base, delta])
        .use_deltas(false)
        .build()
        .unwrap();

    assert!(checker.check_path(&path_to(leaf(7))).is_ok());
}

#[test]
fn checking_twice_gives_the_same_verdict() {
    let crl = TestCrl::new(CA)
        .entry(revoked(7, ReasonCode::AffiliationChanged))
        .arc();
    let checker = checker_with(vec![crl]).build().unwrap();
    let path = path_to(leaf(7));

    let first = expect_revoked(checker.check_path(&path));
    let second = expect_revoked(checker.check_path(&path));
    assert_eq!(first, second);

    assert!(checker.check_path(&path_to(leaf(8))).is_ok());
    assert!(checker.check_path(&path_to(leaf(8))).is_ok());
}

#[test]
fn remove_from_crl_in_delta_reverses_base_hold() {
    let base = TestCrl::new(CA)
        .number(5)
        .entry(revoked(7, ReasonCode::CertificateHold))
        .arc();
    let delta = TestCrl::new(CA)
        .number(6)
        .delta_of(5)
        .entry(revoked(7, ReasonCode::RemoveFromCrl))
        .arc();

    let without_delta = checker_with(vec![base.clone()]).build().unwrap();
    let (reason, _) = expect_revoked(without_delta.check_path(&path_to(leaf(7))));
    assert_eq!(reason, ReasonCode::CertificateHold);

    let with_delta = checker_with(vec![base, delta]).build().unwrap();
    assert!(with_delta.check_path(&path_to(leaf(7))).is_ok());
}

fn crl_authority(usage: Option<KeyUsage>) -> Arc<MemoryCertStore> {
    let mut cert = TestCert::new(CRL_AUTHORITY, ROOT, 200);
    cert.key_usage = usage;
    let store = MemoryCertStore::new();
    store.add(cert.arc());
    Arc::new(store)
}

fn indirect_checker(crl: Arc<dyn CrlView>, signer_store: Arc<MemoryCertStore>) -> RevocationChecker {
    let sources: Vec<Arc<dyn CertificateSource>> = vec![signer_store.clone()];
    let builder = StorePathBuilder::new(anchors(), sources);
    checker_with(vec![crl])
        .certificate_source(signer_store)
        .path_builder(Arc::new(builder))
        .build()
        .unwrap()
}

fn indirect_dp() -> DistributionPoint {
    uri_dp("http://crl-authority.example.com/all.crl")
        .with_crl_issuer(vec![GeneralName::DirectoryName(dn(CRL_AUTHORITY))])
}

fn indirect_crl() -> TestCrl {
    let tagged = |serial: u64, issuer: &str| {
        RevokedEntry::new(SerialNumber::from(serial), now() - Duration::days(3))
            .with_reason(ReasonCode::Superseded)
            .with_certificate_issuer(vec![GeneralName::DirectoryName(dn(issuer))])
    };
    TestCrl::new(CRL_AUTHORITY)
        .idp(IssuingDistributionPoint {
            indirect_crl: true,
            ..IssuingDistributionPoint::default()
        })
        .entry(tagged(5, CA))
        .entry(tagged(7, "CN=Other CA, O=Example"))
        .entry(revoked(8, ReasonCode::Superseded))
        .entry(tagged(9, CA))
}

#[test]
fn indirect_crl_tracks_entry_issuers() {
    let checker = indirect_checker(
        indirect_crl().arc(),
        crl_authority(Some(KeyUsageBit::CrlSign.into())),
    );
    let cert = |serial| {
        TestCert::new("CN=leaf.example.com", CA, serial)
            .dps(vec![indirect_dp()])
            .arc()
    };

    expect_revoked(checker.check_path(&path_to(cert(5))));
    assert!(checker.check_path(&path_to(cert(7))).is_ok());
    // Entry 8 follows the entry naming the other CA.
    assert!(checker.check_path(&path_to(cert(8))).is_ok());
    expect_revoked(checker.check_path(&path_to(cert(9))));
}

#[test]
fn crl_signer_without_crl_sign_usage_is_rejected() {
    let checker = indirect_checker(
        indirect_crl().arc(),
        crl_authority(Some(KeyUsageBit::DigitalSignature.into())),
    );
    let cert = TestCert::new("CN=leaf.example.com", CA, 5)
        .dps(vec![indirect_dp()])
        .arc();

    assert!(matches!(
        checker.check_path(&path_to(cert)),
        Err(CrlError::CrlIssuerUnverifiable(_))
    ));
}

#[test]
fn revoked_crl_signer_invalidates_its_crl() {
    let root_crl = TestCrl::new(ROOT)
        .entry(revoked(200, ReasonCode::KeyCompromise))
        .arc();
    let signer_store = crl_authority(None);
    let sources: Vec<Arc<dyn CertificateSource>> = vec![signer_store.clone()];
    let builder = StorePathBuilder::new(anchors(), sources);
    let checker = RevocationChecker::builder(anchors())
        .clock(Arc::new(ManualClock::new(now())))
        .crl_source(Arc::new(StaticCrlStore::new([root_crl, indirect_crl().arc()])))
        .certificate_source(signer_store)
        .path_builder(Arc::new(builder))
        .build()
        .unwrap();
    let cert = TestCert::new("CN=leaf.example.com", CA, 7)
        .dps(vec![indirect_dp()])
        .arc();

    assert!(matches!(
        checker.check_path(&path_to(cert)),
        Err(CrlError::CrlIssuerUnverifiable(_))
    ));
}

#[test]
fn unknown_critical_extension_rejects_crl() {
    let crl = TestCrl::new(CA).critical("1.3.6.1.4.1.99999.1").arc();
    let checker = checker_with(vec![crl]).build().unwrap();

    assert!(matches!(
        checker.check_path(&path_to(leaf(7))),
        Err(CrlError::UnsupportedCriticalExtension(_))
    ));
}

fn soft_fail_policy() -> SoftFailPolicy {
    SoftFailPolicy {
        enabled: true,
        fail_log_max_time: Duration::minutes(10),
        fail_hard_max_time: Some(Duration::hours(1)),
    }
}

#[test]
fn soft_fail_does_not_pass_certificate_on_rejected_crl() {
    let crl = TestCrl::new(CA)
        .critical("1.2.3.4")
        .entry(revoked(7, ReasonCode::KeyCompromise))
        .arc();
    let checker = checker_with(vec![crl])
        .soft_fail(soft_fail_policy())
        .build()
        .unwrap();

    assert!(matches!(
        checker.check_path(&path_to(leaf(7))),
        Err(CrlError::UnsupportedCriticalExtension(_))
    ));
    assert!(checker.failure_tracker().first_failure(&dn(CA)).is_none());
}

#[test]
fn soft_fail_does_not_pass_entry_with_unknown_reason() {
    let mut entry = revoked(7, ReasonCode::KeyCompromise);
    entry.reason_code = Some(7);
    let crl = TestCrl::new(CA).entry(entry).arc();
    let checker = checker_with(vec![crl])
        .soft_fail(soft_fail_policy())
        .build()
        .unwrap();

    assert!(matches!(
        checker.check_path(&path_to(leaf(7))),
        Err(CrlError::MalformedExtension { .. })
    ));
    assert!(checker.check_path(&path_to(leaf(8))).is_ok());
}

#[test]
fn user_only_crl_does_not_cover_ca_certificates() {
    let user_only = IssuingDistributionPoint {
        only_contains_user_certs: true,
        ..IssuingDistributionPoint::default()
    };
    let root_crl = TestCrl::new(ROOT).idp(user_only).arc();
    let checker = RevocationChecker::builder(anchors())
        .clock(Arc::new(ManualClock::new(now())))
        .crl_source(Arc::new(StaticCrlStore::new([root_crl, TestCrl::new(CA).arc()])))
        .build()
        .unwrap();

    assert!(matches!(
        checker.check_path(&path_to(leaf(7))),
        Err(CrlError::DistributionPointMismatch(_))
    ));
}

#[test]
fn soft_fail_tolerates_missing_crls_until_hard_limit() {
    let clock = Arc::new(ManualClock::new(now()));
    let checker = RevocationChecker::builder(anchors())
        .clock(clock.clone())
        .crl_source(Arc::new(StaticCrlStore::new([TestCrl::new(ROOT).arc()])))
        .soft_fail(soft_fail_policy())
        .build()
        .unwrap();
    let path = path_to(leaf(7));

    assert!(checker.check_path(&path).is_ok());
    clock.advance(Duration::minutes(5));
    assert!(checker.check_path(&path).is_ok());
    clock.advance(Duration::minutes(30));
    assert!(checker.check_path(&path).is_ok());
    clock.advance(Duration::minutes(25));

    let err = checker.check_path(&path).unwrap_err();
    assert!(err.is_crl_not_found());
    assert_eq!(
        checker.failure_tracker().first_failure(&dn(CA)),
        Some(now())
    );
}

#[test]
fn missing_crl_is_downloaded_and_retried() {
    let mut downloader = MockDownloader::new();
    downloader
        .expect_fetch()
        .withf(|uri: &str| uri == CRL_URL)
        .times(1)
        .returning(|_| {
            Ok(TestCrl::new(CA)
                .entry(revoked(7, ReasonCode::KeyCompromise))
                .arc())
        });
    let checker = checker_with(Vec::new())
        .downloader(Arc::new(downloader))
        .crl_download(true)
        .build()
        .unwrap();
    let cert = |serial| {
        TestCert::new("CN=leaf.example.com", CA, serial)
            .dps(vec![uri_dp(CRL_URL)])
            .arc()
    };

    expect_revoked(checker.check_path(&path_to(cert(7))));
    // Served from the cache.
    assert!(checker.check_path(&path_to(cert(8))).is_ok());
}

#[test]
fn failed_download_reports_missing_crl() {
    let mut downloader = MockDownloader::new();
    downloader
        .expect_fetch()
        .times(1)
        .returning(|_| Err(CrlError::Timeout));
    let checker = checker_with(Vec::new())
        .downloader(Arc::new(downloader))
        .crl_download(true)
        .build()
        .unwrap();
    let cert = TestCert::new("CN=leaf.example.com", CA, 7)
        .dps(vec![uri_dp(CRL_URL)])
        .arc();

    let err = checker.check_path(&path_to(cert)).unwrap_err();
    assert!(err.is_crl_not_found());
}

#[test]
fn named_crl_source_is_used_for_matching_distribution_point() {
    let named = Arc::new(StaticCrlStore::new([TestCrl::new(CA)
        .entry(revoked(7, ReasonCode::Superseded))
        .arc()]));
    let checker = checker_with(Vec::new())
        .named_crl_source(GeneralName::Uri(CRL_URL.to_string()), named)
        .build()
        .unwrap();

    let listed = TestCert::new("CN=leaf.example.com", CA, 7)
        .dps(vec![uri_dp(CRL_URL)])
        .arc();
    expect_revoked(checker.check_path(&path_to(listed)));

    // Without the distribution point the named source is not consulted.
    assert!(checker.check_path(&path_to(leaf(7))).unwrap_err().is_crl_not_found());
}

#[test]
fn delta_named_by_base_freshest_crl_is_found() {
    const DELTA_URL: &str = "http://crl.example.com/issuing-delta.crl";
    let base = TestCrl::new(CA)
        .number(5)
        .freshest(vec![uri_dp(DELTA_URL)])
        .arc();
    let delta = Arc::new(StaticCrlStore::new([TestCrl::new(CA)
        .number(6)
        .delta_of(5)
        .entry(revoked(7, ReasonCode::KeyCompromise))
        .arc()]));
    let checker = checker_with(vec![base])
        .named_crl_source(GeneralName::Uri(DELTA_URL.to_string()), delta)
        .build()
        .unwrap();

    let (reason, _) = expect_revoked(checker.check_path(&path_to(leaf(7))));
    assert_eq!(reason, ReasonCode::KeyCompromise);
    assert!(checker.check_path(&path_to(leaf(8))).is_ok());
}

#[test]
fn path_check_walks_from_anchor() {
    let checker = checker_with(vec![TestCrl::new(CA).arc()]).build().unwrap();
    let path = path_to(leaf(7));

    let mut check = checker.begin(&path, ProcessingDirection::Reverse).unwrap();
    assert!(check.working_signer().is_none());
    for cert in path.certificates().iter().rev() {
        check.check(cert).unwrap();
    }
    assert_eq!(check.working_signer().unwrap().name, dn("CN=leaf.example.com"));
}
