use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use pkix_revocation::pki::{
    CertificateView, MemoryCertStore, ParsedCertificate, ParsedCrl, PathBuilder, StorePathBuilder,
    TrustAnchorSet,
    crl::{CrlError, ReasonCode, RevocationChecker, StaticCrlStore},
    truststore::{CertificateSource, RevocationContext},
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason,
    RevokedCertParams, SerialNumber,
};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};

const CRL_URL: &str = "http://crl.example.com/root.crl";

struct Pki {
    dir: TempDir,
    ca: Issuer<'static, KeyPair>,
}

impl Pki {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("anchors")).unwrap();

        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, "E2E Root CA");
        params
            .distinguished_name
            .push(DnType::OrganizationName, "Example");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key_pair).unwrap();
        std::fs::write(dir.path().join("anchors/root.pem"), cert.pem()).unwrap();

        Self {
            dir,
            ca: Issuer::new(params, key_pair),
        }
    }

    fn leaf(&self, serial: u64) -> Arc<dyn CertificateView> {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params
            .distinguished_name
            .push(DnType::CommonName, format!("host{serial}.example.com"));
        params.serial_number = Some(SerialNumber::from(serial));
        params.crl_distribution_points = vec![CrlDistributionPoint {
            uris: vec![CRL_URL.to_string()],
        }];
        let cert = params.signed_by(&key_pair, &self.ca).unwrap();
        ParsedCertificate::from_der(cert.der()).unwrap().into_view()
    }

    /// Writes a CRL revoking `serials` and loads it back from disk.
    fn crl(&self, serials: &[u64]) -> ParsedCrl {
        let now = OffsetDateTime::now_utc();
        let params = CertificateRevocationListParams {
            this_update: now - Duration::hours(1),
            next_update: now + Duration::days(1),
            crl_number: SerialNumber::from(3u64),
            issuing_distribution_point: None,
            revoked_certs: serials
                .iter()
                .map(|serial| RevokedCertParams {
                    serial_number: SerialNumber::from(*serial),
                    revocation_time: now - Duration::minutes(10),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        let crl = params.signed_by(&self.ca).unwrap();
        let path = self.dir.path().join("root.crl");
        std::fs::write(&path, crl.der()).unwrap();
        ParsedCrl::load(&path).unwrap()
    }

    async fn anchors(&self) -> Arc<TrustAnchorSet> {
        let store = MemoryCertStore::load(self.dir.path().join("anchors"))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        Arc::new(TrustAnchorSet::from_certificates(store.iter()))
    }
}

#[tokio::test]
async fn test_revoked_certificate_is_rejected() {
    let pki = Pki::new();
    let anchors = pki.anchors().await;
    let checker = RevocationChecker::builder(Arc::clone(&anchors))
        .crl_source(Arc::new(StaticCrlStore::new([pki.crl(&[42]).into_view()])))
        .build()
        .unwrap();
    let builder = StorePathBuilder::new(anchors, Vec::new());

    let revoked = pki.leaf(42);
    let path = builder.build(&revoked, Utc::now(), None).unwrap();
    assert_eq!(path.len(), 1);
    match checker.check_path(&path) {
        Err(CrlError::Revoked { reason, .. }) => assert_eq!(reason, ReasonCode::KeyCompromise),
        other => panic!("expected a revocation, got {other:?}"),
    }

    let good = pki.leaf(43);
    let path = builder.build(&good, Utc::now(), None).unwrap();
    assert!(checker.check_path(&path).is_ok());
}

#[tokio::test]
async fn test_path_builder_runs_revocation_checks() {
    let pki = Pki::new();
    let anchors = pki.anchors().await;
    let checker = RevocationChecker::builder(Arc::clone(&anchors))
        .crl_source(Arc::new(StaticCrlStore::new([pki.crl(&[7]).into_view()])))
        .build()
        .unwrap();
    let sources: Vec<Arc<dyn CertificateSource>> = vec![Arc::new(MemoryCertStore::new())];
    let builder = StorePathBuilder::new(anchors, sources);
    let on_path = HashSet::new();
    let context = RevocationContext {
        checker: &checker,
        on_path: &on_path,
    };

    let err = builder
        .build(&pki.leaf(7), Utc::now(), Some(context))
        .unwrap_err();
    assert!(matches!(err, CrlError::Revoked { .. }));
    assert!(builder.build(&pki.leaf(8), Utc::now(), Some(context)).is_ok());
}

#[tokio::test]
async fn test_crl_from_other_issuer_is_not_used() {
    let pki = Pki::new();
    let other = Pki::new();
    let anchors = pki.anchors().await;
    // Same issuer name, different key.
    let checker = RevocationChecker::builder(Arc::clone(&anchors))
        .crl_source(Arc::new(StaticCrlStore::new([other.crl(&[]).into_view()])))
        .build()
        .unwrap();
    let path = StorePathBuilder::new(anchors, Vec::new())
        .build(&pki.leaf(42), Utc::now(), None)
        .unwrap();

    assert!(matches!(
        checker.check_path(&path),
        Err(CrlError::CrlIssuerUnverifiable(_))
    ));
}
