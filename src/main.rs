use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use color_eyre::eyre::{WrapErr, eyre};
use pkix_revocation::{
    config::Config,
    pki::{
        CertificateView, MemoryCertStore, ParsedCertificate, ParsedCrl, PathBuilder,
        StorePathBuilder, TrustAnchorSet,
        crl::{
            CrlError, CrlRefreshScheduler, HttpCrlDownloader, RefreshingCrlStore,
            RevocationChecker, StaticCrlStore,
        },
        truststore::CertificateSource,
    },
    telemetry,
};
use serde_json::json;
use walkdir::WalkDir;

fn load_crls(dir: &Path) -> color_eyre::Result<StaticCrlStore> {
    let mut store = StaticCrlStore::default();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        let path = entry.path();
        if !path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("crl")
                    || ext.eq_ignore_ascii_case("der")
                    || ext.eq_ignore_ascii_case("pem")
            })
        {
            continue;
        }
        match ParsedCrl::load(path) {
            Ok(crl) => store.push(crl.into_view()),
            Err(e) => tracing::warn!("Skipping CRL {}: {e}", path.display()),
        }
    }
    tracing::info!("Loaded {} CRLs from {}", store.len(), dir.display());
    Ok(store)
}

fn verdict(subject: String, result: Result<(), CrlError>) -> serde_json::Value {
    match result {
        Ok(()) => json!({ "subject": subject, "status": "good" }),
        Err(CrlError::Revoked { reason, date, .. }) => json!({
            "subject": subject,
            "status": "revoked",
            "reason": reason,
            "revocationDate": date,
        }),
        Err(e @ CrlError::StatusUndetermined { .. }) => json!({
            "subject": subject,
            "status": "undetermined",
            "detail": e.to_string(),
        }),
        Err(e) => json!({
            "subject": subject,
            "status": "error",
            "detail": e.to_string(),
        }),
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let chain_file = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: pkix-revocation <certificate chain, end entity first>"))?;

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    let anchor_store = MemoryCertStore::load(&config.paths.trust_anchors).await?;
    let anchors = Arc::new(TrustAnchorSet::from_certificates(anchor_store.iter()));
    if anchors.is_empty() {
        return Err(eyre!(
            "no trust anchors found in {}",
            config.paths.trust_anchors
        ));
    }

    let cert_store = match &config.paths.certificates {
        Some(dir) => MemoryCertStore::load(dir).await?,
        None => MemoryCertStore::new(),
    };
    let chain = ParsedCertificate::load(Path::new(&chain_file))
        .wrap_err_with(|| format!("failed to read {chain_file}"))?;
    let mut chain = chain.into_iter().map(ParsedCertificate::into_view);
    let end_entity = chain
        .next()
        .ok_or_else(|| eyre!("{chain_file} contains no certificate"))?;
    chain.for_each(|cert| cert_store.add(cert));

    let sources: Vec<Arc<dyn CertificateSource>> = vec![Arc::new(cert_store)];
    let path_builder = Arc::new(StorePathBuilder::new(Arc::clone(&anchors), sources.clone()));

    let mut builder = RevocationChecker::builder(Arc::clone(&anchors))
        .options(config.revocation.checker_options())
        .soft_fail(config.revocation.soft_fail_policy())
        .cache_capacity(config.revocation.cache_capacity)
        .path_builder(path_builder.clone());
    for source in sources {
        builder = builder.certificate_source(source);
    }
    if let Some(dir) = &config.paths.crls {
        builder = builder.crl_source(Arc::new(load_crls(Path::new(dir))?));
    }

    let refreshed = Arc::new(RefreshingCrlStore::new());
    let scheduler = CrlRefreshScheduler::new(config.scheduler_config(), Arc::clone(&refreshed))?;
    let updated = scheduler.trigger_immediate_update().await;
    tracing::info!("Initial CRL refresh stored {updated} CRLs");
    let _refresh_task = scheduler.start();
    builder = builder.crl_source(refreshed);

    if config.revocation.crl_download {
        let timeout = Duration::from_secs(config.http.timeout_secs);
        let downloader = tokio::task::spawn_blocking(move || HttpCrlDownloader::new(timeout))
            .await??;
        builder = builder.downloader(Arc::new(downloader));
    }
    // The checker may own a blocking HTTP client, it is used and dropped on
    // a blocking thread.
    let checker = builder.build()?;

    let subject = end_entity.subject().to_string();
    let result = tokio::task::spawn_blocking(move || {
        let path = path_builder.build(&end_entity, Utc::now(), None)?;
        checker.check_path(&path)
    })
    .await?;

    let verdict = verdict(subject, result);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}
