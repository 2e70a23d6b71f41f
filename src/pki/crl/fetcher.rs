use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

use crate::pki::x509::ParsedCrl;

use super::errors::{CrlError, CrlResult};
use super::parser::is_valid_crl_url;
use super::types::CrlView;

/// On-demand retrieval of a CRL from a distribution point URI.
#[cfg_attr(test, mockall::automock)]
pub trait CrlDownloader: Send + Sync {
    fn fetch(&self, uri: &str) -> CrlResult<Arc<dyn CrlView>>;
}

/// [`CrlDownloader`] over blocking HTTP(S).
///
/// Must not be called from within an async context; the revocation checker
/// runs on a blocking thread.
#[derive(Debug, Clone)]
pub struct HttpCrlDownloader {
    client: reqwest::blocking::Client,
}

impl HttpCrlDownloader {
    pub fn new(request_timeout: Duration) -> CrlResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl CrlDownloader for HttpCrlDownloader {
    fn fetch(&self, uri: &str) -> CrlResult<Arc<dyn CrlView>> {
        if !is_valid_crl_url(uri) {
            return Err(CrlError::InvalidUrl(uri.to_string()));
        }
        debug!("Downloading CRL from: {}", uri);

        let response = self.client.get(uri).send().map_err(|e| {
            if e.is_timeout() {
                CrlError::Timeout
            } else {
                CrlError::Http(e)
            }
        })?;
        if !response.status().is_success() {
            return Err(CrlError::HttpStatus {
                url: uri.to_string(),
                status: response.status().as_u16(),
            });
        }

        let crl = ParsedCrl::from_der(response.bytes()?)?;
        info!("Downloaded CRL of {} from {}", crl.issuer(), uri);
        Ok(crl.into_view())
    }
}

/// Parses a fetched CRL, rejecting one already past its nextUpdate at `now`.
fn accept_crl(data: impl AsRef<[u8]>, url: &str, now: DateTime<Utc>) -> CrlResult<ParsedCrl> {
    let crl = ParsedCrl::from_der(data)?;
    if !crl.is_current_at(now) {
        return Err(CrlError::Expired(url.to_string()));
    }
    Ok(crl)
}

/// Fetch CRL from a distribution point URL with timeout
pub async fn fetch_crl(
    client: &Client,
    distribution_point: &str,
    request_timeout: Duration,
    now: DateTime<Utc>,
) -> CrlResult<ParsedCrl> {
    info!("Fetching CRL from: {}", distribution_point);

    Url::parse(distribution_point)?;

    let response = match timeout(request_timeout, client.get(distribution_point).send()).await {
        Ok(result) => result?,
        Err(_) => return Err(CrlError::Timeout),
    };

    if !response.status().is_success() {
        return Err(CrlError::HttpStatus {
            url: distribution_point.to_string(),
            status: response.status().as_u16(),
        });
    }

    let crl = accept_crl(response.bytes().await?, distribution_point, now)?;
    info!(
        "Successfully fetched and validated CRL from {}",
        distribution_point
    );
    Ok(crl)
}

/// Fetch CRLs from multiple distribution points in parallel using tokio tasks
pub async fn fetch_crls_parallel(
    client: &Client,
    distribution_points: &[String],
    request_timeout: Duration,
    now: DateTime<Utc>,
) -> Vec<(String, CrlResult<ParsedCrl>)> {
    use tokio::task::JoinSet;

    let mut join_set = JoinSet::new();

    for dp in distribution_points {
        let dp_clone = dp.clone();
        let client_clone = client.clone();

        join_set.spawn(async move {
            let result = fetch_crl(&client_clone, &dp_clone, request_timeout, now).await;
            (dp_clone, result)
        });
    }

    let mut results = Vec::with_capacity(distribution_points.len());

    while let Some(task_result) = join_set.join_next().await {
        match task_result {
            Ok(fetch_result) => results.push(fetch_result),
            Err(e) => {
                tracing::error!("Task failed to complete: {}", e);
            }
        }
    }

    results
}
