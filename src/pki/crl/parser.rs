use tracing::{debug, warn};
use url::Url;

use crate::pki::name::GeneralName;

use super::types::DistributionPoint;

/// Collects the URIs of the full names of `points` that can be downloaded,
/// in distribution point order and without duplicates.
pub fn downloadable_crl_uris(points: &[DistributionPoint]) -> Vec<GeneralName> {
    let mut uris: Vec<GeneralName> = Vec::new();

    for name in points.iter().flat_map(DistributionPoint::full_names) {
        let Some(uri) = name.as_uri() else {
            continue;
        };
        if !is_valid_crl_url(uri) {
            warn!("Invalid or unsupported CRL URL format: {}", uri);
            continue;
        }
        if !uris.contains(name) {
            debug!("Found valid CRL distribution point: {}", uri);
            uris.push(name.clone());
        }
    }

    if uris.is_empty() {
        debug!("No downloadable CRL distribution points found");
    }
    uris
}

/// Validate that the URL is suitable for CRL retrieval
///
/// Rejects:
/// - schemes other than HTTP(S)
/// - localhost, private and link-local hosts
/// - malformed URLs
pub fn is_valid_crl_url(url: &str) -> bool {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return false;
    }

    let Ok(parsed_url) = Url::parse(url) else {
        return false;
    };

    let Some(host) = parsed_url.host_str() else {
        return false;
    };
    let host_lower = host.to_lowercase();

    if host_lower == "localhost" || host_lower == "127.0.0.1" || host_lower == "[::1]" {
        warn!("Rejecting localhost CRL URL: {}", url);
        return false;
    }

    // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
    if host.starts_with("10.")
        || host.starts_with("192.168.")
        || (host.starts_with("172.")
            && host
                .split('.')
                .nth(1)
                .and_then(|s| s.parse::<u8>().ok())
                .is_some_and(|n| (16..=31).contains(&n)))
    {
        warn!("Rejecting private IP CRL URL: {}", url);
        return false;
    }

    if host.starts_with("169.254.") {
        warn!("Rejecting link-local CRL URL: {}", url);
        return false;
    }

    true
}
