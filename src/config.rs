use std::collections::HashMap;

use chrono::Duration;
use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::Deserialize;

use crate::pki::crl::{CheckerOptions, CrlSchedulerConfig, SoftFailPolicy, ValidityModel};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub revocation: RevocationConfig,
    pub http: HttpConfig,
    pub refresh: RefreshConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationConfig {
    pub check_end_entity_only: bool,
    pub validity_model: ValidityModel,
    pub use_deltas: bool,
    pub crl_download: bool,
    pub cache_capacity: usize,
    pub soft_fail: SoftFailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoftFailConfig {
    pub enabled: bool,
    pub fail_log_max_secs: i64,
    #[serde(default)]
    pub fail_hard_max_secs: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    #[serde(default)]
    pub distribution_points: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory of trust anchor certificates.
    pub trust_anchors: String,
    /// Directory of intermediate and CRL signer certificates.
    #[serde(default)]
    pub certificates: Option<String>,
    /// Directory of pre-loaded CRLs.
    #[serde(default)]
    pub crls: Option<String>,
}

impl RevocationConfig {
    pub fn checker_options(&self) -> CheckerOptions {
        CheckerOptions {
            check_end_entity_only: self.check_end_entity_only,
            validation_time: None,
            validity_model: self.validity_model,
            use_deltas: self.use_deltas,
            crl_download: self.crl_download,
        }
    }

    pub fn soft_fail_policy(&self) -> SoftFailPolicy {
        SoftFailPolicy {
            enabled: self.soft_fail.enabled,
            fail_log_max_time: Duration::seconds(self.soft_fail.fail_log_max_secs),
            fail_hard_max_time: self.soft_fail.fail_hard_max_secs.map(Duration::seconds),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("revocation.check_end_entity_only", false)?
            .set_default("revocation.validity_model", "pkix")?
            .set_default("revocation.use_deltas", true)?
            .set_default("revocation.crl_download", false)?
            .set_default("revocation.cache_capacity", 64)?
            .set_default("revocation.soft_fail.enabled", false)?
            .set_default("revocation.soft_fail.fail_log_max_secs", 86_400)?
            .set_default("http.timeout_secs", 30)?
            .set_default("refresh.interval_secs", 3600)?
            .set_default("paths.trust_anchors", "config/anchors")?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format APP_HTTP__TIMEOUT_SECS or
            // APP_REFRESH__DISTRIBUTION_POINTS=http://a/ca.crl,http://b/ca.crl
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("refresh.distribution_points")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }

    pub fn scheduler_config(&self) -> CrlSchedulerConfig {
        CrlSchedulerConfig {
            check_interval_secs: self.refresh.interval_secs,
            distribution_points: self.refresh.distribution_points.clone(),
            timeout_secs: self.http.timeout_secs,
        }
    }
}
