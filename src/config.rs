//! Typed startup configuration consumed by every component.
//!
//! This is the interface the excluded "thin CLI flag parsing / YAML config
//! loading" collaborator would otherwise populate. It loads an optional YAML
//! document once, overlays `KH_*` environment variables, and validates the
//! result — there is no file watcher here, hot-reload stays external.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CoreError;

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_check_pods() -> u32 {
    4
}

fn default_job_cleanup_duration_secs() -> u64 {
    5 * 3600
}

fn default_leader_election_namespace() -> String {
    "kuberhealthy".to_string()
}

fn default_leader_election_name() -> String {
    "kuberhealthy-leader-election".to_string()
}

fn default_lease_duration_secs() -> u64 {
    15
}

fn default_renew_deadline_secs() -> u64 {
    10
}

fn default_retry_period_secs() -> u64 {
    2
}

fn default_termination_grace_period_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Startup configuration. Every field has a default matching §6 of the spec;
/// `from_file_and_env` merges an optional YAML document with environment
/// overrides, env taking precedence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    pub listen_address_tls: Option<String>,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub target_namespace: Option<String>,
    pub external_reporting_url: Option<String>,
    #[serde(default = "default_max_check_pods")]
    pub max_check_pods: u32,
    #[serde(default = "default_job_cleanup_duration_secs")]
    pub job_cleanup_duration_secs: u64,
    #[serde(default = "default_leader_election_namespace")]
    pub leader_election_namespace: String,
    #[serde(default = "default_leader_election_name")]
    pub leader_election_name: String,
    #[serde(default = "default_lease_duration_secs")]
    pub leader_election_lease_duration_secs: u64,
    #[serde(default = "default_renew_deadline_secs")]
    pub renew_deadline_secs: u64,
    #[serde(default = "default_retry_period_secs")]
    pub retry_period_secs: u64,
    #[serde(default = "default_termination_grace_period_secs")]
    pub termination_grace_period_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: default_listen_address(),
            listen_address_tls: None,
            tls_cert_file: None,
            tls_key_file: None,
            target_namespace: None,
            external_reporting_url: None,
            max_check_pods: default_max_check_pods(),
            job_cleanup_duration_secs: default_job_cleanup_duration_secs(),
            leader_election_namespace: default_leader_election_namespace(),
            leader_election_name: default_leader_election_name(),
            leader_election_lease_duration_secs: default_lease_duration_secs(),
            renew_deadline_secs: default_renew_deadline_secs(),
            retry_period_secs: default_retry_period_secs(),
            termination_grace_period_secs: default_termination_grace_period_secs(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load an optional YAML document, then overlay `KH_*` env vars, then
    /// validate. `path = None` means "defaults plus env only".
    pub fn from_file_and_env(path: Option<&Path>) -> Result<Config, CoreError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::Invalid(format!("reading config file {}: {e}", path.display()))
                })?;
                serde_yaml::from_str(&contents)
                    .map_err(|e| CoreError::Invalid(format!("parsing config file: {e}")))?
            }
            None => Config::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KH_LISTEN_ADDRESS") {
            self.listen_address = v;
        }
        if let Ok(v) = std::env::var("KH_LISTEN_ADDRESS_TLS") {
            self.listen_address_tls = Some(v);
        }
        if let Ok(v) = std::env::var("KH_TLS_CERT_FILE") {
            self.tls_cert_file = Some(v);
        }
        if let Ok(v) = std::env::var("KH_TLS_KEY_FILE") {
            self.tls_key_file = Some(v);
        }
        if let Ok(v) = std::env::var("KH_TARGET_NAMESPACE") {
            self.target_namespace = Some(v);
        }
        if let Ok(v) = std::env::var("KH_EXTERNAL_REPORTING_URL") {
            self.external_reporting_url = Some(v);
        }
        if let Ok(v) = std::env::var("KH_MAX_CHECK_PODS")
            && let Ok(n) = v.parse()
        {
            self.max_check_pods = n;
        }
        if let Ok(v) = std::env::var("KH_JOB_CLEANUP_DURATION")
            && let Ok(n) = v.parse()
        {
            self.job_cleanup_duration_secs = n;
        }
        if let Ok(v) = std::env::var("KH_LEADER_ELECTION_NAMESPACE") {
            self.leader_election_namespace = v;
        }
        if let Ok(v) = std::env::var("KH_LEADER_ELECTION_NAME") {
            self.leader_election_name = v;
        }
        if let Ok(v) = std::env::var("KH_LEADER_ELECTION_LEASE_DURATION")
            && let Ok(n) = v.parse()
        {
            self.leader_election_lease_duration_secs = n;
        }
        if let Ok(v) = std::env::var("KH_RENEW_DEADLINE")
            && let Ok(n) = v.parse()
        {
            self.renew_deadline_secs = n;
        }
        if let Ok(v) = std::env::var("KH_RETRY_PERIOD")
            && let Ok(n) = v.parse()
        {
            self.retry_period_secs = n;
        }
        if let Ok(v) = std::env::var("KH_TERMINATION_GRACE_PERIOD_SECONDS")
            && let Ok(n) = v.parse()
        {
            self.termination_grace_period_secs = n;
        }
        if let Ok(v) = std::env::var("KH_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.renew_deadline_secs >= self.leader_election_lease_duration_secs {
            return Err(CoreError::Invalid(
                "renewDeadline must be less than leaderElectionLeaseDuration".to_string(),
            ));
        }
        if self.retry_period_secs == 0 {
            return Err(CoreError::Invalid("retryPeriod must be positive".to_string()));
        }
        match (&self.tls_cert_file, &self.tls_key_file) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(CoreError::Invalid(
                    "tlsCertFile and tlsKeyFile must both be set or both omitted".to_string(),
                ));
            }
            _ => {}
        }
        if self.listen_address_tls.is_some() && self.tls_cert_file.is_none() {
            return Err(CoreError::Invalid(
                "listenAddressTLS requires tlsCertFile/tlsKeyFile".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.leader_election_lease_duration_secs)
    }

    pub fn renew_deadline(&self) -> Duration {
        Duration::from_secs(self.renew_deadline_secs)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_secs)
    }

    pub fn job_cleanup_duration(&self) -> Duration {
        Duration::from_secs(self.job_cleanup_duration_secs)
    }

    pub fn termination_grace_period(&self) -> Duration {
        Duration::from_secs(self.termination_grace_period_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.listen_address, "0.0.0.0:8080");
        assert_eq!(config.max_check_pods, 4);
        assert_eq!(config.leader_election_lease_duration_secs, 15);
        assert_eq!(config.renew_deadline_secs, 10);
        assert_eq!(config.retry_period_secs, 2);
    }

    #[test]
    fn rejects_renew_deadline_past_lease_duration() {
        let mut config = Config::default();
        config.renew_deadline_secs = 20;
        config.leader_election_lease_duration_secs = 15;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_partial_tls_config() {
        let mut config = Config::default();
        config.tls_cert_file = Some("cert.pem".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_matched_tls_config() {
        let mut config = Config::default();
        config.tls_cert_file = Some("cert.pem".to_string());
        config.tls_key_file = Some("key.pem".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_document_overrides_defaults() {
        let yaml = "listenAddress: \"0.0.0.0:9999\"\nmaxCheckPods: 9\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:9999");
        assert_eq!(config.max_check_pods, 9);
    }

    #[test]
    fn env_override_beats_yaml() {
        // SAFETY: test runs single-threaded within this process's test harness slot;
        // the var is scoped to this test's assertions only.
        unsafe {
            std::env::set_var("KH_MAX_CHECK_PODS", "12");
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.max_check_pods, 12);
        unsafe {
            std::env::remove_var("KH_MAX_CHECK_PODS");
        }
    }
}
