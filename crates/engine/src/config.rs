use serde::{Deserialize, Serialize};

/// Engine configuration, loaded once at startup from the environment
/// (`TEMPRO_`-prefixed variables) or constructed directly by embedders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Lifetime of a created email, in seconds. Default 24 hours.
    #[serde(default = "default_email_ttl_secs")]
    pub email_ttl_secs: u64,
    /// Lifetime of a cached inbox snapshot, in seconds. Default 30.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum number of cached inbox snapshots.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Deadline for any single call into the mailbox provider, in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Address-generation attempts before giving up with ResourceExhausted.
    #[serde(default = "default_create_attempts")]
    pub create_attempts: u32,
    /// Interval between expiry sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum emails deactivated per sweep batch.
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch: u32,
    /// Interval between cache/quota compaction passes, in seconds.
    #[serde(default = "default_compaction_interval_secs")]
    pub compaction_interval_secs: u64,
    /// Domains used when synthesizing a fallback address locally.
    #[serde(default = "default_fallback_domains")]
    pub fallback_domains: Vec<String>,
    /// Postgres connection string for the durable store.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Base URL of the remote mailbox provider API.
    #[serde(default)]
    pub provider_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("TEMPRO_").from_env()
    }

    pub fn email_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.email_ttl_secs as i64)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            email_ttl_secs: default_email_ttl_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            provider_timeout_secs: default_provider_timeout_secs(),
            create_attempts: default_create_attempts(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch: default_sweep_batch(),
            compaction_interval_secs: default_compaction_interval_secs(),
            fallback_domains: default_fallback_domains(),
            database_url: None,
            provider_base_url: None,
        }
    }
}

fn default_email_ttl_secs() -> u64 {
    86_400
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    1_000
}

fn default_provider_timeout_secs() -> u64 {
    15
}

fn default_create_attempts() -> u32 {
    3
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_sweep_batch() -> u32 {
    500
}

fn default_compaction_interval_secs() -> u64 {
    3_600
}

fn default_fallback_domains() -> Vec<String> {
    vec![
        "1secmail.com".to_string(),
        "1secmail.org".to_string(),
        "1secmail.net".to_string(),
    ]
}
