use std::time::Duration;

use serde::Deserialize;

fn _default_true() -> bool {
    true
}

fn _default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn _default_max_visit_count() -> i64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "_default_true")]
    pub enabled: bool,

    /// How long a loaded blocklist slice is served before it is
    /// re-read from the database.
    #[serde(default = "_default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Ceiling for per-(IP, path) visit counters; once reached the
    /// record is frozen.
    #[serde(default = "_default_max_visit_count")]
    pub max_visit_count: i64,

    /// Take the client address from `x-forwarded-for` when present.
    /// Disable when the service is not behind a trusted proxy.
    #[serde(default = "_default_true")]
    pub trust_x_forwarded_headers: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: _default_cache_ttl(),
            max_visit_count: _default_max_visit_count(),
            trust_x_forwarded_headers: true,
        }
    }
}
