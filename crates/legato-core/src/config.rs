//! Process-level configuration for the embedding server. This crate never
//! reads the environment itself — it's a library; the binary that links it
//! constructs a `Config` (typically via `clap::Parser` over argv and env,
//! mirroring how the rest of this codebase's processes are configured) once
//! at startup and threads it into `PgStorageRepo`, `Pipeline`, and
//! `SubscriptionManager` construction.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct Config {
    /// Postgres connection string for the storage repository.
    #[arg(long, env = "LEGATO_DATABASE_URL")]
    pub database_url: String,

    /// Metrics namespace prefix used for every exported series.
    #[arg(long, env = "LEGATO_METRICS_NAMESPACE", default_value = "legato")]
    pub metrics_namespace: String,

    /// Outbox depth before a stream subscriber is treated as a slow
    /// consumer and disconnected.
    #[arg(long, env = "LEGATO_OUTBOX_CAPACITY", default_value_t = crate::subscriptions::OUTBOX_CAPACITY)]
    pub outbox_capacity: usize,

    /// Default token-bucket window for rate-limited RPCs without their own
    /// override.
    #[arg(long, env = "LEGATO_DEFAULT_RATE_WINDOW_SECS", default_value_t = 60)]
    pub default_rate_window_secs: u64,
}

impl Config {
    pub fn default_rate_window(&self) -> Duration {
        Duration::from_secs(self.default_rate_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_explicit_args() {
        let cfg = Config::parse_from([
            "legato",
            "--database-url",
            "postgres://localhost/legato",
        ]);
        assert_eq!(cfg.metrics_namespace, "legato");
        assert_eq!(cfg.outbox_capacity, crate::subscriptions::OUTBOX_CAPACITY);
    }
}
