/// Configuration for this process's metrics namespace. The scrape endpoint
/// that exposes these to Prometheus is a transport-layer concern owned by
/// the process that embeds this crate, not by `legato-metrics` itself; this
/// type only carries the bits the instrumentation calls themselves need.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Bind address the embedding process should expose a scrape endpoint
    /// on, e.g. "0.0.0.0:9100".
    pub listen: String,

    /// Metric name prefix, e.g. "legato".
    pub namespace: &'static str,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9100".to_string(),
            namespace: "legato",
        }
    }
}
