use metrics::{counter, gauge, histogram};

/// Instrumentation points for the request pipeline and subscription
/// manager, namespaced under the process's configured prefix. Cheap to
/// copy: it's just the namespace string, shared by every collaborator that
/// records metrics.
#[derive(Clone, Copy)]
pub struct RpcMetrics {
    ns: &'static str,
}

impl RpcMetrics {
    pub fn new(namespace: &'static str) -> Self {
        Self { ns: namespace }
    }

    pub fn rpc_total(&self, method: &'static str, result: &'static str) {
        counter!(format!("{}_rpc_total", self.ns), "method" => method, "result" => result).increment(1);
    }

    pub fn rpc_seconds(&self, method: &'static str, seconds: f64) {
        histogram!(format!("{}_rpc_seconds", self.ns), "method" => method).record(seconds);
    }

    pub fn perm_denied(&self, node: &'static str) {
        counter!(format!("{}_perm_denied_total", self.ns), "node" => node).increment(1);
    }

    pub fn rate_limited(&self, method: &'static str) {
        counter!(format!("{}_rate_limited_total", self.ns), "method" => method).increment(1);
    }

    pub fn db_seconds(&self, query: &'static str, seconds: f64) {
        histogram!(format!("{}_db_seconds", self.ns), "query" => query).record(seconds);
    }

    /// Number of live subscribers on a plane, sampled at broadcast time.
    pub fn subscribers(&self, plane: &'static str, count: f64) {
        gauge!(format!("{}_subscribers", self.ns), "plane" => plane).set(count);
    }

    pub fn subscriber_disconnected(&self, plane: &'static str, reason: &'static str) {
        counter!(format!("{}_subscriber_disconnected_total", self.ns), "plane" => plane, "reason" => reason).increment(1);
    }

    /// A message whose `overrides` field failed to decode as a well-formed
    /// protocol buffer and was forwarded with that field dropped rather
    /// than rejected outright.
    pub fn messages_dropped_decode_error(&self) {
        counter!(format!("{}_messages_dropped_decode_error_total", self.ns)).increment(1);
    }
}
