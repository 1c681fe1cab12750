pub mod config;
pub mod labels;
pub mod rpc;

pub use config::MetricsConfig;
pub use labels::{BoundedLabel, LabelPolicy};
pub use rpc::RpcMetrics;
