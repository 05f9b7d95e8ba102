mod types;

pub use types::{ClusterConfig, ReconcilePolicy};
#[cfg(test)]
pub use types::DEFAULT_CLUSTER_DOMAIN;
