// config/types.rs
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Cluster shape as entered by the operator. Host lists use the
/// `name[/extra1:extra2],name...` format, users `user/group,user/group`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub apisans: Option<String>,
    pub masters: Option<String>,
    pub workers: Option<String>,
    pub etcd: Option<String>,
    pub users: Option<String>,
    pub cluster_domain: String,
    pub api_service_ips: Vec<String>,
    /// `rsa` or an elliptic curve name, used for newly issued certificates.
    pub key_type: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            apisans: None,
            masters: None,
            workers: None,
            etcd: None,
            users: None,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            api_service_ips: Vec::new(),
            key_type: None,
        }
    }
}

impl ClusterConfig {
    pub fn load_from_file(path: &str) -> io::Result<Self> {
        let path = shellexpand::tilde(path).to_string();
        let config_str = fs::read_to_string(path)?;
        serde_json::from_str(&config_str).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn save_to_file(&self, path: &str) -> io::Result<()> {
        let path = shellexpand::tilde(path).to_string();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let config_str = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, config_str)
    }

    /// Values present in `other` win over the ones already set.
    pub fn merge(mut self, other: ClusterConfig) -> Self {
        let ClusterConfig {
            apisans,
            masters,
            workers,
            etcd,
            users,
            cluster_domain,
            api_service_ips,
            key_type,
        } = other;

        self.apisans = apisans.or(self.apisans);
        self.masters = masters.or(self.masters);
        self.workers = workers.or(self.workers);
        self.etcd = etcd.or(self.etcd);
        self.users = users.or(self.users);
        self.key_type = key_type.or(self.key_type);
        if cluster_domain != DEFAULT_CLUSTER_DOMAIN {
            self.cluster_domain = cluster_domain;
        }
        if !api_service_ips.is_empty() {
            self.api_service_ips = api_service_ips;
        }
        self
    }
}

/// What to do with artifacts that fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Regenerate everything without looking at stored artifacts.
    pub force_regen: bool,
    /// Replace artifacts that fail validation. When false, such a failure
    /// aborts the run.
    pub overwrite: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            force_regen: false,
            overwrite: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_json_file() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("conf/cluster.json");
        let path = path.to_str().unwrap();

        let config = ClusterConfig {
            apisans: Some("kapi.example.org/10.0.0.1".to_string()),
            masters: Some("m1.example.org/10.1.0.1".to_string()),
            ..ClusterConfig::default()
        };
        config.save_to_file(path)?;

        assert_eq!(ClusterConfig::load_from_file(path)?, config);
        Ok(())
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ClusterConfig = serde_json::from_str(r#"{"workers":"w1"}"#).unwrap();
        assert_eq!(config.workers.as_deref(), Some("w1"));
        assert_eq!(config.cluster_domain, DEFAULT_CLUSTER_DOMAIN);
        assert!(config.masters.is_none());
    }

    #[test]
    fn command_line_values_override_file_values() {
        let from_file = ClusterConfig {
            masters: Some("m1".to_string()),
            workers: Some("w1".to_string()),
            cluster_domain: "corp.internal".to_string(),
            ..ClusterConfig::default()
        };
        let from_cli = ClusterConfig {
            workers: Some("w2".to_string()),
            key_type: Some("P384".to_string()),
            ..ClusterConfig::default()
        };

        let merged = from_file.merge(from_cli);
        assert_eq!(merged.masters.as_deref(), Some("m1"));
        assert_eq!(merged.workers.as_deref(), Some("w2"));
        assert_eq!(merged.key_type.as_deref(), Some("P384"));
        assert_eq!(merged.cluster_domain, "corp.internal");
    }

    #[test]
    fn default_policy_overwrites_without_forcing() {
        let policy = ReconcilePolicy::default();
        assert!(policy.overwrite);
        assert!(!policy.force_regen);
    }
}
