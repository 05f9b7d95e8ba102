// src/topology.rs
use crate::config::ClusterConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Node role in the cluster. `ApiSans` holds the API endpoint aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    ApiSans,
    Masters,
    Workers,
    Etcd,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ApiSans => "apisans",
            Role::Masters => "masters",
            Role::Workers => "workers",
            Role::Etcd => "etcd",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// node name -> extra names/addresses
pub type HostMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    roles: BTreeMap<Role, HostMap>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: Role, hosts: HostMap) -> Self {
        self.roles.insert(role, hosts);
        self
    }

    pub fn hosts(&self, role: Role) -> Option<&HostMap> {
        self.roles.get(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGroup {
    pub user: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTopology {
    pub topology: Topology,
    pub users: Vec<UserGroup>,
    /// Canonical textual form of the extra API server addresses.
    pub api_service_ips: Vec<String>,
}

/// Malformed cluster shape input. Always fatal, reported before any
/// cryptographic work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    MissingField(&'static str),
    EmptyNodeName { field: &'static str, entry: String },
    MultipleSlashes { field: &'static str, entry: String },
    EmptyExtraName { field: &'static str, node: String },
    DuplicateNode { field: &'static str, node: String },
    InvalidUser(String),
    DuplicateUser(String),
    InvalidAddress { field: &'static str, value: String },
    /// Node and user names become directory or file names in storage.
    UnsafeName { field: &'static str, name: String },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "{}: must have at least one host", field),
            Self::EmptyNodeName { field, entry } => {
                write!(f, "{}: empty node name in entry {:?}", field, entry)
            }
            Self::MultipleSlashes { field, entry } => {
                write!(f, "{}: only one node name per host allowed in {:?}", field, entry)
            }
            Self::EmptyExtraName { field, node } => write!(
                f,
                "{}: any extra name supplied must not be empty for {:?}",
                field, node
            ),
            Self::DuplicateNode { field, node } => {
                write!(f, "{}: node {:?} listed more than once", field, node)
            }
            Self::InvalidUser(entry) => {
                write!(f, "users: invalid user {:?}, expected user/group", entry)
            }
            Self::DuplicateUser(user) => write!(f, "users: user {:?} listed more than once", user),
            Self::InvalidAddress { field, value } => {
                write!(f, "{}: {:?} is not an IP address", field, value)
            }
            Self::UnsafeName { field, name } => {
                write!(f, "{}: {:?} cannot be used as a storage path segment", field, name)
            }
        }
    }
}

impl std::error::Error for TopologyError {}

fn check_path_segment(field: &'static str, name: &str) -> Result<(), TopologyError> {
    if name == "." || name == ".." || name.contains('\\') {
        return Err(TopologyError::UnsafeName {
            field,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Parses one `name[/extra1:extra2],name...` list. Returns `None` when the
/// field is absent or blank.
pub fn parse_hosts(field: &'static str, input: Option<&str>) -> Result<Option<HostMap>, TopologyError> {
    let input = match input.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(None),
    };

    let mut hosts = HostMap::new();
    for entry in input.split(',').map(str::trim) {
        let parts: Vec<&str> = entry.split('/').collect();
        if parts.len() > 2 {
            return Err(TopologyError::MultipleSlashes {
                field,
                entry: entry.to_string(),
            });
        }

        let node = parts[0].trim();
        if node.is_empty() {
            return Err(TopologyError::EmptyNodeName {
                field,
                entry: entry.to_string(),
            });
        }
        check_path_segment(field, node)?;

        let extras = match parts.get(1) {
            Some(extra) => {
                let extras: Vec<String> = extra.split(':').map(|s| s.trim().to_string()).collect();
                if extras.iter().any(String::is_empty) {
                    return Err(TopologyError::EmptyExtraName {
                        field,
                        node: node.to_string(),
                    });
                }
                extras
            }
            None => Vec::new(),
        };

        if hosts.insert(node.to_string(), extras).is_some() {
            return Err(TopologyError::DuplicateNode {
                field,
                node: node.to_string(),
            });
        }
    }
    Ok(Some(hosts))
}

pub fn parse_users(input: Option<&str>) -> Result<Vec<UserGroup>, TopologyError> {
    let input = match input.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(Vec::new()),
    };

    let mut users: Vec<UserGroup> = Vec::new();
    for entry in input.split(',').map(str::trim) {
        let parts: Vec<&str> = entry.split('/').map(str::trim).collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(TopologyError::InvalidUser(entry.to_string()));
        }
        check_path_segment("users", parts[0])?;
        if users.iter().any(|u| u.user == parts[0]) {
            return Err(TopologyError::DuplicateUser(parts[0].to_string()));
        }
        users.push(UserGroup {
            user: parts[0].to_string(),
            group: parts[1].to_string(),
        });
    }
    Ok(users)
}

pub fn parse_addresses(field: &'static str, values: &[String]) -> Result<Vec<String>, TopologyError> {
    values
        .iter()
        .map(|value| {
            value
                .trim()
                .parse::<IpAddr>()
                .map(|ip| ip.to_string())
                .map_err(|_| TopologyError::InvalidAddress {
                    field,
                    value: value.clone(),
                })
        })
        .collect()
}

/// Builds the topology of one run. API aliases, masters and workers are
/// required; etcd falls back to the masters when absent.
pub fn resolve(config: &ClusterConfig) -> Result<ResolvedTopology, TopologyError> {
    let required = |role: Role, value: &Option<String>| -> Result<HostMap, TopologyError> {
        parse_hosts(role.as_str(), value.as_deref())?
            .ok_or(TopologyError::MissingField(role.as_str()))
    };

    let apisans = required(Role::ApiSans, &config.apisans)?;
    let masters = required(Role::Masters, &config.masters)?;
    let workers = required(Role::Workers, &config.workers)?;
    let etcd = match parse_hosts(Role::Etcd.as_str(), config.etcd.as_deref())? {
        Some(etcd) => etcd,
        None => masters.clone(),
    };
    let users = parse_users(config.users.as_deref())?;
    let api_service_ips = parse_addresses("api-service-ip", &config.api_service_ips)?;

    let topology = Topology::new()
        .with_role(Role::ApiSans, apisans)
        .with_role(Role::Masters, masters)
        .with_role(Role::Workers, workers)
        .with_role(Role::Etcd, etcd);

    Ok(ResolvedTopology {
        topology,
        users,
        api_service_ips,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(apisans: &str, masters: &str, workers: &str) -> ClusterConfig {
        ClusterConfig {
            apisans: Some(apisans.to_string()),
            masters: Some(masters.to_string()),
            workers: Some(workers.to_string()),
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn parses_nodes_with_and_without_extras() {
        let hosts = parse_hosts(
            "masters",
            Some("master01.example.org/10.0.0.1:10.0.0.2,master02.example.org"),
        )
        .unwrap()
        .unwrap();

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts["master01.example.org"], vec!["10.0.0.1", "10.0.0.2"]);
        assert!(hosts["master02.example.org"].is_empty());
    }

    #[test]
    fn blank_field_is_absent() {
        assert_eq!(parse_hosts("etcd", None).unwrap(), None);
        assert_eq!(parse_hosts("etcd", Some("  ")).unwrap(), None);
    }

    #[test]
    fn rejects_more_than_one_slash() {
        let err = parse_hosts("workers", Some("w1/10.0.0.1/extra")).unwrap_err();
        assert_eq!(
            err,
            TopologyError::MultipleSlashes {
                field: "workers",
                entry: "w1/10.0.0.1/extra".to_string()
            }
        );
    }

    #[test]
    fn rejects_empty_extra_names() {
        for input in ["w1/", "w1/10.0.0.1::10.0.0.2", "w1/10.0.0.1:"] {
            assert!(matches!(
                parse_hosts("workers", Some(input)),
                Err(TopologyError::EmptyExtraName { .. })
            ));
        }
    }

    #[test]
    fn rejects_empty_and_duplicate_nodes() {
        assert!(matches!(
            parse_hosts("workers", Some("w1,,w2")),
            Err(TopologyError::EmptyNodeName { .. })
        ));
        assert!(matches!(
            parse_hosts("workers", Some("/10.0.0.1")),
            Err(TopologyError::EmptyNodeName { .. })
        ));
        assert!(matches!(
            parse_hosts("workers", Some("w1,w1/10.0.0.9")),
            Err(TopologyError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn required_fields_must_be_present() {
        let mut cfg = config("kapi", "m1", "w1");
        cfg.workers = None;
        assert_eq!(resolve(&cfg), Err(TopologyError::MissingField("workers")));

        let cfg = config("", "m1", "w1");
        assert_eq!(resolve(&cfg), Err(TopologyError::MissingField("apisans")));
    }

    #[test]
    fn etcd_defaults_to_masters() {
        let resolved = resolve(&config("kapi", "m1/10.1.0.1,m2", "w1")).unwrap();
        assert_eq!(
            resolved.topology.hosts(Role::Etcd),
            resolved.topology.hosts(Role::Masters)
        );

        let mut cfg = config("kapi", "m1", "w1");
        cfg.etcd = Some("e1/10.3.0.1".to_string());
        let resolved = resolve(&cfg).unwrap();
        let etcd = resolved.topology.hosts(Role::Etcd).unwrap();
        assert_eq!(etcd.keys().collect::<Vec<_>>(), vec!["e1"]);
        assert_eq!(etcd["e1"], vec!["10.3.0.1"]);
    }

    #[test]
    fn malformed_etcd_is_not_silently_replaced() {
        let mut cfg = config("kapi", "m1", "w1");
        cfg.etcd = Some("e1/a/b".to_string());
        assert!(matches!(
            resolve(&cfg),
            Err(TopologyError::MultipleSlashes { field: "etcd", .. })
        ));
    }

    #[test]
    fn parses_user_group_pairs() {
        let users = parse_users(Some("bob.john/admin-users, andrew.lewis/read-only")).unwrap();
        assert_eq!(
            users,
            vec![
                UserGroup {
                    user: "bob.john".to_string(),
                    group: "admin-users".to_string()
                },
                UserGroup {
                    user: "andrew.lewis".to_string(),
                    group: "read-only".to_string()
                },
            ]
        );
        assert!(parse_users(None).unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_users() {
        for input in ["bob", "bob/", "/admins", "bob/admins/extra"] {
            assert!(matches!(
                parse_users(Some(input)),
                Err(TopologyError::InvalidUser(_))
            ));
        }
        assert_eq!(
            parse_users(Some("bob/a,bob/b")),
            Err(TopologyError::DuplicateUser("bob".to_string()))
        );
    }

    #[test]
    fn service_addresses_must_be_ips() {
        let mut cfg = config("kapi", "m1", "w1");
        cfg.api_service_ips = vec![" 10.96.0.1".to_string(), "fd00:0::1".to_string()];
        let resolved = resolve(&cfg).unwrap();
        assert_eq!(resolved.api_service_ips, vec!["10.96.0.1", "fd00::1"]);

        cfg.api_service_ips = vec!["kubernetes".to_string()];
        assert!(matches!(
            resolve(&cfg),
            Err(TopologyError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn rejects_names_unusable_as_paths() {
        for (input, name) in [("..", ".."), ("m1, . /10.0.0.1", "."), ("m\\1", "m\\1")] {
            assert_eq!(
                parse_hosts("masters", Some(input)),
                Err(TopologyError::UnsafeName {
                    field: "masters",
                    name: name.to_string()
                })
            );
        }
        assert_eq!(
            parse_users(Some("bob/admins,../admins")),
            Err(TopologyError::UnsafeName {
                field: "users",
                name: "..".to_string()
            })
        );
        assert!(parse_users(Some("bob.john/admins")).is_ok());
    }

    #[test]
    fn entries_are_trimmed() {
        let hosts = parse_hosts("workers", Some(" w1 / 10.2.0.1 : w1.lan , w2 "))
            .unwrap()
            .unwrap();
        assert_eq!(hosts["w1"], vec!["10.2.0.1", "w1.lan"]);
        assert!(hosts["w2"].is_empty());
    }
}
