// src/cert/catalog.rs
use super::types::{CertificateTemplate, ExtKeyUsage, KeyAlgorithm};
use crate::topology::{Role, UserGroup};
use std::fmt;

pub const KUBERNETES_CA: &str = "/etc/kubernetes/pki/ca";
pub const ETCD_CA: &str = "/etc/kubernetes/pki/etcd/ca";
pub const FRONT_PROXY_CA: &str = "/etc/kubernetes/pki/front-proxy-ca";
pub const USERS_DIR: &str = "/etc/kubernetes/pki/users";

use ExtKeyUsage::{ClientAuth, ServerAuth};
use Role::{Etcd, Masters, Workers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    DuplicatePath(String),
    UnknownParent { path: String, parent: String },
    ParentNotAuthority { path: String, parent: String },
    AuthorityWithRoles(String),
    UnknownKeyType(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePath(path) => write!(f, "template {} declared twice", path),
            Self::UnknownParent { path, parent } => write!(
                f,
                "template {} references parent {} which is not declared before it",
                path, parent
            ),
            Self::ParentNotAuthority { path, parent } => {
                write!(f, "template {} has parent {} which is not an authority", path, parent)
            }
            Self::AuthorityWithRoles(path) => {
                write!(f, "authority {} cannot be bound to node roles", path)
            }
            Self::UnknownKeyType(key_type) => write!(
                f,
                "unrecognized key type {:?}, expected rsa, P224, P256, P384 or P521",
                key_type
            ),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Frozen, ordered set of certificate templates. Every authority precedes
/// the leaves it signs.
#[derive(Debug, Clone)]
pub struct Catalog {
    templates: Vec<CertificateTemplate>,
}

impl Catalog {
    pub fn templates(&self) -> &[CertificateTemplate] {
        &self.templates
    }

    pub fn get(&self, idx: usize) -> &CertificateTemplate {
        &self.templates[idx]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.templates.len()
    }
}

pub struct CatalogBuilder {
    templates: Vec<CertificateTemplate>,
    key_algorithm: Option<KeyAlgorithm>,
}

impl CatalogBuilder {
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            templates: Vec::new(),
            key_algorithm: None,
        }
    }

    /// Standard control plane certificates. `cluster_domain` completes the
    /// in-cluster DNS names of the API server, `api_service_ips` are added to
    /// its address list.
    pub fn kubernetes(cluster_domain: &str, api_service_ips: &[String]) -> Self {
        let mut api_extra = vec![
            "kubernetes".to_string(),
            "kubernetes.default".to_string(),
            "kubernetes.default.svc".to_string(),
            format!("kubernetes.default.svc.{}", cluster_domain),
        ];
        api_extra.extend(api_service_ips.iter().cloned());

        let pki = |name: &str| format!("/etc/kubernetes/pki/{}", name);

        let templates = vec![
            CertificateTemplate::authority(KUBERNETES_CA, "kubernetes"),
            CertificateTemplate::authority(ETCD_CA, "etcd-ca"),
            CertificateTemplate::authority(FRONT_PROXY_CA, "front-proxy-ca"),
            CertificateTemplate::leaf(&pki("apiserver"), KUBERNETES_CA, "kube-apiserver")
                .roles(&[Masters])
                .usages(&[ServerAuth])
                .node_sans()
                .api_sans()
                .extra_sans(&api_extra),
            CertificateTemplate::leaf(
                &pki("apiserver-kubelet-client"),
                KUBERNETES_CA,
                "kube-apiserver-kubelet-client",
            )
            .roles(&[Masters])
            .organization("system:masters")
            .usages(&[ClientAuth]),
            CertificateTemplate::leaf(&pki("admin"), KUBERNETES_CA, "kubernetes-admin")
                .organization("system:masters")
                .usages(&[ClientAuth]),
            CertificateTemplate::leaf(
                &pki("controller-manager"),
                KUBERNETES_CA,
                "system:kube-controller-manager",
            )
            .roles(&[Masters])
            .usages(&[ClientAuth]),
            CertificateTemplate::leaf(&pki("kubelet"), KUBERNETES_CA, "system:node:{node}")
                .roles(&[Masters, Workers])
                .organization("system:nodes")
                .usages(&[ClientAuth]),
            CertificateTemplate::leaf("/var/lib/kubelet/pki/kubelet", KUBERNETES_CA, "{node}")
                .roles(&[Masters, Workers])
                .organization("system:nodes")
                .usages(&[ServerAuth])
                .node_sans(),
            CertificateTemplate::leaf(&pki("scheduler"), KUBERNETES_CA, "system:kube-scheduler")
                .roles(&[Masters])
                .usages(&[ClientAuth]),
            CertificateTemplate::leaf(&pki("kube-proxy"), KUBERNETES_CA, "system:kube-proxy")
                .roles(&[Masters, Workers])
                .organization("system:node-proxier")
                .usages(&[ClientAuth]),
            CertificateTemplate::leaf(&pki("front-proxy-client"), FRONT_PROXY_CA, "front-proxy-client")
                .roles(&[Masters, Workers])
                .usages(&[ClientAuth]),
            CertificateTemplate::leaf(&pki("etcd/server"), ETCD_CA, "{node}")
                .roles(&[Etcd])
                .usages(&[ServerAuth])
                .node_sans(),
            CertificateTemplate::leaf(&pki("etcd/peer"), ETCD_CA, "{node}")
                .roles(&[Etcd])
                .usages(&[ServerAuth, ClientAuth])
                .node_sans(),
            CertificateTemplate::leaf(
                &pki("etcd/etcd-healthcheck-client"),
                ETCD_CA,
                "kube-etcd-healthcheck-client",
            )
            .roles(&[Masters])
            .organization("system:masters")
            .usages(&[ClientAuth]),
            CertificateTemplate::leaf(
                &pki("apiserver-etcd-client"),
                ETCD_CA,
                "kube-apiserver-etcd-client",
            )
            .roles(&[Masters])
            .organization("system:masters")
            .usages(&[ClientAuth]),
        ];

        Self {
            templates,
            key_algorithm: None,
        }
    }

    /// Key type for every certificate of the catalog, parsed from the
    /// operator's `--key-type`. Blank keeps the RSA default.
    pub fn key_type(mut self, key_type: Option<&str>) -> Result<Self, CatalogError> {
        if let Some(key_type) = key_type {
            let algorithm = key_type.parse().map_err(CatalogError::UnknownKeyType)?;
            self.key_algorithm = Some(algorithm);
        }
        Ok(self)
    }

    pub fn add(mut self, template: CertificateTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Client certificate for an operator, signed by the cluster CA.
    pub fn add_user(self, user: &UserGroup) -> Self {
        let template = CertificateTemplate::leaf(
            &format!("{}/{}", USERS_DIR, user.user),
            KUBERNETES_CA,
            &user.user,
        )
        .organization(&user.group)
        .usages(&[ClientAuth]);
        self.add(template)
    }

    pub fn add_users(self, users: &[UserGroup]) -> Self {
        users.iter().fold(self, |builder, user| builder.add_user(user))
    }

    pub fn build(mut self) -> Result<Catalog, CatalogError> {
        if let Some(algorithm) = self.key_algorithm {
            self.templates = self
                .templates
                .into_iter()
                .map(|template| template.key_algorithm(algorithm))
                .collect();
        }

        for (idx, template) in self.templates.iter().enumerate() {
            let earlier = &self.templates[..idx];
            if earlier.iter().any(|t| t.path == template.path) {
                return Err(CatalogError::DuplicatePath(template.path.clone()));
            }

            match &template.parent {
                None if !template.roles.is_empty() => {
                    return Err(CatalogError::AuthorityWithRoles(template.path.clone()));
                }
                None => {}
                Some(parent) => match earlier.iter().find(|t| &t.path == parent) {
                    None => {
                        return Err(CatalogError::UnknownParent {
                            path: template.path.clone(),
                            parent: parent.clone(),
                        })
                    }
                    Some(p) if !p.is_authority() => {
                        return Err(CatalogError::ParentNotAuthority {
                            path: template.path.clone(),
                            parent: parent.clone(),
                        })
                    }
                    Some(_) => {}
                },
            }
        }

        Ok(Catalog {
            templates: self.templates,
        })
    }
}
