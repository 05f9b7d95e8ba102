// src/cert/identity.rs
use super::catalog::Catalog;
use super::types::{
    AltName, AltNames, CertificateDescriptor, CertificateTemplate, ReconcileState,
    DEFAULT_NODE_SANS, NODE_PLACEHOLDER,
};
use crate::topology::{Role, Topology};
use std::collections::{BTreeMap, HashMap};

pub const GLOBAL_SCOPE: &str = "global";
pub const NODES_SCOPE: &str = "nodes";

/// Descriptors of one run plus the authority path -> descriptor index lookup.
pub struct Materialized {
    pub descriptors: Vec<CertificateDescriptor>,
    pub authorities: HashMap<String, usize>,
}

pub fn render_pattern(pattern: &str, node: &str) -> String {
    pattern.replace(NODE_PLACEHOLDER, node)
}

/// Storage location of an artifact, without extension.
pub fn storage_path(node: Option<&str>, template_path: &str) -> String {
    let relative = template_path.trim_start_matches('/');
    match node {
        None => format!("{}/{}", GLOBAL_SCOPE, relative),
        Some(node) => format!("{}/{}/{}", NODES_SCOPE, node, relative),
    }
}

/// Union of every SAN source the template asks for. `node` carries the node
/// name and its extra names, already merged across the roles it appears in.
pub fn make_alt_names(
    topology: &Topology,
    template: &CertificateTemplate,
    node: Option<(&str, &[String])>,
) -> AltNames {
    let mut names = AltNames::new();

    if template.api_sans {
        if let Some(api) = topology.hosts(Role::ApiSans) {
            for (host, extras) in api {
                names.insert(AltName::classify(host));
                names.extend(extras.iter().map(|e| AltName::classify(e)));
            }
        }
    }

    if template.node_sans {
        if let Some((node, extras)) = node {
            names.insert(AltName::classify(node));
            names.extend(extras.iter().map(|e| AltName::classify(e)));
            names.extend(DEFAULT_NODE_SANS.iter().map(|e| AltName::classify(e)));
        }
    }

    names.extend(template.extra_sans.iter().map(|e| AltName::classify(e)));
    names
}

fn describe(
    topology: &Topology,
    template: &CertificateTemplate,
    template_idx: usize,
    node: Option<(&str, &[String])>,
) -> CertificateDescriptor {
    let node_name = node.map(|(n, _)| n).unwrap_or("");
    let organization = render_pattern(&template.organization, node_name);
    let path = storage_path(node.map(|(n, _)| n), &template.path);

    CertificateDescriptor {
        template_idx,
        node: node.map(|(n, _)| n.to_string()),
        common_name: render_pattern(&template.common_name, node_name),
        organization: if organization.is_empty() {
            Vec::new()
        } else {
            vec![organization]
        },
        alt_names: make_alt_names(topology, template, node),
        read_path: path.clone(),
        write_path: path,
        state: ReconcileState::Unchecked,
        cert: None,
        key: None,
    }
}

/// Nodes a template applies to, with extras merged across its roles.
fn template_nodes(topology: &Topology, template: &CertificateTemplate) -> BTreeMap<String, Vec<String>> {
    let mut nodes: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for role in &template.roles {
        let Some(hosts) = topology.hosts(*role) else {
            continue;
        };
        for (node, extras) in hosts {
            let merged = nodes.entry(node.clone()).or_default();
            for extra in extras {
                if !merged.contains(extra) {
                    merged.push(extra.clone());
                }
            }
        }
    }
    nodes
}

/// Expands every template of the catalog against the topology, in catalog
/// order.
pub fn materialize(catalog: &Catalog, topology: &Topology) -> Materialized {
    let mut descriptors = Vec::new();
    let mut authorities = HashMap::new();

    for (idx, template) in catalog.templates().iter().enumerate() {
        if template.roles.is_empty() {
            if template.is_authority() {
                authorities.insert(template.path.clone(), descriptors.len());
            }
            descriptors.push(describe(topology, template, idx, None));
            continue;
        }

        for (node, extras) in template_nodes(topology, template) {
            descriptors.push(describe(
                topology,
                template,
                idx,
                Some((node.as_str(), extras.as_slice())),
            ));
        }
    }

    Materialized {
        descriptors,
        authorities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::catalog::{CatalogBuilder, KUBERNETES_CA};
    use crate::config::{ClusterConfig, DEFAULT_CLUSTER_DOMAIN};
    use crate::topology::{self, HostMap};

    fn scenario_topology() -> Topology {
        let config = ClusterConfig {
            apisans: Some("kapi.example.org/10.0.0.1".to_string()),
            masters: Some("m1.example.org/10.1.0.1".to_string()),
            workers: Some("w1.example.org/10.2.0.1".to_string()),
            ..ClusterConfig::default()
        };
        topology::resolve(&config).unwrap().topology
    }

    fn kubernetes_catalog() -> Catalog {
        CatalogBuilder::kubernetes(DEFAULT_CLUSTER_DOMAIN, &[])
            .build()
            .unwrap()
    }

    fn names(set: &AltNames) -> Vec<String> {
        set.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn apiserver_identity_combines_all_sources() {
        let catalog = kubernetes_catalog();
        let out = materialize(&catalog, &scenario_topology());
        let apiserver = out
            .descriptors
            .iter()
            .find(|d| catalog.get(d.template_idx).path == "/etc/kubernetes/pki/apiserver")
            .unwrap();

        assert_eq!(apiserver.common_name, "kube-apiserver");
        assert!(apiserver.organization.is_empty());
        assert_eq!(apiserver.node.as_deref(), Some("m1.example.org"));
        assert_eq!(
            apiserver.write_path,
            "nodes/m1.example.org/etc/kubernetes/pki/apiserver"
        );
        let sans = names(&apiserver.alt_names);
        for expected in [
            "kapi.example.org",
            "10.0.0.1",
            "m1.example.org",
            "10.1.0.1",
            "kubernetes",
            "kubernetes.default",
            "kubernetes.default.svc",
            "kubernetes.default.svc.cluster.local",
            "127.0.0.1",
            "localhost",
            "::1",
        ] {
            assert!(sans.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(sans.len(), 11);
    }

    #[test]
    fn authorities_are_global_and_registered() {
        let catalog = kubernetes_catalog();
        let out = materialize(&catalog, &scenario_topology());

        let ca_idx = out.authorities[KUBERNETES_CA];
        let ca = &out.descriptors[ca_idx];
        assert_eq!(ca.common_name, "kubernetes");
        assert_eq!(ca.read_path, "global/etc/kubernetes/pki/ca");
        assert!(ca.node.is_none());
        assert!(ca.alt_names.is_empty());
        assert_eq!(out.authorities.len(), 3);
    }

    #[test]
    fn node_patterns_are_rendered_per_node() {
        let catalog = kubernetes_catalog();
        let out = materialize(&catalog, &scenario_topology());

        let kubelet: Vec<_> = out
            .descriptors
            .iter()
            .filter(|d| catalog.get(d.template_idx).path == "/etc/kubernetes/pki/kubelet")
            .collect();
        assert_eq!(kubelet.len(), 2);
        assert!(kubelet
            .iter()
            .any(|d| d.common_name == "system:node:w1.example.org"));
        assert!(kubelet.iter().all(|d| d.organization == vec!["system:nodes"]));
    }

    #[test]
    fn etcd_certificates_follow_masters_when_etcd_is_absent() {
        let catalog = kubernetes_catalog();
        let out = materialize(&catalog, &scenario_topology());

        let server = out
            .descriptors
            .iter()
            .find(|d| catalog.get(d.template_idx).path == "/etc/kubernetes/pki/etcd/server")
            .unwrap();
        assert_eq!(server.common_name, "m1.example.org");
        assert!(server
            .alt_names
            .contains(&AltName::classify("10.1.0.1")));
    }

    #[test]
    fn san_sets_do_not_depend_on_input_order() {
        let template = CertificateTemplate::leaf("/x", KUBERNETES_CA, "x")
            .node_sans()
            .api_sans()
            .extra_sans(&["kubernetes", "10.96.0.1"]);

        let mut api_a = HostMap::new();
        api_a.insert("kapi".to_string(), vec!["10.0.0.1".to_string(), "api.internal".to_string()]);
        api_a.insert("kapi2".to_string(), vec![]);
        let topo_a = Topology::new().with_role(Role::ApiSans, api_a);

        let mut api_b = HostMap::new();
        api_b.insert("kapi2".to_string(), vec![]);
        api_b.insert("kapi".to_string(), vec!["api.internal".to_string(), "10.0.0.1".to_string()]);
        let topo_b = Topology::new().with_role(Role::ApiSans, api_b);

        let extras_a = vec!["10.1.0.1".to_string(), "n1.internal".to_string()];
        let extras_b = vec!["n1.internal".to_string(), "10.1.0.1".to_string()];

        let a = make_alt_names(&topo_a, &template, Some(("n1", extras_a.as_slice())));
        let b = make_alt_names(&topo_b, &template, Some(("n1", extras_b.as_slice())));
        assert_eq!(a, b);
        assert_eq!(names(&a), names(&b));
    }

    #[test]
    fn duplicate_names_collapse() {
        let template = CertificateTemplate::leaf("/x", KUBERNETES_CA, "x")
            .node_sans()
            .extra_sans(&["localhost", "127.0.0.1"]);
        let extras = vec!["localhost".to_string()];
        let sans = make_alt_names(&Topology::new(), &template, Some(("localhost", extras.as_slice())));
        assert_eq!(names(&sans), vec!["localhost", "127.0.0.1", "::1"]);
    }

    #[test]
    fn node_in_several_roles_yields_one_descriptor_with_merged_extras() {
        let mut masters = HostMap::new();
        masters.insert("n1".to_string(), vec!["10.1.0.1".to_string()]);
        let mut workers = HostMap::new();
        workers.insert("n1".to_string(), vec!["10.2.0.1".to_string()]);
        let topo = Topology::new()
            .with_role(Role::Masters, masters)
            .with_role(Role::Workers, workers);

        let catalog = CatalogBuilder::empty()
            .add(CertificateTemplate::authority(KUBERNETES_CA, "kubernetes"))
            .add(
                CertificateTemplate::leaf("/var/lib/kubelet/pki/kubelet", KUBERNETES_CA, "{node}")
                    .roles(&[Role::Masters, Role::Workers])
                    .node_sans(),
            )
            .build()
            .unwrap();

        let out = materialize(&catalog, &topo);
        assert_eq!(out.descriptors.len(), 2);
        let leaf = &out.descriptors[1];
        assert!(leaf.alt_names.contains(&AltName::classify("10.1.0.1")));
        assert!(leaf.alt_names.contains(&AltName::classify("10.2.0.1")));
    }

    #[test]
    fn roles_missing_from_topology_are_skipped() {
        let catalog = kubernetes_catalog();
        let out = materialize(&catalog, &Topology::new());
        // authorities plus the role independent admin certificate
        assert_eq!(out.descriptors.len(), 4);
    }

    #[test]
    fn empty_organization_pattern_yields_no_organization() {
        assert_eq!(render_pattern("system:node:{node}", "w1"), "system:node:w1");
        assert_eq!(render_pattern("", "w1"), "");
        assert_eq!(storage_path(None, "/etc/kubernetes/pki/sa"), "global/etc/kubernetes/pki/sa");
    }
}
