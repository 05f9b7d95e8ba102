use crate::cert::{
    materialize, CatalogBuilder, CertOperationError, CertificateOperations, ServiceAccountGenerator,
};
use crate::config::ClusterConfig;
use crate::topology;

/// One `kubecerts` invocation: resolve the topology, expand the catalog and
/// reconcile certificates, then the service account key pair. Returns whether
/// anything was written.
pub fn run_kubecerts(
    config: &ClusterConfig,
    cert_ops: &mut CertificateOperations,
) -> Result<bool, CertOperationError> {
    let resolved = topology::resolve(config)?;
    let catalog = CatalogBuilder::kubernetes(&config.cluster_domain, &resolved.api_service_ips)
        .key_type(config.key_type.as_deref())?
        .add_users(&resolved.users)
        .build()?;

    let mut materialized = materialize(&catalog, &resolved.topology);
    for descriptor in &materialized.descriptors {
        let sans: Vec<String> = descriptor.alt_names.iter().map(ToString::to_string).collect();
        cert_ops.debug_log(&format!(
            "{}: CN={:?} O={:?} SAN=[{}]",
            descriptor.write_path,
            descriptor.common_name,
            descriptor.organization,
            sans.join(",")
        ));
    }

    let certs_changed = cert_ops.check_create_certs(&catalog, &mut materialized)?;
    let keys_changed = ServiceAccountGenerator::new(cert_ops).check_create_keys()?;
    Ok(certs_changed || keys_changed)
}
