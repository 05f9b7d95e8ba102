// src/cert/ca.rs
use super::{
    openssl::{
        append_alt_names, append_ext_key_usages, build_name, encoding, generate_private_key,
        new_builder, CryptoError,
    },
    types::{CertificateDescriptor, CertificateTemplate},
};
use crate::utils::logging::Logger;
use chrono::{Duration, Utc};
use openssl::{
    asn1::Asn1Time,
    hash::MessageDigest,
    pkey::{PKey, PKeyRef, Private},
    x509::{
        extension::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectKeyIdentifier},
        X509Ref, X509,
    },
};

/// Leaves are backdated so that nodes with a slightly late clock accept them.
const LEAF_BACKDATE_HOURS: i64 = 1;

/// Self-signed authority for the descriptor's subject.
pub fn issue_authority(
    descriptor: &CertificateDescriptor,
    template: &CertificateTemplate,
    logger: &mut dyn Logger,
) -> Result<(X509, PKey<Private>), CryptoError> {
    logger.debug_log(&format!(
        "Generating {:?} key for authority {}",
        template.key_algorithm, descriptor.write_path
    ));
    let key = generate_private_key(template.key_algorithm)?;

    let subject = build_name(&descriptor.common_name, &descriptor.organization)?;
    let not_before = Asn1Time::days_from_now(0).map_err(encoding)?;
    let mut builder = new_builder(&subject, &key, &not_before, template.validity_days)?;
    builder.set_issuer_name(&subject).map_err(encoding)?;

    builder
        .append_extension(BasicConstraints::new().critical().ca().build().map_err(encoding)?)
        .map_err(encoding)?;
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .digital_signature()
                .key_encipherment()
                .build()
                .map_err(encoding)?,
        )
        .map_err(encoding)?;
    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .map_err(encoding)?;
    builder.append_extension(ski).map_err(encoding)?;
    append_alt_names(&mut builder, &descriptor.alt_names, None)?;
    append_ext_key_usages(&mut builder, &template.usages)?;

    builder.sign(&key, MessageDigest::sha256()).map_err(encoding)?;
    Ok((builder.build(), key))
}

/// End-entity certificate for the descriptor, signed by its parent authority.
pub fn issue_leaf(
    descriptor: &CertificateDescriptor,
    template: &CertificateTemplate,
    parent_cert: &X509Ref,
    parent_key: &PKeyRef<Private>,
    logger: &mut dyn Logger,
) -> Result<(X509, PKey<Private>), CryptoError> {
    logger.debug_log(&format!(
        "Generating {:?} key for {}",
        template.key_algorithm, descriptor.write_path
    ));
    let key = generate_private_key(template.key_algorithm)?;

    let subject = build_name(&descriptor.common_name, &descriptor.organization)?;
    let backdated = Utc::now() - Duration::hours(LEAF_BACKDATE_HOURS);
    let not_before = Asn1Time::from_unix(backdated.timestamp()).map_err(encoding)?;
    let mut builder = new_builder(&subject, &key, &not_before, template.validity_days)?;
    builder
        .set_issuer_name(parent_cert.subject_name())
        .map_err(encoding)?;

    builder
        .append_extension(BasicConstraints::new().critical().build().map_err(encoding)?)
        .map_err(encoding)?;
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()
                .map_err(encoding)?,
        )
        .map_err(encoding)?;
    append_ext_key_usages(&mut builder, &template.usages)?;

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(Some(parent_cert), None))
        .map_err(encoding)?;
    builder.append_extension(ski).map_err(encoding)?;
    let aki = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(parent_cert), None))
        .map_err(encoding)?;
    builder.append_extension(aki).map_err(encoding)?;
    append_alt_names(&mut builder, &descriptor.alt_names, Some(parent_cert))?;

    builder
        .sign(parent_key, MessageDigest::sha256())
        .map_err(encoding)?;
    Ok((builder.build(), key))
}
