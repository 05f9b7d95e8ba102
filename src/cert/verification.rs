// src/cert/verification.rs
use super::{
    openssl::CryptoError,
    types::{AltName, AltNames, CertificateDescriptor, FailureReason},
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use openssl::{
    pkey::{PKeyRef, Private},
    x509::X509Ref,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509Certificate};

/// Certificates expiring sooner than this are reissued.
pub const MIN_VALIDITY_DAYS: i64 = 10;

/// Identity fields read back from an encoded certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateIdentity {
    pub common_name: String,
    pub organization: Vec<String>,
    /// As listed in the certificate, duplicates included.
    pub alt_names: Vec<AltName>,
    pub not_after: DateTime<Utc>,
}

fn parse_error<E: std::fmt::Display>(e: E) -> CryptoError {
    CryptoError::Parse(e.to_string())
}

pub fn inspect(cert: &X509Ref) -> Result<CertificateIdentity, CryptoError> {
    let der = cert.to_der().map_err(parse_error)?;
    let (_remainder, parsed) = X509Certificate::from_der(&der).map_err(parse_error)?;

    let common_name = match parsed.subject().iter_common_name().next() {
        Some(cn) => cn.as_str().map_err(parse_error)?.to_string(),
        None => String::new(),
    };
    let organization = parsed
        .subject()
        .iter_organization()
        .map(|o| o.as_str().map(str::to_string))
        .collect::<Result<Vec<_>, _>>()
        .map_err(parse_error)?;

    let mut alt_names = Vec::new();
    for ext in parsed.extensions() {
        let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() else {
            continue;
        };
        for name in &san.general_names {
            match name {
                GeneralName::DNSName(dns) => alt_names.push(AltName::Dns(dns.to_string())),
                GeneralName::IPAddress(bytes) => alt_names.push(AltName::Ip(ip_from_bytes(bytes)?)),
                _ => {}
            }
        }
    }

    let not_after = Utc
        .timestamp_opt(parsed.validity().not_after.timestamp(), 0)
        .single()
        .ok_or_else(|| CryptoError::Parse("invalid not_after timestamp".to_string()))?;

    Ok(CertificateIdentity {
        common_name,
        organization,
        alt_names,
        not_after,
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr, CryptoError> {
    if let Ok(v4) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::V6(Ipv6Addr::from(v6)));
    }
    Err(CryptoError::Parse(format!(
        "IP address SAN of {} bytes",
        bytes.len()
    )))
}

pub fn verify_authority(cert: &X509Ref, key: &PKeyRef<Private>) -> Result<(), FailureReason> {
    match cert.verify(key) {
        Ok(true) => Ok(()),
        _ => Err(FailureReason::Signature),
    }
}

pub fn verify_issued_by(cert: &X509Ref, parent: &X509Ref) -> Result<(), FailureReason> {
    let parent_key = parent.public_key().map_err(|_| FailureReason::Signature)?;
    match cert.verify(&parent_key) {
        Ok(true) => Ok(()),
        Ok(false) => Err(FailureReason::NotSignedByParent),
        Err(_) => Err(FailureReason::Signature),
    }
}

pub fn verify_key_pair(cert: &X509Ref, key: &PKeyRef<Private>) -> Result<(), FailureReason> {
    match cert.public_key() {
        Ok(public) if public.public_eq(key) => Ok(()),
        _ => Err(FailureReason::KeyMismatch),
    }
}

/// Common name, organization set and SAN set must be exactly the
/// descriptor's. SAN order is irrelevant, duplicates are not.
pub fn matches_definition(identity: &CertificateIdentity, descriptor: &CertificateDescriptor) -> bool {
    if identity.common_name != descriptor.common_name {
        return false;
    }

    let mut have = identity.organization.clone();
    let mut want = descriptor.organization.clone();
    have.sort();
    want.sort();
    if have != want {
        return false;
    }

    let sans: AltNames = identity.alt_names.iter().cloned().collect();
    identity.alt_names.len() == descriptor.alt_names.len() && sans == descriptor.alt_names
}

pub fn check_expiry(identity: &CertificateIdentity, now: DateTime<Utc>) -> Result<(), FailureReason> {
    if identity.not_after - now < Duration::days(MIN_VALIDITY_DAYS) {
        return Err(FailureReason::Expiring);
    }
    Ok(())
}

/// Full acceptance check of a loaded descriptor. `parent` is the already
/// reconciled issuer, `None` for authorities.
pub fn validate(
    descriptor: &CertificateDescriptor,
    parent: Option<&X509Ref>,
    now: DateTime<Utc>,
) -> Result<(), FailureReason> {
    let (cert, key) = match (&descriptor.cert, &descriptor.key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => return Err(FailureReason::Load),
    };

    match parent {
        None => verify_authority(cert, key)?,
        Some(parent) => verify_issued_by(cert, parent)?,
    }
    verify_key_pair(cert, key)?;

    let identity = inspect(cert).map_err(|_| FailureReason::Parse)?;
    if !matches_definition(&identity, descriptor) {
        return Err(FailureReason::DefinitionMismatch);
    }
    check_expiry(&identity, now)
}
