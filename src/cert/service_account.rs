// src/cert/service_account.rs
use super::{
    identity::storage_path,
    openssl::{encode_private_key_pem, encode_public_key_pem, generate_private_key, parse_private_key_pem},
    operations::{CertOperationError, CertificateOperations, KEY_EXTENSION},
    types::{FailureReason, KeyAlgorithm},
};
use crate::types::{ArtifactKind, Outcome};

pub const SERVICE_ACCOUNT_KEY: &str = "/etc/kubernetes/pki/sa";
pub const PUBLIC_KEY_EXTENSION: &str = ".pub";

/// Cluster wide signing key pair with no certificate, stored as
/// `global/<path>.key` and `global/<path>.pub`.
pub struct ServiceAccountGenerator<'a> {
    path: String,
    algorithm: KeyAlgorithm,
    cert_ops: &'a mut CertificateOperations,
}

impl<'a> ServiceAccountGenerator<'a> {
    pub fn new(cert_ops: &'a mut CertificateOperations) -> Self {
        Self::with_path(SERVICE_ACCOUNT_KEY, cert_ops)
    }

    pub fn with_path(path: &str, cert_ops: &'a mut CertificateOperations) -> Self {
        Self {
            path: path.to_string(),
            algorithm: KeyAlgorithm::default(),
            cert_ops,
        }
    }

    fn storage_base(&self) -> String {
        storage_path(None, &self.path)
    }

    /// Keeps a consistent stored pair, otherwise writes a fresh one when the
    /// policy allows it. Returns whether anything was written.
    pub fn check_create_keys(&mut self) -> Result<bool, CertOperationError> {
        let policy = self.cert_ops.policy();
        let failure = if policy.force_regen {
            Some(FailureReason::ForceRegen)
        } else {
            self.verify_keypair().err()
        };

        let reason = match failure {
            None => {
                self.cert_ops.record(ArtifactKind::Key, "", &self.path, Outcome::Ok, None, None);
                return Ok(false);
            }
            Some(reason) => reason,
        };

        self.cert_ops.record(
            ArtifactKind::Key,
            "",
            &self.path,
            Outcome::Error,
            Some(reason.to_string()),
            None,
        );
        if !(policy.overwrite || policy.force_regen) {
            return Err(CertOperationError::PolicyViolation {
                kind: ArtifactKind::Key,
                node: String::new(),
                path: self.path.clone(),
                reason,
            });
        }

        self.generate_service_account_keys()?;
        self.cert_ops.record(
            ArtifactKind::Key,
            "",
            &self.path,
            Outcome::Written,
            Some(reason.to_string()),
            None,
        );
        Ok(true)
    }

    /// Loads both halves and checks the public one is exactly what the
    /// private key yields.
    pub fn verify_keypair(&mut self) -> Result<(), FailureReason> {
        let base = self.storage_base();
        self.cert_ops.debug_log(&format!("{}: Unchecked -> Loading", base));

        let read = &self.cert_ops.storage().read;
        let loaded = read
            .read(&format!("{}{}", base, KEY_EXTENSION))
            .and_then(|key| {
                read.read(&format!("{}{}", base, PUBLIC_KEY_EXTENSION))
                    .map(|public| (key, public))
            });
        let (key_pem, public_pem) = match loaded {
            Ok(pems) => pems,
            Err(e) => {
                self.cert_ops.debug_log(&format!("{}: {}", base, e));
                return Err(FailureReason::Load);
            }
        };

        self.cert_ops.debug_log(&format!("{}: Loading -> Validating", base));
        let key = parse_private_key_pem(&key_pem).map_err(|_| FailureReason::Parse)?;
        let expected = encode_public_key_pem(&key).map_err(|_| FailureReason::Parse)?;
        if expected != public_pem {
            return Err(FailureReason::KeyMismatch);
        }
        Ok(())
    }

    /// Writes the public half first, then the private key.
    pub fn generate_service_account_keys(&mut self) -> Result<(), CertOperationError> {
        self.cert_ops.log("Generating service account key pair");

        let key = generate_private_key(self.algorithm)?;
        let public_pem = encode_public_key_pem(&key)?;
        let key_pem = encode_private_key_pem(&key)?;

        let base = self.storage_base();
        let write = &self.cert_ops.storage().write;
        write.write(&format!("{}{}", base, PUBLIC_KEY_EXTENSION), &public_pem)?;
        write.write(&format!("{}{}", base, KEY_EXTENSION), &key_pem)?;
        Ok(())
    }
}
