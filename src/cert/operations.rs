// src/cert/operations.rs

use super::{
    ca::{issue_authority, issue_leaf},
    catalog::{Catalog, CatalogError},
    identity::Materialized,
    openssl::{
        encode_cert_pem, encode_private_key_pem, fingerprint, parse_cert_pem,
        parse_private_key_pem, CryptoError,
    },
    types::{CertificateDescriptor, FailureReason, ReconcileState},
    verification::validate,
};
use crate::config::ReconcilePolicy;
use crate::storage::{StorageError, StoragePair};
use crate::topology::TopologyError;
use crate::types::{ArtifactKind, Outcome, RunReport};
use crate::utils::logging::Logger;
use chrono::Utc;
use openssl::{
    pkey::{PKey, Private},
    x509::X509,
};

pub const CERT_EXTENSION: &str = ".crt";
pub const KEY_EXTENSION: &str = ".key";

#[derive(Debug)]
pub enum CertOperationError {
    Topology(TopologyError),
    Catalog(CatalogError),
    Storage(StorageError),
    Crypto(CryptoError),
    /// A stored artifact is invalid and may not be replaced.
    PolicyViolation {
        kind: ArtifactKind,
        node: String,
        path: String,
        reason: FailureReason,
    },
    UnknownParent {
        path: String,
        parent: String,
    },
    ParentNotReconciled {
        path: String,
        parent: String,
    },
}

impl CertOperationError {
    /// Process exit code: 2 for bad input, 3 for refused replacements, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Topology(_) | Self::Catalog(_) => 2,
            Self::PolicyViolation { .. } => 3,
            _ => 1,
        }
    }
}

impl std::fmt::Display for CertOperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topology(e) => write!(f, "Invalid topology: {}", e),
            Self::Catalog(e) => write!(f, "Invalid certificate catalog: {}", e),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::Crypto(e) => write!(f, "Crypto error: {}", e),
            Self::PolicyViolation {
                kind,
                node,
                path,
                reason,
            } => write!(
                f,
                "{} check failed and overwrite forbidden: [{}] [{}] => {:?}",
                kind,
                node,
                path,
                reason.to_string()
            ),
            Self::UnknownParent { path, parent } => {
                write!(f, "{}: parent authority {} not materialized", path, parent)
            }
            Self::ParentNotReconciled { path, parent } => write!(
                f,
                "{}: parent authority {} has not been reconciled yet",
                path, parent
            ),
        }
    }
}

impl std::error::Error for CertOperationError {}

impl From<TopologyError> for CertOperationError {
    fn from(error: TopologyError) -> Self {
        CertOperationError::Topology(error)
    }
}

impl From<CatalogError> for CertOperationError {
    fn from(error: CatalogError) -> Self {
        CertOperationError::Catalog(error)
    }
}

impl From<StorageError> for CertOperationError {
    fn from(error: StorageError) -> Self {
        CertOperationError::Storage(error)
    }
}

impl From<CryptoError> for CertOperationError {
    fn from(error: CryptoError) -> Self {
        CertOperationError::Crypto(error)
    }
}

/// State of one reconciliation run: where artifacts live, what may be
/// replaced and what has been seen so far.
pub struct CertificateOperations {
    logger: Box<dyn Logger>,
    storage: StoragePair,
    policy: ReconcilePolicy,
    report: RunReport,
}

impl CertificateOperations {
    pub fn new(logger: Box<dyn Logger>, storage: StoragePair, policy: ReconcilePolicy) -> Self {
        Self {
            logger,
            storage,
            policy,
            report: RunReport::new(),
        }
    }

    pub fn log(&mut self, message: &str) {
        self.logger.log(message);
    }

    pub fn debug_log(&mut self, message: &str) {
        self.logger.debug_log(message);
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn storage(&self) -> &StoragePair {
        &self.storage
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    #[cfg(test)]
    pub fn into_report(self) -> RunReport {
        self.report
    }

    #[cfg(test)]
    pub fn changed(&self) -> bool {
        self.report.changed
    }

    /// Adds an artifact outcome to the report and prints its line.
    pub fn record(
        &mut self,
        kind: ArtifactKind,
        node: &str,
        path: &str,
        outcome: Outcome,
        reason: Option<String>,
        fingerprint: Option<String>,
    ) {
        let line = self
            .report
            .record(kind, node, path, outcome, reason, fingerprint)
            .line();
        self.logger.log(&line);
    }

    fn set_state(&mut self, descriptor: &mut CertificateDescriptor, state: ReconcileState) {
        self.logger.debug_log(&format!(
            "[{}] {}: {:?} -> {:?}",
            descriptor.node_label(),
            descriptor.read_path,
            descriptor.state,
            state
        ));
        descriptor.state = state;
    }

    /// Reconciles every descriptor in catalog order. Returns whether anything
    /// was written.
    pub fn check_create_certs(
        &mut self,
        catalog: &Catalog,
        materialized: &mut Materialized,
    ) -> Result<bool, CertOperationError> {
        self.log(&format!(
            "Checking {} certificates (read: {}, write: {})",
            materialized.descriptors.len(),
            self.storage.read.describe(),
            self.storage.write.describe()
        ));

        let mut changed = false;
        for idx in 0..materialized.descriptors.len() {
            changed |= self.reconcile_one(catalog, materialized, idx)?;
        }
        Ok(changed)
    }

    pub(crate) fn reconcile_one(
        &mut self,
        catalog: &Catalog,
        materialized: &mut Materialized,
        idx: usize,
    ) -> Result<bool, CertOperationError> {
        let (before, rest) = materialized.descriptors.split_at_mut(idx);
        let descriptor = &mut rest[0];
        let template = catalog.get(descriptor.template_idx);

        let parent = match &template.parent {
            None => None,
            Some(parent_path) => {
                let parent_idx = materialized
                    .authorities
                    .get(parent_path)
                    .copied()
                    .filter(|&p| p < idx)
                    .ok_or_else(|| CertOperationError::UnknownParent {
                        path: template.path.clone(),
                        parent: parent_path.clone(),
                    })?;
                let parent = &before[parent_idx];
                match (&parent.state, &parent.cert, &parent.key) {
                    (state, Some(cert), Some(key)) if state.is_terminal() => Some((cert, key)),
                    _ => {
                        return Err(CertOperationError::ParentNotReconciled {
                            path: template.path.clone(),
                            parent: parent_path.clone(),
                        })
                    }
                }
            }
        };

        if self.policy.force_regen {
            self.set_state(descriptor, ReconcileState::Invalid(FailureReason::ForceRegen));
        } else {
            let state = self.load_and_validate(descriptor, parent.map(|(cert, _)| cert));
            self.set_state(descriptor, state);
        }

        let node = descriptor.node_label().to_string();
        let failure = descriptor.failure().cloned();
        let reason = match failure {
            None => {
                let print = descriptor.cert.as_deref().map(fingerprint);
                self.set_state(descriptor, ReconcileState::Kept);
                self.record(ArtifactKind::Crt, &node, &template.path, Outcome::Ok, None, print);
                return Ok(false);
            }
            Some(reason) => reason,
        };

        self.record(
            ArtifactKind::Crt,
            &node,
            &template.path,
            Outcome::Error,
            Some(reason.to_string()),
            None,
        );
        if !(self.policy.overwrite || self.policy.force_regen) {
            return Err(CertOperationError::PolicyViolation {
                kind: ArtifactKind::Crt,
                node,
                path: template.path.clone(),
                reason,
            });
        }

        let (cert, key) = match parent {
            None => issue_authority(descriptor, template, self.logger.as_mut())?,
            Some((parent_cert, parent_key)) => {
                issue_leaf(descriptor, template, parent_cert, parent_key, self.logger.as_mut())?
            }
        };
        self.write_pair(descriptor, cert, key)?;
        self.set_state(descriptor, ReconcileState::Regenerated);

        let print = descriptor.cert.as_deref().map(fingerprint);
        self.record(
            ArtifactKind::Crt,
            &node,
            &template.path,
            Outcome::Written,
            Some(reason.to_string()),
            print,
        );
        Ok(true)
    }

    fn load_and_validate(
        &mut self,
        descriptor: &mut CertificateDescriptor,
        parent: Option<&X509>,
    ) -> ReconcileState {
        self.set_state(descriptor, ReconcileState::Loading);
        let read = &self.storage.read;
        let loaded = read
            .read(&format!("{}{}", descriptor.read_path, CERT_EXTENSION))
            .and_then(|cert| {
                read.read(&format!("{}{}", descriptor.read_path, KEY_EXTENSION))
                    .map(|key| (cert, key))
            });
        let (cert_pem, key_pem) = match loaded {
            Ok(pems) => pems,
            Err(e) => {
                self.debug_log(&format!("{}: {}", descriptor.read_path, e));
                return ReconcileState::Invalid(FailureReason::Load);
            }
        };

        self.set_state(descriptor, ReconcileState::Validating);
        match (parse_cert_pem(&cert_pem), parse_private_key_pem(&key_pem)) {
            (Ok(cert), Ok(key)) => {
                descriptor.cert = Some(cert);
                descriptor.key = Some(key);
            }
            (Err(e), _) | (_, Err(e)) => {
                self.debug_log(&format!("{}: {}", descriptor.read_path, e));
                return ReconcileState::Invalid(FailureReason::Parse);
            }
        }
        match validate(descriptor, parent.map(|p| &**p), Utc::now()) {
            Ok(()) => ReconcileState::Valid,
            Err(reason) => ReconcileState::Invalid(reason),
        }
    }

    /// Encodes and stores certificate then key at the descriptor's write path.
    fn write_pair(
        &mut self,
        descriptor: &mut CertificateDescriptor,
        cert: X509,
        key: PKey<Private>,
    ) -> Result<(), CertOperationError> {
        let cert_pem = encode_cert_pem(&cert)?;
        let key_pem = encode_private_key_pem(&key)?;

        let cert_path = format!("{}{}", descriptor.write_path, CERT_EXTENSION);
        let key_path = format!("{}{}", descriptor.write_path, KEY_EXTENSION);
        self.storage.write.write(&cert_path, &cert_pem)?;
        self.storage.write.write(&key_path, &key_pem)?;
        self.debug_log(&format!(
            "Wrote {} ({})",
            cert_path,
            fingerprint(&cert)
        ));

        descriptor.cert = Some(cert);
        descriptor.key = Some(key);
        Ok(())
    }
}
