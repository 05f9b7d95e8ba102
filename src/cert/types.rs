// cert/types.rs
use crate::topology::Role;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

pub const DEFAULT_RSA_KEY_SIZE: u32 = 2048;
pub const AUTHORITY_VALIDITY_DAYS: u32 = 3650;
pub const LEAF_VALIDITY_DAYS: u32 = 3650;

/// Placeholder substituted with the node name in common name and
/// organization patterns.
pub const NODE_PLACEHOLDER: &str = "{node}";

/// Names every node-bound certificate answers to besides its own.
pub const DEFAULT_NODE_SANS: [&str; 3] = ["127.0.0.1", "localhost", "::1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtKeyUsage {
    ServerAuth,
    ClientAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P224,
    P256,
    P384,
    P521,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa(u32),
    Ec(EcCurve),
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        KeyAlgorithm::Rsa(DEFAULT_RSA_KEY_SIZE)
    }
}

/// Accepts `rsa` (or nothing) and the curve names `P224`, `P256`, `P384`, `P521`.
impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "rsa" | "RSA" => Ok(KeyAlgorithm::default()),
            "P224" => Ok(KeyAlgorithm::Ec(EcCurve::P224)),
            "P256" => Ok(KeyAlgorithm::Ec(EcCurve::P256)),
            "P384" => Ok(KeyAlgorithm::Ec(EcCurve::P384)),
            "P521" => Ok(KeyAlgorithm::Ec(EcCurve::P521)),
            other => Err(other.to_string()),
        }
    }
}

/// Subject alternative name. DNS names order before IP addresses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AltName {
    Dns(String),
    Ip(IpAddr),
}

impl AltName {
    /// Address literals become IP entries, everything else a DNS name.
    pub fn classify(name: &str) -> Self {
        match name.parse::<IpAddr>() {
            Ok(ip) => AltName::Ip(ip),
            Err(_) => AltName::Dns(name.to_string()),
        }
    }
}

impl fmt::Display for AltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AltName::Dns(name) => f.write_str(name),
            AltName::Ip(ip) => write!(f, "{}", ip),
        }
    }
}

pub type AltNames = BTreeSet<AltName>;

/// Catalog entry describing how to derive one or more certificates.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateTemplate {
    pub path: String,
    /// `None` marks an authority.
    pub parent: Option<String>,
    /// Empty: rendered once, independent of topology.
    pub roles: Vec<Role>,
    pub common_name: String,
    pub organization: String,
    pub node_sans: bool,
    pub api_sans: bool,
    pub extra_sans: Vec<String>,
    pub usages: Vec<ExtKeyUsage>,
    pub key_algorithm: KeyAlgorithm,
    pub validity_days: u32,
}

impl CertificateTemplate {
    pub fn authority(path: &str, common_name: &str) -> Self {
        Self {
            path: path.to_string(),
            parent: None,
            roles: Vec::new(),
            common_name: common_name.to_string(),
            organization: String::new(),
            node_sans: false,
            api_sans: false,
            extra_sans: Vec::new(),
            usages: Vec::new(),
            key_algorithm: KeyAlgorithm::default(),
            validity_days: AUTHORITY_VALIDITY_DAYS,
        }
    }

    pub fn leaf(path: &str, parent: &str, common_name: &str) -> Self {
        Self {
            parent: Some(parent.to_string()),
            validity_days: LEAF_VALIDITY_DAYS,
            ..Self::authority(path, common_name)
        }
    }

    pub fn roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    pub fn organization(mut self, organization: &str) -> Self {
        self.organization = organization.to_string();
        self
    }

    pub fn usages(mut self, usages: &[ExtKeyUsage]) -> Self {
        self.usages = usages.to_vec();
        self
    }

    pub fn node_sans(mut self) -> Self {
        self.node_sans = true;
        self
    }

    pub fn api_sans(mut self) -> Self {
        self.api_sans = true;
        self
    }

    pub fn extra_sans<S: AsRef<str>>(mut self, sans: &[S]) -> Self {
        self.extra_sans = sans.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn key_algorithm(mut self, key_algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = key_algorithm;
        self
    }

    pub fn is_authority(&self) -> bool {
        self.parent.is_none()
    }
}

/// Why a stored artifact was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ForceRegen,
    Load,
    Parse,
    NotSignedByParent,
    Signature,
    KeyMismatch,
    DefinitionMismatch,
    Expiring,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::ForceRegen => "ForceRegen",
            Self::Load => "error loading certificate/key",
            Self::Parse => "error loading cert or key from encoded format",
            Self::NotSignedByParent => "cert not emitted by parent CA",
            Self::Signature => "error verifying cert signature",
            Self::KeyMismatch => "cert and key do not match",
            Self::DefinitionMismatch => "cert not emitted according to definition",
            Self::Expiring => "cert expires within minimum validity window",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Unchecked,
    Loading,
    Validating,
    Valid,
    Invalid(FailureReason),
    Kept,
    Regenerated,
}

impl ReconcileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcileState::Kept | ReconcileState::Regenerated)
    }
}

/// Concrete identity of one certificate for one run.
pub struct CertificateDescriptor {
    pub template_idx: usize,
    pub node: Option<String>,
    pub common_name: String,
    pub organization: Vec<String>,
    pub alt_names: AltNames,
    pub read_path: String,
    pub write_path: String,
    pub state: ReconcileState,
    pub cert: Option<X509>,
    pub key: Option<PKey<Private>>,
}

impl CertificateDescriptor {
    pub fn node_label(&self) -> &str {
        self.node.as_deref().unwrap_or("")
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.state {
            ReconcileState::Invalid(reason) => Some(reason),
            _ => None,
        }
    }
}
