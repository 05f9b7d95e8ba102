// types.rs
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io, path::Path};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // Storage to read existing artifacts from, defaults to --dst
    #[arg(long, global = true)]
    pub src: Option<String>,

    // Storage generated artifacts are written to
    #[arg(long, global = true, default_value = "outputs/system")]
    pub dst: String,

    #[arg(short, long, global = true)]
    pub debug: bool,

    #[arg(long, global = true)]
    pub log_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile the control plane certificates and the service account key pair
    Kubecerts(KubeCertsArgs),
}

#[derive(clap::Args, Debug, Default)]
pub struct KubeCertsArgs {
    /// API endpoint aliases: name[/extra1:extra2],...
    #[arg(long)]
    pub apisans: Option<String>,

    /// Control plane nodes: name[/extra1:extra2],...
    #[arg(long)]
    pub masters: Option<String>,

    /// Worker nodes: name[/extra1:extra2],...
    #[arg(long)]
    pub workers: Option<String>,

    /// etcd members, defaults to the control plane nodes
    #[arg(long)]
    pub etcd: Option<String>,

    /// Operator certificates: user/group,...
    #[arg(long)]
    pub users: Option<String>,

    #[arg(long)]
    pub cluster_domain: Option<String>,

    /// Key type of newly issued certificates: rsa, P224, P256, P384 or P521
    #[arg(long)]
    pub key_type: Option<String>,

    /// Extra IP address of the API server, repeatable
    #[arg(long = "api-service-ip")]
    pub api_service_ips: Vec<String>,

    /// Regenerate everything regardless of what is stored
    #[arg(long)]
    pub force_regen: bool,

    /// Fail instead of replacing artifacts that do not match
    #[arg(long)]
    pub no_overwrite: bool,

    #[arg(short, long)]
    pub config: Option<String>,

    /// Write the merged configuration back to --config
    #[arg(long, requires = "config")]
    pub save_config: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Crt,
    Key,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Crt => f.write_str("CRT"),
            ArtifactKind::Key => f.write_str("KEY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Written,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStatus {
    pub kind: ArtifactKind,
    pub node: String,
    pub path: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
    pub fingerprint: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub checked_at: DateTime<Utc>,
}

impl ArtifactStatus {
    /// Operator facing outcome line.
    pub fn line(&self) -> String {
        let head = match self.outcome {
            Outcome::Ok => format!("{} OK     ", self.kind),
            Outcome::Written => format!("{} WRITTEN", self.kind),
            Outcome::Error => format!("{} ERROR  ", self.kind),
        };
        let line = format!("{}: [{:<30}] [{:<50}]", head, self.node, self.path);
        match &self.reason {
            Some(reason) if self.outcome == Outcome::Error => format!("{} => {:?}", line, reason),
            _ => line,
        }
    }
}

/// Everything a run looked at, in processing order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub artifacts: Vec<ArtifactStatus>,
    pub changed: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        kind: ArtifactKind,
        node: &str,
        path: &str,
        outcome: Outcome,
        reason: Option<String>,
        fingerprint: Option<String>,
    ) -> &ArtifactStatus {
        if outcome == Outcome::Written {
            self.changed = true;
        }
        self.artifacts.push(ArtifactStatus {
            kind,
            node: node.to_string(),
            path: path.to_string(),
            outcome,
            reason,
            fingerprint,
            checked_at: Utc::now(),
        });
        &self.artifacts[self.artifacts.len() - 1]
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.artifacts.iter().filter(|a| a.outcome == outcome).count()
    }

    pub fn save_to_file(&self, path: &str) -> io::Result<()> {
        let path = shellexpand::tilde(path).to_string();
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let report = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, report)
    }
}
