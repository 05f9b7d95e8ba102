// src/main.rs
mod app;
mod cert;
mod config;
mod storage;
mod topology;
mod types;
mod utils;

use cert::CertificateOperations;
use clap::Parser;
use config::{ClusterConfig, ReconcilePolicy};
use std::process::ExitCode;
use storage::{open_storage, StoragePair};
use types::{Args, Command, KubeCertsArgs, Outcome};
use utils::logging::{ConsoleLogger, FileLogger, Logger, MultiLogger};

fn build_logger(args: &Args) -> Result<Box<dyn Logger>, std::io::Error> {
    let console = Box::new(ConsoleLogger::new(args.debug));
    match &args.log_file {
        None => Ok(console),
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            let file = FileLogger::new(&path, args.debug)?;
            Ok(Box::new(MultiLogger::new().with(console).with(Box::new(file))))
        }
    }
}

/// Config file values, overridden by whatever was given on the command line.
fn load_config(args: &KubeCertsArgs) -> Result<ClusterConfig, String> {
    let base = match &args.config {
        Some(path) => ClusterConfig::load_from_file(path)
            .map_err(|e| format!("cannot load config {}: {}", path, e))?,
        None => ClusterConfig::default(),
    };

    let overrides = ClusterConfig {
        apisans: args.apisans.clone(),
        masters: args.masters.clone(),
        workers: args.workers.clone(),
        etcd: args.etcd.clone(),
        users: args.users.clone(),
        api_service_ips: args.api_service_ips.clone(),
        key_type: args.key_type.clone(),
        ..ClusterConfig::default()
    };
    let mut config = base.merge(overrides);
    if let Some(domain) = &args.cluster_domain {
        config.cluster_domain = domain.trim().to_string();
    }

    if args.save_config {
        if let Some(path) = &args.config {
            config
                .save_to_file(path)
                .map_err(|e| format!("cannot save config {}: {}", path, e))?;
        }
    }
    Ok(config)
}

fn open_storages(args: &Args) -> Result<StoragePair, storage::StorageError> {
    let src = args.src.as_deref().unwrap_or(&args.dst);
    Ok(StoragePair::new(open_storage(src)?, open_storage(&args.dst)?))
}

fn kubecerts(args: &Args, cmd: &KubeCertsArgs) -> ExitCode {
    let mut logger = match build_logger(args) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Error: cannot open log file: {}", e);
            return ExitCode::from(1);
        }
    };

    let config = match load_config(cmd) {
        Ok(config) => config,
        Err(e) => {
            logger.log(&format!("Error: {}", e));
            return ExitCode::from(2);
        }
    };
    logger.debug_log(&format!("Cluster domain: {}", config.cluster_domain));

    let storage = match open_storages(args) {
        Ok(storage) => storage,
        Err(e) => {
            logger.log(&format!("Error: {}", e));
            return ExitCode::from(2);
        }
    };

    let policy = ReconcilePolicy {
        force_regen: cmd.force_regen,
        overwrite: !cmd.no_overwrite,
    };
    let mut cert_ops = CertificateOperations::new(logger, storage, policy);
    let result = app::run_kubecerts(&config, &mut cert_ops);

    let report = cert_ops.report();
    let summary = format!(
        "Checked {} artifacts: {} ok, {} written, {} errors",
        report.artifacts.len(),
        report.count(Outcome::Ok),
        report.count(Outcome::Written),
        report.count(Outcome::Error)
    );
    cert_ops.debug_log(&summary);

    let code = match &result {
        Ok(changed) => {
            cert_ops.log(&format!(
                "GLOBAL_CHANGED: {}",
                if *changed { "TRUE" } else { "FALSE" }
            ));
            ExitCode::SUCCESS
        }
        Err(e) => {
            cert_ops.log(&format!("Error: {}", e));
            ExitCode::from(e.exit_code() as u8)
        }
    };

    if let Some(path) = &cmd.report {
        if let Err(e) = cert_ops.report().save_to_file(path) {
            cert_ops.log(&format!("Error: cannot write report {}: {}", path, e));
            return ExitCode::from(1);
        }
    }
    code
}

fn main() -> ExitCode {
    let args = Args::parse();
    match &args.command {
        Command::Kubecerts(cmd) => kubecerts(&args, cmd),
    }
}
