//! pko-manager - runs the Package and ObjectDeployment controllers

use clap::{Parser, ValueEnum};
use miette::Result;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

mod environment;
mod error;
mod images;
mod manager;

#[derive(Parser, Debug, Clone)]
#[command(name = "pko-manager")]
#[command(version)]
#[command(about = "Reconciles Packages into ObjectDeployments and ObjectSet revisions", long_about = None)]
pub struct Args {
    /// Only watch objects in this namespace; cluster-scoped objects are skipped
    #[arg(long, env = "PKO_NAMESPACE")]
    pub namespace: Option<String>,

    /// Objects reconciled in parallel per controller
    #[arg(long, env = "PKO_CONCURRENCY", default_value_t = 4)]
    pub concurrency: u16,

    /// Directory holding package images, one directory or `.tar.gz` per image
    #[arg(long, env = "PKO_PACKAGE_DIR", default_value = "/var/cache/package-operator")]
    pub package_dir: PathBuf,

    /// Registry host that replaces the host of every resolved image
    #[arg(long, env = "PKO_REGISTRY_OVERRIDE")]
    pub registry_override: Option<String>,

    /// Seconds between periodic reconciles of a healthy object
    #[arg(long, env = "PKO_REQUEUE_SECONDS", default_value_t = 300)]
    pub requeue_seconds: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "PKO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "PKO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Report this OpenShift version instead of probing for it
    #[arg(long, env = "PKO_OPENSHIFT_VERSION")]
    pub openshift_version: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|env| EnvFilter::from_str(&env).ok())
        .unwrap_or_else(|| EnvFilter::from_str(level).unwrap_or_else(|_| EnvFilter::new("info")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), namespace = ?args.namespace, "starting pko-manager");

    manager::run(&args).await?;
    Ok(())
}
