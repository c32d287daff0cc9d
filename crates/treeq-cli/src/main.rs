//! Treeq provisioning dry run.
//!
//! Runs one provisioning request against an in-memory backend seeded from
//! a JSON inventory and prints the provisioned volume plus the backend state
//! afterwards.
//!
//! Usage:
//!   treeq --storage-class class.toml --inventory array.json --name pvc-1 --capacity 5gib
//!
//!   # Write the resulting inventory back, to chain several requests
//!   treeq -s class.toml -i array.json --name pvc-2 --capacity 1tib --write-back
//!
//! Set `RUST_LOG=treeq_core=debug` for the step-by-step trace.

mod storage_class;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

use treeq_core::{Inventory, MemoryApi, ProvisionResult, StorageApi, parse_size, treeq_service};

use storage_class::StorageClass;

/// Dry-run treeq provisioning.
#[derive(Parser, Debug)]
#[command(name = "treeq")]
#[command(about = "Provision an NFS treeq volume against an in-memory backend")]
struct Args {
    /// Storage-class TOML file
    #[arg(short, long)]
    storage_class: Option<PathBuf>,

    /// Parameter override, repeatable (key=value)
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Backend inventory JSON file
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Volume name
    #[arg(long)]
    name: String,

    /// Capacity such as 5gib or 1tib; defaults to the class pv_size
    #[arg(long)]
    capacity: Option<String>,

    /// Filesystems per listing page
    #[arg(long, default_value_t = 50)]
    page_size: usize,

    /// Save the resulting inventory back to --inventory
    #[arg(long, requires = "inventory")]
    write_back: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    volume: &'a ProvisionResult,
    inventory: &'a Inventory,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON report.
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut class = match &args.storage_class {
        Some(path) => StorageClass::load(path)?,
        None => StorageClass::default(),
    };
    class.apply_overrides(&args.params)?;

    let inventory: Inventory = match &args.inventory {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Inventory::default(),
    };
    let capacity = match &args.capacity {
        Some(s) => parse_size(s)?,
        None => 0,
    };

    let memory = Arc::new(MemoryApi::new(inventory).with_page_size(args.page_size));
    let api: Arc<dyn StorageApi> = memory.clone();
    let assembler = treeq_service(&class.service_type, api).ok_or_else(|| {
        anyhow!("service type {:?} is not treeq-backed", class.service_type)
    })?;

    tracing::info!(volume = %args.name, service = %class.service_type, "provisioning");
    let volume = assembler
        .provision_nfs_volume(class.parameters, &args.name, capacity)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "provisioning failed"))?;

    let inventory = memory.snapshot();
    if args.write_back {
        if let Some(path) = &args.inventory {
            let json = serde_json::to_string_pretty(&inventory)?;
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "inventory saved");
        }
    }

    let report = Report {
        volume: &volume,
        inventory: &inventory,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
