// SPDX-License-Identifier: GPL-3.0-only

//! cosmic-ext-partctl - inspect partition tables and apply partition
//! operations through the partition engine

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};

use partitions_engine::{EngineConfig, Executor, Worker};
use partitions_types::{
    Alignment, FsKind, Operation, OperationDetail, Partition, PartitionKind, PartitionStatus,
    TableType,
};

mod progress;
mod render;

const DEFAULT_CONFIG: &str = "/etc/cosmic-ext-partctl/engine.toml";

#[derive(Debug, Parser)]
#[command(name = "cosmic-ext-partctl")]
#[command(about = "Inspect partition tables and apply partition operations", version)]
struct Cli {
    /// Engine configuration (TOML); defaults apply when the file is missing
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging and step output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the layout of a device, free space included
    Probe {
        device: String,
        #[arg(long)]
        json: bool,
    },
    /// List what each filesystem kind supports on this host
    Filesystems {
        #[arg(long)]
        json: bool,
    },
    /// Write a new, empty partition table
    Mklabel {
        device: String,
        /// msdos or gpt
        table: String,
        /// Confirm that every partition on the device is lost
        #[arg(long)]
        yes: bool,
    },
    /// Create one partition and its filesystem
    Create {
        device: String,
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: u64,
        #[arg(long, default_value = "ext4")]
        fs: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        logical: bool,
        /// cylinder, mebibyte, optimal or strict
        #[arg(long)]
        alignment: Option<String>,
    },
    /// Run a batch of operations from a JSON or TOML file
    Apply {
        batch: PathBuf,
        /// Print the plan without touching any device
        #[arg(long)]
        dry_run: bool,
        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Deserialize)]
struct Batch {
    operations: Vec<Operation>,
}

fn load_batch(path: &Path) -> Result<Vec<Operation>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let batch: Batch = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw)
            .with_context(|| format!("invalid batch in {}", path.display()))?,
        _ => serde_json::from_str(&raw)
            .with_context(|| format!("invalid batch in {}", path.display()))?,
    };
    Ok(batch.operations)
}

fn require_root() -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        bail!("changing partitions requires root privileges");
    }
    Ok(())
}

async fn run_batch(executor: Executor, operations: Vec<Operation>, verbose: bool, json: bool) -> Result<()> {
    let total = operations.len();
    let worker = Worker::new(executor);
    let mut handle = worker.submit(operations);

    let token = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current block");
            token.cancel();
        }
    });

    let mut printer = render::EventPrinter::new(total, verbose && !json);
    while let Some(event) = handle.next_event().await {
        if !json {
            printer.on_event(event);
        }
    }
    printer.finish();
    let status = handle.status();
    let report = handle.wait().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        render::print_report(&report);
    }
    if !report.succeeded() {
        bail!("{}", status);
    }
    Ok(())
}

/// The named policy, or the configured default when none is given.
fn resolve_alignment(name: Option<&str>, config: &EngineConfig) -> Result<Alignment> {
    match name {
        Some(name) => Alignment::parse(name).with_context(|| format!("unknown alignment '{}'", name)),
        None => Ok(config.default_alignment),
    }
}

fn planned_partition(
    executor: &Executor,
    device: &str,
    (start, end): (u64, u64),
    fs: &str,
    label: Option<String>,
    logical: bool,
    alignment: Option<&str>,
) -> Result<Partition> {
    let fs = FsKind::parse(fs);
    if fs == FsKind::Unknown {
        bail!("unknown filesystem kind");
    }
    let alignment = resolve_alignment(alignment, executor.config())?;
    let layout = executor.read_device(device)?;

    let mut partition = Partition::new_unallocated(device, start, end, layout.sector_size(), logical);
    partition.kind = if logical {
        PartitionKind::Logical
    } else {
        PartitionKind::Primary
    };
    partition.status = PartitionStatus::New;
    partition.fs = fs;
    partition.label = label;
    partition.alignment = alignment;
    Ok(partition)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "partitions_engine=debug,partitions_sys=debug,info"
    } else {
        "partitions_engine=info,warn"
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = EngineConfig::load(&config_path)?;
    tracing::debug!("Configuration: {:?}", config);
    let executor = Executor::system(config);

    match cli.command {
        Command::Probe { device, json } => {
            let device = executor.read_device(&device)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&device)?);
            } else {
                render::print_device(&device);
            }
            Ok(())
        }
        Command::Filesystems { json } => {
            let capabilities = executor.registry().all_capabilities();
            if json {
                println!("{}", serde_json::to_string_pretty(&capabilities)?);
            } else {
                render::print_capabilities(&capabilities);
            }
            Ok(())
        }
        Command::Mklabel { device, table, yes } => {
            let table_type =
                TableType::parse(&table).with_context(|| format!("unknown table type '{}'", table))?;
            if !yes {
                bail!("refusing to overwrite the partition table of {} without --yes", device);
            }
            require_root()?;
            let mut detail = OperationDetail::new(format!("New {} table on {}", table_type, device));
            let result = executor.set_disklabel(&device, table_type, &mut detail);
            render::print_detail(&detail, 0);
            Ok(result?)
        }
        Command::Create {
            device,
            start,
            end,
            fs,
            label,
            logical,
            alignment,
        } => {
            require_root()?;
            let partition = planned_partition(
                &executor,
                &device,
                (start, end),
                &fs,
                label,
                logical,
                alignment.as_deref(),
            )?;
            let operations = vec![Operation::Create { device, partition }];
            run_batch(executor, operations, cli.verbose, false).await
        }
        Command::Apply {
            batch,
            dry_run,
            json,
        } => {
            let operations = load_batch(&batch)?;
            if operations.is_empty() {
                bail!("{} contains no operations", batch.display());
            }
            if dry_run {
                for (index, operation) in operations.iter().enumerate() {
                    println!("[{}/{}] {}", index + 1, operations.len(), operation);
                }
                return Ok(());
            }
            require_root()?;
            run_batch(executor, operations, cli.verbose, json).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_falls_back_to_the_configured_default() {
        let config = EngineConfig::from_toml("default_alignment = \"cylinder\"").unwrap();
        assert_eq!(resolve_alignment(None, &config).unwrap(), Alignment::Cylinder);
        assert_eq!(resolve_alignment(Some("strict"), &config).unwrap(), Alignment::Strict);
        assert!(resolve_alignment(Some("sideways"), &config).is_err());
    }
}
