// SPDX-License-Identifier: GPL-3.0-only

//! Built-in filesystem drivers
//!
//! Each driver wraps the command line tools of one filesystem family and
//! advertises only what the tools found on this host can do. Moving and
//! copying are left to the engine's block copy for every kind.

use std::str::FromStr;
use std::sync::Arc;

use partitions_contracts::{EngineError, FileSystemDriver, Result};
use partitions_sys::{command_line, run_command, run_command_output};
use partitions_types::{OperationDetail, Partition, Sector, Support};

use crate::registry::ToolLocator;

#[cfg(feature = "fs-btrfs")]
pub mod btrfs;
#[cfg(feature = "fs-ext")]
pub mod ext;
#[cfg(feature = "fs-fat")]
pub mod fat;
#[cfg(feature = "fs-luks")]
pub mod luks;
#[cfg(feature = "fs-ntfs")]
pub mod ntfs;
#[cfg(feature = "fs-swap")]
pub mod swap;
#[cfg(feature = "fs-xfs")]
pub mod xfs;

/// Probe every compiled-in driver against `tools`.
pub fn builtin_drivers(tools: &dyn ToolLocator) -> Vec<Arc<dyn FileSystemDriver>> {
    #[allow(unused_mut)]
    let mut drivers: Vec<Arc<dyn FileSystemDriver>> = Vec::new();

    #[cfg(feature = "fs-ext")]
    {
        use partitions_types::FsKind;
        for kind in [FsKind::Ext2, FsKind::Ext3, FsKind::Ext4] {
            drivers.push(Arc::new(ext::Ext::probe(kind, tools)));
        }
    }
    #[cfg(feature = "fs-fat")]
    {
        use partitions_types::FsKind;
        for kind in [FsKind::Fat16, FsKind::Fat32] {
            drivers.push(Arc::new(fat::Fat::probe(kind, tools)));
        }
    }
    #[cfg(feature = "fs-ntfs")]
    drivers.push(Arc::new(ntfs::Ntfs::probe(tools)));
    #[cfg(feature = "fs-xfs")]
    drivers.push(Arc::new(xfs::Xfs::probe(tools)));
    #[cfg(feature = "fs-btrfs")]
    drivers.push(Arc::new(btrfs::Btrfs::probe(tools)));
    #[cfg(feature = "fs-swap")]
    drivers.push(Arc::new(swap::Swap::probe(tools)));
    #[cfg(feature = "fs-luks")]
    drivers.push(Arc::new(luks::Luks::probe(tools)));

    drivers
}

/// `External` when `tool` is installed.
pub(crate) fn external_if(tools: &dyn ToolLocator, tool: &str) -> Support {
    if tools.has(tool) {
        Support::External
    } else {
        Support::None
    }
}

/// Run a tool as a sub-step of `detail`, recording its command line and
/// output. Exit codes other than those in `ok_codes` fail the step.
pub(crate) fn execute_accepting(
    detail: &mut OperationDetail,
    command: &str,
    args: &[&str],
    ok_codes: &[i32],
) -> Result<String> {
    let line = command_line(command, args);
    let step = detail.add_child(line.clone());
    let output = match run_command_output(command, args) {
        Ok(output) => output,
        Err(e) => {
            step.add_output(e.to_string());
            step.finish(false);
            return Err(e.into());
        }
    };
    step.add_output(output.stdout.trim_end().to_string());
    step.add_output(output.stderr.trim_end().to_string());

    let accepted = output.success || output.code.is_some_and(|c| ok_codes.contains(&c));
    step.finish(accepted);
    if !accepted {
        return Err(EngineError::driver_failure(line, output.combined()));
    }
    Ok(output.stdout)
}

pub(crate) fn execute(detail: &mut OperationDetail, command: &str, args: &[&str]) -> Result<String> {
    execute_accepting(detail, command, args, &[])
}

/// Run a read-only query and return stdout.
pub(crate) fn query(command: &str, args: &[&str]) -> Result<String> {
    Ok(run_command(command, args)?)
}

/// Value following `key` on the first line that contains it, with `:` or
/// `=` separators and surrounding quotes removed.
pub(crate) fn field<T: FromStr>(output: &str, key: &str) -> Option<T> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once(key)?;
        let value = rest
            .trim_start()
            .trim_start_matches([':', '='])
            .split_whitespace()
            .next()?
            .trim_matches('"');
        value.parse().ok()
    })
}

/// Convert a filesystem's block count into sectors of the partition.
pub(crate) fn blocks_to_sectors(blocks: u64, block_size: u64, partition: &Partition) -> Sector {
    blocks * block_size / partition.sector_size.max(1)
}

/// `sectors` of `partition` as whole KiB, the unit most resize tools accept.
pub(crate) fn kibibytes(partition: &Partition) -> String {
    format!("{}K", partition.byte_length() / 1024)
}
