// SPDX-License-Identifier: GPL-3.0-only

//! Waiting for the kernel to catch up with a written partition table

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use partitions_contracts::default_partition_path;
use partitions_types::{PartitionKind, PartitionTable};

use crate::sysfs::{kernel_partitions, partition_extent};
use crate::{Result, SysError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll `check` until it returns true or `timeout` elapses.
pub fn wait_until<F>(device: &str, timeout: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    loop {
        if check() {
            tracing::debug!("{} settled after {:?}", device, started.elapsed());
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(SysError::Timeout {
                device: device.to_string(),
                waited: started.elapsed(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// True when the kernel exposes exactly the entries of `table` with their
/// geometry and every partition node exists.
pub fn kernel_matches(device: &str, table: &PartitionTable) -> bool {
    let expected: Vec<u32> = {
        let mut numbers: Vec<u32> = table.entries().iter().map(|e| e.number).collect();
        numbers.sort_unstable();
        numbers
    };
    match kernel_partitions(device) {
        Ok(actual) if actual == expected => {}
        _ => return false,
    }

    table.entries().iter().all(|entry| {
        let node = default_partition_path(device, entry.number);
        if !Path::new(&node).exists() {
            return false;
        }
        match partition_extent(&node, table.sector_size) {
            // The kernel reports extended partitions as one or two sectors.
            Some((start, _)) if entry.kind == PartitionKind::Extended => start == entry.start,
            Some((start, size)) => start == entry.start && size == entry.length(),
            None => false,
        }
    })
}

/// Wait until the kernel view of `device` matches `table`.
pub fn wait_for_table(device: &str, table: &PartitionTable, timeout: Duration) -> Result<()> {
    wait_until(device, timeout, || kernel_matches(device, table))
}
