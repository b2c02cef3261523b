// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem signature probing with `blkid`

use std::collections::HashMap;

use partitions_contracts::FsProbe;
use partitions_types::FsKind;

use crate::Result;
use crate::command::run_command_output;

/// Exit status of `blkid -p` when nothing was detected.
const BLKID_NOTHING_FOUND: i32 = 2;

/// Parse `blkid -o export` output.
pub fn parse_export(output: &str) -> FsProbe {
    let values: HashMap<&str, &str> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect();

    let kind = values
        .get("TYPE")
        .map(|fs| FsKind::from_blkid(fs, values.get("VERSION").copied()));
    let non_empty = |key: &str| {
        values
            .get(key)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    FsProbe {
        kind,
        label: non_empty("LABEL"),
        uuid: non_empty("UUID"),
    }
}

/// Low-level probe of `length` bytes at `offset` inside `path`.
pub fn probe(path: &str, offset: u64, length: u64) -> Result<FsProbe> {
    let offset = offset.to_string();
    let length = length.to_string();
    let output = run_command_output(
        "blkid",
        &["-p", "-o", "export", "--offset", &offset, "--size", &length, path],
    )?;
    if output.code == Some(BLKID_NOTHING_FOUND) || !output.success {
        if !output.success && output.code != Some(BLKID_NOTHING_FOUND) {
            tracing::debug!("blkid on {} at {}: {}", path, offset, output.combined());
        }
        return Ok(FsProbe::default());
    }
    Ok(parse_export(&output.stdout))
}
