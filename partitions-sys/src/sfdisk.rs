// SPDX-License-Identifier: GPL-3.0-only

//! Partition table I/O through `sfdisk`
//!
//! Tables are read with `sfdisk --json` and written back as an sfdisk
//! script. Both directions go through [`PartitionTable`] so that every write
//! has passed the table model's validation first.

use serde::Deserialize;

use partitions_contracts::default_partition_path;
use partitions_types::{
    DeviceGeometry, PartitionFlag, PartitionKind, PartitionTable, TableEntry, TableType,
    flag_for_type_code, is_extended_type, type_code_for_fs,
};

use crate::command::{run_command_output, run_command_with_input};
use crate::{Result, SysError};

#[derive(Debug, Deserialize)]
struct SfdiskDump {
    partitiontable: SfdiskTable,
}

#[derive(Debug, Deserialize)]
struct SfdiskTable {
    label: String,
    id: Option<String>,
    firstlba: Option<u64>,
    lastlba: Option<u64>,
    sectorsize: Option<u64>,
    #[serde(default)]
    partitions: Vec<SfdiskPartition>,
}

#[derive(Debug, Deserialize)]
struct SfdiskPartition {
    node: String,
    start: u64,
    size: u64,
    #[serde(rename = "type")]
    type_code: String,
    uuid: Option<String>,
    name: Option<String>,
    attrs: Option<String>,
    #[serde(default)]
    bootable: bool,
}

/// Trailing partition number of a node name (`/dev/sda12` → 12).
fn node_number(node: &str) -> Option<u32> {
    let digits: String = node
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse `sfdisk --json` output into a table model.
pub fn parse_dump(json: &str, geometry: &DeviceGeometry) -> Result<PartitionTable> {
    let dump: SfdiskDump =
        serde_json::from_str(json).map_err(|e| SysError::parse("sfdisk --json", e.to_string()))?;
    let raw = dump.partitiontable;

    let table_type = TableType::parse(&raw.label).ok_or_else(|| {
        SysError::parse("sfdisk --json", format!("unsupported table type '{}'", raw.label))
    })?;
    let sector_size = raw.sectorsize.unwrap_or(geometry.sector_size);
    let defaults = PartitionTable::new(table_type, sector_size, geometry.length);

    let mut entries = Vec::with_capacity(raw.partitions.len());
    for part in raw.partitions {
        let number = node_number(&part.node).ok_or_else(|| {
            SysError::parse("sfdisk --json", format!("no partition number in '{}'", part.node))
        })?;
        if part.size == 0 {
            continue;
        }

        let kind = if is_extended_type(table_type, &part.type_code) {
            PartitionKind::Extended
        } else if table_type == TableType::Msdos && number > 4 {
            PartitionKind::Logical
        } else {
            PartitionKind::Primary
        };

        let mut flags: std::collections::BTreeSet<PartitionFlag> =
            flag_for_type_code(table_type, &part.type_code).into_iter().collect();
        if part.bootable {
            flags.insert(PartitionFlag::Boot);
        }
        if let Some(attrs) = &part.attrs {
            flags.extend(parse_gpt_attrs(attrs));
        }

        // A type that encodes a flag is rewritten from the flag, keep a
        // neutral base type underneath.
        let type_code = if flags.iter().any(|f| f.is_type_flag(table_type)) {
            type_code_for_fs(table_type, partitions_types::FsKind::Unknown).to_string()
        } else {
            part.type_code.clone()
        };

        entries.push(TableEntry {
            number,
            kind,
            start: part.start,
            end: part.start + part.size - 1,
            type_code,
            flags,
            name: part.name.filter(|n| !n.is_empty()),
            uuid: part.uuid,
        });
    }

    let mut table = PartitionTable::from_entries(
        table_type,
        sector_size,
        raw.firstlba.unwrap_or(defaults.first_usable),
        raw.lastlba.unwrap_or(defaults.last_usable),
        entries,
    );
    table.disk_id = raw.id;
    Ok(table)
}

fn parse_gpt_attrs(attrs: &str) -> Vec<PartitionFlag> {
    attrs
        .split_whitespace()
        .filter_map(|attr| match attr {
            "LegacyBIOSBootable" | "GUID:2" => Some(PartitionFlag::LegacyBoot),
            "GUID:62" => Some(PartitionFlag::Hidden),
            _ => None,
        })
        .collect()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', ""))
}

/// Render a table as an sfdisk script.
pub fn render_script(device: &str, table: &PartitionTable) -> String {
    let mut script = String::new();
    script.push_str(&format!("label: {}\n", match table.table_type {
        TableType::Msdos => "dos",
        TableType::Gpt => "gpt",
    }));
    if let Some(id) = &table.disk_id {
        script.push_str(&format!("label-id: {}\n", id));
    }
    script.push_str("unit: sectors\n");
    script.push_str(&format!("sector-size: {}\n", table.sector_size));
    if table.table_type == TableType::Gpt {
        script.push_str(&format!("first-lba: {}\n", table.first_usable));
        script.push_str(&format!("last-lba: {}\n", table.last_usable));
    }
    script.push('\n');

    let mut entries: Vec<&TableEntry> = table.entries().iter().collect();
    entries.sort_by_key(|e| e.number);
    for entry in entries {
        let mut fields = vec![
            format!("start={}", entry.start),
            format!("size={}", entry.length()),
            format!("type={}", entry.effective_type_code(table.table_type)),
        ];
        match table.table_type {
            TableType::Msdos => {
                if entry.flags.contains(&PartitionFlag::Boot) {
                    fields.push("bootable".to_string());
                }
            }
            TableType::Gpt => {
                if let Some(uuid) = &entry.uuid {
                    fields.push(format!("uuid={}", uuid));
                }
                if let Some(name) = &entry.name {
                    fields.push(format!("name={}", quote(name)));
                }
                let mut attrs = Vec::new();
                if entry.flags.contains(&PartitionFlag::LegacyBoot) {
                    attrs.push("LegacyBIOSBootable");
                }
                if entry.flags.contains(&PartitionFlag::Hidden) {
                    attrs.push("GUID:62");
                }
                if !attrs.is_empty() {
                    fields.push(format!("attrs={}", quote(&attrs.join(" "))));
                }
            }
        }
        script.push_str(&format!(
            "{} : {}\n",
            default_partition_path(device, entry.number),
            fields.join(", ")
        ));
    }
    script
}

/// Read the partition table of `device`. `None` when it has none.
pub fn read_table(device: &str, geometry: &DeviceGeometry) -> Result<Option<PartitionTable>> {
    let output = run_command_output("sfdisk", &["--json", device])?;
    if !output.success {
        if output.stderr.contains("does not contain a recognized partition table") {
            return Ok(None);
        }
        return Err(SysError::CommandFailed {
            command: format!("sfdisk --json {}", device),
            output: output.combined(),
        });
    }
    if output.stdout.trim().is_empty() {
        return Ok(None);
    }
    parse_dump(&output.stdout, geometry).map(Some)
}

/// Write `table` to `device` without asking the kernel to re-read it.
pub fn write_table(device: &str, table: &PartitionTable) -> Result<()> {
    let script = render_script(device, table);
    tracing::debug!("Writing partition table to {}:\n{}", device, script);
    run_command_with_input(
        "sfdisk",
        &[
            "--no-reread",
            "--no-tell-kernel",
            "--wipe",
            "never",
            "--wipe-partitions",
            "never",
            device,
        ],
        &script,
    )?;
    Ok(())
}
