// SPDX-License-Identifier: GPL-3.0-only

//! Active dm-crypt mappings
//!
//! `dmsetup` is used rather than `cryptsetup` because only it can list every
//! mapping. Mappings are re-read on every query and never cached.

use nix::sys::stat::{SFlag, major, minor, stat};

use partitions_types::Sector;

use crate::command::run_command_output;
use crate::{Result, SysError};

const DMSETUP_TABLE: &str = "dmsetup table --target crypt";

/// One active crypt target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptMapping {
    pub name: String,
    /// Payload offset in 512-byte sectors.
    pub offset: Sector,
    /// Payload size in 512-byte sectors.
    pub size: Sector,
    pub major: u64,
    pub minor: u64,
}

impl CryptMapping {
    /// `/dev/mapper/<name>`
    pub fn mapper_path(&self) -> String {
        format!("/dev/mapper/{}", self.name)
    }
}

/// Major and minor number of a block device node.
pub fn device_numbers(path: &str) -> Result<(u64, u64)> {
    let st = stat(path).map_err(|e| SysError::Io(std::io::Error::from(e)))?;
    if SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT != SFlag::S_IFBLK {
        return Err(SysError::DeviceNotFound(format!("{} is not a block device", path)));
    }
    Ok((major(st.st_rdev) as u64, minor(st.st_rdev) as u64))
}

/// Parse one table line:
/// `<name>: <start> <size> crypt <cipher> <key> <iv_offset> <device> <offset> [...]`
///
/// `resolve` turns a device path into its numbers.
fn parse_line<F>(line: &str, resolve: &F) -> std::result::Result<CryptMapping, String>
where
    F: Fn(&str) -> Result<(u64, u64)>,
{
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return Err(format!("Failed parsing output of '{}': '{}'", DMSETUP_TABLE, line));
    }
    let bad = || format!("Failed parsing output of '{}': '{}'", DMSETUP_TABLE, line);

    let name = fields[0].strip_suffix(':').filter(|n| !n.is_empty()).ok_or_else(bad)?;
    let size: Sector = fields[2].parse().map_err(|_| bad())?;
    let offset: Sector = fields[8].parse().map_err(|_| bad())?;

    let device = fields[7];
    let (major, minor) = if device.starts_with('/') {
        resolve(device)
            .map_err(|e| format!("Error while executing 'lstat({})': '{}'", device, e))?
    } else {
        let (maj, min) = device.split_once(':').ok_or_else(bad)?;
        (maj.parse().map_err(|_| bad())?, min.parse().map_err(|_| bad())?)
    };

    Ok(CryptMapping {
        name: name.to_string(),
        offset,
        size,
        major,
        minor,
    })
}

/// Parse the whole `dmsetup table --target crypt` output. Lines that cannot
/// be parsed are skipped and reported in the returned messages.
pub fn parse_crypt_table<F>(output: &str, resolve: F) -> (Vec<CryptMapping>, Vec<String>)
where
    F: Fn(&str) -> Result<(u64, u64)>,
{
    let mut mappings = Vec::new();
    let mut messages = Vec::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line == "No devices found" {
            continue;
        }
        match parse_line(line, &resolve) {
            Ok(mapping) => mappings.push(mapping),
            Err(message) => messages.push(message),
        }
    }
    (mappings, messages)
}

/// All active crypt mappings on the system.
pub fn crypt_mappings() -> Result<(Vec<CryptMapping>, Vec<String>)> {
    let output = run_command_output("dmsetup", &["table", "--target", "crypt"])?;
    if !output.success || !output.stderr.trim().is_empty() {
        return Err(SysError::CommandFailed {
            command: DMSETUP_TABLE.to_string(),
            output: output.combined(),
        });
    }
    Ok(parse_crypt_table(&output.stdout, device_numbers))
}

/// The mapping whose backing device is `device_path`, if any.
pub fn find_mapping_for_device(
    device_path: &str,
    messages: &mut Vec<String>,
) -> Result<Option<CryptMapping>> {
    let (mappings, parse_messages) = crypt_mappings()?;
    messages.extend(parse_messages);
    let numbers = device_numbers(device_path)?;
    Ok(mappings
        .into_iter()
        .find(|m| (m.major, m.minor) == numbers))
}
