// SPDX-License-Identifier: GPL-3.0-only

//! Change requests handed to the executor

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::format_size;
use crate::flags::PartitionFlag;
use crate::partition::{Partition, PartitionKind};

/// A single structural change.
///
/// `device` names the target device; the executor re-reads it before acting,
/// so partition geometry carried here is a plan, not ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Create {
        device: String,
        partition: Partition,
    },
    Delete {
        device: String,
        partition: Partition,
    },
    ResizeMove {
        device: String,
        old: Partition,
        new: Partition,
    },
    /// Copy `source` (possibly on another device) into a new partition
    /// described by `destination`.
    Copy {
        device: String,
        source: Partition,
        destination: Partition,
    },
    Format {
        device: String,
        old: Partition,
        new: Partition,
    },
    /// Write `partition.label` (an empty or missing label clears it).
    Label {
        device: String,
        partition: Partition,
    },
    ChangeUuid {
        device: String,
        partition: Partition,
    },
    ToggleFlag {
        device: String,
        partition: Partition,
        flag: PartitionFlag,
        state: bool,
    },
    CheckRepair {
        device: String,
        partition: Partition,
    },
    /// Set the table type code to match `partition.fs`.
    SetPartitionType {
        device: String,
        partition: Partition,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Delete,
    ResizeMove,
    Copy,
    Format,
    Label,
    ChangeUuid,
    ToggleFlag,
    CheckRepair,
    SetPartitionType,
}

/// Lifecycle of one operation in a batch. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    #[default]
    Pending,
    Running,
    Success,
    Warning,
    Error,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Success | OperationState::Warning | OperationState::Error
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Success => "success",
            OperationState::Warning => "warning",
            OperationState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Direction and size change of a resize/move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAction {
    None,
    MoveRight,
    MoveLeft,
    Grow,
    Shrink,
    MoveRightGrow,
    MoveRightShrink,
    MoveLeftGrow,
    MoveLeftShrink,
}

impl ResizeAction {
    pub fn classify(old: &Partition, new: &Partition) -> ResizeAction {
        use std::cmp::Ordering::*;
        let size = new.sector_length().cmp(&old.sector_length());
        let start = new.sector_start.cmp(&old.sector_start);
        match (size, start) {
            (Equal, Equal) => ResizeAction::None,
            (Equal, Greater) => ResizeAction::MoveRight,
            (Equal, Less) => ResizeAction::MoveLeft,
            (Greater, Equal) => ResizeAction::Grow,
            (Greater, Greater) => ResizeAction::MoveRightGrow,
            (Greater, Less) => ResizeAction::MoveLeftGrow,
            (Less, Equal) => ResizeAction::Shrink,
            (Less, Greater) => ResizeAction::MoveRightShrink,
            (Less, Less) => ResizeAction::MoveLeftShrink,
        }
    }

    /// Phrase used for the table entry step ("move partition to the left").
    pub fn partition_step(&self) -> &'static str {
        match self {
            ResizeAction::None => "resize/move partition",
            ResizeAction::MoveRight => "move partition to the right",
            ResizeAction::MoveLeft => "move partition to the left",
            ResizeAction::Grow => "grow partition",
            ResizeAction::Shrink => "shrink partition",
            ResizeAction::MoveRightGrow => "move partition to the right and grow it",
            ResizeAction::MoveRightShrink => "move partition to the right and shrink it",
            ResizeAction::MoveLeftGrow => "move partition to the left and grow it",
            ResizeAction::MoveLeftShrink => "move partition to the left and shrink it",
        }
    }

    pub fn changes_size(&self) -> bool {
        !matches!(
            self,
            ResizeAction::None | ResizeAction::MoveLeft | ResizeAction::MoveRight
        )
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create { .. } => OperationKind::Create,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::ResizeMove { .. } => OperationKind::ResizeMove,
            Operation::Copy { .. } => OperationKind::Copy,
            Operation::Format { .. } => OperationKind::Format,
            Operation::Label { .. } => OperationKind::Label,
            Operation::ChangeUuid { .. } => OperationKind::ChangeUuid,
            Operation::ToggleFlag { .. } => OperationKind::ToggleFlag,
            Operation::CheckRepair { .. } => OperationKind::CheckRepair,
            Operation::SetPartitionType { .. } => OperationKind::SetPartitionType,
        }
    }

    pub fn device(&self) -> &str {
        match self {
            Operation::Create { device, .. }
            | Operation::Delete { device, .. }
            | Operation::ResizeMove { device, .. }
            | Operation::Copy { device, .. }
            | Operation::Format { device, .. }
            | Operation::Label { device, .. }
            | Operation::ChangeUuid { device, .. }
            | Operation::ToggleFlag { device, .. }
            | Operation::CheckRepair { device, .. }
            | Operation::SetPartitionType { device, .. } => device,
        }
    }

    /// One-line summary used for logs and as the root of the detail tree.
    pub fn description(&self) -> String {
        match self {
            Operation::Create { device, partition } => {
                let slot = match partition.kind {
                    PartitionKind::Logical => "Logical Partition",
                    PartitionKind::Extended => "Extended Partition",
                    _ => "Primary Partition",
                };
                let number = partition
                    .number
                    .map(|n| format!(" #{}", n))
                    .unwrap_or_default();
                format!(
                    "Create {}{} ({}, {}) on {}",
                    slot,
                    number,
                    partition.fs,
                    partition.display_size(),
                    device
                )
            }
            Operation::Delete { device, partition } => format!(
                "Delete {} ({}, {}) from {}",
                partition.display_path(),
                partition.fs,
                partition.display_size(),
                device
            ),
            Operation::ResizeMove { old, new, .. } => {
                let path = old.display_path();
                let from = old.display_size();
                let to = new.display_size();
                match ResizeAction::classify(old, new) {
                    ResizeAction::None => format!(
                        "Resize/Move {} (new and old partition have the same size and position, continuing anyway)",
                        path
                    ),
                    ResizeAction::MoveRight => format!("Move {} to the right", path),
                    ResizeAction::MoveLeft => format!("Move {} to the left", path),
                    ResizeAction::Grow => format!("Grow {} from {} to {}", path, from, to),
                    ResizeAction::Shrink => format!("Shrink {} from {} to {}", path, from, to),
                    ResizeAction::MoveRightGrow => {
                        format!("Move {} to the right and grow it from {} to {}", path, from, to)
                    }
                    ResizeAction::MoveRightShrink => {
                        format!("Move {} to the right and shrink it from {} to {}", path, from, to)
                    }
                    ResizeAction::MoveLeftGrow => {
                        format!("Move {} to the left and grow it from {} to {}", path, from, to)
                    }
                    ResizeAction::MoveLeftShrink => {
                        format!("Move {} to the left and shrink it from {} to {}", path, from, to)
                    }
                }
            }
            Operation::Copy {
                device,
                source,
                destination,
            } => format!(
                "Copy {} to {} (start at {})",
                source.display_path(),
                device,
                format_size(destination.sector_start, destination.sector_size)
            ),
            Operation::Format { old, new, .. } => {
                format!("Format {} as {}", old.display_path(), new.fs)
            }
            Operation::Label { partition, .. } => match partition.label.as_deref() {
                Some(label) if !label.is_empty() => format!(
                    "Set file system label \"{}\" on {}",
                    label,
                    partition.display_path()
                ),
                _ => format!("Clear file system label on {}", partition.display_path()),
            },
            Operation::ChangeUuid { partition, .. } => format!(
                "Set a new random UUID on {}",
                partition.display_path()
            ),
            Operation::ToggleFlag {
                partition,
                flag,
                state,
                ..
            } => format!(
                "{} flag {} on {}",
                if *state { "Set" } else { "Clear" },
                flag,
                partition.display_path()
            ),
            Operation::CheckRepair { partition, .. } => format!(
                "Check and repair file system ({}) on {}",
                partition.fs,
                partition.display_path()
            ),
            Operation::SetPartitionType { partition, .. } => format!(
                "Set partition type on {} to {}",
                partition.display_path(),
                partition.fs
            ),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FsKind;

    fn part(start: u64, end: u64) -> Partition {
        Partition::new("/dev/sda", 1, PartitionKind::Primary, FsKind::Fat32, start, end, 512)
            .with_path("/dev/sda1")
    }

    #[test]
    fn classify_resize_actions() {
        let old = part(2048, 204_799);
        assert_eq!(ResizeAction::classify(&old, &part(2048, 104_857)), ResizeAction::Shrink);
        assert_eq!(ResizeAction::classify(&old, &part(4096, 206_847)), ResizeAction::MoveRight);
        assert_eq!(
            ResizeAction::classify(&old, &part(1024, 300_000)),
            ResizeAction::MoveLeftGrow
        );
        assert_eq!(ResizeAction::classify(&old, &old), ResizeAction::None);
    }

    #[test]
    fn shrink_description_names_sizes() {
        let op = Operation::ResizeMove {
            device: "/dev/sda".into(),
            old: part(2048, 206_847),
            new: part(2048, 104_447),
        };
        assert_eq!(op.description(), "Shrink /dev/sda1 from 100.00 MiB to 50.00 MiB");
        assert_eq!(op.kind(), OperationKind::ResizeMove);
    }

    #[test]
    fn operations_serialize_with_type_tag() {
        let op = Operation::CheckRepair {
            device: "/dev/sda".into(),
            partition: part(2048, 4095),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "check_repair");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn terminal_states() {
        assert!(!OperationState::Pending.is_terminal());
        assert!(!OperationState::Running.is_terminal());
        assert!(OperationState::Warning.is_terminal());
    }
}
