// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{CancelOnProgress, Lab, OpenDuringProgress, find, planned};
use partitions_contracts::{DiskBackend, EngineError};
use partitions_testing::{ImageSpec, JournalEntry};
use partitions_types::{
    Alignment, FsAction, FsKind, Operation, OperationDetail, OperationState, PartitionFlag,
    PartitionKind, TableType,
};

fn run(lab: &Lab, operation: &Operation) -> (Result<OperationState, EngineError>, OperationDetail) {
    let mut detail = OperationDetail::new(operation.description());
    let result = lab.executor.run(operation, &mut detail, &CancellationToken::new());
    (result, detail)
}

const BLANK_DISK: &str = r#"
    length = 65536
    table = "msdos"
"#;

const ONE_PARTITION: &str = r#"
    length = 65536
    table = "msdos"

    [[partitions]]
    kind = "primary"
    start = 2048
    end = 10239
    fs = "ext4"
    used = 1000
    label = "home"
"#;

#[test]
fn create_commits_then_wipes_then_formats() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let mut partition = planned(&lab.path(), FsKind::Ext4, 2048, 10_239, Alignment::Mebibyte);
    partition.label = Some("data".into());

    let (result, detail) = run(
        &lab,
        &Operation::Create {
            device: lab.path(),
            partition,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));
    assert!(find(&detail, "create empty partition").is_some());

    let entries = lab.journal.entries();
    assert!(matches!(entries[0], JournalEntry::Commit { .. }));
    assert_eq!(
        entries[1],
        JournalEntry::Erase {
            device: lab.path(),
            start: 2048,
            length: 8192,
        }
    );
    assert!(matches!(
        entries[2],
        JournalEntry::Driver {
            action: FsAction::Create,
            start: 2048,
            end: 10_239,
            ..
        }
    ));

    let created = lab.partition(1);
    assert_eq!(created.fs, FsKind::Ext4);
    assert_eq!(created.label.as_deref(), Some("data"));
    assert_eq!(lab.backend.table(&lab.path()).unwrap().entries()[0].type_code, "83");
}

#[test]
fn create_without_driver_changes_nothing() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let partition = planned(&lab.path(), FsKind::Xfs, 2048, 10_239, Alignment::Mebibyte);

    let (result, _) = run(
        &lab,
        &Operation::Create {
            device: lab.path(),
            partition,
        },
    );
    assert_eq!(
        result,
        Err(EngineError::capability_missing(FsKind::Xfs, FsAction::Create))
    );
    assert_eq!(lab.journal.commits(), 0);
}

#[test]
fn create_on_a_busy_device_fails() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let _held = lab.backend.open(&lab.path()).unwrap();
    let partition = planned(&lab.path(), FsKind::Ext4, 2048, 10_239, Alignment::Mebibyte);

    let (result, detail) = run(
        &lab,
        &Operation::Create {
            device: lab.path(),
            partition,
        },
    );
    assert!(matches!(result, Err(EngineError::DeviceBusy(_))));
    assert_eq!(detail.status, partitions_types::DetailStatus::Error);
}

#[test]
fn deleting_a_logical_renumbers_the_rest() {
    let layout = r#"
        length = 204800
        table = "msdos"

        [[partitions]]
        kind = "extended"
        start = 2048
        end = 204799

        [[partitions]]
        kind = "logical"
        start = 4096
        end = 8191
        fs = "ext4"

        [[partitions]]
        kind = "logical"
        start = 10240
        end = 20479
        fs = "ext4"
    "#;
    let lab = Lab::new(layout, &[FsKind::Ext4]);
    let partition = lab.partition(5);

    let (result, _) = run(
        &lab,
        &Operation::Delete {
            device: lab.path(),
            partition,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));

    let device = lab.executor.read_device(&lab.path()).unwrap();
    let remaining = device.partition(5).expect("second logical renumbered");
    assert_eq!(remaining.sector_start, 10_240);
    assert!(device.partition(6).is_none());
    assert_eq!(lab.journal.driver_actions(), vec![FsAction::Remove]);
}

#[test]
fn format_replaces_the_filesystem_and_type() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4, FsKind::Fat32]);
    let old = lab.partition(1);
    let mut new = old.clone();
    new.fs = FsKind::Fat32;
    new.label = Some("USB".into());

    let (result, _) = run(
        &lab,
        &Operation::Format {
            device: lab.path(),
            old,
            new,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));

    let formatted = lab.partition(1);
    assert_eq!(formatted.fs, FsKind::Fat32);
    assert_eq!(formatted.label.as_deref(), Some("USB"));
    assert_eq!(lab.backend.table(&lab.path()).unwrap().entries()[0].type_code, "c");
}

#[test]
fn format_to_cleared_only_wipes() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let old = lab.partition(1);
    let mut new = old.clone();
    new.fs = FsKind::Cleared;

    let (result, _) = run(
        &lab,
        &Operation::Format {
            device: lab.path(),
            old,
            new,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));
    assert!(lab.image.read_signature(2048).unwrap().is_none());
    assert!(lab.journal.driver_actions().is_empty());
    assert_eq!(lab.journal.commits(), 0);
}

#[test]
fn label_uuid_and_flag_changes() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let mut partition = lab.partition(1);
    partition.label = Some("backup".into());

    let (result, detail) = run(
        &lab,
        &Operation::Label {
            device: lab.path(),
            partition: partition.clone(),
        },
    );
    assert_eq!(result, Ok(OperationState::Success));
    assert!(find(
        &detail,
        &format!("set file system label to \"backup\" on {}", partition.display_path())
    )
    .is_some());

    let (result, _) = run(
        &lab,
        &Operation::ChangeUuid {
            device: lab.path(),
            partition: partition.clone(),
        },
    );
    assert_eq!(result, Ok(OperationState::Success));

    let (result, _) = run(
        &lab,
        &Operation::ToggleFlag {
            device: lab.path(),
            partition,
            flag: PartitionFlag::Boot,
            state: true,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));

    let changed = lab.partition(1);
    assert_eq!(changed.label.as_deref(), Some("backup"));
    assert_eq!(changed.uuid.as_deref(), Some("fake-00000800"));
    assert!(changed.flags.contains(&PartitionFlag::Boot));
}

#[test]
fn unavailable_flag_is_invalid() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let partition = lab.partition(1);

    let (result, _) = run(
        &lab,
        &Operation::ToggleFlag {
            device: lab.path(),
            partition,
            flag: PartitionFlag::BiosGrub,
            state: true,
        },
    );
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
}

#[test]
fn check_repair_checks_then_grows() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let partition = lab.partition(1);

    let (result, _) = run(
        &lab,
        &Operation::CheckRepair {
            device: lab.path(),
            partition,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));
    assert_eq!(lab.journal.driver_actions(), vec![FsAction::Check, FsAction::Grow]);
}

#[test]
fn set_partition_type_follows_the_filesystem() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let mut partition = lab.partition(1);
    partition.fs = FsKind::LinuxSwap;

    let (result, detail) = run(
        &lab,
        &Operation::SetPartitionType {
            device: lab.path(),
            partition,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));
    assert_eq!(lab.backend.table(&lab.path()).unwrap().entries()[0].type_code, "82");
    let step = find(&detail, &format!("set partition type on {}", lab.partition(1).display_path())).unwrap();
    assert_eq!(step.output, vec!["new partition type: 82"]);
}

#[test]
fn vanished_partition_fails_calibration() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let mut partition = lab.partition(1);
    partition.number = Some(3);

    let (result, detail) = run(
        &lab,
        &Operation::CheckRepair {
            device: lab.path(),
            partition,
        },
    );
    assert!(matches!(result, Err(EngineError::DeviceNotFound(_))));
    assert_eq!(detail.children.len(), 1);
    assert!(detail.children[0].description.starts_with("calibrate"));
}

#[test]
fn new_disklabel_drops_every_partition() {
    let lab = Lab::new(ONE_PARTITION, &[FsKind::Ext4]);
    let mut detail = OperationDetail::new("new table");

    lab.executor
        .set_disklabel(&lab.path(), TableType::Gpt, &mut detail)
        .unwrap();

    let table = lab.backend.table(&lab.path()).unwrap();
    assert_eq!(table.table_type, TableType::Gpt);
    assert!(table.entries().is_empty());
    assert_eq!(detail.status, partitions_types::DetailStatus::Success);
}

const COPY_DISK: &str = r#"
    length = 65536
    table = "msdos"

    [[partitions]]
    kind = "primary"
    start = 32768
    end = 40959
    fs = "ext4"
    used = 1000
    label = "src"
"#;

fn copy_operation(lab: &Lab, source_number: u32, start: u64, end: u64) -> Operation {
    let source = lab.partition(source_number);
    let mut destination = planned(&lab.path(), source.fs, start, end, Alignment::Mebibyte);
    destination.status = partitions_types::PartitionStatus::Copy;
    Operation::Copy {
        device: lab.path(),
        source,
        destination,
    }
}

#[test]
fn copy_into_a_larger_partition_grows_the_copy() {
    let lab = Lab::new(COPY_DISK, &[FsKind::Ext4]);
    let signature = lab.image.read_signature(32_768).unwrap().unwrap();
    lab.image.fill_pattern(32_768, 8192, 0x3c).unwrap();
    lab.image.write_signature(32_768, &signature).unwrap();

    let operation = copy_operation(&lab, 1, 2048, 20_479);
    let (result, detail) = run(&lab, &operation);
    assert_eq!(result, Ok(OperationState::Success));
    assert!(find(&detail, "grow file system to fill the partition").is_some());

    assert_eq!(
        lab.image.read_region(2049, 8191).unwrap(),
        lab.image.read_region(32_769, 8191).unwrap()
    );
    let copy = lab.partition(2);
    assert_eq!((copy.sector_start, copy.sector_end), (2048, 20_479));
    assert_eq!(copy.fs, FsKind::Ext4);
    assert_eq!(copy.label.as_deref(), Some("src"));
    assert_eq!(copy.sectors_used, Some(1000));
    assert_eq!(lab.image.read_signature(2048).unwrap().unwrap().fs_sectors, 18_432);
}

#[test]
fn copy_into_a_smaller_region_is_refused() {
    let lab = Lab::new(COPY_DISK, &[FsKind::Ext4]);

    let (result, _) = run(&lab, &copy_operation(&lab, 1, 2048, 4095));
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
    assert_eq!(lab.journal.commits(), 0);
}

#[test]
fn interrupted_copy_leaves_the_destination_unallocated() {
    let lab = Lab::new(COPY_DISK, &[FsKind::Ext4]);
    let operation = copy_operation(&lab, 1, 2048, 10_239);

    let cancel = CancellationToken::new();
    let mut detail = OperationDetail::with_listener(
        operation.description(),
        Arc::new(CancelOnProgress::after(cancel.clone(), "copy file system of", 1)),
    );
    let result = lab.executor.run(&operation, &mut detail, &cancel);

    assert_eq!(result, Err(EngineError::Cancelled));
    let cleanup = detail
        .children
        .iter()
        .find(|c| c.description.starts_with("remove partially copied partition"))
        .expect("cleanup step");
    assert_eq!(cleanup.status, partitions_types::DetailStatus::Success);

    let table = lab.backend.table(&lab.path()).unwrap();
    assert_eq!(table.entries().len(), 1);
    assert_eq!(table.entries()[0].start, 32_768);
    assert!(lab.image.read_signature(2048).unwrap().is_none());

    let device = lab.executor.read_device(&lab.path()).unwrap();
    let region = device
        .partitions
        .iter()
        .find(|p| p.sector_start <= 2048 && 2048 <= p.sector_end)
        .unwrap();
    assert_eq!(region.kind, PartitionKind::Unallocated);
    assert_eq!(region.fs, FsKind::Unallocated);
}

#[test]
fn copy_from_another_device() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let other = ImageSpec::from_toml(COPY_DISK).unwrap().build(&lab.backend).unwrap();
    let source = lab
        .executor
        .read_device(other.path())
        .unwrap()
        .partition(1)
        .cloned()
        .unwrap();
    let destination = planned(&lab.path(), FsKind::Ext4, 2048, 10_239, Alignment::Mebibyte);

    let (result, _) = run(
        &lab,
        &Operation::Copy {
            device: lab.path(),
            source,
            destination,
        },
    );
    assert_eq!(result, Ok(OperationState::Success));
    assert!(!lab.backend.is_open(other.path()));
    let copy = lab.partition(1);
    assert_eq!(copy.fs, FsKind::Ext4);
    assert_eq!(copy.label.as_deref(), Some("src"));
}

#[test]
fn copy_from_another_device_holds_the_source_until_done() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let other = ImageSpec::from_toml(COPY_DISK).unwrap().build(&lab.backend).unwrap();
    let source = lab
        .executor
        .read_device(other.path())
        .unwrap()
        .partition(1)
        .cloned()
        .unwrap();
    let destination = planned(&lab.path(), FsKind::Ext4, 2048, 10_239, Alignment::Mebibyte);
    let operation = Operation::Copy {
        device: lab.path(),
        source,
        destination,
    };

    let watcher = Arc::new(OpenDuringProgress::new(lab.backend.clone(), other.path()));
    let mut detail = OperationDetail::with_listener(operation.description(), watcher.clone());
    let result = lab.executor.run(&operation, &mut detail, &CancellationToken::new());

    assert_eq!(result, Ok(OperationState::Success));
    let seen = watcher.seen();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|open| *open));
    assert!(!lab.backend.is_open(other.path()));
}

const OPEN_CONTAINER: &str = r#"
    length = 65536
    table = "msdos"

    [[partitions]]
    kind = "primary"
    start = 2048
    end = 20479
    fs = "luks"
    used = 18432
"#;

#[test]
fn open_crypt_container_is_busy() {
    let lab = Lab::new(OPEN_CONTAINER, &[FsKind::Luks, FsKind::Ext4]);
    let container = lab.partition(1);
    assert!(!container.busy);
    lab.backend.hold(&container.path, "dm-0");

    let device = lab.executor.read_device(&lab.path()).unwrap();
    assert!(device.partition(1).unwrap().busy);

    let (result, _) = run(
        &lab,
        &Operation::Delete {
            device: lab.path(),
            partition: container.clone(),
        },
    );
    assert!(matches!(result, Err(EngineError::DeviceBusy(_))));

    let mut new = container.clone();
    new.fs = FsKind::Ext4;
    let (result, _) = run(
        &lab,
        &Operation::Format {
            device: lab.path(),
            old: container,
            new,
        },
    );
    assert!(matches!(result, Err(EngineError::DeviceBusy(_))));
    assert!(lab.journal.driver_actions().is_empty());
    assert_eq!(lab.journal.commits(), 0);
}
