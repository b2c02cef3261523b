// SPDX-License-Identifier: GPL-3.0-only

mod common;

use tokio_util::sync::CancellationToken;

use common::{Lab, find, resized};
use partitions_contracts::EngineError;
use partitions_testing::{FakeDriver, Journal, JournalEntry};
use partitions_types::{FsAction, FsKind, Operation, OperationDetail, OperationState, PartitionKind};

const FAT32_DISK: &str = r#"
    length = 204800
    table = "msdos"

    [[partitions]]
    kind = "primary"
    start = 2048
    end = 204799
    fs = "fat32"
    used = 40000
"#;

fn resize_move(lab: &Lab, number: u32, start: u64, end: u64) -> (Result<OperationState, EngineError>, OperationDetail) {
    let old = lab.partition(number);
    let operation = Operation::ResizeMove {
        device: lab.path(),
        new: resized(&old, start, end),
        old,
    };
    let mut detail = OperationDetail::new(operation.description());
    let result = lab.executor.run(&operation, &mut detail, &CancellationToken::new());
    (result, detail)
}

#[test]
fn shrink_runs_the_filesystem_before_the_table() {
    let lab = Lab::new(FAT32_DISK, &[FsKind::Fat32]);

    let (result, _) = resize_move(&lab, 1, 2048, 104_857);
    assert_eq!(result, Ok(OperationState::Success));

    let shrink = lab
        .journal
        .position(|e| matches!(e, JournalEntry::Driver { action: FsAction::Shrink, .. }))
        .expect("filesystem was shrunk");
    let commit = lab
        .journal
        .position(|e| matches!(e, JournalEntry::Commit { .. }))
        .expect("table was committed");
    assert!(shrink < commit);
    assert!(lab.journal.entries().contains(&JournalEntry::Driver {
        kind: FsKind::Fat32,
        action: FsAction::Shrink,
        start: 2048,
        end: 104_857,
    }));

    let device = lab.executor.read_device(&lab.path()).unwrap();
    let ranges: Vec<(PartitionKind, u64, u64)> = device
        .partitions
        .iter()
        .map(|p| (p.kind, p.sector_start, p.sector_end))
        .collect();
    assert_eq!(
        ranges,
        vec![
            (PartitionKind::Unallocated, 1, 2047),
            (PartitionKind::Primary, 2048, 104_857),
            (PartitionKind::Unallocated, 104_858, 204_799),
        ]
    );
    let signature = lab.image.read_signature(2048).unwrap().unwrap();
    assert_eq!(signature.fs_sectors, 104_857 - 2048 + 1);
}

#[test]
fn shrink_and_grow_back_keeps_used_sectors() {
    let lab = Lab::new(FAT32_DISK, &[FsKind::Fat32]);
    let before = lab.partition(1).sectors_used;
    assert_eq!(before, Some(40_000));

    let (result, _) = resize_move(&lab, 1, 2048, 104_857);
    assert_eq!(result, Ok(OperationState::Success));
    let (result, detail) = resize_move(&lab, 1, 2048, 204_799);
    assert_eq!(result, Ok(OperationState::Success));
    assert!(find(&detail, "grow file system to fill the partition").is_some());

    let after = lab.partition(1);
    assert_eq!(after.sector_end, 204_799);
    assert_eq!(after.sectors_used, before);
    assert_eq!(lab.image.read_signature(2048).unwrap().unwrap().fs_sectors, 202_752);
}

#[test]
fn failed_shrink_leaves_the_table_alone() {
    let journal = Journal::new();
    let driver = FakeDriver::new(FsKind::Fat32, journal).failing(FsAction::Shrink);
    let lab = Lab::with_drivers(FAT32_DISK, vec![driver], common::test_config());

    let (result, detail) = resize_move(&lab, 1, 2048, 104_857);
    assert!(matches!(result, Err(EngineError::DriverFailure { .. })));
    assert_eq!(lab.journal.commits(), 0);
    assert_eq!(lab.partition(1).sector_end, 204_799);
    let step = find(&detail, "shrink file system").expect("shrink step recorded");
    assert!(step.output.iter().any(|line| line.contains("injected failure")));
}

#[test]
fn shrink_below_used_space_is_refused_before_any_change() {
    let lab = Lab::new(FAT32_DISK, &[FsKind::Fat32]);

    let (result, _) = resize_move(&lab, 1, 2048, 20_000);
    assert!(matches!(result, Err(EngineError::AlignmentImpossible(_))));
    assert!(lab.journal.entries().is_empty());
}

#[test]
fn missing_shrink_support_is_reported() {
    let journal = Journal::new();
    let driver = FakeDriver::new(FsKind::Fat32, journal).without(FsAction::Shrink);
    let lab = Lab::with_drivers(FAT32_DISK, vec![driver], common::test_config());

    let (result, _) = resize_move(&lab, 1, 2048, 104_857);
    assert_eq!(
        result,
        Err(EngineError::capability_missing(FsKind::Fat32, FsAction::Shrink))
    );
    assert_eq!(lab.journal.commits(), 0);
}

#[test]
fn grow_without_driver_support_warns() {
    let layout = r#"
        length = 204800
        table = "msdos"

        [[partitions]]
        kind = "primary"
        start = 2048
        end = 104857
        fs = "ext4"
        used = 1000
    "#;
    let journal = Journal::new();
    let driver = FakeDriver::new(FsKind::Ext4, journal).without(FsAction::Grow);
    let lab = Lab::with_drivers(layout, vec![driver], common::test_config());

    let (result, detail) = resize_move(&lab, 1, 2048, 204_799);
    assert_eq!(result, Ok(OperationState::Warning));
    assert_eq!(lab.partition(1).sector_end, 204_799);
    assert!(find(&detail, "grow partition").is_some());
}

const MOVE_DISK: &str = r#"
    length = 65536
    table = "msdos"

    [[partitions]]
    kind = "primary"
    start = 2048
    end = 10239
    fs = "ext4"
    used = 2000
    label = "root"
"#;

#[test]
fn overlapping_move_keeps_the_data() {
    let lab = Lab::new(MOVE_DISK, &[FsKind::Ext4]);
    let signature = lab.image.read_signature(2048).unwrap().unwrap();
    lab.image.fill_pattern(2048, 8192, 0x5a).unwrap();
    lab.image.write_signature(2048, &signature).unwrap();
    let original = lab.image.read_region(2048, 8192).unwrap();

    let (result, detail) = resize_move(&lab, 1, 6144, 14_335);
    assert_eq!(result, Ok(OperationState::Success));

    assert_eq!(lab.image.read_region(6144, 8192).unwrap(), original);
    let moved = lab.partition(1);
    assert_eq!((moved.sector_start, moved.sector_end), (6144, 14_335));
    assert_eq!(moved.sectors_used, Some(2000));
    assert_eq!(moved.label.as_deref(), Some("root"));
    assert!(find(&detail, &format!("verify file system on {}", moved.path)).is_some());

    // The entry first covers both ranges, then only the new one.
    let spans: Vec<(u64, u64)> = lab
        .journal
        .entries()
        .into_iter()
        .filter_map(|e| match e {
            JournalEntry::Commit { entries, .. } => entries.first().map(|e| (e.start, e.end)),
            _ => None,
        })
        .collect();
    assert_eq!(spans, vec![(2048, 14_335), (6144, 14_335)]);
}

#[test]
fn simulation_and_real_move_copy_the_same_bytes() {
    let lab = Lab::new(MOVE_DISK, &[FsKind::Ext4]);

    let (result, detail) = resize_move(&lab, 1, 4096, 12_287);
    assert_eq!(result, Ok(OperationState::Success));

    let test = find(&detail, "perform read-only test").and_then(|d| d.progress);
    let real = find(&detail, "perform real move").and_then(|d| d.progress);
    let (test, real) = (test.expect("simulated"), real.expect("moved"));
    assert_eq!(test.bytes_total, real.bytes_total);
    assert_eq!(test.bytes_done, real.bytes_done);
    assert_eq!(real.bytes_total, 8192 * 512);
}

#[test]
fn move_with_resize_grows_after_moving() {
    let lab = Lab::new(MOVE_DISK, &[FsKind::Ext4]);

    let (result, _) = resize_move(&lab, 1, 20_480, 40_959);
    assert_eq!(result, Ok(OperationState::Success));

    let actions = lab.journal.driver_actions();
    let grow = actions.iter().position(|a| *a == FsAction::Grow).expect("grown");
    assert!(!actions[..grow].contains(&FsAction::Shrink));
    let moved = lab.partition(1);
    assert_eq!((moved.sector_start, moved.sector_end), (20_480, 40_959));
    assert_eq!(
        lab.image.read_signature(20_480).unwrap().unwrap().fs_sectors,
        40_959 - 20_480 + 1
    );
}

#[test]
fn move_with_shrink_shrinks_before_moving() {
    let lab = Lab::new(MOVE_DISK, &[FsKind::Ext4]);

    let (result, _) = resize_move(&lab, 1, 4096, 8191);
    assert_eq!(result, Ok(OperationState::Success));

    let shrink = lab
        .journal
        .position(|e| matches!(e, JournalEntry::Driver { action: FsAction::Shrink, .. }))
        .expect("shrunk");
    assert_eq!(
        lab.journal.entries()[shrink],
        JournalEntry::Driver {
            kind: FsKind::Ext4,
            action: FsAction::Shrink,
            start: 2048,
            end: 6143,
        }
    );
    let moved = lab.partition(1);
    assert_eq!((moved.sector_start, moved.sector_end), (4096, 8191));
    assert_eq!(moved.sectors_used, Some(2000));
}

#[test]
fn interrupted_move_is_rolled_back() {
    let lab = Lab::new(MOVE_DISK, &[FsKind::Ext4]);
    let signature = lab.image.read_signature(2048).unwrap().unwrap();
    lab.image.fill_pattern(2048, 8192, 0x11).unwrap();
    lab.image.write_signature(2048, &signature).unwrap();
    let original = lab.image.read_region(2048, 8192).unwrap();

    let old = lab.partition(1);
    let operation = Operation::ResizeMove {
        device: lab.path(),
        new: resized(&old, 4096, 12_287),
        old,
    };
    let cancel = CancellationToken::new();
    let mut detail = OperationDetail::with_listener(
        operation.description(),
        std::sync::Arc::new(common::CancelOnProgress::after(cancel.clone(), "perform real move", 40)),
    );
    let result = lab.executor.run(&operation, &mut detail, &cancel);

    assert_eq!(result, Err(EngineError::Cancelled));
    assert!(find(&detail, "rollback last transaction").is_some());
    assert!(find(&detail, "rollback last change to the partition table").is_some());
    assert_eq!(lab.image.read_region(2048, 8192).unwrap(), original);
    let entry = lab.partition(1);
    assert_eq!((entry.sector_start, entry.sector_end), (2048, 10_239));
}
