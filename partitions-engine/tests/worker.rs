// SPDX-License-Identifier: GPL-3.0-only

mod common;

use tokio_util::sync::CancellationToken;

use common::{Lab, planned};
use partitions_contracts::ErrorKind;
use partitions_engine::{BatchEvent, Worker};
use partitions_types::{Alignment, FsKind, Operation, OperationKind, OperationState};

const BLANK_DISK: &str = r#"
    length = 65536
    table = "msdos"
"#;

fn two_creates(lab: &Lab) -> Vec<Operation> {
    [(2048, 10_239), (10_240, 20_479)]
        .into_iter()
        .map(|(start, end)| Operation::Create {
            device: lab.path(),
            partition: planned(&lab.path(), FsKind::Ext4, start, end, Alignment::Mebibyte),
        })
        .collect()
}

#[test]
fn batch_runs_in_order() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let worker = Worker::new(lab.executor.clone());

    let report = worker.run_blocking(&two_creates(&lab), &CancellationToken::new());

    assert!(report.succeeded());
    assert!(!report.cancelled);
    assert_eq!(report.count(OperationState::Success), 2);
    assert!(report.results.iter().all(|r| r.kind == OperationKind::Create));
    let device = lab.executor.read_device(&lab.path()).unwrap();
    assert_eq!(device.partition(1).unwrap().sector_start, 2048);
    assert_eq!(device.partition(2).unwrap().sector_start, 10_240);
}

#[test]
fn commit_timeout_stops_the_batch() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    lab.backend.fail_commits(&lab.path(), 1);
    let worker = Worker::new(lab.executor.clone());

    let report = worker.run_blocking(&two_creates(&lab), &CancellationToken::new());

    assert!(!report.succeeded());
    assert!(!report.cancelled);
    let failed = report.failure().expect("first create failed");
    assert_eq!(failed.description, report.results[0].description);
    assert_eq!(
        failed.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::CommitTimeout)
    );
    assert_eq!(report.results[1].state, OperationState::Pending);
    // The table write itself went through; only the settle timed out.
    assert_eq!(lab.backend.table(&lab.path()).unwrap().entries().len(), 1);
}

#[test]
fn cancel_before_start_leaves_everything_pending() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let worker = Worker::new(lab.executor.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = worker.run_blocking(&two_creates(&lab), &cancel);

    assert!(report.cancelled);
    assert_eq!(report.count(OperationState::Pending), 2);
    assert_eq!(lab.journal.commits(), 0);
}

#[tokio::test]
async fn submitted_batch_streams_events() {
    let lab = Lab::new(BLANK_DISK, &[FsKind::Ext4]);
    let worker = Worker::new(lab.executor.clone());

    let mut handle = worker.submit(two_creates(&lab));
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let status = handle.status();
    let report = handle.wait().await.unwrap();

    assert!(report.succeeded());
    assert_eq!(status, "Finished 2 operation(s)");
    assert!(matches!(events.first(), Some(BatchEvent::Started { index: 0, .. })));
    assert_eq!(
        events.last(),
        Some(&BatchEvent::Finished {
            index: 1,
            state: OperationState::Success,
        })
    );
    assert!(events.iter().any(|e| matches!(e, BatchEvent::Detail { index: 1, .. })));

    let second_started = events
        .iter()
        .position(|e| matches!(e, BatchEvent::Started { index: 1, .. }))
        .unwrap();
    assert!(events[..second_started].contains(&BatchEvent::Finished {
        index: 0,
        state: OperationState::Success,
    }));
}
