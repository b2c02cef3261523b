// SPDX-License-Identifier: GPL-3.0-only

//! Fixtures shared by the engine integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use partitions_engine::{EngineConfig, Executor, Registry};
use partitions_testing::{DiskImage, FakeDriver, ImageSpec, Journal, MemoryBackend};
use partitions_types::{
    Alignment, DetailChange, DetailEvent, DetailListener, FsKind, OperationDetail, Partition,
    PartitionKind, PartitionStatus, Sector,
};

/// One disk image behind a memory backend, with fake drivers for `kinds`.
pub struct Lab {
    pub backend: MemoryBackend,
    pub journal: Journal,
    pub image: DiskImage,
    pub executor: Executor,
}

impl Lab {
    pub fn new(layout: &str, kinds: &[FsKind]) -> Self {
        Self::with_config(layout, kinds, test_config())
    }

    pub fn with_config(layout: &str, kinds: &[FsKind], config: EngineConfig) -> Self {
        let drivers = kinds
            .iter()
            .map(|kind| FakeDriver::new(*kind, Journal::new()))
            .collect();
        Self::with_drivers(layout, drivers, config)
    }

    /// Drivers are rebuilt on the lab's journal so every side effect lands
    /// in one place.
    pub fn with_drivers(layout: &str, drivers: Vec<FakeDriver>, config: EngineConfig) -> Self {
        let journal = Journal::new();
        let backend = MemoryBackend::with_journal(journal.clone());
        let image = ImageSpec::from_toml(layout)
            .expect("valid layout")
            .build(&backend)
            .expect("image builds");

        let registry = drivers
            .into_iter()
            .map(|driver| driver.with_journal(journal.clone()))
            .fold(Registry::empty(), |registry, driver| {
                registry.with_driver(Arc::new(driver))
            });
        let executor = Executor::new(Arc::new(backend.clone()), Arc::new(registry), config);
        Self {
            backend,
            journal,
            image,
            executor,
        }
    }

    pub fn path(&self) -> String {
        self.image.path().to_string()
    }

    /// Partition `number` as currently on disk, usage included.
    pub fn partition(&self, number: u32) -> Partition {
        self.executor
            .read_device(self.image.path())
            .expect("device reads")
            .partition(number)
            .cloned()
            .expect("partition exists")
    }
}

/// Small copy blocks so short regions still take several iterations.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        copy_block_size: 64 * 1024,
        ..EngineConfig::default()
    }
}

/// A planned partition of `fs` covering `start..=end`.
pub fn planned(device: &str, fs: FsKind, start: Sector, end: Sector, alignment: Alignment) -> Partition {
    let mut partition = Partition::new_unallocated(device, start, end, 512, false);
    partition.kind = PartitionKind::Primary;
    partition.status = PartitionStatus::New;
    partition.fs = fs;
    partition.alignment = alignment;
    partition
}

/// `partition` with new boundaries, kept exactly as given.
pub fn resized(partition: &Partition, start: Sector, end: Sector) -> Partition {
    let mut new = partition.clone();
    new.sector_start = start;
    new.sector_end = end;
    new.alignment = Alignment::Strict;
    new
}

/// First node of the tree described as `description`, depth first.
pub fn find<'a>(detail: &'a OperationDetail, description: &str) -> Option<&'a OperationDetail> {
    if detail.description == description {
        return Some(detail);
    }
    detail.children.iter().find_map(|child| find(child, description))
}

#[derive(Debug, Default)]
struct Seen {
    children: HashMap<Vec<usize>, usize>,
    target: Option<Vec<usize>>,
    progress: usize,
}

/// Cancels `token` after `after` progress updates of the first step whose
/// description starts with `prefix`.
#[derive(Debug)]
pub struct CancelOnProgress {
    token: CancellationToken,
    prefix: String,
    after: usize,
    seen: Mutex<Seen>,
}

impl CancelOnProgress {
    pub fn after(token: CancellationToken, prefix: &str, after: usize) -> Self {
        Self {
            token,
            prefix: prefix.to_string(),
            after,
            seen: Mutex::new(Seen::default()),
        }
    }
}

impl DetailListener for CancelOnProgress {
    fn on_event(&self, event: DetailEvent) {
        let mut seen = self.seen.lock().unwrap();
        match event.change {
            DetailChange::ChildAdded { description, .. } => {
                let count = seen.children.entry(event.path.clone()).or_default();
                let mut path = event.path;
                path.push(*count);
                *count += 1;
                if seen.target.is_none() && description.starts_with(&self.prefix) {
                    seen.target = Some(path);
                }
            }
            DetailChange::Progress { .. } if seen.target.as_ref() == Some(&event.path) => {
                seen.progress += 1;
                if seen.progress >= self.after {
                    self.token.cancel();
                }
            }
            _ => {}
        }
    }
}

/// Records whether `path` is held open each time any step reports progress.
#[derive(Debug)]
pub struct OpenDuringProgress {
    backend: MemoryBackend,
    path: String,
    seen: Mutex<Vec<bool>>,
}

impl OpenDuringProgress {
    pub fn new(backend: MemoryBackend, path: &str) -> Self {
        Self {
            backend,
            path: path.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<bool> {
        self.seen.lock().unwrap().clone()
    }
}

impl DetailListener for OpenDuringProgress {
    fn on_event(&self, event: DetailEvent) {
        if let DetailChange::Progress { .. } = event.change {
            let open = self.backend.is_open(&self.path);
            self.seen.lock().unwrap().push(open);
        }
    }
}
