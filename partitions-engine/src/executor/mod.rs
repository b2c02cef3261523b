// SPDX-License-Identifier: GPL-3.0-only

//! Operation executor
//!
//! [`Executor::run`] takes one [`Operation`], opens its device, routes it to
//! the matching procedure and leaves the whole story in the operation's
//! [`OperationDetail`] tree. Every procedure re-reads the table through the
//! open session instead of trusting the geometry carried by the request.
//!
//! Failures stop the procedure at the failing step. Whatever was committed
//! before stays committed; only the copy engine undoes its own work.

mod check;
mod copy;
mod create;
mod delete;
mod flags;
mod format;
mod label;
mod resize;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use partitions_contracts::{DiskBackend, DiskSession, EngineError, FileSystemDriver, Result};
use partitions_sys::SysBackend;
use partitions_types::{
    DetailStatus, Device, FsAction, FsKind, Operation, OperationDetail, OperationState,
    Partition, PartitionTable, TableType, format_bytes, format_size,
};

use crate::config::EngineConfig;
use crate::device;
use crate::registry::Registry;

/// Runs operations against the devices of one backend.
#[derive(Clone)]
pub struct Executor {
    backend: Arc<dyn DiskBackend>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(backend: Arc<dyn DiskBackend>, registry: Arc<Registry>, config: EngineConfig) -> Self {
        Self {
            backend,
            registry,
            config,
        }
    }

    /// Real devices, with drivers for the tools installed on this host.
    pub fn system(config: EngineConfig) -> Self {
        let backend = Arc::new(SysBackend::new(config.settle_timeout()));
        Self::new(backend, Arc::new(Registry::probe()), config)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read the current layout of `path`, usage included.
    pub fn read_device(&self, path: &str) -> Result<Device> {
        let session = self.backend.open(path)?;
        Ok(device::read(session.as_ref(), self.backend.as_ref(), &self.registry))
    }

    /// Partitions inside an open encrypted container, read fresh.
    pub fn contained_partitions(&self, partition: &Partition) -> Result<Option<Vec<Partition>>> {
        device::contained_partitions(self.backend.as_ref(), &self.registry, partition)
    }

    /// Write an empty partition table of `table_type` to `path`. Every
    /// partition on the device is lost.
    pub fn set_disklabel(
        &self,
        path: &str,
        table_type: TableType,
        detail: &mut OperationDetail,
    ) -> Result<()> {
        detail.set_status(DetailStatus::Running);
        let result = self.backend.open(path).and_then(|mut session| {
            step(
                detail,
                format!("create empty partition table ({}) on {}", table_type, path),
                |_| {
                    session.set_disklabel(table_type)?;
                    session.commit()
                },
            )
        });
        finish(detail, &result);
        result
    }

    /// Run one operation to a terminal state.
    ///
    /// The root of `detail` goes `Running` and then `Success`, `Warning`
    /// (some step warned) or `Error`.
    pub fn run(
        &self,
        operation: &Operation,
        detail: &mut OperationDetail,
        cancel: &CancellationToken,
    ) -> std::result::Result<OperationState, EngineError> {
        let description = operation.description();
        tracing::info!("Starting: {}", description);
        detail.set_status(DetailStatus::Running);

        let result = if cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            self.execute(operation, detail, cancel)
        };
        let state = finish(detail, &result);
        match &result {
            Ok(()) => tracing::info!("Finished ({}): {}", state, description),
            Err(e) => tracing::error!("Failed: {}: {}", description, e),
        }
        result.map(|()| state)
    }

    fn execute(
        &self,
        operation: &Operation,
        detail: &mut OperationDetail,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut ctx = Context::open(self, operation.device(), cancel)?;
        match operation {
            Operation::Create { partition, .. } => create::create(&mut ctx, partition, detail),
            Operation::Delete { partition, .. } => delete::delete(&mut ctx, partition, detail),
            Operation::ResizeMove { old, new, .. } => resize::resize_move(&mut ctx, old, new, detail),
            Operation::Copy {
                source,
                destination,
                ..
            } => copy::copy(&mut ctx, source, destination, detail),
            Operation::Format { old, new, .. } => format::format(&mut ctx, old, new, detail),
            Operation::Label { partition, .. } => label::write_label(&mut ctx, partition, detail),
            Operation::ChangeUuid { partition, .. } => label::change_uuid(&mut ctx, partition, detail),
            Operation::ToggleFlag {
                partition,
                flag,
                state,
                ..
            } => flags::toggle_flag(&mut ctx, partition, *flag, *state, detail),
            Operation::CheckRepair { partition, .. } => check::check_repair(&mut ctx, partition, detail),
            Operation::SetPartitionType { partition, .. } => {
                flags::change_partition_type(&mut ctx, partition, detail)
            }
        }
    }
}

/// Terminal state for `result`, written to the root of `detail`.
fn finish(detail: &mut OperationDetail, result: &Result<()>) -> OperationState {
    let (status, state) = match result {
        Ok(()) if detail.children.iter().any(|c| {
            c.contains_status(DetailStatus::Warning) || c.contains_status(DetailStatus::Error)
        }) =>
        {
            (DetailStatus::Warning, OperationState::Warning)
        }
        Ok(()) => (DetailStatus::Success, OperationState::Success),
        Err(e) => {
            detail.add_output(e.to_string());
            (DetailStatus::Error, OperationState::Error)
        }
    };
    detail.set_status(status);
    state
}

/// Run `body` as a new sub-step of `detail`.
///
/// The step ends `Success` unless `body` already gave it a terminal status;
/// on error the message is attached unless a nested step reported it.
pub(crate) fn step<T, F>(detail: &mut OperationDetail, description: impl Into<String>, body: F) -> Result<T>
where
    F: FnOnce(&mut OperationDetail) -> Result<T>,
{
    let child = detail.add_child(description);
    let result = body(child);
    match &result {
        Ok(_) => {
            if !child.status.is_terminal() {
                child.set_status(DetailStatus::Success);
            }
        }
        Err(e) => {
            if !child.contains_status(DetailStatus::Error) {
                child.add_output(e.to_string());
            }
            child.set_status(DetailStatus::Error);
        }
    }
    result
}

/// Record a step that was skipped with a warning.
pub(crate) fn warn(detail: &mut OperationDetail, description: impl Into<String>, text: impl Into<String>) {
    let description = description.into();
    let text = text.into();
    tracing::warn!("{}: {}", description, text);
    let child = detail.add_child(description);
    child.add_output(text);
    child.set_status(DetailStatus::Warning);
}

/// Start, end and size lines for a detail step.
pub(crate) fn geometry_lines(detail: &mut OperationDetail, prefix: &str, partition: &Partition) {
    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{} ", prefix)
    };
    detail.add_output(format!("{}start: {}", prefix, partition.sector_start));
    detail.add_output(format!("{}end: {}", prefix, partition.sector_end));
    detail.add_output(format!(
        "{}size: {} ({})",
        prefix,
        partition.sector_length(),
        format_size(partition.sector_length(), partition.sector_size)
    ));
}

/// One partition with new boundaries and everything else unchanged.
pub(crate) fn with_geometry(partition: &Partition, start: u64, end: u64) -> Partition {
    let mut moved = partition.clone();
    moved.sector_start = start;
    moved.sector_end = end;
    moved
}

/// State shared by the procedures of one operation: the open device and
/// the engine's registry and tuning.
pub(crate) struct Context<'a> {
    pub backend: &'a dyn DiskBackend,
    pub registry: &'a Registry,
    pub config: &'a EngineConfig,
    pub cancel: &'a CancellationToken,
    pub session: Box<dyn DiskSession>,
}

impl<'a> Context<'a> {
    fn open(executor: &'a Executor, path: &str, cancel: &'a CancellationToken) -> Result<Self> {
        let session = executor.backend.open(path)?;
        if session.geometry().readonly {
            return Err(EngineError::InvalidInput(format!("{} is read-only", path)));
        }
        Ok(Self {
            backend: executor.backend.as_ref(),
            registry: &executor.registry,
            config: &executor.config,
            cancel,
            session,
        })
    }

    pub fn device_path(&self) -> String {
        self.session.geometry().path.clone()
    }

    pub fn table(&self) -> Result<&PartitionTable> {
        let path = &self.session.geometry().path;
        self.session
            .table()
            .ok_or_else(|| EngineError::InvalidInput(format!("{} has no partition table", path)))
    }

    pub fn table_mut(&mut self) -> Result<&mut PartitionTable> {
        let path = self.session.geometry().path.clone();
        self.session
            .table_mut()
            .ok_or_else(|| EngineError::InvalidInput(format!("{} has no partition table", path)))
    }

    /// Current layout of the open device, without usage.
    pub fn layout(&self) -> Device {
        device::layout(self.session.as_ref(), self.backend)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.session.commit()
    }

    pub fn driver(&self, fs: FsKind, action: FsAction) -> Result<Arc<dyn FileSystemDriver>> {
        self.registry.lookup(fs, action)
    }

    /// Refresh `partition` from the live table: path, exact boundaries,
    /// kind and usage. Fails when the entry no longer exists.
    pub fn calibrate(&self, partition: &Partition, detail: &mut OperationDetail) -> Result<Partition> {
        let number = partition.number.ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "{} is not a partition table entry",
                partition.display_path()
            ))
        })?;
        step(detail, format!("calibrate {}", partition.display_path()), |step| {
            let table = self.table()?;
            let entry = table.entry(number).ok_or_else(|| {
                EngineError::DeviceNotFound(format!(
                    "partition #{} no longer exists on {}",
                    number,
                    self.device_path()
                ))
            })?;
            let mut fresh = device::from_entry(self.session.as_ref(), self.backend, table, entry);
            fresh.busy = device::is_busy(self.backend, &fresh.path);
            device::read_usage(self.registry, &mut fresh);
            step.add_output(format!("path: {}", fresh.path));
            geometry_lines(step, "", &fresh);
            Ok(fresh)
        })
    }

    /// Refuse to touch a partition the system is using.
    pub fn ensure_idle(&self, partition: &Partition) -> Result<()> {
        if partition.busy {
            return Err(EngineError::DeviceBusy(format!(
                "{} is mounted or in use",
                partition.display_path()
            )));
        }
        Ok(())
    }

    /// Refuse sizes the filesystem's tools do not accept.
    pub fn ensure_size(&self, fs: FsKind, partition: &Partition) -> Result<()> {
        let caps = self.registry.capabilities(fs);
        let bytes = partition.byte_length();
        if let Some(min) = caps.min_size.filter(|min| bytes < *min) {
            return Err(EngineError::InvalidInput(format!(
                "A {} file system requires a partition of at least {}",
                fs,
                format_bytes(min)
            )));
        }
        if let Some(max) = caps.max_size.filter(|max| bytes > *max) {
            return Err(EngineError::InvalidInput(format!(
                "A {} file system cannot be larger than {}",
                fs,
                format_bytes(max)
            )));
        }
        Ok(())
    }

    /// Wipe signatures in the range of `partition`.
    pub fn erase_signatures(&mut self, partition: &Partition, detail: &mut OperationDetail) -> Result<()> {
        step(
            detail,
            format!("clear old file system signatures in {}", partition.display_path()),
            |_| {
                self.session
                    .erase_signatures(partition.sector_start, partition.sector_length())
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_marks_success_and_keeps_warning() {
        let mut detail = OperationDetail::new("root");
        step(&mut detail, "ok", |_| Ok(())).unwrap();
        step(&mut detail, "warned", |s| {
            s.set_status(DetailStatus::Warning);
            Ok(())
        })
        .unwrap();
        assert_eq!(detail.children[0].status, DetailStatus::Success);
        assert_eq!(detail.children[1].status, DetailStatus::Warning);
        assert_eq!(finish(&mut detail, &Ok(())), OperationState::Warning);
    }

    #[test]
    fn failed_step_records_error_once() {
        let mut detail = OperationDetail::new("root");
        let result: Result<()> = step(&mut detail, "outer", |outer| {
            step(outer, "inner", |_| Err(EngineError::Io("short write".into())))
        });
        assert!(result.is_err());
        let outer = &detail.children[0];
        assert_eq!(outer.status, DetailStatus::Error);
        assert!(outer.output.is_empty());
        assert_eq!(outer.children[0].output, vec!["I/O error: short write"]);

        assert_eq!(finish(&mut detail, &result), OperationState::Error);
        assert_eq!(detail.status, DetailStatus::Error);
    }
}
