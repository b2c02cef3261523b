// SPDX-License-Identifier: GPL-3.0-only

//! Terminal output for devices, capabilities and running batches

use std::collections::HashMap;
use std::io::Write;

use partitions_engine::{BatchEvent, BatchReport};
use partitions_types::{
    DetailChange, DetailStatus, Device, FsCapabilities, OperationDetail, Partition, Support,
    format_bytes,
};

use crate::progress::ProgressMeter;

fn status_marker(status: DetailStatus) -> &'static str {
    match status {
        DetailStatus::Pending => " ",
        DetailStatus::Running => "…",
        DetailStatus::Success => "✓",
        DetailStatus::Warning => "!",
        DetailStatus::Error => "✗",
    }
}

pub fn print_device(device: &Device) {
    println!(
        "{}: {} ({} sectors of {} B), table {}",
        device.path(),
        format_bytes(device.geometry.byte_size()),
        device.length(),
        device.sector_size(),
        device
            .table_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "{:<4} {:<12} {:>12} {:>12} {:>10} {:<12} {:>10} {:<12} flags",
        "#", "kind", "start", "end", "size", "fs", "used", "label"
    );
    for partition in &device.partitions {
        print_partition(partition, "");
        for logical in &partition.logicals {
            print_partition(logical, "  ");
        }
    }
}

fn print_partition(partition: &Partition, indent: &str) {
    let number = partition
        .number
        .map(|n| n.to_string())
        .unwrap_or_default();
    let used = partition
        .sectors_used
        .map(|used| format_bytes(used * partition.sector_size))
        .unwrap_or_else(|| "-".to_string());
    let flags: Vec<String> = partition.flags.iter().map(|f| f.to_string()).collect();
    println!(
        "{}{:<4} {:<12} {:>12} {:>12} {:>10} {:<12} {:>10} {:<12} {}{}",
        indent,
        number,
        format!("{:?}", partition.kind).to_lowercase(),
        partition.sector_start,
        partition.sector_end,
        partition.display_size(),
        partition.fs,
        used,
        partition.label.as_deref().unwrap_or(""),
        flags.join(","),
        if partition.busy { " (busy)" } else { "" }
    );
}

fn support(value: Support) -> &'static str {
    match value {
        Support::None => "-",
        Support::Engine => "engine",
        Support::External => "tool",
    }
}

pub fn print_capabilities(capabilities: &[FsCapabilities]) {
    println!(
        "{:<11} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
        "fs", "create", "grow", "shrink", "move", "copy", "check", "label", "uuid"
    );
    for caps in capabilities {
        println!(
            "{:<11} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
            caps.kind.to_string(),
            support(caps.create),
            support(caps.grow),
            support(caps.shrink),
            support(caps.move_),
            support(caps.copy),
            support(caps.check),
            support(caps.write_label),
            support(caps.write_uuid)
        );
    }
}

/// Full detail tree, outputs included.
pub fn print_detail(detail: &OperationDetail, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{} {}", indent, status_marker(detail.status), detail.description);
    for line in &detail.output {
        println!("{}    {}", indent, line);
    }
    if let Some(progress) = &detail.progress {
        println!("{}    {}", indent, progress.final_summary());
    }
    for child in &detail.children {
        print_detail(child, depth + 1);
    }
}

pub fn print_report(report: &BatchReport) {
    for (index, result) in report.results.iter().enumerate() {
        println!("[{}] {}: {}", index + 1, result.state, result.description);
    }
    if let Some(failed) = report.failure() {
        println!();
        print_detail(&failed.detail, 0);
    }
}

/// Prints a running batch from its event stream: one line per step, a
/// live progress line for block copies, outputs when verbose.
#[derive(Debug)]
pub struct EventPrinter {
    total: usize,
    verbose: bool,
    meters: HashMap<(usize, Vec<usize>), ProgressMeter>,
    progress_shown: bool,
}

impl EventPrinter {
    pub fn new(total: usize, verbose: bool) -> Self {
        Self {
            total,
            verbose,
            meters: HashMap::new(),
            progress_shown: false,
        }
    }

    fn end_progress_line(&mut self) {
        if self.progress_shown {
            eprintln!();
            self.progress_shown = false;
        }
    }

    pub fn on_event(&mut self, event: BatchEvent) {
        match event {
            BatchEvent::Started { index, description } => {
                self.end_progress_line();
                println!("[{}/{}] {}", index + 1, self.total, description);
            }
            BatchEvent::Finished { index, state } => {
                self.end_progress_line();
                println!("[{}/{}] {}", index + 1, self.total, state);
            }
            BatchEvent::Detail { index, event } => match event.change {
                DetailChange::ChildAdded { description, .. } => {
                    self.end_progress_line();
                    println!("{}{}", "  ".repeat(event.path.len() + 1), description);
                }
                DetailChange::Output { text } if self.verbose => {
                    self.end_progress_line();
                    println!("{}    {}", "  ".repeat(event.path.len()), text);
                }
                DetailChange::Status { status, .. }
                    if matches!(status, DetailStatus::Warning | DetailStatus::Error)
                        && !event.path.is_empty() =>
                {
                    self.end_progress_line();
                    println!("{}{} {:?}", "  ".repeat(event.path.len()), status_marker(status), status);
                }
                DetailChange::Progress { progress } => {
                    let meter = self.meters.entry((index, event.path)).or_default();
                    if let Some(line) = meter.update(&progress) {
                        eprint!("\r    {}", line);
                        let _ = std::io::stderr().flush();
                        self.progress_shown = true;
                    }
                }
                _ => {}
            },
        }
    }

    pub fn finish(&mut self) {
        self.end_progress_line();
    }
}
