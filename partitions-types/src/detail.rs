// SPDX-License-Identifier: GPL-3.0-only

//! Progress tree written by the engine
//!
//! Each top-level operation owns one [`OperationDetail`] root. The engine
//! appends children and updates their status and text while the operation
//! runs. When a [`DetailListener`] is attached every change is also emitted as
//! a [`DetailEvent`], which lets another thread keep a mirror of the tree with
//! [`OperationDetail::apply`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{format_bytes, format_bytes_exact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailStatus {
    #[default]
    Pending,
    Running,
    Success,
    Warning,
    Error,
}

impl DetailStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DetailStatus::Success | DetailStatus::Warning | DetailStatus::Error
        )
    }
}

/// Byte progress of a block copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub elapsed_ms: u64,
}

impl CopyProgress {
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 1.0;
        }
        self.bytes_done as f64 / self.bytes_total as f64
    }

    /// Linear estimate of the time left.
    pub fn remaining(&self) -> Option<Duration> {
        if self.bytes_done == 0 || self.bytes_done >= self.bytes_total {
            return None;
        }
        let per_byte = self.elapsed_ms as f64 / self.bytes_done as f64;
        let left = (self.bytes_total - self.bytes_done) as f64 * per_byte;
        Some(Duration::from_millis(left as u64))
    }

    /// "X of Y copied (hh:mm:ss remaining)"
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} of {} copied",
            format_bytes(self.bytes_done),
            format_bytes(self.bytes_total)
        );
        if let Some(left) = self.remaining() {
            text.push_str(&format!(" ({} remaining)", format_duration(left)));
        }
        text
    }

    /// "X (N B) copied", used once a copy is finished.
    pub fn final_summary(&self) -> String {
        format!(
            "{} ({}) copied",
            format_bytes(self.bytes_done),
            format_bytes_exact(self.bytes_done)
        )
    }
}

/// Format as `hh:mm:ss`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// A change to a node of the tree, addressed by child indices from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailEvent {
    pub path: Vec<usize>,
    pub change: DetailChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum DetailChange {
    ChildAdded {
        description: String,
        at: DateTime<Utc>,
    },
    Status {
        status: DetailStatus,
        at: DateTime<Utc>,
    },
    Output {
        text: String,
    },
    Progress {
        progress: CopyProgress,
    },
}

/// Receives every change made to a tree it is attached to.
pub trait DetailListener: Send + Sync + fmt::Debug {
    fn on_event(&self, event: DetailEvent);
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OperationDetail {
    pub description: String,
    pub status: DetailStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Free text attached to this step (command lines, tool output).
    #[serde(default)]
    pub output: Vec<String>,

    pub progress: Option<CopyProgress>,

    #[serde(default)]
    pub children: Vec<OperationDetail>,

    #[serde(skip)]
    path: Vec<usize>,

    #[serde(skip)]
    listener: Option<Arc<dyn DetailListener>>,
}

impl fmt::Debug for OperationDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDetail")
            .field("description", &self.description)
            .field("status", &self.status)
            .field("output", &self.output)
            .field("progress", &self.progress)
            .field("children", &self.children)
            .finish()
    }
}

impl OperationDetail {
    /// A pending root node.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: DetailStatus::Pending,
            started_at: None,
            finished_at: None,
            output: Vec::new(),
            progress: None,
            children: Vec::new(),
            path: Vec::new(),
            listener: None,
        }
    }

    /// A pending root node whose changes are reported to `listener`.
    pub fn with_listener(description: impl Into<String>, listener: Arc<dyn DetailListener>) -> Self {
        let mut detail = Self::new(description);
        detail.listener = Some(listener);
        detail
    }

    /// Stop reporting changes from this node and its descendants.
    pub fn detach_listener(&mut self) {
        self.listener = None;
        for child in &mut self.children {
            child.detach_listener();
        }
    }

    fn emit(&self, change: DetailChange) {
        if let Some(listener) = &self.listener {
            listener.on_event(DetailEvent {
                path: self.path.clone(),
                change,
            });
        }
    }

    /// Append a running sub-step and return it.
    pub fn add_child(&mut self, description: impl Into<String>) -> &mut OperationDetail {
        let description = description.into();
        let now = Utc::now();
        self.emit(DetailChange::ChildAdded {
            description: description.clone(),
            at: now,
        });

        let mut path = self.path.clone();
        path.push(self.children.len());
        self.children.push(OperationDetail {
            description,
            status: DetailStatus::Running,
            started_at: Some(now),
            finished_at: None,
            output: Vec::new(),
            progress: None,
            children: Vec::new(),
            path,
            listener: self.listener.clone(),
        });
        let index = self.children.len() - 1;
        &mut self.children[index]
    }

    pub fn last_child_mut(&mut self) -> Option<&mut OperationDetail> {
        self.children.last_mut()
    }

    pub fn set_status(&mut self, status: DetailStatus) {
        let now = Utc::now();
        self.status = status;
        if status == DetailStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
        self.emit(DetailChange::Status { status, at: now });
    }

    /// Mark success or error from a boolean outcome.
    pub fn finish(&mut self, success: bool) {
        self.set_status(if success {
            DetailStatus::Success
        } else {
            DetailStatus::Error
        });
    }

    pub fn add_output(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        self.output.push(text.clone());
        self.emit(DetailChange::Output { text });
    }

    pub fn set_progress(&mut self, progress: CopyProgress) {
        self.progress = Some(progress);
        self.emit(DetailChange::Progress { progress });
    }

    /// True when this node or any descendant ended with `status`.
    pub fn contains_status(&self, status: DetailStatus) -> bool {
        self.status == status || self.children.iter().any(|c| c.contains_status(status))
    }

    pub fn find(&self, path: &[usize]) -> Option<&OperationDetail> {
        match path.split_first() {
            None => Some(self),
            Some((index, rest)) => self.children.get(*index)?.find(rest),
        }
    }

    fn find_mut(&mut self, path: &[usize]) -> Option<&mut OperationDetail> {
        match path.split_first() {
            None => Some(self),
            Some((index, rest)) => self.children.get_mut(*index)?.find_mut(rest),
        }
    }

    /// Replay an event produced by another tree. Events for unknown nodes
    /// are ignored.
    pub fn apply(&mut self, event: &DetailEvent) {
        let Some(node) = self.find_mut(&event.path) else {
            return;
        };
        match &event.change {
            DetailChange::ChildAdded { description, at } => {
                let mut child = OperationDetail::new(description.clone());
                child.status = DetailStatus::Running;
                child.started_at = Some(*at);
                node.children.push(child);
            }
            DetailChange::Status { status, at } => {
                node.status = *status;
                if *status == DetailStatus::Running && node.started_at.is_none() {
                    node.started_at = Some(*at);
                }
                if status.is_terminal() {
                    node.finished_at = Some(*at);
                }
            }
            DetailChange::Output { text } => node.output.push(text.clone()),
            DetailChange::Progress { progress } => node.progress = Some(*progress),
        }
    }

    /// Every description and output line, depth first.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.description.clone()];
        lines.extend(self.output.iter().cloned());
        for child in &self.children {
            lines.extend(child.lines());
        }
        lines
    }
}
