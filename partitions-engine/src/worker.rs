// SPDX-License-Identifier: GPL-3.0-only

//! Background execution of operation batches
//!
//! A batch runs on one blocking task, strictly in order. The caller gets a
//! [`BatchHandle`] with the current status line, a stream of [`BatchEvent`]s
//! mirroring every detail tree, a cancel switch, and the final
//! [`BatchReport`]. Nothing else is shared with the running batch.
//!
//! The first operation that ends in `Error` stops the batch. Operations
//! after it stay `Pending`, and nothing that was already committed is
//! undone: a failed batch leaves the disk in the state of its last
//! successful operation, and callers must re-read the device before
//! planning again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use partitions_contracts::{EngineError, ErrorInfo};
use partitions_types::{DetailEvent, DetailListener, Operation, OperationDetail, OperationKind, OperationState};

use crate::executor::Executor;

/// Outcome of one operation of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub kind: OperationKind,
    pub description: String,
    pub state: OperationState,
    pub detail: OperationDetail,
    pub error: Option<ErrorInfo>,
}

impl OperationResult {
    fn pending(operation: &Operation) -> Self {
        let description = operation.description();
        Self {
            kind: operation.kind(),
            detail: OperationDetail::new(description.clone()),
            description,
            state: OperationState::Pending,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub id: Uuid,
    pub results: Vec<OperationResult>,
    /// The batch was stopped by [`BatchHandle::cancel`].
    pub cancelled: bool,
}

impl BatchReport {
    /// Every operation reached `Success` or `Warning`.
    pub fn succeeded(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.state, OperationState::Success | OperationState::Warning))
    }

    pub fn count(&self, state: OperationState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }

    /// The operation that stopped the batch.
    pub fn failure(&self) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.state == OperationState::Error)
    }
}

/// Progress of a running batch, in order of occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started { index: usize, description: String },
    Detail { index: usize, event: DetailEvent },
    Finished { index: usize, state: OperationState },
}

/// Forwards detail changes of operation `index` to the batch's event stream.
#[derive(Debug)]
struct EventForwarder {
    index: usize,
    sender: mpsc::UnboundedSender<BatchEvent>,
}

impl DetailListener for EventForwarder {
    fn on_event(&self, event: DetailEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.sender.send(BatchEvent::Detail {
            index: self.index,
            event,
        });
    }
}

/// Runs batches of operations off the caller's thread.
#[derive(Debug, Clone)]
pub struct Worker {
    executor: Arc<Executor>,
}

impl Worker {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Start `operations` on a blocking task. Must be called from within a
    /// tokio runtime.
    pub fn submit(&self, operations: Vec<Operation>) -> BatchHandle {
        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(String::from("Waiting"));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let executor = self.executor.clone();
        let token = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            run_batch(&executor, id, &operations, &status_tx, Some(&events_tx), &token)
        });

        BatchHandle {
            id,
            status: status_rx,
            events: events_rx,
            cancel,
            task,
        }
    }

    /// Run `operations` on the current thread.
    pub fn run_blocking(&self, operations: &[Operation], cancel: &CancellationToken) -> BatchReport {
        let (status_tx, _status_rx) = watch::channel(String::new());
        run_batch(&self.executor, Uuid::new_v4(), operations, &status_tx, None, cancel)
    }
}

/// Caller side of a submitted batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: Uuid,
    status: watch::Receiver<String>,
    events: mpsc::UnboundedReceiver<BatchEvent>,
    cancel: CancellationToken,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The latest status line.
    pub fn status(&self) -> String {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<String> {
        self.status.clone()
    }

    /// Next event, or `None` once the batch has finished and every event
    /// was delivered.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Stop at the next block boundary of a copy or before the next
    /// operation. Filesystem tools already running are not interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this batch, for signal handlers and other tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<BatchReport, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::Io(format!("Task join error: {e}")))
    }
}

fn run_batch(
    executor: &Executor,
    id: Uuid,
    operations: &[Operation],
    status: &watch::Sender<String>,
    events: Option<&mpsc::UnboundedSender<BatchEvent>>,
    cancel: &CancellationToken,
) -> BatchReport {
    let total = operations.len();
    tracing::info!("Batch {}: {} operation(s)", id, total);
    let mut results: Vec<OperationResult> = operations.iter().map(OperationResult::pending).collect();
    let mut cancelled = false;

    for (index, operation) in operations.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!("Batch {} cancelled before operation {}", id, index + 1);
            cancelled = true;
            break;
        }

        let description = operation.description();
        status.send_replace(format!(
            "Executing operation {} of {}: {}",
            index + 1,
            total,
            description
        ));
        let mut detail = match events {
            Some(sender) => {
                let _ = sender.send(BatchEvent::Started {
                    index,
                    description: description.clone(),
                });
                OperationDetail::with_listener(
                    description.clone(),
                    Arc::new(EventForwarder {
                        index,
                        sender: sender.clone(),
                    }),
                )
            }
            None => OperationDetail::new(description.clone()),
        };

        let outcome = executor.run(operation, &mut detail, cancel);
        // The report outlives the batch; it must not keep the event stream open.
        detail.detach_listener();
        let (state, error) = match &outcome {
            Ok(state) => (*state, None),
            Err(e) => (OperationState::Error, Some(ErrorInfo::from(e))),
        };
        if let Some(sender) = events {
            let _ = sender.send(BatchEvent::Finished { index, state });
        }
        results[index] = OperationResult {
            kind: operation.kind(),
            description,
            state,
            detail,
            error,
        };

        if let Err(e) = outcome {
            if e == EngineError::Cancelled {
                cancelled = true;
            }
            tracing::warn!(
                "Batch {} stopped at operation {} of {}; {} operation(s) not started",
                id,
                index + 1,
                total,
                total - index - 1
            );
            break;
        }
    }

    let report = BatchReport {
        id,
        results,
        cancelled,
    };
    let summary = if cancelled {
        "Cancelled".to_string()
    } else if let Some(failed) = report.failure() {
        format!("Failed: {}", failed.description)
    } else {
        format!("Finished {} operation(s)", total)
    };
    status.send_replace(summary);
    report
}

#[cfg(test)]
mod tests {
    use partitions_types::DetailChange;

    use super::*;

    #[test]
    fn detail_events_serialize_with_their_inner_event() {
        let event = BatchEvent::Detail {
            index: 1,
            event: DetailEvent {
                path: vec![0],
                change: DetailChange::Output {
                    text: "e2fsck -f -y -v /dev/sdb1".into(),
                },
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "detail");
        assert_eq!(json["event"]["change"], "output");

        let back: BatchEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);

        let finished = serde_json::to_string(&BatchEvent::Finished {
            index: 0,
            state: OperationState::Success,
        })
        .unwrap();
        assert!(finished.contains("\"type\":\"finished\""));
    }
}
