//! Task lifecycle — one remote action invocation, tracked from submission
//! to its return value.
//!
//! Valid transitions:
//!
//! ```text
//! pending --> running --> finished
//!       \        |
//!        \       v
//!         \-> failed
//! ```
//!
//! plus the progress-update self-loop on running. Everything else is
//! declined without touching state. Tasks live only in process memory;
//! durability is a caller concern.

use std::sync::Arc;

use portico_core::message::now_ms;
use portico_core::{OrderedMap, Response};

use crate::adapter::DeviceAdapter;
use crate::error::TaskError;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Failed,
    Finished,
    /// Only ever returned for queries against a task that does not exist.
    /// A real task never holds this status.
    Unknown,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Finished => "finished",
            TaskStatus::Unknown => "unknown",
        }
    }

    /// Parse a status reported by the executing object.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "failed" => Some(TaskStatus::Failed),
            "finished" => Some(TaskStatus::Finished),
            _ => None,
        }
    }
}

/// Return value recorded when a task is canceled.
pub const RETURN_VALUE_CANCELED: &str = "canceled";

/// One tracked invocation of an action.
pub struct Task {
    task_id: String,
    owner_id: String,
    requesting_id: String,
    action_id: String,
    body: Option<String>,
    parameters: OrderedMap,
    status: TaskStatus,
    created_at: u64,
    started_at: u64,
    ended_at: u64,
    accumulated_running_ms: u64,
    return_value: Option<String>,
    adapter: Arc<dyn DeviceAdapter>,
}

impl Task {
    /// New task in pending state. The adapter is the capability used later
    /// for the actual device calls.
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        requesting_id: impl Into<String>,
        owner_id: impl Into<String>,
        action_id: impl Into<String>,
        body: Option<String>,
        parameters: OrderedMap,
    ) -> Self {
        let owner_id = owner_id.into();
        let requesting_id = requesting_id.into();
        let action_id = action_id.into();
        let created_at = now_ms();
        Self {
            task_id: generate_task_id(&owner_id, &action_id, &requesting_id, created_at),
            owner_id,
            requesting_id,
            action_id,
            body,
            parameters,
            status: TaskStatus::Pending,
            created_at,
            started_at: 0,
            ended_at: 0,
            accumulated_running_ms: 0,
            return_value: None,
            adapter,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn requesting_id(&self) -> &str {
        &self.requesting_id
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn return_value(&self) -> Option<&str> {
        self.return_value.as_deref()
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn ended_at(&self) -> u64 {
        self.ended_at
    }

    /// Begin execution. Legal only from pending. On adapter failure or an
    /// error-flagged response the task stays pending, so the caller may try
    /// again later.
    pub fn start(&mut self) -> Result<Response, TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                current: self.status,
                attempted: "start",
            });
        }

        let response = self
            .adapter
            .start_action(
                &self.requesting_id,
                &self.owner_id,
                &self.action_id,
                self.body.as_deref(),
                &self.parameters,
            )
            .map_err(|e| TaskError::AdapterFailure(e.to_string()))?;

        if response.error {
            return Err(TaskError::AdapterDeclined {
                code: response.status_code,
                reason: response.status_reason.clone(),
            });
        }

        self.status = TaskStatus::Running;
        self.started_at = now_ms();
        tracing::debug!(task = self.task_id.as_str(), action = self.action_id.as_str(), "task started");
        Ok(response)
    }

    /// Status report from the executing object. Legal only while running.
    ///
    /// Reporting running again is a progress update: the return value is
    /// replaced and nothing else changes. Reporting finished or failed stops
    /// the running-time clock and ends the task. Any other status is
    /// rejected outright.
    pub fn update_running(
        &mut self,
        new_status: TaskStatus,
        return_value: Option<String>,
    ) -> Result<(), TaskError> {
        if self.status != TaskStatus::Running {
            return Err(TaskError::InvalidTransition {
                current: self.status,
                attempted: "update",
            });
        }

        match new_status {
            TaskStatus::Running => {
                self.return_value = return_value;
                Ok(())
            }
            TaskStatus::Finished | TaskStatus::Failed => {
                self.stop_clock();
                self.status = new_status;
                self.return_value = return_value;
                tracing::debug!(
                    task = self.task_id.as_str(),
                    status = new_status.as_str(),
                    "task ended"
                );
                Ok(())
            }
            other => Err(TaskError::InvalidTransition {
                current: self.status,
                attempted: match other {
                    TaskStatus::Pending => "move back to pending",
                    _ => "move to unknown",
                },
            }),
        }
    }

    /// Cancel the task.
    ///
    /// A pending task has nothing running remotely yet, so it completes
    /// locally without contacting the adapter and no response is produced.
    /// A running task is canceled through the adapter; if the adapter
    /// declines, the task stays running. Finished and failed tasks cannot
    /// be canceled.
    pub fn cancel(
        &mut self,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Option<Response>, TaskError> {
        match self.status {
            TaskStatus::Finished | TaskStatus::Failed => Err(TaskError::InvalidTransition {
                current: self.status,
                attempted: "cancel",
            }),
            TaskStatus::Pending => {
                self.ended_at = now_ms();
                self.status = TaskStatus::Finished;
                self.return_value = Some(RETURN_VALUE_CANCELED.to_string());
                tracing::debug!(task = self.task_id.as_str(), "pending task canceled locally");
                Ok(None)
            }
            TaskStatus::Running => {
                let response = self
                    .adapter
                    .cancel_task(
                        &self.requesting_id,
                        &self.owner_id,
                        &self.action_id,
                        body,
                        parameters,
                    )
                    .map_err(|e| TaskError::AdapterFailure(e.to_string()))?;

                if response.error {
                    return Err(TaskError::AdapterDeclined {
                        code: response.status_code,
                        reason: response.status_reason.clone(),
                    });
                }

                self.stop_clock();
                self.status = TaskStatus::Finished;
                self.return_value = Some(RETURN_VALUE_CANCELED.to_string());
                tracing::debug!(task = self.task_id.as_str(), "running task canceled");
                Ok(Some(response))
            }
            TaskStatus::Unknown => Err(TaskError::InvalidTransition {
                current: self.status,
                attempted: "cancel",
            }),
        }
    }

    /// Time spent running, in milliseconds. Computed live while running,
    /// otherwise the stored accumulated value.
    pub fn running_time_ms(&self) -> u64 {
        if self.status == TaskStatus::Running {
            self.accumulated_running_ms + now_ms().saturating_sub(self.started_at)
        } else {
            self.accumulated_running_ms
        }
    }

    fn stop_clock(&mut self) {
        let now = now_ms();
        self.accumulated_running_ms += now.saturating_sub(self.started_at);
        self.ended_at = now;
    }
}

/// Task ids: hex BLAKE3 over the task's identity plus a random nonce, so two
/// submissions of the same action in the same millisecond still differ.
fn generate_task_id(owner_id: &str, action_id: &str, requesting_id: &str, created_at: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner_id.as_bytes());
    hasher.update(action_id.as_bytes());
    hasher.update(requesting_id.as_bytes());
    hasher.update(&created_at.to_le_bytes());
    hasher.update(&rand::random::<u64>().to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
