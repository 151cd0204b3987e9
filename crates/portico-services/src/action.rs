//! Per-action task queue.
//!
//! One `Action` exists for each action a local object can execute. Requests
//! for it queue up as pending tasks; at most one task runs at a time. A
//! maintenance tick promotes the next pending task when the runner is free,
//! and purges finished return values and timed-out pending tasks so remote
//! objects cannot pile state into this gateway's memory forever.
//!
//! Picture a door that can open. Bob's press of the button is one task,
//! Alice's is the next; hers waits until his completes, and both can be
//! polled by id for status and return value afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use portico_core::config::ActionsConfig;
use portico_core::{OrderedMap, Response};

use crate::adapter::DeviceAdapter;
use crate::error::TaskError;
use crate::task::{Task, TaskStatus};

const MINUTE_MS: u64 = 60_000;

pub struct Action {
    owner_id: String,
    action_id: String,
    adapter: Arc<dyn DeviceAdapter>,
    settings: ActionsConfig,
    state: Mutex<ActionState>,
}

#[derive(Default)]
struct ActionState {
    pending: VecDeque<Task>,
    running: Option<Task>,
    finished: Vec<Task>,
}

impl Action {
    pub fn new(
        owner_id: impl Into<String>,
        action_id: impl Into<String>,
        adapter: Arc<dyn DeviceAdapter>,
        settings: &ActionsConfig,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            action_id: action_id.into(),
            adapter,
            settings: settings.clone(),
            state: Mutex::new(ActionState::default()),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Queue a new pending task. `None` when the pending queue is full.
    pub fn submit(
        &self,
        requesting_id: &str,
        body: Option<String>,
        parameters: OrderedMap,
    ) -> Option<String> {
        let mut state = self.lock();
        if state.pending.len() >= self.settings.max_pending_tasks {
            tracing::debug!(
                action = self.action_id.as_str(),
                "too many tasks in the queue"
            );
            return None;
        }

        let task = Task::new(
            Arc::clone(&self.adapter),
            requesting_id,
            self.owner_id.clone(),
            self.action_id.clone(),
            body,
            parameters,
        );
        let task_id = task.task_id().to_string();
        state.pending.push_back(task);

        tracing::debug!(
            action = self.action_id.as_str(),
            task = task_id.as_str(),
            "task queued"
        );
        Some(task_id)
    }

    /// One maintenance pass: promote the next pending task if the runner is
    /// free, then purge expired return values and timed-out pending tasks.
    pub fn tick(&self, now: u64) {
        let mut state = self.lock();

        if state.running.is_none() {
            if let Some(mut task) = state.pending.pop_front() {
                match task.start() {
                    Ok(_) => state.running = Some(task),
                    Err(error) => {
                        tracing::warn!(
                            action = self.action_id.as_str(),
                            task = task.task_id(),
                            %error,
                            "task failed to start"
                        );
                        state.finished.push(task);
                    }
                }
            }
        }

        let keep_ms = self.settings.time_to_keep_return_values_mins * MINUTE_MS;
        state
            .finished
            .retain(|task| now.saturating_sub(task.ended_at()) <= keep_ms);

        let pending_timeout_ms = self.settings.pending_task_timeout_mins * MINUTE_MS;
        state
            .pending
            .retain(|task| now.saturating_sub(task.created_at()) <= pending_timeout_ms);
    }

    /// Status of a task, in any pool. `Unknown` when no such task exists.
    pub fn task_status(&self, task_id: &str) -> TaskStatus {
        self.with_task(task_id, |task| task.status())
            .unwrap_or(TaskStatus::Unknown)
    }

    /// Latest return value uploaded for a task.
    pub fn return_value(&self, task_id: &str) -> Option<String> {
        self.with_task(task_id, |task| task.return_value().map(str::to_string))
            .flatten()
    }

    /// JSON status report for a task, or `None` when no such task exists.
    pub fn status_report(&self, task_id: &str) -> Option<serde_json::Value> {
        let ms_or_null = |value: u64| {
            if value > 0 {
                serde_json::json!(value)
            } else {
                serde_json::Value::Null
            }
        };
        self.with_task(task_id, |task| {
            serde_json::json!({
                "taskId": task.task_id(),
                "status": task.status().as_str(),
                "createdAt": task.created_at(),
                "startTime": ms_or_null(task.started_at()),
                "endTime": ms_or_null(task.ended_at()),
                "totalTime": task.running_time_ms(),
                "returnValue": task.return_value(),
            })
        })
    }

    /// Status report from the executing object, applied to the running task.
    /// A terminal status moves the task into the finished pool.
    pub fn update(
        &self,
        new_status: TaskStatus,
        return_value: Option<String>,
    ) -> Result<(), TaskError> {
        let mut state = self.lock();
        let task = state.running.as_mut().ok_or(TaskError::NoRunningTask)?;
        task.update_running(new_status, return_value)?;

        if matches!(new_status, TaskStatus::Finished | TaskStatus::Failed) {
            if let Some(done) = state.running.take() {
                state.finished.push(done);
            }
        }
        Ok(())
    }

    /// Cancel a pending or running task.
    ///
    /// Pending tasks complete locally without an adapter call and yield no
    /// response. Running tasks cancel through the adapter; when the adapter
    /// declines, the task stays running and in place.
    pub fn cancel(
        &self,
        task_id: &str,
        body: Option<&str>,
        parameters: &OrderedMap,
    ) -> Result<Option<Response>, TaskError> {
        let mut state = self.lock();

        if let Some(pos) = state
            .pending
            .iter()
            .position(|task| task.task_id() == task_id)
        {
            let mut task = state
                .pending
                .remove(pos)
                .ok_or_else(|| TaskError::UnknownTask(task_id.to_string()))?;
            let outcome = task.cancel(body, parameters)?;
            state.finished.push(task);
            return Ok(outcome);
        }

        if state
            .running
            .as_ref()
            .is_some_and(|task| task.task_id() == task_id)
        {
            let task = state.running.as_mut().ok_or(TaskError::NoRunningTask)?;
            let outcome = task.cancel(body, parameters)?;
            if let Some(done) = state.running.take() {
                state.finished.push(done);
            }
            return Ok(outcome);
        }

        if let Some(task) = state
            .finished
            .iter()
            .find(|task| task.task_id() == task_id)
        {
            return Err(TaskError::InvalidTransition {
                current: task.status(),
                attempted: "cancel",
            });
        }

        Err(TaskError::UnknownTask(task_id.to_string()))
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn has_running(&self) -> bool {
        self.lock().running.is_some()
    }

    pub fn finished_count(&self) -> usize {
        self.lock().finished.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_task<R>(&self, task_id: &str, f: impl FnOnce(&Task) -> R) -> Option<R> {
        let state = self.lock();
        if let Some(task) = state
            .running
            .as_ref()
            .filter(|task| task.task_id() == task_id)
        {
            return Some(f(task));
        }
        if let Some(task) = state
            .pending
            .iter()
            .find(|task| task.task_id() == task_id)
        {
            return Some(f(task));
        }
        state
            .finished
            .iter()
            .find(|task| task.task_id() == task_id)
            .map(f)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
