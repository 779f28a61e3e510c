use crate::progress::{self, Tally};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use netpilot_error::{NPError, NPResult};
use netpilot_models::domain::prelude::{
    AutomationTask, DeviceId, DeviceResult, OperationRequest, TaskId, TaskReport,
    TaskStatus,
};
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::info;

struct TaskState {
    task: AutomationTask,
    tally: Tally,
    /// An attempt is dispatching devices
    running: bool,
}

/// Shared state of one automation task.
///
/// Only the orchestrator records results; callers read snapshots.
pub struct TaskHandle {
    id: TaskId,
    state: Mutex<TaskState>,
    cancel: CancellationToken,
    /// Signalled whenever the task stops running
    settled: Notify,
}

impl TaskHandle {
    fn new(task: AutomationTask, cancel: CancellationToken) -> Self {
        Self {
            id: task.id.clone(),
            state: Mutex::new(TaskState {
                tally: Tally::from_task(&task),
                task,
                running: false,
            }),
            cancel,
            settled: Notify::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn snapshot(&self) -> AutomationTask {
        self.state.lock().await.task.clone()
    }

    pub async fn report(&self) -> TaskReport {
        let state = self.state.lock().await;
        progress::report(&state.task, &state.tally)
    }

    /// Devices whose latest result is `otp_required`.
    pub async fn pending_otp(&self) -> BTreeSet<DeviceId> {
        self.state.lock().await.tally.pending_otp()
    }

    /// Open a new attempt and return its number.
    ///
    /// Terminal tasks and tasks with an attempt in flight are rejected.
    pub async fn begin_attempt(&self) -> NPResult<u32> {
        let mut state = self.state.lock().await;
        if state.task.status.is_terminal() {
            return Err(NPError::InvalidStateError(format!(
                "task {} is already {:?}",
                self.id, state.task.status
            )));
        }
        if state.running {
            return Err(NPError::InvalidStateError(format!(
                "task {} has an attempt in progress",
                self.id
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(NPError::InvalidStateError(format!(
                "task {} was cancelled",
                self.id
            )));
        }

        state.running = true;
        state.task.attempts += 1;
        state.task.status = TaskStatus::Progress;
        state.task.started_at.get_or_insert_with(Utc::now);
        Ok(state.task.attempts)
    }

    /// Append one device result and return the updated report.
    pub async fn record(&self, result: DeviceResult) -> TaskReport {
        let mut state = self.state.lock().await;
        state.tally.apply(&result);
        state.task.results.push(result);
        progress::report(&state.task, &state.tally)
    }

    /// Close the running attempt and settle the task status.
    pub async fn finish_attempt(&self) -> TaskReport {
        let mut state = self.state.lock().await;
        state.running = false;
        let summary = state.tally.summary();
        state.task.status = progress::settle(&summary, self.cancel.is_cancelled());
        if state.task.status.is_terminal() {
            state.task.finished_at = Some(Utc::now());
        }
        let report = progress::report(&state.task, &state.tally);
        drop(state);
        self.settled.notify_waiters();
        report
    }

    /// Wait until the task has run at least once and no attempt is in flight.
    ///
    /// Returns immediately for tasks that are terminal or awaiting OTP.
    pub async fn wait_settled(&self) -> TaskReport {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock().await;
                if !state.running && state.task.status != TaskStatus::Pending {
                    return progress::report(&state.task, &state.tally);
                }
            }
            notified.await;
        }
    }

    /// Request cooperative cancellation.
    ///
    /// A task with no attempt in flight settles to `CANCELLED` immediately;
    /// otherwise the running attempt stops dispatching and settles on its own.
    pub async fn cancel(&self) -> TaskReport {
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        if !state.running && !state.task.status.is_terminal() {
            state.task.status = TaskStatus::Cancelled;
            state.task.finished_at = Some(Utc::now());
        }
        let report = progress::report(&state.task, &state.tally);
        drop(state);
        self.settled.notify_waiters();
        report
    }
}

/// Live and finished tasks by id.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Arc<TaskHandle>>,
    root: CancellationToken,
}

impl TaskRegistry {
    /// Task tokens are children of `root`, so cancelling it cancels every task.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            tasks: DashMap::new(),
            root,
        }
    }

    pub fn create(&self, request: OperationRequest, device_ids: Vec<DeviceId>) -> Arc<TaskHandle> {
        let task = AutomationTask::new(request, device_ids);
        let handle = Arc::new(TaskHandle::new(task, self.root.child_token()));
        self.tasks
            .insert(handle.id.clone(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, task_id: &str) -> NPResult<Arc<TaskHandle>> {
        self.tasks
            .get(task_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| NPError::TaskNotFound(task_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Forget terminal tasks that finished more than `older_than` ago.
    pub async fn purge_finished(&self, older_than: ChronoDuration) -> usize {
        let cutoff = Utc::now() - older_than;
        let handles: Vec<_> = self
            .tasks
            .iter()
            .map(|h| Arc::clone(h.value()))
            .collect();

        let mut purged = 0;
        for handle in handles {
            let expired = {
                let state = handle.state.lock().await;
                state.task.status.is_terminal()
                    && state.task.finished_at.is_some_and(|at| at <= cutoff)
            };
            if expired && self.tasks.remove(&handle.id).is_some() {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "Purged finished tasks");
        }
        purged
    }
}
