use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{Mode, TaskBackend};
use crate::columns::ColumnTable;
use crate::error::MomentumError;
use crate::session::SessionManager;
use crate::task::{Importance, NewTask, Task, TaskPatch, WorkflowColumn};
use crate::toast::Toasts;

#[derive(Debug, Default)]
struct StoreState {
    tasks: Vec<Task>,
    loading: usize,
    error: Option<String>,
    success: Option<String>,
}

struct Loading<'a> {
    state: &'a Mutex<StoreState>,
}

impl<'a> Loading<'a> {
    fn begin(state: &'a Mutex<StoreState>) -> Self {
        state.lock().loading += 1;
        Self { state }
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.loading = state.loading.saturating_sub(1);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BoardColumn {
    pub column: WorkflowColumn,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
}

// No lock is held across a backend call. Racing updates on one id are
// last-write-wins at the backend and in the side table.
pub struct TaskStore {
    backend: Arc<dyn TaskBackend>,
    columns: ColumnTable,
    session: Arc<SessionManager>,
    toasts: Toasts,
    state: Mutex<StoreState>,
}

impl TaskStore {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        columns: ColumnTable,
        session: Arc<SessionManager>,
        toasts: Toasts,
    ) -> Self {
        info!(mode = %backend.mode(), "task store ready");
        Self {
            backend,
            columns,
            session,
            toasts,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.backend.mode()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    pub fn task(&self, id: i64) -> Option<Task> {
        self.state
            .lock()
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading > 0
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn success_message(&self) -> Option<String> {
        self.state.lock().success.clone()
    }

    pub fn board(&self) -> Vec<BoardColumn> {
        let tasks = self.tasks();
        WorkflowColumn::ALL
            .into_iter()
            .map(|column| BoardColumn {
                column,
                tasks: tasks
                    .iter()
                    .filter(|task| task.workflow_column == column)
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        let state = self.state.lock();
        let completed = state.tasks.iter().filter(|task| task.is_complete).count();
        TaskStats {
            total: state.tasks.len(),
            completed,
            pending: state.tasks.len() - completed,
            in_progress: state
                .tasks
                .iter()
                .filter(|task| task.workflow_column == WorkflowColumn::InProgress)
                .count(),
        }
    }

    #[tracing::instrument(skip(self), fields(mode = %self.backend.mode()))]
    pub async fn fetch_tasks(&self) -> Option<Vec<Task>> {
        let _loading = Loading::begin(&self.state);
        self.state.lock().error = None;

        let result: anyhow::Result<Vec<Task>> = async {
            let owner = self.owner().await;
            let mut tasks = self.backend.list(owner.as_deref()).await?;
            self.columns.reconcile(&mut tasks);
            Ok(tasks)
        }
        .await;

        match result {
            Ok(tasks) => {
                debug!(count = tasks.len(), "tasks fetched");
                self.state.lock().tasks = tasks.clone();
                Some(tasks)
            }
            Err(err) => {
                self.state.lock().tasks.clear();
                self.fail("Fetch tasks", &err);
                None
            }
        }
    }

    #[tracing::instrument(skip(self, description))]
    pub async fn create_task(
        &self,
        title: &str,
        description: &str,
        owner_id: Option<&str>,
        importance: Importance,
        column: WorkflowColumn,
    ) -> Option<Task> {
        let _loading = Loading::begin(&self.state);

        let result: anyhow::Result<Task> = async {
            let owner = match owner_id.filter(|owner| !owner.is_empty()) {
                Some(owner) => owner.to_string(),
                None => self.owner().await.ok_or(MomentumError::NoOwner)?,
            };

            let record = NewTask {
                title: title.to_string(),
                description: description.to_string(),
                user_id: owner,
                importance,
                is_complete: column.is_done(),
            };
            let mut created = self.backend.insert(record).await?;
            self.columns.set(created.id, column)?;
            created.workflow_column = column;
            Ok(created)
        }
        .await;

        match result {
            Ok(task) => {
                info!(task_id = task.id, column = %column, "task created");
                self.fetch_tasks().await;
                self.succeed("Task created successfully");
                Some(task)
            }
            Err(err) => {
                self.fail("Create task", &err);
                None
            }
        }
    }

    // The lane is written to the side table before the backend call and kept
    // if the backend rejects the update.
    #[tracing::instrument(skip(self, updates))]
    pub async fn update_task(&self, id: i64, updates: TaskPatch) -> Option<Task> {
        let _loading = Loading::begin(&self.state);
        let patch = updates.normalized();

        let result: anyhow::Result<Task> = async {
            self.record_column_change(id, &patch)?;
            let owner = self.owner().await;
            let mut updated = self.backend.update(owner.as_deref(), id, &patch).await?;
            updated.workflow_column = self
                .columns
                .get(id)
                .unwrap_or_else(|| WorkflowColumn::inferred(updated.is_complete));
            Ok(updated)
        }
        .await;

        match result {
            Ok(task) => {
                debug!(task_id = id, column = %task.workflow_column, "task updated");
                self.fetch_tasks().await;
                self.succeed("Task updated successfully");
                Some(task)
            }
            Err(err) => {
                self.fail("Update task", &err);
                None
            }
        }
    }

    pub async fn toggle_task_completion(&self, id: i64, current_state: bool) -> Option<Task> {
        self.update_task(id, TaskPatch::completion(!current_state))
            .await
    }

    pub async fn update_task_importance(&self, id: i64, importance: Importance) -> Option<Task> {
        self.update_task(id, TaskPatch::importance(importance))
            .await
    }

    pub async fn move_task(&self, id: i64, column: WorkflowColumn) -> Option<Task> {
        self.update_task(id, TaskPatch::column(column)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, id: i64) -> bool {
        let _loading = Loading::begin(&self.state);

        let result: anyhow::Result<()> = async {
            self.columns.remove(id)?;
            let owner = self.owner().await;
            self.backend.delete(owner.as_deref(), id).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(task_id = id, "task deleted");
                self.fetch_tasks().await;
                self.succeed("Task deleted successfully");
                true
            }
            Err(err) => {
                self.fail("Delete task", &err);
                false
            }
        }
    }

    async fn owner(&self) -> Option<String> {
        self.session
            .fetch_user(false)
            .await
            .map(|actor| actor.id().to_string())
    }

    fn record_column_change(&self, id: i64, patch: &TaskPatch) -> anyhow::Result<()> {
        if let Some(column) = patch.workflow_column {
            return self.columns.set(id, column);
        }

        match patch.is_complete {
            Some(true) => self.columns.set(id, WorkflowColumn::Done),
            Some(false) => match self.columns.get(id) {
                Some(WorkflowColumn::InProgress) => Ok(()),
                _ => self.columns.set(id, WorkflowColumn::Todo),
            },
            None => Ok(()),
        }
    }

    fn succeed(&self, message: &str) {
        {
            let mut state = self.state.lock();
            state.success = Some(message.to_string());
            state.error = None;
        }
        self.toasts.success(message);
    }

    fn fail(&self, operation: &str, err: &anyhow::Error) {
        let message = format!("{operation} failed: {err:#}");
        warn!(operation, error = %format!("{err:#}"), "task operation failed");
        {
            let mut state = self.state.lock();
            state.error = Some(message.clone());
            state.success = None;
        }
        self.toasts.error(message);
    }
}
