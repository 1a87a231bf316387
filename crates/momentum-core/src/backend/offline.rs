use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Mode, TaskBackend};
use crate::error::{MomentumError, classify};
use crate::storage::{LocalStorage, keys, load_json, save_json};
use crate::task::{Importance, NewTask, Task, TaskPatch, WorkflowColumn};

pub const OFFLINE_USER_ID: &str = "dev-user-123";

// Mirrored to the snapshot after every mutation and reloaded before every
// call. Not filtered by owner.
pub struct OfflineBackend {
    storage: Arc<dyn LocalStorage>,
    tasks: Mutex<Vec<Task>>,
}

impl OfflineBackend {
    pub fn open(storage: Arc<dyn LocalStorage>) -> anyhow::Result<Self> {
        let backend = Self {
            storage,
            tasks: Mutex::new(Vec::new()),
        };
        let loaded = backend.reload()?;
        info!(count = loaded.len(), "offline task collection loaded");
        Ok(backend)
    }

    pub fn reload(&self) -> anyhow::Result<Vec<Task>> {
        let tasks = match load_json::<Vec<Task>>(self.storage.as_ref(), keys::OFFLINE_TASKS) {
            Ok(Some(tasks)) => tasks,
            Ok(None) => {
                debug!("no offline snapshot; using sample tasks");
                sample_tasks()
            }
            Err(err) if matches!(classify(&err), Some(MomentumError::MalformedSnapshot { .. })) => {
                warn!(error = %format!("{err:#}"), "offline snapshot unreadable; using sample tasks");
                sample_tasks()
            }
            Err(err) => return Err(err),
        };

        *self.tasks.lock() = tasks.clone();
        Ok(tasks)
    }

    fn persist(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_json(self.storage.as_ref(), keys::OFFLINE_TASKS, tasks)?;
        *self.tasks.lock() = tasks.to_vec();
        Ok(())
    }
}

#[async_trait]
impl TaskBackend for OfflineBackend {
    fn mode(&self) -> Mode {
        Mode::Offline
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, _owner: Option<&str>) -> anyhow::Result<Vec<Task>> {
        self.reload()
    }

    #[tracing::instrument(skip(self, task), fields(title = %task.title))]
    async fn insert(&self, task: NewTask) -> anyhow::Result<Task> {
        let mut tasks = self.reload()?;
        let created = Task {
            id: next_id(&tasks),
            title: task.title,
            description: task.description,
            user_id: task.user_id,
            importance: task.importance,
            is_complete: task.is_complete,
            workflow_column: WorkflowColumn::inferred(task.is_complete),
            created_at: Utc::now(),
        };
        tasks.insert(0, created.clone());
        self.persist(&tasks)?;
        debug!(task_id = created.id, count = tasks.len(), "offline task inserted");
        Ok(created)
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update(
        &self,
        _owner: Option<&str>,
        id: i64,
        patch: &TaskPatch,
    ) -> anyhow::Result<Task> {
        let mut tasks = self.reload()?;
        let updated = {
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or(MomentumError::NotFound { id })?;
            task.apply(patch);
            task.clone()
        };
        self.persist(&tasks)?;
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, _owner: Option<&str>, id: i64) -> anyhow::Result<()> {
        let mut tasks = self.reload()?;
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        if tasks.len() == before {
            return Err(MomentumError::NotFound { id }.into());
        }
        self.persist(&tasks)
    }
}

fn next_id(tasks: &[Task]) -> i64 {
    let now = Utc::now().timestamp_millis();
    let newest = tasks.iter().map(|task| task.id).max().unwrap_or(0);
    now.max(newest.saturating_add(1))
}

fn sample_tasks() -> Vec<Task> {
    let now = Utc::now();
    vec![
        Task {
            id: 1,
            title: "Sample Task 1".to_string(),
            description: "This is a sample task for offline mode".to_string(),
            user_id: OFFLINE_USER_ID.to_string(),
            importance: Importance::Medium,
            is_complete: false,
            workflow_column: WorkflowColumn::Todo,
            created_at: now - Duration::minutes(1),
        },
        Task {
            id: 2,
            title: "Sample Task 2".to_string(),
            description: "Another sample task for testing".to_string(),
            user_id: OFFLINE_USER_ID.to_string(),
            importance: Importance::Medium,
            is_complete: true,
            workflow_column: WorkflowColumn::Done,
            created_at: now,
        },
    ]
}
