use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{MomentumError, classify};
use crate::storage::{LocalStorage, keys, load_json, save_json};
use crate::task::{Task, WorkflowColumn};

// Kanban lane per task id. The remote schema has no lane column, so the task
// store joins this table onto every list it reads.
#[derive(Clone)]
pub struct ColumnTable {
    storage: Arc<dyn LocalStorage>,
}

impl ColumnTable {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self { storage }
    }

    pub fn load(&self) -> BTreeMap<i64, WorkflowColumn> {
        self.read().unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "ignoring unreadable workflow column table");
            BTreeMap::new()
        })
    }

    // Malformed data reads as empty. Storage failures propagate.
    fn read(&self) -> anyhow::Result<BTreeMap<i64, WorkflowColumn>> {
        let raw = match load_json::<BTreeMap<i64, String>>(self.storage.as_ref(), keys::TASK_COLUMNS)
        {
            Ok(raw) => raw.unwrap_or_default(),
            Err(err) if matches!(classify(&err), Some(MomentumError::MalformedSnapshot { .. })) => {
                warn!(error = %format!("{err:#}"), "discarding malformed workflow column table");
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };

        Ok(raw
            .into_iter()
            .filter_map(|(id, value)| match value.parse::<WorkflowColumn>() {
                Ok(column) => Some((id, column)),
                Err(_) => {
                    warn!(task_id = id, value = %value, "skipping unknown workflow column");
                    None
                }
            })
            .collect())
    }

    pub fn get(&self, id: i64) -> Option<WorkflowColumn> {
        self.load().get(&id).copied()
    }

    #[tracing::instrument(skip(self))]
    pub fn set(&self, id: i64, column: WorkflowColumn) -> anyhow::Result<()> {
        let mut entries = self.read()?;
        entries.insert(id, column);
        self.save(&entries)?;
        debug!(task_id = id, column = %column, "workflow column stored");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn remove(&self, id: i64) -> anyhow::Result<()> {
        let mut entries = self.read()?;
        if entries.remove(&id).is_some() {
            self.save(&entries)?;
            debug!(task_id = id, "workflow column removed");
        }
        Ok(())
    }

    pub fn reconcile(&self, tasks: &mut [Task]) {
        let entries = self.load();
        for task in tasks.iter_mut() {
            task.workflow_column = column_for(&entries, task);
        }
    }

    fn save(&self, entries: &BTreeMap<i64, WorkflowColumn>) -> anyhow::Result<()> {
        let raw: BTreeMap<i64, &str> = entries
            .iter()
            .map(|(id, column)| (*id, column.as_str()))
            .collect();
        save_json(self.storage.as_ref(), keys::TASK_COLUMNS, &raw)
    }
}

pub fn column_for(entries: &BTreeMap<i64, WorkflowColumn>, task: &Task) -> WorkflowColumn {
    entries
        .get(&task.id)
        .copied()
        .unwrap_or_else(|| WorkflowColumn::inferred(task.is_complete))
}
