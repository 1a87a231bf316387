use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
}

impl Importance {
    pub fn as_str(self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Importance::Low),
            "medium" | "med" | "m" => Ok(Importance::Medium),
            "high" | "h" => Ok(Importance::High),
            other => Err(anyhow!("invalid importance: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkflowColumn {
    #[default]
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "done")]
    Done,
}

impl WorkflowColumn {
    pub const ALL: [WorkflowColumn; 3] = [
        WorkflowColumn::Todo,
        WorkflowColumn::InProgress,
        WorkflowColumn::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowColumn::Todo => "todo",
            WorkflowColumn::InProgress => "in-progress",
            WorkflowColumn::Done => "done",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            WorkflowColumn::Todo => "To Do",
            WorkflowColumn::InProgress => "In Progress",
            WorkflowColumn::Done => "Done",
        }
    }

    pub fn inferred(is_complete: bool) -> Self {
        if is_complete {
            WorkflowColumn::Done
        } else {
            WorkflowColumn::Todo
        }
    }

    pub fn is_done(self) -> bool {
        self == WorkflowColumn::Done
    }
}

impl fmt::Display for WorkflowColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowColumn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" | "to-do" => Ok(WorkflowColumn::Todo),
            "in-progress" | "inprogress" | "in_progress" | "doing" => {
                Ok(WorkflowColumn::InProgress)
            }
            "done" => Ok(WorkflowColumn::Done),
            other => Err(anyhow!("invalid workflow column: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,

    pub title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    pub user_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub importance: Importance,

    #[serde(default, deserialize_with = "null_as_default")]
    pub is_complete: bool,

    // Overwritten by the side-table join on every read.
    #[serde(default)]
    pub workflow_column: WorkflowColumn,

    pub created_at: DateTime<Utc>,
}

// Nullable columns come back as `null`, not absent.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Task {
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = patch.title.as_ref() {
            self.title = title.clone();
        }
        if let Some(description) = patch.description.as_ref() {
            self.description = description.clone();
        }
        if let Some(importance) = patch.importance {
            self.importance = importance;
        }
        if let Some(is_complete) = patch.is_complete {
            self.is_complete = is_complete;
        }
        if let Some(column) = patch.workflow_column {
            self.workflow_column = column;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub user_id: String,
    pub importance: Importance,
    pub is_complete: bool,
}

// Legacy fields such as `status` or `kanban_column` land in `extra` and are
// never submitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Importance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_column: Option<WorkflowColumn>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TaskPatch {
    pub fn completion(is_complete: bool) -> Self {
        Self {
            is_complete: Some(is_complete),
            ..Self::default()
        }
    }

    pub fn importance(importance: Importance) -> Self {
        Self {
            importance: Some(importance),
            ..Self::default()
        }
    }

    pub fn column(column: WorkflowColumn) -> Self {
        Self {
            workflow_column: Some(column),
            ..Self::default()
        }
    }

    pub fn normalized(mut self) -> Self {
        if let Some(column) = self.workflow_column {
            self.is_complete = Some(column.is_done());
        }
        self
    }

    pub fn has_record_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.importance.is_some()
            || self.is_complete.is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn column_serializes_with_kebab_names() {
        assert_eq!(
            serde_json::to_value(WorkflowColumn::InProgress).expect("serialize"),
            json!("in-progress")
        );
        assert_eq!(
            "In-Progress".parse::<WorkflowColumn>().expect("parse"),
            WorkflowColumn::InProgress
        );
        assert!("backlog".parse::<WorkflowColumn>().is_err());
    }

    #[test]
    fn inferred_column_follows_completion() {
        assert_eq!(WorkflowColumn::inferred(true), WorkflowColumn::Done);
        assert_eq!(WorkflowColumn::inferred(false), WorkflowColumn::Todo);
    }

    #[test]
    fn normalized_patch_forces_completion_from_column() {
        let done = TaskPatch::column(WorkflowColumn::Done).normalized();
        assert_eq!(done.is_complete, Some(true));

        let reopened = TaskPatch {
            is_complete: Some(true),
            workflow_column: Some(WorkflowColumn::InProgress),
            ..TaskPatch::default()
        }
        .normalized();
        assert_eq!(reopened.is_complete, Some(false));

        let untouched = TaskPatch::importance(Importance::High).normalized();
        assert_eq!(untouched.is_complete, None);
    }

    #[test]
    fn patch_collects_unknown_fields_in_extra() {
        let patch: TaskPatch = serde_json::from_value(json!({
            "title": "Renamed",
            "status": "in-progress",
            "kanban_column": "done"
        }))
        .expect("deserialize");

        assert_eq!(patch.title.as_deref(), Some("Renamed"));
        assert_eq!(patch.extra.len(), 2);
        assert!(patch.has_record_fields());
    }

    #[test]
    fn task_defaults_missing_optional_fields() {
        let task: Task = serde_json::from_value(json!({
            "id": 4,
            "title": "Row from the service",
            "user_id": "u1",
            "created_at": "2025-05-30T05:40:00+00:00"
        }))
        .expect("deserialize");

        assert_eq!(task.importance, Importance::Medium);
        assert!(!task.is_complete);
        assert_eq!(task.workflow_column, WorkflowColumn::Todo);
        assert!(task.description.is_empty());
    }

    #[test]
    fn null_columns_fall_back_to_defaults() {
        let tasks: Vec<Task> = serde_json::from_value(json!([
            {
                "id": 7,
                "title": "Legacy row",
                "description": null,
                "importance": null,
                "user_id": "u1",
                "is_complete": null,
                "created_at": "2025-05-30T05:40:00+00:00"
            },
            {
                "id": 8,
                "title": "Current row",
                "description": "notes",
                "importance": "high",
                "user_id": "u1",
                "is_complete": true,
                "created_at": "2025-05-30T05:41:00+00:00"
            }
        ]))
        .expect("deserialize");

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].importance, Importance::Medium);
        assert!(tasks[0].description.is_empty());
        assert!(!tasks[0].is_complete);
        assert_eq!(tasks[1].importance, Importance::High);
        assert_eq!(tasks[1].description, "notes");
        assert!(tasks[1].is_complete);
    }

    #[test]
    fn apply_patch_updates_only_present_fields() {
        let mut task: Task = serde_json::from_value(json!({
            "id": 1,
            "title": "Old",
            "description": "keep",
            "user_id": "u1",
            "created_at": "2025-05-30T05:40:00Z"
        }))
        .expect("deserialize");

        task.apply(&TaskPatch {
            title: Some("New".to_string()),
            is_complete: Some(true),
            ..TaskPatch::default()
        });

        assert_eq!(task.title, "New");
        assert_eq!(task.description, "keep");
        assert!(task.is_complete);
    }
}
