use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use super::{Mode, TaskBackend};
use crate::error::MomentumError;
use crate::remote::{RemoteClient, send};
use crate::task::{Importance, NewTask, Task, TaskPatch};

const TASKS_PATH: &str = "rest/v1/tasks";
const RETURN_ROWS: (&str, &str) = ("Prefer", "return=representation");

pub struct RemoteBackend {
    client: RemoteClient,
}

#[derive(Debug, Serialize, PartialEq)]
struct RecordUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    importance: Option<Importance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_complete: Option<bool>,
}

impl<'a> RecordUpdate<'a> {
    fn from_patch(patch: &'a TaskPatch) -> Self {
        if !patch.extra.is_empty() || patch.workflow_column.is_some() {
            debug!(
                stripped = ?patch.extra.keys().collect::<Vec<_>>(),
                has_column = patch.workflow_column.is_some(),
                "dropping fields unknown to the remote schema"
            );
        }
        Self {
            title: patch.title.as_deref(),
            description: patch.description.as_deref(),
            importance: patch.importance,
            is_complete: patch.is_complete,
        }
    }
}

impl RemoteBackend {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    fn scoped_url(&self, owner: &str, id: Option<i64>) -> anyhow::Result<Url> {
        let mut url = self.client.endpoint(TASKS_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(id) = id {
                query.append_pair("id", &format!("eq.{id}"));
            }
            query.append_pair("user_id", &format!("eq.{owner}"));
        }
        Ok(url)
    }

    async fn fetch_one(&self, owner: &str, id: i64) -> anyhow::Result<Task> {
        let mut url = self.scoped_url(owner, Some(id))?;
        url.query_pairs_mut().append_pair("select", "*");
        let rows: Vec<Task> = send(self.client.get(url)?, "fetch task").await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| MomentumError::NotFound { id }.into())
    }
}

fn require_owner(owner: Option<&str>) -> anyhow::Result<&str> {
    owner
        .filter(|owner| !owner.is_empty())
        .ok_or_else(|| MomentumError::NoOwner.into())
}

#[async_trait]
impl TaskBackend for RemoteBackend {
    fn mode(&self) -> Mode {
        Mode::Remote
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, owner: Option<&str>) -> anyhow::Result<Vec<Task>> {
        let owner = require_owner(owner)?;
        let mut url = self.scoped_url(owner, None)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "id.desc");

        let tasks: Vec<Task> = send(self.client.get(url)?, "fetch tasks").await?.json().await?;
        debug!(count = tasks.len(), "remote tasks fetched");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, task), fields(owner = %task.user_id))]
    async fn insert(&self, task: NewTask) -> anyhow::Result<Task> {
        require_owner(Some(task.user_id.as_str()))?;
        let url = self.client.endpoint(TASKS_PATH)?;
        let request = self
            .client
            .post(url)?
            .header(RETURN_ROWS.0, RETURN_ROWS.1)
            .json(&[&task]);

        let rows: Vec<Task> = send(request, "create task").await?.json().await?;
        rows.into_iter().next().ok_or_else(|| {
            MomentumError::backend("create task", 200, "service returned no rows").into()
        })
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update(
        &self,
        owner: Option<&str>,
        id: i64,
        patch: &TaskPatch,
    ) -> anyhow::Result<Task> {
        let owner = require_owner(owner)?;
        if !patch.has_record_fields() {
            return self.fetch_one(owner, id).await;
        }

        let url = self.scoped_url(owner, Some(id))?;
        let request = self
            .client
            .patch(url)?
            .header(RETURN_ROWS.0, RETURN_ROWS.1)
            .json(&RecordUpdate::from_patch(patch));

        let rows: Vec<Task> = send(request, "update task").await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| MomentumError::NotFound { id }.into())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, owner: Option<&str>, id: i64) -> anyhow::Result<()> {
        let owner = require_owner(owner)?;
        let url = self.scoped_url(owner, Some(id))?;
        send(self.client.delete(url)?, "delete task").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::classify;
    use crate::remote::RemoteConfig;
    use crate::storage::MemoryStorage;
    use crate::task::WorkflowColumn;

    fn backend() -> RemoteBackend {
        let client = RemoteClient::new(
            RemoteConfig {
                url: Some("https://project.example.co".to_string()),
                anon_key: Some("anon".to_string()),
                redirect_url: None,
            },
            Arc::new(MemoryStorage::new()),
        )
        .expect("client");
        RemoteBackend::new(client)
    }

    #[test]
    fn scoped_url_filters_by_owner_and_id() {
        let url = backend().scoped_url("u-1", Some(7)).expect("url");
        assert_eq!(
            url.as_str(),
            "https://project.example.co/rest/v1/tasks?id=eq.7&user_id=eq.u-1"
        );
    }

    #[test]
    fn record_update_drops_client_only_fields() {
        let patch: TaskPatch = serde_json::from_value(json!({
            "workflow_column": "done",
            "is_complete": true,
            "status": "done",
            "kanban_column": "done"
        }))
        .expect("patch");
        assert_eq!(patch.workflow_column, Some(WorkflowColumn::Done));

        let body = serde_json::to_value(RecordUpdate::from_patch(&patch)).expect("serialize");
        assert_eq!(body, json!({ "is_complete": true }));
    }

    #[test]
    fn new_task_payload_has_no_column() {
        let body = serde_json::to_value([&NewTask {
            title: "Draft proposal".to_string(),
            description: String::new(),
            user_id: "u1".to_string(),
            importance: Importance::High,
            is_complete: false,
        }])
        .expect("serialize");
        assert_eq!(
            body,
            json!([{
                "title": "Draft proposal",
                "description": "",
                "user_id": "u1",
                "importance": "high",
                "is_complete": false
            }])
        );
    }

    #[tokio::test]
    async fn calls_without_owner_fail_before_any_request() {
        let backend = backend();
        let err = backend.list(None).await.expect_err("no owner");
        assert!(matches!(classify(&err), Some(MomentumError::NoOwner)));

        let err = backend.delete(Some(""), 3).await.expect_err("empty owner");
        assert!(matches!(classify(&err), Some(MomentumError::NoOwner)));
    }
}
