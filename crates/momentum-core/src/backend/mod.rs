pub mod offline;
pub mod remote;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::remote::RemoteClient;
use crate::storage::{LocalStorage, keys};
use crate::task::{NewTask, Task, TaskPatch};

pub use offline::OfflineBackend;
pub use remote::RemoteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Remote,
    Offline,
}

impl Mode {
    pub fn detect(storage: &dyn LocalStorage) -> anyhow::Result<Self> {
        if storage.contains(keys::OFFLINE_MARKER)? {
            Ok(Mode::Offline)
        } else {
            Ok(Mode::Remote)
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Remote => f.write_str("remote"),
            Mode::Offline => f.write_str("offline"),
        }
    }
}

#[async_trait]
pub trait TaskBackend: Send + Sync {
    fn mode(&self) -> Mode;

    async fn list(&self, owner: Option<&str>) -> anyhow::Result<Vec<Task>>;

    async fn insert(&self, task: NewTask) -> anyhow::Result<Task>;

    async fn update(&self, owner: Option<&str>, id: i64, patch: &TaskPatch)
    -> anyhow::Result<Task>;

    async fn delete(&self, owner: Option<&str>, id: i64) -> anyhow::Result<()>;
}

pub fn select(
    mode: Mode,
    storage: Arc<dyn LocalStorage>,
    client: &RemoteClient,
) -> anyhow::Result<Arc<dyn TaskBackend>> {
    info!(%mode, "selecting task backend");
    Ok(match mode {
        Mode::Offline => Arc::new(OfflineBackend::open(storage)?),
        Mode::Remote => Arc::new(RemoteBackend::new(client.clone())),
    })
}
