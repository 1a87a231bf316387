use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::MomentumError;

pub mod keys {
    pub const OFFLINE_MARKER: &str = "dev_mode";
    pub const OFFLINE_ACTOR: &str = "dev_mode_user";
    pub const OFFLINE_TASKS: &str = "dev_mode_tasks";
    pub const TASK_COLUMNS: &str = "task_columns";
    pub const PREFERENCES: &str = "user-preferences";
    pub const SESSION_CACHE: &str = "user";
    pub const AUTH_TOKEN: &str = "auth_token";
}

pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove_item(&self, key: &str) -> anyhow::Result<()>;

    fn contains(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get_item(key)?.is_some())
    }
}

pub fn load_json<T: DeserializeOwned>(
    storage: &dyn LocalStorage,
    key: &str,
) -> anyhow::Result<Option<T>> {
    let Some(raw) = storage.get_item(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| {
            MomentumError::MalformedSnapshot {
                key: key.to_string(),
                source,
            }
            .into()
        })
}

pub fn save_json<T: Serialize + ?Sized>(
    storage: &dyn LocalStorage,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)
        .with_context(|| format!("failed encoding value for {key}"))?;
    storage.set_item(key, &raw)
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FileStorage {
    pub dir: PathBuf,
}

impl FileStorage {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let dir = data_dir.join("storage");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        info!(dir = %dir.display(), "opened local storage");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(len = value.len()))]
    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        debug!(file = %path.display(), "writing storage item atomically");

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(anyhow::Error::new(err).context(format!("failed removing {}", path.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::error::classify;

    #[test]
    fn file_storage_round_trips_and_removes() {
        let temp = tempdir().expect("tempdir");
        let storage = FileStorage::open(temp.path()).expect("open storage");

        assert_eq!(storage.get_item("user-preferences").expect("get"), None);
        storage
            .set_item("user-preferences", r#"{"theme":"light-gold"}"#)
            .expect("set");
        assert_eq!(
            storage.get_item("user-preferences").expect("get").as_deref(),
            Some(r#"{"theme":"light-gold"}"#)
        );

        storage.remove_item("user-preferences").expect("remove");
        storage.remove_item("user-preferences").expect("remove twice");
        assert!(!storage.contains("user-preferences").expect("contains"));
    }

    #[test]
    fn file_storage_sees_writes_from_another_handle() {
        let temp = tempdir().expect("tempdir");
        let first = FileStorage::open(temp.path()).expect("open first");
        let second = FileStorage::open(temp.path()).expect("open second");

        first.set_item("dev_mode", "true").expect("set");
        assert!(second.contains("dev_mode").expect("contains"));
    }

    #[test]
    fn keys_with_odd_characters_map_to_safe_file_names() {
        let temp = tempdir().expect("tempdir");
        let storage = FileStorage::open(temp.path()).expect("open storage");
        storage.set_item("a/b:c", "x").expect("set");
        assert!(temp.path().join("storage").join("a_b_c.json").exists());
    }

    #[test]
    fn load_json_reports_malformed_snapshot() {
        let storage = MemoryStorage::new();
        storage.set_item(keys::TASK_COLUMNS, "{not json").expect("set");

        let err = load_json::<BTreeMap<String, String>>(&storage, keys::TASK_COLUMNS)
            .expect_err("malformed json should fail");
        assert!(matches!(
            classify(&err),
            Some(MomentumError::MalformedSnapshot { .. })
        ));
    }

    #[test]
    fn load_json_absent_key_is_none() {
        let storage = MemoryStorage::new();
        let loaded: Option<Vec<u8>> = load_json(&storage, keys::OFFLINE_TASKS).expect("load");
        assert!(loaded.is_none());
    }
}
