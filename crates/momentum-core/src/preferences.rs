use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::{LocalStorage, keys, load_json, save_json};
use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskFilter {
    #[default]
    All,
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskSort {
    #[default]
    DateDesc,
    DateAsc,
    Importance,
    Alphabetical,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    #[default]
    DarkDefault,
    LightGold,
    ProfessionalBlue,
    ElegantPurple,
}

macro_rules! kebab_str {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(anyhow!(
                        "invalid {}: {other} (expected one of: {})",
                        stringify!($ty),
                        [$($name),+].join(", ")
                    )),
                }
            }
        }
    };
}

kebab_str!(TaskFilter {
    All => "all",
    Complete => "complete",
    Incomplete => "incomplete",
});

kebab_str!(TaskSort {
    DateDesc => "date-desc",
    DateAsc => "date-asc",
    Importance => "importance",
    Alphabetical => "alphabetical",
});

kebab_str!(Theme {
    DarkDefault => "dark-default",
    LightGold => "light-gold",
    ProfessionalBlue => "professional-blue",
    ElegantPurple => "elegant-purple",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub task_filter: TaskFilter,
    pub task_sort: TaskSort,
    pub theme: Theme,
}

impl Preferences {
    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        let mut out: Vec<Task> = tasks
            .iter()
            .filter(|task| match self.task_filter {
                TaskFilter::All => true,
                TaskFilter::Complete => task.is_complete,
                TaskFilter::Incomplete => !task.is_complete,
            })
            .cloned()
            .collect();

        match self.task_sort {
            TaskSort::DateDesc => out.sort_by_key(|task| Reverse(task.created_at)),
            TaskSort::DateAsc => out.sort_by_key(|task| task.created_at),
            TaskSort::Importance => {
                out.sort_by_key(|task| (Reverse(task.importance), Reverse(task.created_at)))
            }
            TaskSort::Alphabetical => out.sort_by_key(|task| task.title.to_lowercase()),
        }
        out
    }
}

pub struct PreferenceStore {
    storage: Arc<dyn LocalStorage>,
    current: Preferences,
}

impl PreferenceStore {
    pub fn load(storage: Arc<dyn LocalStorage>) -> Self {
        let current = match load_json::<Preferences>(storage.as_ref(), keys::PREFERENCES) {
            Ok(prefs) => prefs.unwrap_or_default(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "preferences unreadable; using defaults");
                Preferences::default()
            }
        };
        Self { storage, current }
    }

    pub fn get(&self) -> Preferences {
        self.current
    }

    pub fn set_task_filter(&mut self, filter: TaskFilter) -> anyhow::Result<()> {
        self.current.task_filter = filter;
        self.persist()
    }

    pub fn set_task_sort(&mut self, sort: TaskSort) -> anyhow::Result<()> {
        self.current.task_sort = sort;
        self.persist()
    }

    pub fn set_theme(&mut self, theme: Theme) -> anyhow::Result<()> {
        self.current.theme = theme;
        self.persist()
    }

    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.current = Preferences::default();
        self.persist()
    }

    fn persist(&self) -> anyhow::Result<()> {
        debug!(prefs = ?self.current, "saving preferences");
        save_json(self.storage.as_ref(), keys::PREFERENCES, &self.current)
    }
}
