use std::io::Write;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, instrument};

use crate::backend::{self, Mode};
use crate::cli::{Command, PrefsAction};
use crate::columns::ColumnTable;
use crate::config::Config;
use crate::error::MomentumError;
use crate::identity::{OAuthProvider, RemoteIdentity};
use crate::preferences::{PreferenceStore, Preferences};
use crate::remote::{RemoteClient, RemoteConfig};
use crate::render::Renderer;
use crate::session::SessionManager;
use crate::storage::LocalStorage;
use crate::store::TaskStore;
use crate::task::TaskPatch;
use crate::toast::Toasts;

pub struct App {
    pub store: TaskStore,
    pub session: Arc<SessionManager>,
    pub preferences: PreferenceStore,
    pub toasts: Toasts,
    pub renderer: Renderer,
}

impl App {
    #[instrument(skip(cfg, storage))]
    pub fn open(cfg: &Config, storage: Arc<dyn LocalStorage>, offline: bool) -> anyhow::Result<Self> {
        let toasts = Toasts::new();
        let client = RemoteClient::new(RemoteConfig::from_config(cfg), storage.clone())?;
        let session = Arc::new(SessionManager::new(
            Arc::new(RemoteIdentity::new(client.clone())),
            storage.clone(),
            toasts.clone(),
            client.redirect_url.clone(),
        ));

        if offline && !session.is_offline() {
            info!("offline requested by configuration");
            session.enter_offline_mode("Offline User", "offline@momentum.local");
        }

        let mode = Mode::detect(storage.as_ref())?;
        let backend = backend::select(mode, storage.clone(), &client)?;
        let store = TaskStore::new(
            backend,
            ColumnTable::new(storage.clone()),
            session.clone(),
            toasts.clone(),
        );

        Ok(Self {
            store,
            session,
            preferences: PreferenceStore::load(storage),
            toasts,
            renderer: Renderer::new(cfg)?,
        })
    }
}

#[instrument(skip_all)]
pub async fn dispatch(app: &mut App, command: Command, out: &mut dyn Write) -> anyhow::Result<bool> {
    debug!(mode = %app.store.mode(), "dispatching command");

    match command {
        Command::List { filter, sort } => {
            let Some(tasks) = app.store.fetch_tasks().await else {
                return Ok(false);
            };
            let mut prefs = app.preferences.get();
            if let Some(filter) = filter {
                prefs.task_filter = filter;
            }
            if let Some(sort) = sort {
                prefs.task_sort = sort;
            }
            app.renderer.task_table(out, &prefs.apply(&tasks))?;
            Ok(true)
        }
        Command::Board => {
            if app.store.fetch_tasks().await.is_none() {
                return Ok(false);
            }
            app.renderer.board(out, &app.store.board())?;
            Ok(true)
        }
        Command::Stats => {
            if app.store.fetch_tasks().await.is_none() {
                return Ok(false);
            }
            app.renderer.stats(out, &app.store.stats())?;
            Ok(true)
        }
        Command::Add {
            title,
            description,
            importance,
            column,
        } => {
            if title.trim().is_empty() {
                return Err(anyhow!("task title cannot be empty"));
            }
            let created = app
                .store
                .create_task(&title, &description, None, importance, column)
                .await;
            if let Some(task) = &created {
                writeln!(out, "Created task {}.", task.id)?;
            }
            Ok(created.is_some())
        }
        Command::Edit {
            id,
            title,
            description,
            importance,
            column,
        } => {
            let patch = TaskPatch {
                title,
                description,
                importance,
                workflow_column: column,
                ..TaskPatch::default()
            };
            if patch == TaskPatch::default() {
                return Err(anyhow!(
                    "nothing to change: pass --title, --description, --importance or --column"
                ));
            }
            Ok(app.store.update_task(id, patch).await.is_some())
        }
        Command::Toggle { id } => {
            if app.store.fetch_tasks().await.is_none() {
                return Ok(false);
            }
            let task = app.store.task(id).ok_or(MomentumError::NotFound { id })?;
            let updated = app.store.toggle_task_completion(id, task.is_complete).await;
            if let Some(task) = &updated {
                let state = if task.is_complete { "complete" } else { "open" };
                writeln!(out, "Task {id} is now {state}.")?;
            }
            Ok(updated.is_some())
        }
        Command::Move { id, column } => Ok(app.store.move_task(id, column).await.is_some()),
        Command::Importance { id, level } => {
            Ok(app.store.update_task_importance(id, level).await.is_some())
        }
        Command::Delete { id } => Ok(app.store.delete_task(id).await),
        Command::Whoami { refresh } => {
            let actor = app.session.fetch_user(refresh).await;
            app.renderer.actor(out, actor.as_ref(), app.store.mode())?;
            Ok(true)
        }
        Command::Login { email, password } => Ok(app.session.sign_in(&email, &password).await.is_some()),
        Command::Signup { email, password } => {
            Ok(app.session.sign_up(&email, &password).await.is_some())
        }
        Command::Oauth { provider } => {
            let url = match provider {
                OAuthProvider::Google => app.session.sign_in_with_google().await,
                OAuthProvider::Github => app.session.sign_in_with_github().await,
            };
            if let Some(url) = &url {
                writeln!(out, "Open this URL to continue signing in with {provider}:")?;
                writeln!(out, "{url}")?;
            }
            Ok(url.is_some())
        }
        Command::Logout => Ok(app.session.sign_out().await),
        Command::Offline { name, email } => {
            let actor = app.session.enter_offline_mode(&name, &email);
            if let Some(actor) = &actor {
                app.renderer.actor(out, Some(actor), Mode::Offline)?;
            }
            Ok(actor.is_some())
        }
        Command::Prefs { action } => {
            prefs(app, action.unwrap_or(PrefsAction::Show), out)?;
            Ok(true)
        }
        Command::Version => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(true)
        }
    }
}

fn prefs(app: &mut App, action: PrefsAction, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = &mut app.preferences;
    match action {
        PrefsAction::Show => {}
        PrefsAction::Filter { value } => store.set_task_filter(value)?,
        PrefsAction::Sort { value } => store.set_task_sort(value)?,
        PrefsAction::Theme { value } => store.set_theme(value)?,
        PrefsAction::Reset => store.reset()?,
    }
    let current: Preferences = store.get();
    app.renderer.preferences(out, &current)
}

pub fn flush_toasts(app: &App, out: &mut dyn Write) -> anyhow::Result<()> {
    app.renderer.toasts(out, &app.toasts.toasts())?;
    app.toasts.clear_all();
    Ok(())
}
