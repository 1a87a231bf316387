use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TTL_MS: u64 = 3000;
pub const ERROR_TTL_MS: u64 = 4000;
pub const WARNING_TTL_MS: u64 = 3500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Info,
    Warning,
}

impl fmt::Display for ToastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToastKind::Success => "success",
            ToastKind::Error => "error",
            ToastKind::Info => "info",
            ToastKind::Warning => "warning",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toast {
    pub id: String,
    pub message: String,
    pub kind: ToastKind,
    pub ttl: u64,
}

#[derive(Default)]
struct Inner {
    toasts: Mutex<Vec<Toast>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

#[derive(Clone, Default)]
pub struct Toasts {
    inner: Arc<Inner>,
}

impl Toasts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_toast(&self, message: impl Into<String>, kind: ToastKind, ttl: u64) -> String {
        let id = generate_id();
        let toast = Toast {
            id: id.clone(),
            message: message.into(),
            kind,
            ttl,
        };
        debug!(toast_id = %id, kind = %kind, ttl, message = %toast.message, "toast added");
        self.inner.toasts.lock().push(toast);

        if ttl > 0 {
            self.schedule_expiry(&id, ttl);
        }

        id
    }

    pub fn success(&self, message: impl Into<String>) -> String {
        self.add_toast(message, ToastKind::Success, DEFAULT_TTL_MS)
    }

    pub fn error(&self, message: impl Into<String>) -> String {
        self.add_toast(message, ToastKind::Error, ERROR_TTL_MS)
    }

    pub fn info(&self, message: impl Into<String>) -> String {
        self.add_toast(message, ToastKind::Info, DEFAULT_TTL_MS)
    }

    pub fn warning(&self, message: impl Into<String>) -> String {
        self.add_toast(message, ToastKind::Warning, WARNING_TTL_MS)
    }

    pub fn remove_toast(&self, id: &str) {
        if let Some(timer) = self.inner.timers.lock().remove(id) {
            timer.abort();
        }
        self.inner.toasts.lock().retain(|toast| toast.id != id);
    }

    pub fn clear_all(&self) {
        let timers: Vec<JoinHandle<()>> = self
            .inner
            .timers
            .lock()
            .drain()
            .map(|(_, timer)| timer)
            .collect();
        for timer in timers {
            timer.abort();
        }
        self.inner.toasts.lock().clear();
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.inner.toasts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.toasts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.toasts.lock().is_empty()
    }

    fn schedule_expiry(&self, id: &str, ttl: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(toast_id = %id, "no async runtime; toast stays until dismissed");
            return;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let toast_id = id.to_string();
        // Locked across the spawn: the timer removes its own entry.
        let mut timers = self.inner.timers.lock();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(Duration::from_millis(ttl)).await;
            if let Some(inner) = weak.upgrade() {
                inner.timers.lock().remove(&toast_id);
                inner.toasts.lock().retain(|toast| toast.id != toast_id);
                debug!(toast_id = %toast_id, "toast expired");
            }
        });
        timers.insert(id.to_string(), timer);
    }
}

fn generate_id() -> String {
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", to_base36(millis), &suffix[..10])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
