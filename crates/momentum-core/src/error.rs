use thiserror::Error;

#[derive(Debug, Error)]
pub enum MomentumError {
    #[error("{operation} rejected by remote service (HTTP {status}): {message}")]
    Backend {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("no owner id: sign in or pass an owner explicitly")]
    NoOwner,

    #[error("malformed local snapshot under key {key}: {source}")]
    MalformedSnapshot {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("task {id} not found")]
    NotFound { id: i64 },
}

impl MomentumError {
    pub fn backend(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            status,
            message: message.into(),
        }
    }
}

pub fn classify(err: &anyhow::Error) -> Option<&MomentumError> {
    err.chain().find_map(|cause| cause.downcast_ref::<MomentumError>())
}
