/// Errors returned by [`crate::DebugSession`] operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("{0}")]
    Parse(String),

    #[error("process is not stopped")]
    NotStopped,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl SessionError {
    /// Keep the whole context chain of a backend report
    pub(crate) fn backend(report: eyre::Report) -> Self {
        SessionError::Backend(format!("{report:#}"))
    }
}
