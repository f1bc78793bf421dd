use thiserror::Error;

/// Result type for master operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while deploying an application.
#[derive(Debug, Error)]
pub enum Error {
    /// The container backend failed.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A coordination operation failed.
    #[error("coordination error: {0}")]
    Coordination(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The application description is invalid.
    #[error(transparent)]
    Descriptor(#[from] convoy_descriptor::Error),

    /// The wait was interrupted.
    #[error("interrupted")]
    Interrupted,

    /// A descriptor node vanished.
    #[error("descriptor node {0} does not exist")]
    MissingNode(String),

    /// The container was never published by this master.
    #[error("unknown container {0}")]
    UnknownContainer(String),
}

impl Error {
    /// Wraps a backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }

    /// Wraps a coordination failure.
    pub fn coordination(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Coordination(Box::new(err))
    }
}

/// Errors of the [`LocalBackend`](crate::LocalBackend).
#[derive(Debug, Error)]
pub enum LocalBackendError {
    /// The broker process could not be managed.
    #[error(transparent)]
    Supervisor(#[from] convoy_supervisor::Error),

    /// The handle does not belong to this backend.
    #[error("unknown container handle {0}")]
    UnknownHandle(u64),
}
