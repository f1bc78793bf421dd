use thiserror::Error;

/// The result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A service record could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
