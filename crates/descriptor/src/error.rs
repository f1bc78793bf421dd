use thiserror::Error;

use crate::ContainerKind;

/// The result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A descriptor or application could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A descriptor of one kind was read through another kind's codec.
    #[error("expected a {expected} container, found {found}")]
    KindMismatch {
        /// The kind the codec handles.
        expected: ContainerKind,

        /// The kind the descriptor declares.
        found: ContainerKind,
    },

    /// Two containers share a name.
    #[error("container {0} is declared more than once")]
    DuplicateContainer(String),

    /// A container depends on a container that is not declared.
    #[error("container {container} depends on unknown container {dependency}")]
    UnknownDependency {
        /// The depending container.
        container: String,

        /// The missing dependency.
        dependency: String,
    },

    /// The dependency graph has a cycle.
    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// A container probed over a socket declares no port.
    #[error("container {0} uses socket readiness but declares no port")]
    MissingPort(String),

    /// A descriptor field is empty or malformed.
    #[error("container {container}: invalid {field}")]
    InvalidField {
        /// The container.
        container: String,

        /// The offending field.
        field: &'static str,
    },
}
