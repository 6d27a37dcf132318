pub use anyhow::Error as TaskError;
use thiserror::Error;

/// Configuration errors raised while constructing a [`Binding`](crate::Binding).
///
/// These are fatal and reported immediately — a malformed task definition is
/// never deferred to execution time and never retried.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("task '{task}': artifact template references unknown parameter '{param}'")]
    TemplateParam { task: String, param: String },

    #[error("task '{task}': artifact template has an unterminated '{{' placeholder")]
    TemplateSyntax { task: String },

    #[error("dependency cycle through task '{0}'")]
    Cycle(String),
}

/// Errors surfaced by [`Backend::run`](crate::Backend::run).
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The task's own logic failed. Propagated unchanged to the caller.
    #[error("task '{0}':\n{1}")]
    Task(String, TaskError),

    /// The artifact reported `exists()` but could not be loaded. Surfaced
    /// rather than recomputed, since recomputing would hide data corruption.
    #[error("task '{0}': artifact exists but failed to load:\n{1}")]
    Cache(String, ArtifactError),

    #[error("task '{0}': failed to store artifact:\n{1}")]
    Store(String, ArtifactError),

    /// A worker disappeared without delivering a result.
    #[error("task '{0}': worker dropped its result channel")]
    Lost(String),

    #[error("failed to start the worker pool:\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Errors from artifact storage collaborators.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode value:\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("failed to decode value:\n{0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("no value stored under key '{0}'")]
    Missing(String),

    #[error("{0} is not supported by this artifact")]
    Unsupported(&'static str),
}

/// Errors from the external cluster-compute collaborator.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster task '{0}':\n{1}")]
    Task(String, TaskError),

    #[error("cluster future '{0}' was lost before completion")]
    Lost(String),

    #[error("failed to reach the cluster:\n{0}")]
    Transport(TaskError),
}

/// A mismatch between the declared requirement shape and the way the task's
/// `run` method consumes it.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("expected a single requirement value, found {found}")]
    ExpectedSingle { found: &'static str },

    #[error("expected a sequence of requirement values, found {found}")]
    ExpectedList { found: &'static str },

    #[error("expected a named requirement map, found {found}")]
    ExpectedMap { found: &'static str },

    #[error("no requirement named '{0}'")]
    MissingKey(String),
}
