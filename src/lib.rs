#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod artifact;
mod backend;
mod binding;
mod config;
mod core;
mod error;
mod plan;
mod task;
mod tree;

pub use crate::artifact::{
    Artifact, ArtifactSpec, CompositeArtifact, FileArtifact, MemoryArtifact, MemoryStore,
};
pub use crate::backend::{
    Backend, ClusterBackend, ClusterClient, ClusterFuture, ImmediateBackend, LocalCluster,
    Payload, PoolBackend, Submission,
};
pub use crate::binding::{BindOptions, Binding, Entry};
pub use crate::config::Config;
pub use crate::core::{Hash32, Param, ParamValue, Params, TaskContext, TaskKey};
pub use crate::error::*;
pub use crate::plan::Plan;
pub use crate::task::{Aggregate, ParallelTask, Task, TaskRef, TaskTree, req, req_fold};
pub use crate::tree::Tree;

/// Initialize log output for the process, honoring `RUST_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;

    Ok(())
}
