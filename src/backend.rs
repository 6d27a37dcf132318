//! Execution strategies.
//!
//! A backend turns a resolved [`Binding`] tree into a concrete value. All
//! three strategies share one contract: requirements are fully resolved
//! before a task runs, the first failure aborts the run, and no failure is
//! ever retried by the engine.
//!
//! * [`ImmediateBackend`] — single-threaded depth-first reference strategy.
//! * [`PoolBackend`] — a fixed-size worker pool; a task is submitted only
//!   after every transitive requirement future has completed.
//! * [`ClusterBackend`] — graph shaping for an external cluster client with
//!   content-addressed deduplication by task key.

mod cluster;
mod immediate;
mod pool;

use serde_json::Value;

use crate::binding::Binding;
use crate::config::Config;
use crate::core::{Params, TaskContext, TaskKey};
use crate::error::ExecuteError;
use crate::task::TaskRef;
use crate::tree::Tree;

pub use cluster::{ClusterBackend, ClusterClient, ClusterFuture, LocalCluster, Payload, Submission};
pub use immediate::ImmediateBackend;
pub use pool::PoolBackend;

/// An execution strategy over binding trees.
pub trait Backend: Send + Sync {
    /// The configuration snapshot bindings are constructed against.
    fn config(&self) -> &Config;

    /// Resolve an already-constructed binding tree to its final value.
    fn run(&self, binding: &Binding) -> Result<Value, ExecuteError>;

    /// Bind a task fresh and resolve it. A new binding tree is built for
    /// every execution; trees are never reused across runs.
    fn execute(&self, task: &TaskRef) -> Result<Value, ExecuteError> {
        let binding = Binding::bind(task, self.config())?;
        self.run(&binding)
    }
}

/// Run one task with fully resolved requirement values. For a fold task this
/// is the sequential reference fold:
/// `acc = reduce(acc, map(item, reqs), reqs)` over `items(reqs)`.
pub(crate) fn run_task(
    task: &TaskRef,
    params: &Params,
    key: &TaskKey,
    config: &Config,
    reqs: Tree<Value>,
) -> Result<Value, ExecuteError> {
    let ctx = TaskContext {
        config,
        params,
        key,
    };

    let result = match task {
        TaskRef::Plain(task) => task.run(&ctx, reqs),
        TaskRef::Fold(task) => (|| {
            let mut acc = task.accumulator(&ctx, &reqs)?;
            for item in task.items(&ctx, &reqs)? {
                let mapped = task.map(&ctx, item, &reqs)?;
                acc = task.reduce(&ctx, acc, mapped, &reqs)?;
            }
            Ok(acc)
        })(),
    };

    result.map_err(|err| ExecuteError::Task(key.to_string(), err))
}

/// Load a cached result, surfacing a failed load as a cache inconsistency
/// instead of falling back to recomputation.
pub(crate) fn load_cached(
    key: &TaskKey,
    artifact: &dyn crate::artifact::Artifact,
) -> Result<Value, ExecuteError> {
    artifact
        .load()
        .map_err(|err| ExecuteError::Cache(key.to_string(), err))
}

/// Persist a freshly computed result if the task declared an artifact.
pub(crate) fn store_result(
    key: &TaskKey,
    artifact: Option<&dyn crate::artifact::Artifact>,
    value: &Value,
) -> Result<(), ExecuteError> {
    if let Some(artifact) = artifact {
        artifact
            .dump(value)
            .map_err(|err| ExecuteError::Store(key.to_string(), err))?;
        tracing::debug!(task = %key, artifact = %artifact.describe(), "stored result");
    }
    Ok(())
}
