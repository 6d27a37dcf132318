//! The concurrent worker-pool backend.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, sync_channel};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::artifact::Artifact;
use crate::backend::{Backend, load_cached, run_task, store_result};
use crate::binding::{Binding, Entry};
use crate::config::Config;
use crate::core::{Params, TaskKey};
use crate::error::ExecuteError;
use crate::plan::Plan;
use crate::task::TaskRef;
use crate::tree::Tree;

/// A self-contained unit of work. Everything a worker needs crosses the pool
/// boundary by value inside the order — the task handle, the resolved
/// requirement values and the configuration snapshot — so no worker ever
/// reaches back into the controlling thread's state.
struct WorkOrder {
    task: TaskRef,
    params: Params,
    key: TaskKey,
    config: Config,
    payload: Payload,
}

enum Payload {
    Load(Arc<dyn Artifact>),
    Run {
        reqs: Tree<Value>,
        store: Option<Arc<dyn Artifact>>,
    },
}

impl WorkOrder {
    fn execute(self) -> Result<Value, ExecuteError> {
        match self.payload {
            Payload::Load(artifact) => load_cached(&self.key, artifact.as_ref()),
            Payload::Run { reqs, store } => {
                let value = run_task(&self.task, &self.params, &self.key, &self.config, reqs)?;
                store_result(&self.key, store.as_deref(), &value)?;
                Ok(value)
            }
        }
    }
}

/// Handle for the eventual result of a submitted work order.
struct PoolFuture {
    key: TaskKey,
    rx: Receiver<Result<Value, ExecuteError>>,
}

impl PoolFuture {
    fn wait(self) -> Result<Value, ExecuteError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(ExecuteError::Lost(self.key.to_string())),
        }
    }
}

/// Executes binding trees on a fixed-size worker pool.
///
/// The controlling thread resolves a task's requirement subtrees to futures,
/// joins *all* of them, and only then submits the dependent task with the
/// extracted values attached — a task is never submitted before every
/// transitive requirement it depends on has completed. Workers never block on
/// other futures, so any pool size down to a single worker makes progress.
///
/// This backend intentionally does not deduplicate identical sub-tasks; the
/// distributed backend owns that responsibility.
pub struct PoolBackend {
    config: Config,
    workers: usize,
}

impl PoolBackend {
    /// `workers = 0` selects rayon's default thread count.
    pub fn new(config: Config, workers: usize) -> Self {
        Self { config, workers }
    }

    fn submit(
        &self,
        binding: &Binding,
        scope: &rayon::Scope<'_>,
        progress: &ProgressBar,
    ) -> Result<PoolFuture, ExecuteError> {
        let payload = match binding.entry() {
            Entry::Load(artifact) => Payload::Load(artifact.clone()),
            Entry::Run {
                requirements,
                store,
            } => {
                // Resolve the requirement subtrees to their own futures,
                // then join all of them before this task may be submitted.
                let futures = requirements
                    .try_map_ref(&mut |sub: &Binding| self.submit(sub, scope, progress))?;
                let reqs = futures.try_map(&mut |future: PoolFuture| future.wait())?;
                Payload::Run {
                    reqs,
                    store: store.clone(),
                }
            }
        };

        let order = WorkOrder {
            task: binding.task().clone(),
            params: binding.params().clone(),
            key: binding.key().clone(),
            config: self.config.clone(),
            payload,
        };

        let (tx, rx) = sync_channel(1);
        let key = binding.key().clone();
        let worker_key = key.clone();
        let progress = progress.clone();

        scope.spawn(move |_| {
            let span = tracing::debug_span!("task", key = %worker_key);
            let _enter = span.enter();

            let result = match catch_unwind(AssertUnwindSafe(move || order.execute())) {
                Ok(result) => result,
                Err(panic) => {
                    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        format!("Task panicked: {s}")
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        format!("Task panicked: {s}")
                    } else {
                        String::from("Task panicked with unknown payload")
                    };

                    Err(ExecuteError::Task(worker_key.to_string(), anyhow::anyhow!(msg)))
                }
            };

            progress.inc(1);

            // The receiver may be gone already if a sibling failed first.
            let _ = tx.send(result);
        });

        Ok(PoolFuture { key, rx })
    }
}

fn count_bindings(binding: &Binding) -> u64 {
    match binding.entry() {
        Entry::Load(_) => 1,
        Entry::Run { requirements, .. } => {
            requirements.fold(1, &mut |sub, acc| acc + count_bindings(sub))
        }
    }
}

impl Backend for PoolBackend {
    fn config(&self) -> &Config {
        &self.config
    }

    fn run(&self, binding: &Binding) -> Result<Value, ExecuteError> {
        let plan = Plan::of(binding);
        tracing::info!(
            tasks = plan.len(),
            cached = plan.cached_len(),
            workers = self.workers,
            "executing on worker pool"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let progress = ProgressBar::new(count_bindings(binding));
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("invalid progress bar template")
                .progress_chars("#>-"),
        );

        // The scope blocks until every spawned worker has finished, so the
        // pool is released on all exit paths; a failure aborts the run while
        // unrelated in-flight siblings complete and are discarded.
        let value = pool.in_place_scope(|scope| {
            let root = self.submit(binding, scope, &progress)?;
            root.wait()
        });

        progress.finish_and_clear();
        value
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::fixtures::{CachedConstant, Constant, Failing, SumPlusTwo};
    use crate::artifact::MemoryStore;
    use crate::task::{TaskRef, req};

    #[test]
    fn wide_requirement_trees_resolve_correctly() {
        let backend = PoolBackend::new(Config::new(), 4);
        let inputs: Vec<i64> = (1..=20).collect();
        let expected: i64 = inputs.iter().sum::<i64>() + 2;
        let task = TaskRef::plain(SumPlusTwo::new(inputs));

        assert_eq!(backend.execute(&task).unwrap(), json!(expected));
    }

    #[test]
    fn single_worker_pools_still_make_progress() {
        let backend = PoolBackend::new(Config::new(), 1);
        let task = TaskRef::plain(SumPlusTwo::new(vec![2, 3, 2]));

        assert_eq!(backend.execute(&task).unwrap(), json!(9));
    }

    #[test]
    fn rerunning_without_deleting_artifacts_is_idempotent() {
        let backend = PoolBackend::new(Config::new(), 2);
        let store = MemoryStore::new();
        let (task, runs) = CachedConstant::new(11, &store);
        let task = TaskRef::plain(task);

        let first = backend.execute(&task).unwrap();
        let second = backend.execute(&task).unwrap();

        assert_eq!(first, second);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_propagate_and_release_the_pool() {
        let backend = PoolBackend::new(Config::new(), 2);
        let broken = TaskRef::plain(SumPlusTwo::with_requirements(
            vec![],
            Tree::list([req(Constant::new(1)), req(Failing)]),
        ));

        let err = backend.execute(&broken).unwrap_err();
        assert!(matches!(err, ExecuteError::Task(key, _) if key.contains("Failing")));

        // The pool is fully released; the backend stays usable.
        let fine = TaskRef::plain(SumPlusTwo::new(vec![2, 3, 2]));
        assert_eq!(backend.execute(&fine).unwrap(), json!(9));
    }

    #[test]
    fn panics_surface_as_task_errors() {
        struct Bomb;

        impl crate::task::Task for Bomb {
            fn name(&self) -> &str {
                "pool::Bomb"
            }

            fn run(
                &self,
                _ctx: &crate::core::TaskContext,
                _reqs: Tree<Value>,
            ) -> anyhow::Result<Value> {
                panic!("kaboom");
            }
        }

        let backend = PoolBackend::new(Config::new(), 2);
        let err = backend.execute(&TaskRef::plain(Bomb)).unwrap_err();
        assert!(matches!(err, ExecuteError::Task(_, source) if source.to_string().contains("kaboom")));
    }
}
