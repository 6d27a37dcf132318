//! The single-threaded reference backend.

use serde_json::Value;

use crate::backend::{Backend, load_cached, run_task, store_result};
use crate::binding::{Binding, Entry};
use crate::config::Config;
use crate::error::ExecuteError;

/// Executes the binding tree depth-first, synchronously, in the current
/// thread — the call stack mirrors the dependency tree. No parallelism is
/// involved; this is the correctness baseline the other backends are
/// measured against, and the most convenient strategy for debugging.
pub struct ImmediateBackend {
    config: Config,
}

impl ImmediateBackend {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn resolve(&self, binding: &Binding) -> Result<Value, ExecuteError> {
        let span = tracing::debug_span!("task", key = %binding.key());
        let _enter = span.enter();

        match binding.entry() {
            Entry::Load(artifact) => load_cached(binding.key(), artifact.as_ref()),
            Entry::Run {
                requirements,
                store,
            } => {
                let reqs = requirements.try_map_ref(&mut |sub: &Binding| self.resolve(sub))?;
                let value = run_task(
                    binding.task(),
                    binding.params(),
                    binding.key(),
                    &self.config,
                    reqs,
                )?;
                store_result(binding.key(), store.as_deref(), &value)?;
                Ok(value)
            }
        }
    }
}

impl Backend for ImmediateBackend {
    fn config(&self) -> &Config {
        &self.config
    }

    fn run(&self, binding: &Binding) -> Result<Value, ExecuteError> {
        self.resolve(binding)
    }
}

impl Default for ImmediateBackend {
    fn default() -> Self {
        Self::new(Config::new())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::artifact::{ArtifactSpec, FileArtifact, MemoryStore};
    use crate::binding::BindOptions;
    use crate::core::{Params, TaskContext};
    use crate::error::BindError;
    use crate::fixtures::{CachedConstant, Constant, Failing, SumPlusTwo};
    use crate::task::{Aggregate, Task, TaskRef, TaskTree, req};
    use crate::tree::Tree;

    #[test]
    fn single_task_runs_to_its_value() {
        let backend = ImmediateBackend::default();
        assert_eq!(
            backend.execute(&TaskRef::plain(Constant::new(2))).unwrap(),
            json!(2)
        );
    }

    #[test]
    fn named_requirements_arrive_keyed() {
        struct Spread;

        impl Task for Spread {
            fn name(&self) -> &str {
                "immediate::Spread"
            }

            fn requirements(&self, _params: &Params) -> TaskTree {
                Tree::mapping([
                    ("low".to_string(), req(Constant::new(1))),
                    ("high".to_string(), req(Constant::new(10))),
                ])
            }

            fn run(&self, _ctx: &TaskContext, reqs: Tree<serde_json::Value>) -> anyhow::Result<serde_json::Value> {
                let low = reqs.named("low")?.as_i64().unwrap_or(0);
                let high = reqs.named("high")?.as_i64().unwrap_or(0);
                Ok(json!(high - low))
            }
        }

        let backend = ImmediateBackend::default();
        assert_eq!(backend.execute(&TaskRef::plain(Spread)).unwrap(), json!(9));
    }

    #[test]
    fn cache_round_trip() {
        let backend = ImmediateBackend::default();
        let store = MemoryStore::new();
        let (task, runs) = CachedConstant::new(5, &store);
        let task = TaskRef::plain(task);

        let first = backend.execute(&task).unwrap();
        assert_eq!(first, json!(5));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(store.contains(&CachedConstant::cache_key(5)));

        // The second invocation binds to a load entry and never runs.
        let binding = Binding::bind(&task, backend.config()).unwrap();
        assert!(binding.is_cached());
        let second = backend.run(&binding).unwrap();
        assert_eq!(second, first);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ignore_cache_recomputes_and_overwrites() {
        let backend = ImmediateBackend::default();
        let store = MemoryStore::new();
        let (task, runs) = CachedConstant::new(5, &store);
        let task = TaskRef::plain(task);

        backend.execute(&task).unwrap();
        let binding =
            Binding::bind_with(&task, backend.config(), BindOptions { ignore_cache: true })
                .unwrap();
        backend.run(&binding).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn aggregate_recomputes_fully_when_one_member_disappears() {
        let backend = ImmediateBackend::default();
        let store = MemoryStore::new();
        let (left, left_runs) = CachedConstant::new(1, &store);
        let (right, right_runs) = CachedConstant::new(2, &store);
        let aggregate = TaskRef::plain(Aggregate::new(
            "immediate::Pair",
            Tree::list([req(left), req(right)]),
        ));

        assert_eq!(backend.execute(&aggregate).unwrap(), json!([1, 2]));
        assert_eq!(left_runs.load(Ordering::SeqCst), 1);

        // Everything cached now: the aggregate binds straight to a load.
        let binding = Binding::bind(&aggregate, backend.config()).unwrap();
        assert!(binding.is_cached());
        assert_eq!(backend.run(&binding).unwrap(), json!([1, 2]));
        assert_eq!(left_runs.load(Ordering::SeqCst), 1);
        assert_eq!(right_runs.load(Ordering::SeqCst), 1);

        // Deleting one member invalidates the whole aggregate; the surviving
        // member reloads from its own cache instead of rerunning.
        store.remove(&CachedConstant::cache_key(2));
        assert_eq!(backend.execute(&aggregate).unwrap(), json!([1, 2]));
        assert_eq!(left_runs.load(Ordering::SeqCst), 1);
        assert_eq!(right_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn task_errors_propagate_unchanged() {
        let backend = ImmediateBackend::default();
        let root = TaskRef::plain(SumPlusTwo::with_requirements(
            vec![2],
            Tree::list([req(Constant::new(2)), req(Failing)]),
        ));

        let err = backend.execute(&root).unwrap_err();
        assert!(matches!(err, ExecuteError::Task(key, _) if key.contains("Failing")));
    }

    #[test]
    fn corrupt_cache_is_surfaced_not_recomputed() {
        struct OnDisk {
            path: String,
        }

        impl Task for OnDisk {
            fn name(&self) -> &str {
                "immediate::OnDisk"
            }

            fn artifact(&self, _params: &Params) -> Option<ArtifactSpec> {
                Some(ArtifactSpec::handle(FileArtifact::new(self.path.clone())))
            }

            fn run(&self, _ctx: &TaskContext, _reqs: Tree<serde_json::Value>) -> anyhow::Result<serde_json::Value> {
                Ok(json!("fresh"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.cbor").to_str().unwrap().to_string();
        std::fs::write(&path, b"\xff\xffgarbage").unwrap();

        let backend = ImmediateBackend::default();
        let err = backend.execute(&TaskRef::plain(OnDisk { path })).unwrap_err();
        assert!(matches!(err, ExecuteError::Cache(..)));
    }

    #[test]
    fn bind_errors_surface_through_execute() {
        struct BadTemplate;

        impl Task for BadTemplate {
            fn name(&self) -> &str {
                "immediate::BadTemplate"
            }

            fn artifact(&self, _params: &Params) -> Option<ArtifactSpec> {
                Some(ArtifactSpec::path("cache/{missing}.cbor"))
            }

            fn run(&self, _ctx: &TaskContext, _reqs: Tree<serde_json::Value>) -> anyhow::Result<serde_json::Value> {
                Ok(json!(0))
            }
        }

        let backend = ImmediateBackend::default();
        let err = backend.execute(&TaskRef::plain(BadTemplate)).unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Bind(BindError::TemplateParam { .. })
        ));
    }
}
