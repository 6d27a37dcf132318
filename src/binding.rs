//! Lazy bindings of tasks to their resolved arguments.
//!
//! Invoking a task produces a [`Binding`] tree without running anything. All
//! construction-time decisions happen here: parameters are filled from the
//! configuration snapshot, the unique key is derived, and the cache decision
//! is made — if the declared artifact already exists the binding's entry
//! point becomes "load" and the upstream requirements are never even
//! constructed, pruning that whole subgraph before any backend sees it.
//!
//! A binding tree is built fresh for every execution and consumed by exactly
//! one backend run.

use std::sync::Arc;

use crate::artifact::{Artifact, resolve_spec};
use crate::config::Config;
use crate::core::{Params, TaskKey};
use crate::error::BindError;
use crate::task::TaskRef;
use crate::tree::Tree;

/// A concrete, pending invocation of a task: the node type of the dependency
/// graph handed to backends.
pub struct Binding {
    task: TaskRef,
    params: Params,
    key: TaskKey,
    entry: Entry,
}

/// What executing a binding means.
pub enum Entry {
    /// A valid artifact existed at construction time; load it instead of
    /// running. Carries no requirements at all.
    Load(Arc<dyn Artifact>),
    /// Run the task with the resolved requirement subtree, then store the
    /// result if an artifact is declared.
    Run {
        requirements: Box<Tree<Binding>>,
        store: Option<Arc<dyn Artifact>>,
    },
}

/// Options for [`Binding::bind_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BindOptions {
    /// Force the root task to run even if its artifact exists. Requirements
    /// keep their own cache decisions.
    pub ignore_cache: bool,
}

impl Binding {
    /// Bind a task under the given configuration snapshot.
    pub fn bind(task: &TaskRef, config: &Config) -> Result<Binding, BindError> {
        Self::bind_with(task, config, BindOptions::default())
    }

    pub fn bind_with(
        task: &TaskRef,
        config: &Config,
        options: BindOptions,
    ) -> Result<Binding, BindError> {
        let mut stack = Vec::new();
        Self::bind_inner(task, config, options.ignore_cache, &mut stack)
    }

    fn bind_inner(
        task: &TaskRef,
        config: &Config,
        ignore_cache: bool,
        stack: &mut Vec<TaskKey>,
    ) -> Result<Binding, BindError> {
        let params = task.params().resolve(task.name(), config);
        let key = TaskKey::derive(task.name(), &params, config);

        if stack.contains(&key) {
            return Err(BindError::Cycle(key.to_string()));
        }

        // A union artifact gates the cache decision but is never written
        // through; its members are stored by the tasks that own them.
        let (artifact, storable) = match task.artifact(&params) {
            Some(spec) => (
                resolve_spec(&spec, task.name(), &params, &key, config)?,
                !matches!(spec, crate::artifact::ArtifactSpec::Union(_)),
            ),
            None => (None, false),
        };

        if !ignore_cache
            && let Some(artifact) = &artifact
            && artifact.exists()
        {
            tracing::debug!(task = %key, artifact = %artifact.describe(), "cache hit");
            return Ok(Binding {
                task: task.clone(),
                params,
                key,
                entry: Entry::Load(artifact.clone()),
            });
        }

        stack.push(key.clone());
        let requirements = task
            .requirements(&params)
            .try_map_ref(&mut |sub: &TaskRef| Self::bind_inner(sub, config, false, stack))?;
        stack.pop();

        Ok(Binding {
            task: task.clone(),
            params,
            key,
            entry: Entry::Run {
                requirements: Box::new(requirements),
                store: if storable { artifact } else { None },
            },
        })
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Whether this binding resolved to a cache load at construction time.
    pub fn is_cached(&self) -> bool {
        matches!(self.entry, Entry::Load(_))
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.entry {
            Entry::Load(artifact) => {
                write!(f, "Binding({} <- {})", self.key, artifact.describe())
            }
            Entry::Run { requirements, .. } => {
                write!(f, "Binding({}, {} requirements)", self.key, requirements.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::artifact::{ArtifactSpec, MemoryStore};
    use crate::core::TaskContext;
    use crate::fixtures::{CachedConstant, Constant};
    use crate::task::{Task, TaskTree, req};

    /// Counts how often its requirements are constructed.
    struct Watched {
        store: MemoryStore,
        expansions: Arc<AtomicUsize>,
    }

    impl Task for Watched {
        fn name(&self) -> &str {
            "binding::Watched"
        }

        fn requirements(&self, _params: &Params) -> TaskTree {
            self.expansions.fetch_add(1, Ordering::SeqCst);
            req(Constant::new(1))
        }

        fn artifact(&self, _params: &Params) -> Option<ArtifactSpec> {
            Some(ArtifactSpec::handle(self.store.artifact("watched")))
        }

        fn run(&self, _ctx: &TaskContext, _reqs: Tree<Value>) -> anyhow::Result<Value> {
            Ok(json!(1))
        }
    }

    /// Requires itself, transitively.
    struct Ouroboros;

    impl Task for Ouroboros {
        fn name(&self) -> &str {
            "binding::Ouroboros"
        }

        fn requirements(&self, _params: &Params) -> TaskTree {
            req(Ouroboros)
        }

        fn run(&self, _ctx: &TaskContext, _reqs: Tree<Value>) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn cache_hit_prunes_requirement_construction() {
        let config = Config::new();
        let store = MemoryStore::new();
        let expansions = Arc::new(AtomicUsize::new(0));
        let task = TaskRef::plain(Watched {
            store: store.clone(),
            expansions: expansions.clone(),
        });

        let binding = Binding::bind(&task, &config).unwrap();
        assert!(!binding.is_cached());
        assert_eq!(expansions.load(Ordering::SeqCst), 1);

        store.artifact("watched").dump(&json!(1)).unwrap();

        let binding = Binding::bind(&task, &config).unwrap();
        assert!(binding.is_cached());
        // The requirement subtree was never constructed this time.
        assert_eq!(expansions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ignore_cache_applies_to_the_root_only() {
        let config = Config::new();
        let store = MemoryStore::new();
        let (inner, _) = CachedConstant::new(2, &store);
        let (outer, _) = CachedConstant::new(3, &store);

        store.artifact(CachedConstant::cache_key(2)).dump(&json!(2)).unwrap();
        store.artifact(CachedConstant::cache_key(3)).dump(&json!(3)).unwrap();

        let root = TaskRef::plain(crate::task::Aggregate::new(
            "binding::Both",
            Tree::list([req(inner), req(outer)]),
        ));

        let binding =
            Binding::bind_with(&root, &config, BindOptions { ignore_cache: true }).unwrap();

        let Entry::Run { requirements, .. } = binding.entry() else {
            panic!("root must not load from cache");
        };
        let members = requirements.leaves();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|member| member.is_cached()));
    }

    #[test]
    fn config_fill_changes_identity_and_params() {
        let mut config = Config::new();
        config.set("fixtures::Constant", "n", 42);

        let unset = TaskRef::plain(Constant::unset());
        let bound = Binding::bind(&unset, &config).unwrap();

        assert_eq!(bound.params().value("n"), Some(&json!(42)));
        assert_eq!(
            bound.key(),
            &TaskRef::plain(Constant::new(42)).key(&config)
        );
    }

    #[test]
    fn cycles_are_fatal_at_construction_time() {
        let config = Config::new();
        let err = Binding::bind(&TaskRef::plain(Ouroboros), &config).unwrap_err();
        assert!(matches!(err, BindError::Cycle(key) if key.contains("Ouroboros")));
    }
}
