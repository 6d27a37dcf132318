//! The task abstractions.
//!
//! A task is a unit of work that declares its call parameters, the upstream
//! tasks it requires, and optionally a durable artifact for its result. The
//! engine never mutates a task after construction; invoking one produces a
//! [`Binding`](crate::Binding) and nothing runs until a backend resolves it.
//!
//! Two flavors exist behind the type-erased [`TaskRef`]: plain tasks with a
//! single `run`, and fold tasks exposing a map-reduce surface so a backend
//! can process their items independently.

use std::sync::Arc;

use serde_json::Value;

use crate::artifact::ArtifactSpec;
use crate::config::Config;
use crate::core::{Params, TaskContext, TaskKey};
use crate::tree::Tree;

/// A tree of task references — the declared-but-unresolved shape of a task's
/// dependencies. The top-level variant decides how resolved values reach
/// `run`: a `Leaf` arrives as a single value, `List`/`Tuple` as a sequence,
/// `Map` as named values, `Empty` as nothing.
pub type TaskTree = Tree<TaskRef>;

/// A user-defined unit of work.
///
/// Implementations should use the module-qualified type name as `name` (for
/// example `"etl::Download"`); it is the stable half of the task's identity
/// and the configuration section the engine fills unset parameters from.
pub trait Task: Send + Sync {
    /// Qualified type name; must be stable across processes.
    fn name(&self) -> &str;

    /// Declared call parameters. Defaults to none.
    fn params(&self) -> Params {
        Params::new()
    }

    /// The tasks this task requires, as a function of the resolved call
    /// parameters. Defaults to no requirements.
    fn requirements(&self, _params: &Params) -> TaskTree {
        Tree::Empty
    }

    /// Where the result should be stored, if anywhere. Defaults to no
    /// artifact: the task is recomputed on every execution.
    fn artifact(&self, _params: &Params) -> Option<ArtifactSpec> {
        None
    }

    /// Do the work. The resolved requirement values arrive in the shape
    /// declared by [`Task::requirements`].
    fn run(&self, ctx: &TaskContext, reqs: Tree<Value>) -> anyhow::Result<Value>;
}

/// A task with a map-reduce surface instead of a single `run`.
///
/// Execution is equivalent to:
///
/// ```text
/// acc = accumulator(reqs)
/// for item in items(reqs):
///     acc = reduce(acc, map(item, reqs), reqs)
/// acc
/// ```
///
/// The immediate backend runs the fold sequentially in-process; parallel
/// backends are free to distribute the `map` calls.
pub trait ParallelTask: Send + Sync {
    fn name(&self) -> &str;

    fn params(&self) -> Params {
        Params::new()
    }

    fn requirements(&self, _params: &Params) -> TaskTree {
        Tree::Empty
    }

    fn artifact(&self, _params: &Params) -> Option<ArtifactSpec> {
        None
    }

    /// The input items to process.
    fn items(&self, ctx: &TaskContext, reqs: &Tree<Value>) -> anyhow::Result<Vec<Value>>;

    /// Transform one item.
    fn map(&self, ctx: &TaskContext, item: Value, reqs: &Tree<Value>) -> anyhow::Result<Value>;

    /// The initial accumulator value.
    fn accumulator(&self, ctx: &TaskContext, reqs: &Tree<Value>) -> anyhow::Result<Value>;

    /// Fold one mapped item into the accumulator.
    fn reduce(
        &self,
        ctx: &TaskContext,
        acc: Value,
        item: Value,
        reqs: &Tree<Value>,
    ) -> anyhow::Result<Value>;
}

/// A cheaply clonable, type-erased reference to either task flavor.
#[derive(Clone)]
pub enum TaskRef {
    Plain(Arc<dyn Task>),
    Fold(Arc<dyn ParallelTask>),
}

impl TaskRef {
    pub fn plain(task: impl Task + 'static) -> Self {
        TaskRef::Plain(Arc::new(task))
    }

    pub fn fold(task: impl ParallelTask + 'static) -> Self {
        TaskRef::Fold(Arc::new(task))
    }

    pub fn name(&self) -> &str {
        match self {
            TaskRef::Plain(task) => task.name(),
            TaskRef::Fold(task) => task.name(),
        }
    }

    pub fn params(&self) -> Params {
        match self {
            TaskRef::Plain(task) => task.params(),
            TaskRef::Fold(task) => task.params(),
        }
    }

    pub fn requirements(&self, params: &Params) -> TaskTree {
        match self {
            TaskRef::Plain(task) => task.requirements(params),
            TaskRef::Fold(task) => task.requirements(params),
        }
    }

    pub fn artifact(&self, params: &Params) -> Option<ArtifactSpec> {
        match self {
            TaskRef::Plain(task) => task.artifact(params),
            TaskRef::Fold(task) => task.artifact(params),
        }
    }

    /// The unique key of this invocation under the given configuration:
    /// qualified name plus the post-config-resolution parameters.
    pub fn key(&self, config: &Config) -> TaskKey {
        let params = self.params().resolve(self.name(), config);
        TaskKey::derive(self.name(), &params, config)
    }
}

impl std::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRef::Plain(task) => write!(f, "TaskRef::Plain({})", task.name()),
            TaskRef::Fold(task) => write!(f, "TaskRef::Fold({})", task.name()),
        }
    }
}

impl<T: Task + 'static> From<T> for TaskRef {
    fn from(task: T) -> Self {
        TaskRef::plain(task)
    }
}

/// Shorthand for a single-task requirement subtree.
pub fn req(task: impl Task + 'static) -> TaskTree {
    Tree::Leaf(TaskRef::plain(task))
}

/// Shorthand for a fold-task requirement subtree.
pub fn req_fold(task: impl ParallelTask + 'static) -> TaskTree {
    Tree::Leaf(TaskRef::fold(task))
}

/// A task that aggregates the results of a fixed set of member tasks.
///
/// Its requirements are the members, its result is the resolved member tree
/// collapsed into one value, and its artifact is the union of the members'
/// artifacts: it exists only when every member artifact exists, so a single
/// missing member forces the whole aggregate to recompute. If any member
/// declares no artifact the aggregate declares none either — caching is
/// all-or-nothing across members.
pub struct Aggregate {
    name: String,
    members: TaskTree,
}

impl Aggregate {
    pub fn new(name: impl Into<String>, members: TaskTree) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

impl Task for Aggregate {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> Params {
        // Identity follows from the member identities.
        let mut params = Params::new();
        for (index, member) in self.members.leaves().into_iter().enumerate() {
            params = params.task(format!("member_{index}"), member.clone());
        }
        params
    }

    fn requirements(&self, _params: &Params) -> TaskTree {
        self.members.clone()
    }

    fn artifact(&self, _params: &Params) -> Option<ArtifactSpec> {
        Some(ArtifactSpec::Union(self.members.clone()))
    }

    fn run(&self, _ctx: &TaskContext, reqs: Tree<Value>) -> anyhow::Result<Value> {
        Ok(reqs.into_value())
    }
}
