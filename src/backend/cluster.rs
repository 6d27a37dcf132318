//! The distributed-future backend.
//!
//! Actual scheduling is delegated to an external cluster-compute client;
//! this backend owns graph shaping. Every task is submitted keyed by its
//! unique identity, the ambient configuration snapshot travels with each
//! submission so remote execution observes the same configuration, and the
//! client's content-addressing guarantees that submitting the same key twice
//! returns the same underlying future instead of duplicating work — which
//! only works because the keys are computed here, before submission.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::artifact::Artifact;
use crate::backend::{Backend, load_cached, run_task, store_result};
use crate::binding::{Binding, Entry};
use crate::config::Config;
use crate::core::{Params, TaskKey};
use crate::error::{ClusterError, ExecuteError};
use crate::plan::Plan;
use crate::task::TaskRef;
use crate::tree::Tree;

/// What a submission asks the cluster to do.
pub enum Payload {
    /// Load a previously stored artifact.
    Load(Arc<dyn Artifact>),
    /// Run the task, then store the result if an artifact is declared.
    Run { store: Option<Arc<dyn Artifact>> },
}

/// One task shipped to the cluster: its identity key, the task itself with
/// resolved parameters, the requirement futures it depends on, and the
/// configuration snapshot the remote execution must observe.
pub struct Submission {
    pub key: TaskKey,
    pub task: TaskRef,
    pub params: Params,
    pub config: Config,
    pub requirements: Tree<ClusterFuture>,
    pub payload: Payload,
}

/// A shared completion slot representing one remote computation.
#[derive(Clone)]
pub struct ClusterFuture {
    key: TaskKey,
    state: Arc<FutureState>,
}

struct FutureState {
    slot: Mutex<Option<Result<Value, String>>>,
    ready: Condvar,
}

impl ClusterFuture {
    /// A future nothing has completed yet. Cluster clients create one per
    /// unique submission and complete it when the remote work finishes.
    pub fn pending(key: TaskKey) -> Self {
        Self {
            key,
            state: Arc::new(FutureState {
                slot: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Complete the future. The first result wins; later completions are
    /// ignored.
    pub fn complete(&self, result: Result<Value, String>) {
        let mut slot = self.state.slot.lock().expect("future lock poisoned");
        if slot.is_none() {
            *slot = Some(result);
        }
        self.state.ready.notify_all();
    }

    /// Block until the future resolves, unwrapping it to its concrete value.
    pub fn wait(&self) -> Result<Value, ClusterError> {
        let mut slot = self.state.slot.lock().expect("future lock poisoned");
        loop {
            match &*slot {
                Some(Ok(value)) => return Ok(value.clone()),
                Some(Err(message)) => {
                    return Err(ClusterError::Task(
                        self.key.to_string(),
                        anyhow::anyhow!("{message}"),
                    ));
                }
                None => {
                    slot = self
                        .state
                        .ready
                        .wait(slot)
                        .expect("future lock poisoned");
                }
            }
        }
    }
}

impl std::fmt::Debug for ClusterFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClusterFuture({})", self.key)
    }
}

/// The external cluster-compute collaborator.
pub trait ClusterClient: Send + Sync {
    /// Submit a task keyed by its identity. Submitting the same key twice
    /// must return the same underlying future.
    fn submit(&self, submission: Submission) -> Result<ClusterFuture, ClusterError>;

    /// Block until a future resolves.
    fn fetch(&self, future: &ClusterFuture) -> Result<Value, ClusterError>;
}

/// Shapes the deduplicated task graph and hands it to a [`ClusterClient`].
///
/// The calling thread suspends only at the very end, awaiting the root
/// future; intermediate ordering is the client's job.
pub struct ClusterBackend {
    config: Config,
    client: Arc<dyn ClusterClient>,
}

impl ClusterBackend {
    pub fn new(config: Config, client: Arc<dyn ClusterClient>) -> Self {
        Self { config, client }
    }

    fn submit_binding(
        &self,
        binding: &Binding,
        submitted: &mut HashMap<TaskKey, ClusterFuture>,
        progress: &ProgressBar,
    ) -> Result<ClusterFuture, ExecuteError> {
        // Keys are computed before submission; an already-submitted key
        // reuses its future without touching the client again.
        if let Some(existing) = submitted.get(binding.key()) {
            return Ok(existing.clone());
        }

        let (requirements, payload) = match binding.entry() {
            Entry::Load(artifact) => (Tree::Empty, Payload::Load(artifact.clone())),
            Entry::Run {
                requirements,
                store,
            } => (
                requirements.try_map_ref(&mut |sub: &Binding| {
                    self.submit_binding(sub, submitted, progress)
                })?,
                Payload::Run {
                    store: store.clone(),
                },
            ),
        };

        let future = self.client.submit(Submission {
            key: binding.key().clone(),
            task: binding.task().clone(),
            params: binding.params().clone(),
            config: self.config.clone(),
            requirements,
            payload,
        })?;

        submitted.insert(binding.key().clone(), future.clone());
        progress.inc(1);

        Ok(future)
    }
}

impl Backend for ClusterBackend {
    fn config(&self) -> &Config {
        &self.config
    }

    fn run(&self, binding: &Binding) -> Result<Value, ExecuteError> {
        let plan = Plan::of(binding);
        tracing::info!(
            tasks = plan.len(),
            cached = plan.cached_len(),
            "creating cluster graph"
        );

        let progress = ProgressBar::new(plan.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("invalid progress bar template")
                .progress_chars("#>-"),
        );

        let mut submitted = HashMap::new();
        let root = self.submit_binding(binding, &mut submitted, &progress)?;
        tracing::info!(submitted = submitted.len(), "submitted unique tasks");

        // The only point where the calling thread blocks: the root future is
        // unwrapped to its concrete value, never returned as an opaque handle.
        let value = self.client.fetch(&root)?;
        progress.finish_and_clear();

        Ok(value)
    }
}

/// In-process reference implementation of [`ClusterClient`].
///
/// Futures are memoized by task key for the lifetime of the cluster, so
/// resubmitting a known key — within one run or across runs — returns the
/// existing future without duplicating work. Each new submission executes on
/// a detached thread once its requirement futures have resolved.
#[derive(Default)]
pub struct LocalCluster {
    futures: Mutex<HashMap<TaskKey, ClusterFuture>>,
    executed: AtomicUsize,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many submissions actually started executing, as opposed to being
    /// served from a memoized future.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

impl ClusterClient for LocalCluster {
    fn submit(&self, submission: Submission) -> Result<ClusterFuture, ClusterError> {
        let mut futures = self.futures.lock().expect("cluster lock poisoned");

        if let Some(existing) = futures.get(&submission.key) {
            tracing::debug!(key = %submission.key, "reusing future for known key");
            return Ok(existing.clone());
        }

        let future = ClusterFuture::pending(submission.key.clone());
        futures.insert(submission.key.clone(), future.clone());
        self.executed.fetch_add(1, Ordering::SeqCst);

        let handle = future.clone();
        std::thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| execute_submission(&submission)));
            let outcome = match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err(String::from("task panicked on a cluster worker")),
            };
            handle.complete(outcome);
        });

        Ok(future)
    }

    fn fetch(&self, future: &ClusterFuture) -> Result<Value, ClusterError> {
        future.wait()
    }
}

fn execute_submission(submission: &Submission) -> Result<Value, ExecuteError> {
    // Wait on every requirement future and unwrap it to its value; a nested
    // future never reaches the task as an opaque handle.
    let reqs = submission
        .requirements
        .try_map_ref(&mut |future: &ClusterFuture| future.wait())?;

    match &submission.payload {
        Payload::Load(artifact) => load_cached(&submission.key, artifact.as_ref()),
        Payload::Run { store } => {
            let value = run_task(
                &submission.task,
                &submission.params,
                &submission.key,
                &submission.config,
                reqs,
            )?;
            store_result(&submission.key, store.as_deref(), &value)?;
            Ok(value)
        }
    }
}
