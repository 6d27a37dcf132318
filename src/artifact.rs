//! Durable artifacts and the cache decision.
//!
//! An artifact is the stored result of a task: something that can report
//! whether it exists, how big it is, when it changed, and can load or dump a
//! value. The engine only ever talks to the [`Artifact`] trait — any
//! format-specific storage satisfying it is pluggable.
//!
//! Staleness is a primitive here, not a policy: `last_modified` is exposed so
//! a task can compare an artifact against an upstream timestamp inside its
//! own `artifact()`/`requirements()` logic, but nothing invalidates an
//! existing artifact automatically.

mod local;
mod memory;

use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

use crate::config::Config;
use crate::core::{Params, TaskKey};
use crate::error::{ArtifactError, BindError};
use crate::task::{TaskRef, TaskTree};
use crate::tree::Tree;

pub use local::FileArtifact;
pub use memory::{MemoryArtifact, MemoryStore};

/// The location and metadata of a stored result.
pub trait Artifact: Send + Sync {
    /// Whether the artifact currently exists.
    fn exists(&self) -> bool;

    /// Size of the stored artifact, in bytes.
    fn size(&self) -> Result<u64, ArtifactError>;

    /// When the artifact was last written.
    fn last_modified(&self) -> Result<SystemTime, ArtifactError>;

    fn load(&self) -> Result<Value, ArtifactError>;

    fn dump(&self, value: &Value) -> Result<(), ArtifactError>;

    /// Human-readable location, for logs and errors.
    fn describe(&self) -> String;
}

/// How a task declares its artifact.
#[derive(Clone)]
pub enum ArtifactSpec {
    /// A concrete handle, used as-is.
    Handle(Arc<dyn Artifact>),
    /// A filesystem path template. `{param}` placeholders interpolate the
    /// resolved call parameters; `{key}` interpolates the task's unique key.
    Path(String),
    /// A factory producing a handle from the resolved call parameters.
    Factory(Arc<dyn Fn(&Params) -> Arc<dyn Artifact> + Send + Sync>),
    /// The union of the artifacts of the given member tasks. Resolves to a
    /// [`CompositeArtifact`], or to no artifact at all if any member
    /// declares none.
    Union(TaskTree),
}

impl ArtifactSpec {
    pub fn handle(artifact: impl Artifact + 'static) -> Self {
        ArtifactSpec::Handle(Arc::new(artifact))
    }

    pub fn path(template: impl Into<String>) -> Self {
        ArtifactSpec::Path(template.into())
    }

    pub fn factory(f: impl Fn(&Params) -> Arc<dyn Artifact> + Send + Sync + 'static) -> Self {
        ArtifactSpec::Factory(Arc::new(f))
    }
}

impl std::fmt::Debug for ArtifactSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactSpec::Handle(a) => write!(f, "ArtifactSpec::Handle({})", a.describe()),
            ArtifactSpec::Path(t) => write!(f, "ArtifactSpec::Path({t})"),
            ArtifactSpec::Factory(_) => write!(f, "ArtifactSpec::Factory(..)"),
            ArtifactSpec::Union(t) => write!(f, "ArtifactSpec::Union({} members)", t.len()),
        }
    }
}

/// An artifact over a tree of member artifacts.
///
/// It exists only when every member exists, its `last_modified` is the most
/// recent member (the most permissive staleness answer), and loading rebuilds
/// the member tree shape. Storing through a composite is not supported; the
/// members are stored individually by the tasks that own them.
pub struct CompositeArtifact {
    members: Tree<Arc<dyn Artifact>>,
}

impl CompositeArtifact {
    pub fn new(members: Tree<Arc<dyn Artifact>>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &Tree<Arc<dyn Artifact>> {
        &self.members
    }
}

impl Artifact for CompositeArtifact {
    fn exists(&self) -> bool {
        self.members
            .fold(true, &mut |member, acc| acc && member.exists())
    }

    fn size(&self) -> Result<u64, ArtifactError> {
        self.members
            .fold(Ok(0u64), &mut |member, acc: Result<u64, ArtifactError>| {
                Ok(acc? + member.size()?)
            })
    }

    fn last_modified(&self) -> Result<SystemTime, ArtifactError> {
        self.members.fold(
            Ok(SystemTime::UNIX_EPOCH),
            &mut |member, acc: Result<SystemTime, ArtifactError>| {
                Ok(acc?.max(member.last_modified()?))
            },
        )
    }

    fn load(&self) -> Result<Value, ArtifactError> {
        let loaded = self
            .members
            .try_map_ref(&mut |member: &Arc<dyn Artifact>| member.load())?;
        Ok(loaded.into_value())
    }

    fn dump(&self, _value: &Value) -> Result<(), ArtifactError> {
        Err(ArtifactError::Unsupported("dump"))
    }

    fn describe(&self) -> String {
        format!("composite of {} artifacts", self.members.len())
    }
}

/// Interpolate `{param}` and `{key}` placeholders in a path template from the
/// resolved call parameters. An unknown placeholder is a configuration error.
pub(crate) fn render_template(
    template: &str,
    task: &str,
    params: &Params,
    key: &TaskKey,
) -> Result<String, BindError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let close = tail.find('}').ok_or_else(|| BindError::TemplateSyntax {
            task: task.to_string(),
        })?;
        let name = &tail[..close];

        if name == "key" {
            out.push_str(&key.to_string());
        } else {
            let value = params.value(name).ok_or_else(|| BindError::TemplateParam {
                task: task.to_string(),
                param: name.to_string(),
            })?;
            match value {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }

        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

enum UnionStop {
    NoArtifact,
    Bind(BindError),
}

/// Resolve a task's declared artifact spec into a concrete handle.
///
/// Returns `Ok(None)` for union specs where any member declares no artifact —
/// the aggregate's caching is all-or-nothing across its members.
pub(crate) fn resolve_spec(
    spec: &ArtifactSpec,
    task: &str,
    params: &Params,
    key: &TaskKey,
    config: &Config,
) -> Result<Option<Arc<dyn Artifact>>, BindError> {
    match spec {
        ArtifactSpec::Handle(artifact) => Ok(Some(artifact.clone())),
        ArtifactSpec::Path(template) => {
            let path = render_template(template, task, params, key)?;
            Ok(Some(Arc::new(FileArtifact::new(path))))
        }
        ArtifactSpec::Factory(factory) => Ok(Some(factory(params))),
        ArtifactSpec::Union(members) => {
            if members.len() == 0 {
                return Ok(None);
            }

            let resolved = members.try_map_ref(&mut |member: &TaskRef| {
                let member_params = member.params().resolve(member.name(), config);
                let member_key = member.key(config);
                let spec = member
                    .artifact(&member_params)
                    .ok_or(UnionStop::NoArtifact)?;
                resolve_spec(&spec, member.name(), &member_params, &member_key, config)
                    .map_err(UnionStop::Bind)?
                    .ok_or(UnionStop::NoArtifact)
            });

            match resolved {
                Ok(tree) => Ok(Some(Arc::new(CompositeArtifact::new(tree)))),
                Err(UnionStop::NoArtifact) => Ok(None),
                Err(UnionStop::Bind(err)) => Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_interpolates_params_and_key() {
        let params = Params::new().with("region", "eu").with("year", 2024);
        let key = TaskKey::derive("demo::Fetch", &params, &Config::new());

        let rendered = render_template(
            "cache/{region}/{year}/{key}.cbor",
            "demo::Fetch",
            &params,
            &key,
        )
        .unwrap();

        assert_eq!(rendered, format!("cache/eu/2024/{key}.cbor"));
    }

    #[test]
    fn template_rejects_unknown_placeholder() {
        let params = Params::new();
        let key = TaskKey::derive("demo::Fetch", &params, &Config::new());

        let err = render_template("cache/{nope}", "demo::Fetch", &params, &key).unwrap_err();
        assert!(matches!(err, BindError::TemplateParam { param, .. } if param == "nope"));

        let err = render_template("cache/{open", "demo::Fetch", &params, &key).unwrap_err();
        assert!(matches!(err, BindError::TemplateSyntax { .. }));
    }

    #[test]
    fn composite_exists_is_the_and_of_members() {
        let store = MemoryStore::new();
        store.artifact("a").dump(&json!(1)).unwrap();
        store.artifact("b").dump(&json!(2)).unwrap();

        let composite = CompositeArtifact::new(Tree::list([
            Tree::leaf(Arc::new(store.artifact("a")) as Arc<dyn Artifact>),
            Tree::leaf(Arc::new(store.artifact("b")) as Arc<dyn Artifact>),
        ]));

        assert!(composite.exists());
        assert_eq!(composite.load().unwrap(), json!([1, 2]));

        store.remove("b");
        assert!(!composite.exists());
    }

    #[test]
    fn composite_load_preserves_member_shape() {
        let store = MemoryStore::new();
        store.artifact("x").dump(&json!("left")).unwrap();
        store.artifact("y").dump(&json!("right")).unwrap();

        let composite = CompositeArtifact::new(Tree::mapping([
            (
                "x".to_string(),
                Tree::leaf(Arc::new(store.artifact("x")) as Arc<dyn Artifact>),
            ),
            (
                "y".to_string(),
                Tree::leaf(Arc::new(store.artifact("y")) as Arc<dyn Artifact>),
            ),
        ]));

        assert_eq!(
            composite.load().unwrap(),
            json!({"x": "left", "y": "right"})
        );
    }

    #[test]
    fn composite_last_modified_is_the_most_recent_member() {
        let store = MemoryStore::new();
        store.artifact("old").dump(&json!(1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.artifact("new").dump(&json!(2)).unwrap();

        let newest = store.artifact("new").last_modified().unwrap();
        let composite = CompositeArtifact::new(Tree::list([
            Tree::leaf(Arc::new(store.artifact("old")) as Arc<dyn Artifact>),
            Tree::leaf(Arc::new(store.artifact("new")) as Arc<dyn Artifact>),
        ]));

        assert_eq!(composite.last_modified().unwrap(), newest);
    }

    #[test]
    fn composite_refuses_dump() {
        let composite = CompositeArtifact::new(Tree::Empty);
        assert!(matches!(
            composite.dump(&json!(1)),
            Err(ArtifactError::Unsupported("dump"))
        ));
    }
}
