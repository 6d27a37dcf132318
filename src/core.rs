use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::Config;
use crate::task::TaskRef;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `weir` this is the basis of task identity: two invocations hashing to
/// the same digest describe the same computation, are safe to execute at most
/// once, and may share one result across every occurrence in the graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The unique key of a task invocation: qualified type name plus a digest of
/// the post-config-resolution parameters.
///
/// Keys are deterministic and stable across process boundaries — a separate
/// worker derives the identical key from the identical inputs. They name
/// cache artifacts (the `{key}` template placeholder) and deduplicate
/// submissions in the distributed backend.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    name: Arc<str>,
    digest: Hash32,
}

impl TaskKey {
    /// Derive the key for `name` with the given resolved parameters.
    ///
    /// Parameters marked excluded are skipped. Parameter values that are
    /// themselves task references contribute the referenced task's own key
    /// under the same configuration, never an attempt to execute it.
    pub fn derive(name: &str, params: &Params, config: &Config) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());

        for param in params.entries.iter().filter(|p| !p.exclude) {
            hasher.update(&[0x1f]);
            hasher.update(param.name.as_bytes());
            hasher.update(&[0x1f]);
            match &param.value {
                // serde_json maps are ordered, so these bytes are canonical.
                ParamValue::Json(value) => {
                    let bytes = serde_json::to_vec(value)
                        .unwrap_or_else(|_| b"null".to_vec());
                    hasher.update(&bytes);
                }
                ParamValue::Task(task) => {
                    hasher.update(task.key(config).to_string().as_bytes());
                }
                ParamValue::Unset => {
                    hasher.update(b"\0unset");
                }
            }
        }

        TaskKey {
            name: Arc::from(name),
            digest: Hash32::from(<[u8; 32]>::from(hasher.finalize())),
        }
    }

    /// The task's qualified type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> Hash32 {
        self.digest
    }
}

impl std::fmt::Display for TaskKey {
    /// Rendered as `name-hexprefix`; the dash keeps keys readable in
    /// scheduler dashboards.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, &self.digest.to_hex()[..16])
    }
}

impl Debug for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskKey({self})")
    }
}

/// One declared call parameter of a task.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
    /// Excluded parameters do not participate in the identity digest.
    pub exclude: bool,
}

#[derive(Debug, Clone)]
pub enum ParamValue {
    /// Left unset by the caller; filled from configuration if possible.
    Unset,
    Json(Value),
    /// A nested task reference, hashed by the task's identity.
    Task(TaskRef),
}

/// The explicit, ordered parameter list of a task invocation.
///
/// Tasks declare every call parameter here instead of relying on signature
/// introspection; the same list drives configuration fill-in, the identity
/// digest and artifact path templates, which keeps those three views of the
/// arguments in lock-step.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with a concrete value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push(Param {
            name: name.into(),
            value: ParamValue::Json(value.into()),
            exclude: false,
        });
        self
    }

    /// Declare a parameter the caller left unset. It will be filled from the
    /// configuration snapshot at binding-construction time.
    pub fn unset(mut self, name: impl Into<String>) -> Self {
        self.entries.push(Param {
            name: name.into(),
            value: ParamValue::Unset,
            exclude: false,
        });
        self
    }

    /// Declare an optional parameter: `Some` behaves like [`Params::with`],
    /// `None` like [`Params::unset`].
    pub fn opt(self, name: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self.unset(name),
        }
    }

    /// Declare a task-valued parameter, hashed by the task's identity.
    pub fn task(mut self, name: impl Into<String>, task: impl Into<TaskRef>) -> Self {
        self.entries.push(Param {
            name: name.into(),
            value: ParamValue::Task(task.into()),
            exclude: false,
        });
        self
    }

    /// Declare a parameter that carries a value but is excluded from the
    /// identity digest.
    pub fn excluded(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push(Param {
            name: name.into(),
            value: ParamValue::Json(value.into()),
            exclude: true,
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// The concrete JSON value of a parameter, if it has one.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(ParamValue::Json(value)) => Some(value),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill every unset parameter from the configuration snapshot. Pure
    /// function of `(task name, declared parameters, configuration)`;
    /// parameters absent from the configuration stay unset.
    pub fn resolve(&self, task: &str, config: &Config) -> Params {
        let entries = self
            .entries
            .iter()
            .map(|param| {
                let value = match &param.value {
                    ParamValue::Unset => match config.lookup(task, &param.name) {
                        Some(value) => ParamValue::Json(value.clone()),
                        None => ParamValue::Unset,
                    },
                    other => other.clone(),
                };
                Param {
                    name: param.name.clone(),
                    value,
                    exclude: param.exclude,
                }
            })
            .collect();

        Params { entries }
    }
}

/// The context handed to every task execution.
///
/// Carries the resolved call parameters, the task's unique key and the
/// configuration snapshot. Read-only for the duration of the run.
pub struct TaskContext<'a> {
    pub config: &'a Config,
    pub params: &'a Params,
    pub key: &'a TaskKey,
}

impl TaskContext<'_> {
    /// Typed access to a resolved parameter.
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        match self.params.get(name) {
            Some(ParamValue::Json(value)) => Ok(serde_json::from_value(value.clone())?),
            Some(ParamValue::Task(task)) => {
                anyhow::bail!(
                    "parameter '{}' is a task reference ({})",
                    name,
                    task.key(self.config)
                )
            }
            Some(ParamValue::Unset) => {
                anyhow::bail!("parameter '{name}' was never set and has no configured default")
            }
            None => anyhow::bail!("no parameter named '{name}'"),
        }
    }
}
