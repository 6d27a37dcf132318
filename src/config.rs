//! The configuration collaborator.
//!
//! Tasks may leave parameters unset; the engine fills them from a [`Config`]
//! snapshot at binding-construction time, keyed by the task's qualified name
//! and the parameter name. The snapshot is plain serializable data so the
//! distributed backend can ship it to remote workers verbatim — there is no
//! ambient global to leak identity or caching state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A two-level map of default parameter values: task qualified name to
/// parameter name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a default value for one parameter of one task.
    pub fn set(
        &mut self,
        task: impl Into<String>,
        param: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.sections
            .entry(task.into())
            .or_default()
            .insert(param.into(), value.into());
        self
    }

    /// Look up the default value for a parameter of a task. Pure function of
    /// the `(task, param)` pair; used only for parameters the caller left
    /// unset.
    pub fn lookup(&self, task: &str, param: &str) -> Option<&Value> {
        self.sections.get(task)?.get(param)
    }

    /// All defaults declared for one task.
    pub fn section(&self, task: &str) -> Option<&BTreeMap<String, Value>> {
        self.sections.get(task)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_is_scoped_by_task() {
        let mut cfg = Config::new();
        cfg.set("etl::Download", "url", "https://example.org")
            .set("etl::Download", "retries", 3)
            .set("etl::Parse", "retries", 7);

        assert_eq!(
            cfg.lookup("etl::Download", "retries"),
            Some(&json!(3))
        );
        assert_eq!(cfg.lookup("etl::Parse", "retries"), Some(&json!(7)));
        assert_eq!(cfg.lookup("etl::Parse", "url"), None);
        assert_eq!(cfg.lookup("other", "url"), None);
    }

    #[test]
    fn snapshot_round_trips_through_serde() {
        let mut cfg = Config::new();
        cfg.set("a::B", "n", 42).set("a::B", "tag", "x");

        let bytes = serde_json::to_vec(&cfg).unwrap();
        let back: Config = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back, cfg);
    }
}
