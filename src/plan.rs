//! Deduplicated view of a binding tree.
//!
//! A binding tree may mention the same computation many times; a [`Plan`]
//! folds it into a DAG with one node per unique task key. Backends use it for
//! pre-flight totals and logging, and it renders as a mermaid diagram for
//! inspection.

use std::collections::{BTreeMap, HashMap};

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::binding::{Binding, Entry};
use crate::core::TaskKey;

struct PlanNode {
    key: TaskKey,
    cached: bool,
}

/// The unique tasks of one binding tree and the edges between them.
pub struct Plan {
    graph: Graph<PlanNode, ()>,
    by_key: HashMap<TaskKey, NodeIndex>,
}

impl Plan {
    pub fn of(binding: &Binding) -> Plan {
        let mut plan = Plan {
            graph: Graph::new(),
            by_key: HashMap::new(),
        };
        plan.insert(binding);
        plan
    }

    fn insert(&mut self, binding: &Binding) -> NodeIndex {
        if let Some(&index) = self.by_key.get(binding.key()) {
            return index;
        }

        let index = self.graph.add_node(PlanNode {
            key: binding.key().clone(),
            cached: binding.is_cached(),
        });
        self.by_key.insert(binding.key().clone(), index);

        if let Entry::Run { requirements, .. } = binding.entry() {
            requirements.for_each(&mut |dep: &Binding| {
                let dep_index = self.insert(dep);
                self.graph.update_edge(dep_index, index, ());
            });
        }

        index
    }

    /// Number of unique tasks.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of unique tasks that resolved to a cache load.
    pub fn cached_len(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|node| node.cached)
            .count()
    }

    /// Unique task count per qualified task name.
    pub fn counts_by_task(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for node in self.graph.node_weights() {
            *counts.entry(node.key.name().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

impl std::fmt::Display for Plan {
    /// Renders the plan as a mermaid `graph LR` diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let label = node.key.to_string().replace('"', "\\\"");
            if node.cached {
                writeln!(f, "    {:?}[\"{} (cached)\"]", index.index(), label)?;
            } else {
                writeln!(f, "    {:?}[\"{}\"]", index.index(), label)?;
            }
        }

        for edge in self.graph.edge_indices() {
            let (source, target) = self.graph.edge_endpoints(edge).unwrap();
            writeln!(f, "    {:?} --> {:?}", source.index(), target.index())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::artifact::{Artifact, MemoryStore};
    use crate::config::Config;
    use crate::fixtures::{CachedConstant, SumPlusTwo};
    use crate::task::TaskRef;

    #[test]
    fn repeated_tasks_deduplicate_to_one_node() {
        let config = Config::new();
        // Requires Constant(2), Constant(3), Constant(2).
        let task = TaskRef::plain(SumPlusTwo::new(vec![2, 3, 2]));
        let binding = Binding::bind(&task, &config).unwrap();

        let plan = Plan::of(&binding);

        // Root plus two unique constants.
        assert_eq!(plan.len(), 3);
        let counts = plan.counts_by_task();
        assert_eq!(counts.get("fixtures::Constant"), Some(&2));
        assert_eq!(counts.get("fixtures::SumPlusTwo"), Some(&1));
    }

    #[test]
    fn cached_nodes_are_counted_and_rendered() {
        let config = Config::new();
        let store = MemoryStore::new();
        let (task, _runs) = CachedConstant::new(7, &store);
        store
            .artifact(CachedConstant::cache_key(7))
            .dump(&json!(7))
            .unwrap();

        let binding = Binding::bind(&TaskRef::plain(task), &config).unwrap();
        let plan = Plan::of(&binding);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.cached_len(), 1);

        let rendered = plan.to_string();
        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("(cached)"));
    }
}
