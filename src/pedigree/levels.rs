use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::Violation;
use crate::pedigree::graph::{ParentLink, PedigreeGraph};

/// Ordered generations; index 0 holds the founders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Generations(Vec<BTreeSet<String>>);

impl Generations {
    /// Level-wise expansion over parent→child edges. A child is placed once all
    /// of its in-submission parents are placed, so it always lands one
    /// generation after its latest parent. Whatever is left unplaced (orphans,
    /// cycles) is reported as unrelated.
    pub fn compute(graph: &PedigreeGraph) -> Result<Self, Violation> {
        let mut pending: BTreeMap<&str, usize> = graph
            .nodes
            .iter()
            .map(|(name, node)| {
                let parents = [node.father.as_ref(), node.mother.as_ref()]
                    .into_iter()
                    .flatten()
                    .filter(|link| matches!(link, ParentLink::Member(_)))
                    .count();
                (name.as_str(), parents)
            })
            .collect();

        let mut placed: BTreeSet<&str> = graph
            .nodes
            .iter()
            .filter(|(_, node)| node.is_founder())
            .map(|(name, _)| name.as_str())
            .collect();
        let founders: BTreeSet<String> = placed.iter().map(|name| name.to_string()).collect();
        let mut levels = vec![founders];

        loop {
            let mut next = BTreeSet::new();
            let current = levels.last().map(|level| level.iter()).into_iter().flatten();
            for name in current {
                let Some(node) = graph.node(name) else {
                    continue;
                };
                for child in &node.children {
                    if placed.contains(child.as_str()) {
                        continue;
                    }
                    let Some(remaining) = pending.get_mut(child.as_str()) else {
                        continue;
                    };
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        next.insert(child.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            for name in &next {
                if let Some((key, _)) = graph.nodes.get_key_value(name) {
                    placed.insert(key.as_str());
                }
            }
            levels.push(next);
        }

        let total: usize = levels.iter().map(BTreeSet::len).sum();
        if total != graph.nodes.len() {
            let names = graph
                .nodes
                .keys()
                .filter(|name| !placed.contains(name.as_str()))
                .cloned()
                .collect();
            return Err(Violation::UnrelatedMember { names });
        }

        levels.retain(|level| !level.is_empty());
        Ok(Self(levels))
    }

    pub fn levels(&self) -> &[BTreeSet<String>] {
        &self.0
    }

    pub fn founders(&self) -> impl Iterator<Item = &String> {
        self.0.first().into_iter().flatten()
    }

    pub fn generation_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|level| level.contains(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.0.iter().map(BTreeSet::len).sum()
    }
}
