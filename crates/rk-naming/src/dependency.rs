//! Feature dependency graph
//!
//! Edges point from a feature to the features it depends on: the producer of
//! its input solid and the owners of the entities it references.

use std::collections::BTreeSet;

use crate::shape_id::FeatureId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeSet<FeatureId>,
    /// (dependent, dependency)
    edges: BTreeSet<(FeatureId, FeatureId)>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, feature: FeatureId) -> bool {
        self.nodes.insert(feature)
    }

    /// Remove a node, leaving its edges in place
    pub fn remove_node(&mut self, feature: &FeatureId) -> bool {
        self.nodes.remove(feature)
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node_with_edges(&mut self, feature: &FeatureId) -> bool {
        self.edges
            .retain(|(from, to)| from != feature && to != feature);
        self.nodes.remove(feature)
    }

    pub fn contains(&self, feature: &FeatureId) -> bool {
        self.nodes.contains(feature)
    }

    /// Replace the dependencies of `feature`
    pub fn set_dependencies(
        &mut self,
        feature: &FeatureId,
        dependencies: impl IntoIterator<Item = FeatureId>,
    ) {
        self.nodes.insert(feature.clone());
        self.edges.retain(|(from, _)| from != feature);
        for dependency in dependencies {
            if &dependency != feature {
                self.edges.insert((feature.clone(), dependency));
            }
        }
    }

    pub fn add_edge(&mut self, feature: FeatureId, dependency: FeatureId) -> bool {
        self.edges.insert((feature, dependency))
    }

    pub fn remove_edge(&mut self, feature: &FeatureId, dependency: &FeatureId) -> bool {
        self.edges.remove(&(feature.clone(), dependency.clone()))
    }

    pub fn dependencies_of(&self, feature: &FeatureId) -> Vec<FeatureId> {
        self.edges
            .iter()
            .filter(|(from, _)| from == feature)
            .map(|(_, to)| to.clone())
            .collect()
    }

    pub fn dependents_of(&self, feature: &FeatureId) -> Vec<FeatureId> {
        self.edges
            .iter()
            .filter(|(_, to)| to == feature)
            .map(|(from, _)| from.clone())
            .collect()
    }

    /// Edges with an endpoint that is not a node
    pub fn dangling_edges(&self) -> Vec<(FeatureId, FeatureId)> {
        self.edges
            .iter()
            .filter(|(from, to)| !self.nodes.contains(from) || !self.nodes.contains(to))
            .cloned()
            .collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FeatureId> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
