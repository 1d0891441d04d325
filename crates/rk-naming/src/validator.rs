//! Rollback validation
//!
//! [`RollbackState`] summarizes a body and the services around it so a
//! rollback can be checked against the state captured before the
//! transaction. The orphan sweep looks for bookkeeping that outlived the
//! feature it belongs to.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::error::NamingResult;
use crate::feature::TopologyReferences;
use crate::shape_id::FeatureId;

const EMPTY_GEOMETRY: &str = "empty";

// ============== Rollback State ==============

/// Counts and hashes describing a body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackState {
    pub body_id: Uuid,
    /// Hash of the canonical export of the body's solid
    pub geometry_hash: String,
    pub feature_count: usize,
    pub body_count: usize,
    /// Topology references held by the body's features
    pub constraint_count: usize,
    pub shape_record_count: usize,
    pub operation_record_count: usize,
    /// Derived data: recorded, never compared
    pub cache_entry_count: usize,
    pub dependency_node_count: usize,
    pub dependency_edge_count: usize,
    pub metadata_hash: String,
    /// Geometry hash of every body of the document
    pub body_hashes: BTreeMap<Uuid, String>,
    pub feature_hashes: Vec<String>,
}

impl RollbackState {
    pub fn capture(doc: &Document, body_id: Uuid) -> NamingResult<Self> {
        let body = doc.require_body(body_id)?;
        let body_hashes = doc
            .bodies()
            .map(|b| (b.id, geometry_hash(doc, b.solid())))
            .collect();

        let metadata = serde_json::to_vec(body.metadata()).unwrap_or_default();

        Ok(Self {
            body_id,
            geometry_hash: geometry_hash(doc, body.solid()),
            feature_count: body.features().len(),
            body_count: doc.bodies().count(),
            constraint_count: body.features().iter().map(|f| f.reference_count()).sum(),
            shape_record_count: doc.naming().record_count(body_id),
            operation_record_count: doc.naming().operation_count(body_id),
            cache_entry_count: doc.cache().len(),
            dependency_node_count: doc.dependencies().node_count(),
            dependency_edge_count: doc.dependencies().edge_count(),
            metadata_hash: blake3::hash(&metadata).to_hex().to_string(),
            body_hashes,
            feature_hashes: body.features().iter().map(|f| f.content_hash()).collect(),
        })
    }

    /// Describe how `other` differs from this state
    ///
    /// Cache entry counts are ignored.
    pub fn differences(&self, other: &RollbackState) -> Vec<String> {
        let mut diffs = Vec::new();
        let mut compare = |field: &str, a: String, b: String| {
            if a != b {
                diffs.push(format!("{}: {} -> {}", field, a, b));
            }
        };
        compare("geometry_hash", self.geometry_hash.clone(), other.geometry_hash.clone());
        compare("feature_count", self.feature_count.to_string(), other.feature_count.to_string());
        compare("body_count", self.body_count.to_string(), other.body_count.to_string());
        compare(
            "constraint_count",
            self.constraint_count.to_string(),
            other.constraint_count.to_string(),
        );
        compare(
            "shape_record_count",
            self.shape_record_count.to_string(),
            other.shape_record_count.to_string(),
        );
        compare(
            "operation_record_count",
            self.operation_record_count.to_string(),
            other.operation_record_count.to_string(),
        );
        compare(
            "dependency_node_count",
            self.dependency_node_count.to_string(),
            other.dependency_node_count.to_string(),
        );
        compare(
            "dependency_edge_count",
            self.dependency_edge_count.to_string(),
            other.dependency_edge_count.to_string(),
        );
        compare("metadata_hash", self.metadata_hash.clone(), other.metadata_hash.clone());
        if self.body_hashes != other.body_hashes {
            diffs.push(String::from("body_hashes differ"));
        }
        if self.feature_hashes != other.feature_hashes {
            diffs.push(String::from("feature_hashes differ"));
        }
        diffs
    }
}

fn geometry_hash(doc: &Document, solid: Option<rk_cad::Solid>) -> String {
    let Some(solid) = solid else {
        return String::from(EMPTY_GEOMETRY);
    };
    match doc.kernel().export_brep(&solid) {
        Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
        Err(e) => {
            tracing::debug!("Export of solid {} failed: {}", solid.id, e);
            String::from(EMPTY_GEOMETRY)
        }
    }
}

// ============== Orphans ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanKind {
    StaleShapeRecord,
    StaleOperationRecord,
    /// A feature references an identity nobody knows
    DanglingFeatureReference,
    StaleCacheEntry,
    DanglingDependencyEdge,
}

impl fmt::Display for OrphanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrphanKind::StaleShapeRecord => "stale shape record",
            OrphanKind::StaleOperationRecord => "stale operation record",
            OrphanKind::DanglingFeatureReference => "dangling feature reference",
            OrphanKind::StaleCacheEntry => "stale cache entry",
            OrphanKind::DanglingDependencyEdge => "dangling dependency edge",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanInfo {
    pub kind: OrphanKind,
    pub identifier: String,
    pub severity: Severity,
    /// Owning feature
    pub feature_id: Option<FeatureId>,
    /// Dependency end of a dangling edge
    pub target: Option<FeatureId>,
    pub body_id: Uuid,
    pub removable: bool,
}

impl OrphanInfo {
    fn new(kind: OrphanKind, identifier: impl Into<String>, severity: Severity, body_id: Uuid) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            severity,
            feature_id: None,
            target: None,
            body_id,
            removable: true,
        }
    }

    fn owned_by(mut self, feature_id: FeatureId) -> Self {
        self.feature_id = Some(feature_id);
        self
    }
}

impl fmt::Display for OrphanInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.identifier)?;
        if let Some(feature_id) = &self.feature_id {
            write!(f, " of feature {}", feature_id)?;
        }
        Ok(())
    }
}

/// Outcome of the consistency pass after a rollback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    pub body_id: Uuid,
    /// Whether a before state was available to compare against
    pub validated: bool,
    pub consistent: bool,
    pub differences: Vec<String>,
    pub orphans: Vec<OrphanInfo>,
    pub removed: usize,
}

pub struct RollbackValidator;

impl RollbackValidator {
    /// Find bookkeeping of a body that outlived its feature
    pub fn sweep(doc: &Document, body_id: Uuid) -> NamingResult<Vec<OrphanInfo>> {
        let body = doc.require_body(body_id)?;
        let naming = doc.naming();
        let live_in_body: BTreeSet<FeatureId> = body.features().iter().map(|f| f.id.clone()).collect();
        let live = doc.live_features();
        let mut orphans = Vec::new();

        for id in naming.orphaned_records(body_id, &live_in_body) {
            orphans.push(
                OrphanInfo::new(
                    OrphanKind::StaleShapeRecord,
                    id.uuid.to_string(),
                    Severity::Warning,
                    body_id,
                )
                .owned_by(id.feature_id),
            );
        }

        for feature_id in naming.orphaned_operations(body_id, &live_in_body) {
            orphans.push(
                OrphanInfo::new(
                    OrphanKind::StaleOperationRecord,
                    feature_id.to_string(),
                    Severity::Warning,
                    body_id,
                )
                .owned_by(feature_id),
            );
        }

        for feature in body.features() {
            for (_, refs) in feature.references() {
                for id in &refs.shape_ids {
                    if naming.record(body_id, id.uuid).is_none() {
                        let mut orphan = OrphanInfo::new(
                            OrphanKind::DanglingFeatureReference,
                            id.uuid.to_string(),
                            Severity::Error,
                            body_id,
                        )
                        .owned_by(feature.id.clone());
                        orphan.removable = false;
                        orphans.push(orphan);
                    }
                }
            }
        }

        for feature_id in doc.cache().feature_ids() {
            if !live.contains(&feature_id) {
                orphans.push(
                    OrphanInfo::new(
                        OrphanKind::StaleCacheEntry,
                        feature_id.to_string(),
                        Severity::Info,
                        body_id,
                    )
                    .owned_by(feature_id),
                );
            }
        }

        let graph = doc.dependencies();
        let mut edges: BTreeSet<(FeatureId, FeatureId)> = graph.dangling_edges().into_iter().collect();
        for node in graph.nodes() {
            if live.contains(node) {
                continue;
            }
            for dependency in graph.dependencies_of(node) {
                edges.insert((node.clone(), dependency));
            }
            for dependent in graph.dependents_of(node) {
                edges.insert((dependent, node.clone()));
            }
        }
        for (from, to) in edges {
            let mut orphan = OrphanInfo::new(
                OrphanKind::DanglingDependencyEdge,
                format!("{} -> {}", from, to),
                Severity::Info,
                body_id,
            )
            .owned_by(from);
            orphan.target = Some(to);
            orphans.push(orphan);
        }

        Ok(orphans)
    }

    /// Remove removable orphans, returning how many were removed
    pub fn remove(doc: &mut Document, orphans: &[OrphanInfo]) -> usize {
        let mut removed = 0;
        for orphan in orphans.iter().filter(|o| o.removable) {
            let done = match orphan.kind {
                OrphanKind::StaleShapeRecord => Uuid::parse_str(&orphan.identifier)
                    .map(|uuid| doc.naming().remove_records(orphan.body_id, &[uuid]) > 0)
                    .unwrap_or(false),
                OrphanKind::StaleOperationRecord => orphan
                    .feature_id
                    .as_ref()
                    .is_some_and(|id| doc.naming().remove_operations(orphan.body_id, id) > 0),
                OrphanKind::StaleCacheEntry => orphan
                    .feature_id
                    .as_ref()
                    .is_some_and(|id| doc.cache().invalidate_by_feature(id) > 0),
                OrphanKind::DanglingDependencyEdge => match (&orphan.feature_id, &orphan.target) {
                    (Some(from), Some(to)) => doc.dependencies_mut().remove_edge(from, to),
                    _ => false,
                },
                OrphanKind::DanglingFeatureReference => false,
            };
            if done {
                removed += 1;
            }
        }

        // nodes of features that no longer exist
        let live = doc.live_features();
        let stale: Vec<FeatureId> = doc
            .dependencies()
            .nodes()
            .filter(|node| !live.contains(node))
            .cloned()
            .collect();
        for node in stale {
            if doc.dependencies().dependencies_of(&node).is_empty()
                && doc.dependencies().dependents_of(&node).is_empty()
            {
                doc.dependencies_mut().remove_node(&node);
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} orphans", removed);
        }
        removed
    }

    /// Compare against the state before a transaction and sweep orphans
    pub fn validate(doc: &mut Document, body_id: Uuid, before: Option<&RollbackState>) -> RollbackReport {
        let mut report = RollbackReport {
            body_id,
            consistent: true,
            ..RollbackReport::default()
        };
        let Some(before) = before else {
            return report;
        };
        report.validated = true;

        match RollbackState::capture(doc, body_id) {
            Ok(after) => report.differences = before.differences(&after),
            Err(e) => report.differences.push(e.to_string()),
        }
        report.consistent = report.differences.is_empty();
        if !report.consistent {
            tracing::warn!(
                "Rollback of body {} is inconsistent: {}",
                body_id,
                report.differences.join(", ")
            );
        }

        match Self::sweep(doc, body_id) {
            Ok(orphans) => report.orphans = orphans,
            Err(e) => tracing::warn!("Orphan sweep of body {} failed: {}", body_id, e),
        }
        if doc.config().remove_orphans_after_rollback && !report.orphans.is_empty() {
            report.removed = Self::remove(doc, &report.orphans);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::resolve::ReferenceSet;
    use crate::shape_id::ShapeKind;
    use crate::test_support::box_document;

    #[test]
    fn test_state_is_stable() {
        let (doc, body_id) = box_document();
        let a = RollbackState::capture(&doc, body_id).unwrap();
        let b = RollbackState::capture(&doc, body_id).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.geometry_hash, EMPTY_GEOMETRY);
        assert_eq!(a.feature_count, 1);
        assert_eq!(a.shape_record_count, 18);
    }

    #[test]
    fn test_differences_ignore_cache() {
        let (doc, body_id) = box_document();
        let a = RollbackState::capture(&doc, body_id).unwrap();
        let mut b = a.clone();
        b.cache_entry_count += 3;
        assert!(a.differences(&b).is_empty());
        b.feature_count += 1;
        assert_eq!(a.differences(&b), vec![String::from("feature_count: 1 -> 2")]);
    }

    #[test]
    fn test_sweep_finds_stale_record() {
        let (mut doc, body_id) = box_document();
        let body = doc.body_mut(body_id).unwrap();
        body.push_feature(Feature::hollow("Hollow", 1.0).with_id("F1"));

        let entity = {
            let body = doc.body(body_id).unwrap();
            let solid = body.solid().unwrap();
            crate::indexer::TopologyIndex::build(doc.kernel(), &solid)
                .entity_at(ShapeKind::Face, 0)
                .unwrap()
        };
        doc.naming()
            .register_shape(body_id, &entity, &FeatureId::from("F1"), 0);
        assert!(doc.sweep_orphans(body_id).unwrap().is_empty());

        doc.body_mut(body_id)
            .unwrap()
            .remove_feature(&FeatureId::from("F1"));
        let orphans = doc.sweep_orphans(body_id).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, OrphanKind::StaleShapeRecord);
        assert_eq!(orphans[0].feature_id, Some(FeatureId::from("F1")));
        assert!(orphans[0].removable);

        assert_eq!(doc.remove_orphans(&orphans), 1);
        assert!(doc.sweep_orphans(body_id).unwrap().is_empty());
        assert_eq!(doc.naming().record_count(body_id), 18);
    }

    #[test]
    fn test_dangling_reference_is_not_removable() {
        let (mut doc, body_id) = box_document();
        let ghost = crate::shape_id::ShapeId::new(ShapeKind::Edge, FeatureId::from("Box"), 0, "00");
        doc.body_mut(body_id).unwrap().push_feature(
            Feature::fillet("Fillet", ReferenceSet::from_shape_ids([ghost]), 1.0).with_id("Fillet"),
        );
        let orphans = doc.sweep_orphans(body_id).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, OrphanKind::DanglingFeatureReference);
        assert_eq!(orphans[0].severity, Severity::Error);
        assert_eq!(doc.remove_orphans(&orphans), 0);
    }

    #[test]
    fn test_sweep_finds_dangling_edge() {
        let (mut doc, body_id) = box_document();
        doc.dependencies_mut()
            .set_dependencies(&FeatureId::from("Ghost"), [FeatureId::from("Box")]);
        let orphans = doc.sweep_orphans(body_id).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].kind, OrphanKind::DanglingDependencyEdge);
        assert_eq!(orphans[0].target, Some(FeatureId::from("Box")));

        assert_eq!(doc.remove_orphans(&orphans), 1);
        assert!(!doc.dependencies().contains(&FeatureId::from("Ghost")));
        assert!(doc.dependencies().contains(&FeatureId::from("Box")));
    }
}
