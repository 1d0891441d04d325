//! Reference Resolution Orchestrator
//!
//! Combines the three kinds of stored references of a feature (canonical
//! indices, ShapeIds and geometric selectors) into one resolved entity list.
//!
//! Policy, for each reference kind of a feature:
//! - indices and ShapeIds are resolved independently; when both resolve to
//!   the same entities the references are confirmed
//! - on disagreement, strict feature kinds fail with `mismatch` (or
//!   `missing_ref` when something did not resolve at all), except for a
//!   single index/ShapeID pair, which heals when the ShapeId is stale or only
//!   resolved by geometry
//! - non-strict feature kinds prefer the ShapeId and record `drift`
//! - selectors are used on their own only when no topological reference was
//!   ever stored; after a topological failure they may rescue the feature
//!   under the relaxed policy only, always recording `drift`
//!
//! Successful results are normalized: indices are deduplicated and sorted,
//! and ShapeIds are re-derived from the resolved entities in the same order,
//! so resolving twice against the same solid writes identical references.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::NamingConfig;
use crate::feature::{Feature, TopologyReferences};
use crate::indexer::{Entity, TopologyIndex};
use crate::naming::{ResolutionMethod, ShapeNamingService};
use crate::selector::GeometricSelector;
use crate::shape_id::{FeatureId, ShapeId, ShapeKind};

/// Stored references of one kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSet {
    #[serde(default)]
    pub indices: Vec<usize>,
    #[serde(default)]
    pub shape_ids: Vec<ShapeId>,
    /// Legacy/recovery descriptors
    #[serde(default)]
    pub selectors: Vec<GeometricSelector>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            indices: indices.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn from_shape_ids(shape_ids: impl IntoIterator<Item = ShapeId>) -> Self {
        Self {
            shape_ids: shape_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn from_selectors(selectors: impl IntoIterator<Item = GeometricSelector>) -> Self {
        Self {
            selectors: selectors.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_shape_ids(mut self, shape_ids: impl IntoIterator<Item = ShapeId>) -> Self {
        self.shape_ids = shape_ids.into_iter().collect();
        self
    }

    pub fn with_selectors(mut self, selectors: impl IntoIterator<Item = GeometricSelector>) -> Self {
        self.selectors = selectors.into_iter().collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.shape_ids.is_empty() && self.selectors.is_empty()
    }

    /// Check if an index or ShapeId regime is established
    pub fn has_topological(&self) -> bool {
        !self.indices.is_empty() || !self.shape_ids.is_empty()
    }

    /// Number of referenced entities
    pub fn len(&self) -> usize {
        self.indices
            .len()
            .max(self.shape_ids.len())
            .max(self.selectors.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// A stored reference resolves to nothing
    MissingRef,
    /// Index and ShapeId resolve to different entities
    Mismatch,
    /// A weak resolution was accepted; not fatal
    Drift,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::MissingRef => write!(f, "missing_ref"),
            FailureCategory::Mismatch => write!(f, "mismatch"),
            FailureCategory::Drift => write!(f, "drift"),
        }
    }
}

/// Structured report of a failed or weak resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub category: FailureCategory,
    pub reference_kind: ShapeKind,
    pub reason: String,
    /// Stored indices
    pub expected: Vec<usize>,
    /// Indices the other strategies produced
    pub resolved: Vec<usize>,
    /// Whether the feature kind is strict
    pub strict: bool,
}

impl FailureNotice {
    pub fn new(
        category: FailureCategory,
        reference_kind: ShapeKind,
        reason: impl Into<String>,
        strict: bool,
    ) -> Self {
        Self {
            category,
            reference_kind,
            reason: reason.into(),
            expected: Vec::new(),
            resolved: Vec::new(),
            strict,
        }
    }

    fn with_indices(mut self, expected: Vec<usize>, resolved: Vec<usize>) -> Self {
        self.expected = expected;
        self.resolved = resolved;
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.category != FailureCategory::Drift
    }
}

impl fmt::Display for FailureNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} refs): {}",
            self.category, self.reference_kind, self.reason
        )
    }
}

/// Outcome of resolving one reference kind
#[derive(Debug, Clone)]
pub struct ResolvedReferences {
    pub kind: ShapeKind,
    /// Canonical indices, sorted and deduplicated
    pub indices: Vec<usize>,
    pub entities: Vec<Entity>,
    /// Identities of `entities`, same order
    pub shape_ids: Vec<ShapeId>,
    pub selectors: Vec<GeometricSelector>,
    pub methods: Vec<ResolutionMethod>,
    /// Drift warnings
    pub notices: Vec<FailureNotice>,
    write_indices: bool,
}

impl ResolvedReferences {
    fn empty(kind: ShapeKind) -> Self {
        Self {
            kind,
            indices: Vec::new(),
            entities: Vec::new(),
            shape_ids: Vec::new(),
            selectors: Vec::new(),
            methods: Vec::new(),
            notices: Vec::new(),
            write_indices: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// References to store back into the feature
    ///
    /// ShapeIds are always written. Indices are written when the feature
    /// stored indices, or when the entities were recovered from selectors.
    pub fn to_reference_set(&self) -> ReferenceSet {
        ReferenceSet {
            indices: if self.write_indices {
                self.indices.clone()
            } else {
                Vec::new()
            },
            shape_ids: self.shape_ids.clone(),
            selectors: self.selectors.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pick {
    index: usize,
    method: ResolutionMethod,
}

type Reconciled = Result<(Vec<Pick>, Vec<FailureNotice>), FailureNotice>;

/// Picks of one reference kind, before they are written back
struct Decision {
    picks: Vec<Pick>,
    notices: Vec<FailureNotice>,
    write_indices: bool,
}

/// Resolves feature references against one solid
pub struct ReferenceResolver<'a> {
    naming: &'a ShapeNamingService,
    index: &'a TopologyIndex,
    body: Uuid,
    config: &'a NamingConfig,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(
        naming: &'a ShapeNamingService,
        index: &'a TopologyIndex,
        body: Uuid,
        config: &'a NamingConfig,
    ) -> Self {
        Self {
            naming,
            index,
            body,
            config,
        }
    }

    /// Resolve every reference kind of a feature
    ///
    /// Stops at the first kind that fails.
    pub fn resolve_feature(&self, feature: &Feature) -> Result<Vec<ResolvedReferences>, FailureNotice> {
        let strict = feature.is_strict();
        feature
            .references()
            .into_iter()
            .map(|(kind, refs)| self.resolve(&feature.id, kind, refs, strict))
            .collect()
    }

    /// Resolve the references of one kind
    ///
    /// Entities without a registered identity are registered under
    /// `feature_id`, the consuming feature.
    pub fn resolve(
        &self,
        feature_id: &FeatureId,
        kind: ShapeKind,
        refs: &ReferenceSet,
        strict: bool,
    ) -> Result<ResolvedReferences, FailureNotice> {
        if refs.is_empty() {
            return Ok(ResolvedReferences::empty(kind));
        }
        let decision = self.decide(kind, refs, strict)?;
        for drift in &decision.notices {
            tracing::warn!("Feature {}: {}", feature_id, drift);
        }
        Ok(self.finalize(
            feature_id,
            kind,
            refs,
            decision.picks,
            decision.notices,
            decision.write_indices,
        ))
    }

    /// Apply the resolution policy without registering or rewriting anything
    ///
    /// Returns the method of every resolved reference and the drift notices.
    pub fn check(
        &self,
        kind: ShapeKind,
        refs: &ReferenceSet,
        strict: bool,
    ) -> Result<(Vec<ResolutionMethod>, Vec<FailureNotice>), FailureNotice> {
        if refs.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let decision = self.decide(kind, refs, strict)?;
        let methods = decision.picks.iter().map(|p| p.method).collect();
        Ok((methods, decision.notices))
    }

    fn decide(&self, kind: ShapeKind, refs: &ReferenceSet, strict: bool) -> Result<Decision, FailureNotice> {
        if !refs.has_topological() {
            return match self.match_selectors(kind, &refs.selectors) {
                Some(picks) => Ok(Decision {
                    picks,
                    notices: Vec::new(),
                    write_indices: true,
                }),
                None => Err(FailureNotice::new(
                    FailureCategory::MissingRef,
                    kind,
                    "no entity matches the stored geometric selectors",
                    strict,
                )),
            };
        }

        let mut notice = match self.reconcile(kind, refs, strict) {
            Ok((picks, notices)) => {
                return Ok(Decision {
                    picks,
                    notices,
                    write_indices: !refs.indices.is_empty(),
                });
            }
            Err(notice) => notice,
        };

        if refs.selectors.is_empty() {
            return Err(notice);
        }
        if self.config.strict {
            notice
                .reason
                .push_str("; geometric fallback blocked after topological references failed");
            return Err(notice);
        }

        let Some(picks) = self.match_selectors(kind, &refs.selectors) else {
            return Err(notice);
        };
        let drift = FailureNotice::new(
            FailureCategory::Drift,
            kind,
            format!("selectors rescued failed references ({})", notice.reason),
            strict,
        )
        .with_indices(notice.expected.clone(), picks.iter().map(|p| p.index).collect());
        Ok(Decision {
            picks,
            notices: vec![drift],
            write_indices: true,
        })
    }

    fn resolve_id(&self, kind: ShapeKind, id: &ShapeId) -> (Option<usize>, ResolutionMethod) {
        if id.kind != kind {
            return (None, ResolutionMethod::Unresolved);
        }
        self.naming.resolve_shape_with_method(self.body, id, self.index)
    }

    fn reconcile(&self, kind: ShapeKind, refs: &ReferenceSet, strict: bool) -> Reconciled {
        let count = self.index.len(kind);
        let by_index: Vec<Option<usize>> = refs
            .indices
            .iter()
            .map(|&i| (i < count).then_some(i))
            .collect();
        let by_id: Vec<(Option<usize>, ResolutionMethod)> = refs
            .shape_ids
            .iter()
            .map(|id| self.resolve_id(kind, id))
            .collect();
        let expected = refs.indices.clone();
        let id_resolved: Vec<usize> = by_id.iter().filter_map(|(found, _)| *found).collect();
        let all_index = by_index.iter().all(Option::is_some);
        let all_ids = by_id.iter().all(|(found, _)| found.is_some());

        if refs.shape_ids.is_empty() {
            if all_index {
                return Ok((index_picks(&refs.indices), Vec::new()));
            }
            let valid: Vec<usize> = by_index.iter().flatten().copied().collect();
            let notice = FailureNotice::new(
                FailureCategory::MissingRef,
                kind,
                format!("stored index out of range ({} {}s)", count, kind),
                strict,
            )
            .with_indices(expected, valid);
            return Err(notice);
        }

        if refs.indices.is_empty() {
            if let Some(pos) = by_id.iter().position(|(found, _)| found.is_none()) {
                let notice = FailureNotice::new(
                    FailureCategory::MissingRef,
                    kind,
                    format!("shape {} does not resolve", refs.shape_ids[pos].uuid),
                    strict,
                )
                .with_indices(expected, id_resolved);
                return Err(notice);
            }
            let picks: Vec<Pick> = by_id
                .iter()
                .filter_map(|(found, method)| found.map(|index| Pick { index, method: *method }))
                .collect();
            let mut notices = Vec::new();
            if strict && picks.iter().any(|p| p.method == ResolutionMethod::Geometric) {
                notices.push(
                    FailureNotice::new(
                        FailureCategory::Drift,
                        kind,
                        "shape identity resolved by geometry only",
                        strict,
                    )
                    .with_indices(expected, id_resolved),
                );
            }
            return Ok((picks, notices));
        }

        if all_index && all_ids {
            let from_index: BTreeSet<usize> = by_index.iter().flatten().copied().collect();
            let from_ids: BTreeSet<usize> = id_resolved.iter().copied().collect();
            if from_index == from_ids {
                return Ok((index_picks(&refs.indices), Vec::new()));
            }
        }

        if !strict {
            let mut picks = Vec::new();
            for i in 0..refs.indices.len().max(refs.shape_ids.len()) {
                let by_identity = by_id
                    .get(i)
                    .and_then(|(found, method)| found.map(|index| Pick { index, method: *method }));
                let by_position = by_index.get(i).copied().flatten().map(|index| Pick {
                    index,
                    method: ResolutionMethod::Index,
                });
                match by_identity.or(by_position) {
                    Some(pick) => picks.push(pick),
                    None => {
                        let notice = FailureNotice::new(
                            FailureCategory::MissingRef,
                            kind,
                            format!("reference {} resolves neither by index nor by identity", i),
                            strict,
                        )
                        .with_indices(expected, id_resolved);
                        return Err(notice);
                    }
                }
            }
            let drift = FailureNotice::new(
                FailureCategory::Drift,
                kind,
                "index and shape identity disagree; identity preferred",
                strict,
            )
            .with_indices(expected, picks.iter().map(|p| p.index).collect());
            return Ok((picks, vec![drift]));
        }

        if self.config.single_ref_pair_healing && refs.indices.len() == 1 && refs.shape_ids.len() == 1
        {
            match (by_index[0], by_id[0]) {
                (Some(index), (None, _)) => {
                    tracing::info!(
                        "Dropping stale shape {}, index {} still resolves",
                        refs.shape_ids[0].uuid,
                        index
                    );
                    return Ok((index_picks(&[index]), Vec::new()));
                }
                (Some(index), (Some(other), ResolutionMethod::Geometric)) => {
                    let drift = FailureNotice::new(
                        FailureCategory::Drift,
                        kind,
                        format!(
                            "geometric identity match {} overridden by index {}",
                            other, index
                        ),
                        strict,
                    )
                    .with_indices(expected, vec![other]);
                    return Ok((index_picks(&[index]), vec![drift]));
                }
                _ => {}
            }
        }

        let notice = if all_index && all_ids {
            FailureNotice::new(
                FailureCategory::Mismatch,
                kind,
                format!(
                    "indices {:?} and shape identities {:?} name different entities",
                    expected, id_resolved
                ),
                strict,
            )
        } else {
            FailureNotice::new(
                FailureCategory::MissingRef,
                kind,
                "stored references do not all resolve",
                strict,
            )
        };
        Err(notice.with_indices(expected, id_resolved))
    }

    fn match_selectors(&self, kind: ShapeKind, selectors: &[GeometricSelector]) -> Option<Vec<Pick>> {
        let candidates = self.index.entities(kind);
        selectors
            .iter()
            .map(|selector| {
                if selector.kind() != kind {
                    return None;
                }
                selector
                    .find_best_match(&candidates, self.config.selector_threshold)
                    .map(|index| Pick {
                        index,
                        method: ResolutionMethod::Selector,
                    })
            })
            .collect()
    }

    fn finalize(
        &self,
        feature_id: &FeatureId,
        kind: ShapeKind,
        refs: &ReferenceSet,
        mut picks: Vec<Pick>,
        notices: Vec<FailureNotice>,
        write_indices: bool,
    ) -> ResolvedReferences {
        picks.sort_by_key(|p| p.index);
        picks.dedup_by_key(|p| p.index);

        let mut out = ResolvedReferences::empty(kind);
        out.notices = notices;
        out.write_indices = write_indices;
        for pick in picks {
            let Some(entity) = self.index.entity_at(kind, pick.index) else {
                continue;
            };
            let id = self
                .naming
                .find_shape_id(self.body, &entity, true)
                .unwrap_or_else(|| {
                    self.naming
                        .register_shape(self.body, &entity, feature_id, pick.index)
                });
            out.shape_ids.push(id.reindexed(pick.index));
            if !refs.selectors.is_empty() {
                out.selectors.push(GeometricSelector::from_entity(
                    &entity,
                    self.config.selector_tolerance,
                ));
            }
            out.indices.push(pick.index);
            out.methods.push(pick.method);
            out.entities.push(entity);
        }
        out
    }
}

fn index_picks(indices: &[usize]) -> Vec<Pick> {
    indices
        .iter()
        .map(|&index| Pick {
            index,
            method: ResolutionMethod::Index,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rk_cad::{CadKernel, PolyKernel};

    struct Fixture {
        kernel: PolyKernel,
        naming: ShapeNamingService,
        body: Uuid,
        index: TopologyIndex,
        ids: Vec<ShapeId>,
    }

    impl Fixture {
        fn new() -> Self {
            let kernel = PolyKernel::new();
            let solid = kernel
                .create_box(Vec3::splat(5.0), Vec3::splat(10.0))
                .unwrap();
            let index = TopologyIndex::build(&kernel, &solid);
            let naming = ShapeNamingService::new();
            let body = Uuid::new_v4();
            let ids = naming.register_outputs(body, &FeatureId::from("Box"), &index);
            Self {
                kernel,
                naming,
                body,
                index,
                ids,
            }
        }

        fn edge_id(&self, i: usize) -> ShapeId {
            self.ids[6 + i].clone()
        }

        fn resolve(
            &self,
            config: &NamingConfig,
            refs: &ReferenceSet,
            strict: bool,
        ) -> Result<ResolvedReferences, FailureNotice> {
            ReferenceResolver::new(&self.naming, &self.index, self.body, config).resolve(
                &FeatureId::from("Fillet"),
                ShapeKind::Edge,
                refs,
                strict,
            )
        }

        /// An identity only the geometric fallback can find, looking like edge `i`
        fn geometric_only_id(&self, i: usize) -> ShapeId {
            let solid = self
                .kernel
                .create_box(Vec3::splat(5.0), Vec3::splat(10.0))
                .unwrap();
            let other = TopologyIndex::build(&self.kernel, &solid);
            let entity = other.entity_at(ShapeKind::Edge, i).unwrap();
            self.naming
                .register_shape(self.body, &entity, &FeatureId::from("Elsewhere"), i)
        }
    }

    #[test]
    fn test_index_only_is_normalized() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let refs = ReferenceSet::from_indices([3, 1, 1, 0]);
        let resolved = fx.resolve(&config, &refs, true).unwrap();

        assert_eq!(resolved.indices, vec![0, 1, 3]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Index; 3]);
        assert_eq!(resolved.shape_ids[2].uuid, fx.edge_id(3).uuid);
        assert_eq!(resolved.shape_ids[2].local_index, 3);
        assert!(resolved.notices.is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let first = fx
            .resolve(&config, &ReferenceSet::from_indices([2, 0, 3, 1]), true)
            .unwrap();
        let stored = first.to_reference_set();
        let second = fx.resolve(&config, &stored, true).unwrap();

        assert_eq!(second.to_reference_set(), stored);
        assert_eq!(first.methods, second.methods);
        assert_eq!(stored.indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_shape_id_only_keeps_its_shape() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let refs = ReferenceSet::from_shape_ids([fx.edge_id(5)]);
        let resolved = fx.resolve(&config, &refs, true).unwrap();

        assert_eq!(resolved.indices, vec![5]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Direct]);
        let stored = resolved.to_reference_set();
        assert!(stored.indices.is_empty());
        let again = fx.resolve(&config, &stored, true).unwrap();
        assert_eq!(again.methods, vec![ResolutionMethod::Direct]);
        assert_eq!(again.to_reference_set(), stored);
    }

    #[test]
    fn test_strict_mismatch_blocks() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let refs = ReferenceSet::from_indices([2]).with_shape_ids([fx.edge_id(5)]);
        let notice = fx.resolve(&config, &refs, true).unwrap_err();

        assert_eq!(notice.category, FailureCategory::Mismatch);
        assert_eq!(notice.reference_kind, ShapeKind::Edge);
        assert_eq!(notice.expected, vec![2]);
        assert_eq!(notice.resolved, vec![5]);
        assert!(notice.strict);
    }

    #[test]
    fn test_single_pair_heals_stale_shape_id() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let ghost = ShapeId::new(ShapeKind::Edge, FeatureId::from("Gone"), 0, "0badf00d");
        let refs = ReferenceSet::from_indices([0]).with_shape_ids([ghost.clone()]);
        let resolved = fx.resolve(&config, &refs, true).unwrap();

        assert_eq!(resolved.indices, vec![0]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Index]);
        assert_ne!(resolved.shape_ids[0].uuid, ghost.uuid);
        assert_eq!(resolved.shape_ids[0].uuid, fx.edge_id(0).uuid);
    }

    #[test]
    fn test_single_pair_healing_can_be_disabled() {
        let fx = Fixture::new();
        let config = NamingConfig {
            single_ref_pair_healing: false,
            ..NamingConfig::default()
        };
        let ghost = ShapeId::new(ShapeKind::Edge, FeatureId::from("Gone"), 0, "0badf00d");
        let refs = ReferenceSet::from_indices([0]).with_shape_ids([ghost]);
        let notice = fx.resolve(&config, &refs, true).unwrap_err();
        assert_eq!(notice.category, FailureCategory::MissingRef);
    }

    #[test]
    fn test_healing_never_extends_to_several_refs() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let ghost = ShapeId::new(ShapeKind::Edge, FeatureId::from("Gone"), 0, "0badf00d");
        let refs = ReferenceSet::from_indices([0, 1]).with_shape_ids([ghost, fx.edge_id(1)]);
        let notice = fx.resolve(&config, &refs, true).unwrap_err();
        assert_eq!(notice.category, FailureCategory::MissingRef);

        let refs = ReferenceSet::from_indices([0, 1]).with_shape_ids([fx.edge_id(1), fx.edge_id(4)]);
        let notice = fx.resolve(&config, &refs, true).unwrap_err();
        assert_eq!(notice.category, FailureCategory::Mismatch);
    }

    #[test]
    fn test_geometric_identity_loses_to_index_with_drift() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let weak = fx.geometric_only_id(4);

        let refs = ReferenceSet::from_indices([2]).with_shape_ids([weak.clone()]);
        let resolved = fx.resolve(&config, &refs, true).unwrap();
        assert_eq!(resolved.indices, vec![2]);
        assert_eq!(resolved.notices.len(), 1);
        assert_eq!(resolved.notices[0].category, FailureCategory::Drift);
        assert_eq!(resolved.notices[0].resolved, vec![4]);

        // on its own, a geometric-only identity succeeds with a drift warning
        let refs = ReferenceSet::from_shape_ids([weak]);
        let resolved = fx.resolve(&config, &refs, true).unwrap();
        assert_eq!(resolved.indices, vec![4]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Geometric]);
        assert_eq!(resolved.notices[0].category, FailureCategory::Drift);
    }

    #[test]
    fn test_non_strict_kind_prefers_identity() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let refs = ReferenceSet::from_indices([2]).with_shape_ids([fx.edge_id(5)]);
        let resolved = fx.resolve(&config, &refs, false).unwrap();

        assert_eq!(resolved.indices, vec![5]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Direct]);
        assert_eq!(resolved.notices[0].category, FailureCategory::Drift);
    }

    #[test]
    fn test_legacy_selectors_resolve() {
        let fx = Fixture::new();
        let config = NamingConfig::default();
        let entity = fx.index.entity_at(ShapeKind::Edge, 7).unwrap();
        let refs = ReferenceSet::from_selectors([GeometricSelector::from_entity(&entity, 1e-3)]);
        let resolved = fx.resolve(&config, &refs, true).unwrap();

        assert_eq!(resolved.indices, vec![7]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Selector]);
        // recovery establishes topological references
        let stored = resolved.to_reference_set();
        assert_eq!(stored.indices, vec![7]);
        assert_eq!(stored.shape_ids[0].uuid, fx.edge_id(7).uuid);
        assert_eq!(stored.selectors.len(), 1);
    }

    #[test]
    fn test_fallback_blocked_after_topological_failure() {
        let fx = Fixture::new();
        let entity = fx.index.entity_at(ShapeKind::Edge, 7).unwrap();
        let selector = GeometricSelector::from_entity(&entity, 1e-3);
        let refs = ReferenceSet::from_indices([99]).with_selectors([selector]);

        let notice = fx.resolve(&NamingConfig::default(), &refs, true).unwrap_err();
        assert_eq!(notice.category, FailureCategory::MissingRef);
        assert!(notice.reason.contains("blocked"));

        let resolved = fx.resolve(&NamingConfig::relaxed(), &refs, true).unwrap();
        assert_eq!(resolved.indices, vec![7]);
        assert_eq!(resolved.methods, vec![ResolutionMethod::Selector]);
        assert_eq!(resolved.notices[0].category, FailureCategory::Drift);
        assert_eq!(resolved.notices[0].expected, vec![99]);
    }

    #[test]
    fn test_wrong_kind_identity_does_not_resolve() {
        let fx = Fixture::new();
        let face_id = fx.ids[0].clone();
        let refs = ReferenceSet::from_shape_ids([face_id]);
        let notice = fx.resolve(&NamingConfig::default(), &refs, true).unwrap_err();
        assert_eq!(notice.category, FailureCategory::MissingRef);
    }
}
