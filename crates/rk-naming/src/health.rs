//! Read-only reference diagnostics
//!
//! Reports how every stored reference of a body would resolve right now,
//! under the same policy a rebuild applies. Nothing here registers, rebinds
//! or writes back.

use rk_cad::CadKernel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::body::Body;
use crate::config::NamingConfig;
use crate::feature::TopologyReferences;
use crate::indexer::TopologyIndex;
use crate::naming::{ResolutionMethod, ShapeNamingService};
use crate::resolve::{FailureCategory, ReferenceResolver, ReferenceSet};
use crate::shape_id::{FeatureId, ShapeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Broken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceHealth {
    pub kind: ShapeKind,
    pub method: ResolutionMethod,
    /// Failure or drift reported for the reference kind
    #[serde(default)]
    pub category: Option<FailureCategory>,
}

impl ReferenceHealth {
    pub fn is_ok(&self) -> bool {
        self.method.is_resolved()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureHealth {
    pub feature_id: FeatureId,
    pub name: String,
    pub ok_count: usize,
    pub broken_count: usize,
    pub refs: Vec<ReferenceHealth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub body_id: Uuid,
    pub status: HealthStatus,
    pub features: Vec<FeatureHealth>,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }

    pub fn feature(&self, feature_id: &FeatureId) -> Option<&FeatureHealth> {
        self.features.iter().find(|f| &f.feature_id == feature_id)
    }
}

/// Number of references stored in a set
fn stored_count(set: &ReferenceSet) -> usize {
    if set.has_topological() {
        set.indices.len().max(set.shape_ids.len())
    } else {
        set.selectors.len()
    }
}

pub(crate) fn build(
    naming: &ShapeNamingService,
    kernel: &dyn CadKernel,
    body: &Body,
    config: &NamingConfig,
) -> HealthReport {
    let mut features = Vec::new();

    for (position, feature) in body.features().iter().enumerate() {
        if feature.suppressed {
            continue;
        }
        let index = body
            .input_solid(position)
            .map(|solid| TopologyIndex::build(kernel, &solid))
            .unwrap_or_default();
        let resolver = ReferenceResolver::new(naming, &index, body.id, config);

        let mut refs = Vec::new();
        for (kind, set) in feature.references() {
            match resolver.check(kind, set, feature.is_strict()) {
                Ok((methods, notices)) => {
                    let category = notices.first().map(|n| n.category);
                    refs.extend(methods.into_iter().map(|method| ReferenceHealth {
                        kind,
                        method,
                        category,
                    }));
                }
                Err(notice) => {
                    let broken = ReferenceHealth {
                        kind,
                        method: ResolutionMethod::Unresolved,
                        category: Some(notice.category),
                    };
                    refs.extend(std::iter::repeat_n(broken, stored_count(set)));
                }
            }
        }

        let ok_count = refs.iter().filter(|r| r.is_ok()).count();
        features.push(FeatureHealth {
            feature_id: feature.id.clone(),
            name: feature.name.clone(),
            ok_count,
            broken_count: refs.len() - ok_count,
            refs,
        });
    }

    let status = if features.iter().any(|f| f.broken_count > 0) {
        HealthStatus::Broken
    } else {
        HealthStatus::Ok
    };
    HealthReport {
        body_id: body.id,
        status,
        features,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, StatusCode};
    use crate::indexer::Entity;
    use crate::selector::GeometricSelector;
    use crate::shape_id::ShapeId;
    use crate::test_support::box_document;
    use glam::Vec3;
    use rk_cad::PolyKernel;

    #[test]
    fn test_health_of_unbuilt_references() {
        let kernel = PolyKernel::new();
        let naming = ShapeNamingService::new();
        let mut body = Body::new("Body");
        let solid = kernel.create_box(Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        body.push_feature(Feature::block("Box", Vec3::ZERO, Vec3::splat(2.0)).with_id("Box"));
        body.push_feature(
            Feature::fillet("Fillet", ReferenceSet::from_indices([0, 40]), 0.1).with_id("Fillet"),
        );
        let ghost = ShapeId::new(ShapeKind::Face, FeatureId::from("Gone"), 0, "00");
        body.push_feature(
            Feature::texture("Texture", ReferenceSet::from_shape_ids([ghost]), 0.1)
                .with_id("Texture"),
        );
        body.set_feature_solids(vec![Some(solid), Some(solid), Some(solid)]);

        let report = naming.get_health_report(&kernel, &body, &NamingConfig::default());
        assert_eq!(report.status, HealthStatus::Broken);
        assert!(report.feature(&FeatureId::from("Box")).unwrap().refs.is_empty());

        // one index out of range fails the whole edge set of a strict feature
        let fillet = report.feature(&FeatureId::from("Fillet")).unwrap();
        assert_eq!((fillet.ok_count, fillet.broken_count), (0, 2));
        assert_eq!(fillet.refs[0].category, Some(FailureCategory::MissingRef));
        let texture = report.feature(&FeatureId::from("Texture")).unwrap();
        assert_eq!(texture.refs[0].method, ResolutionMethod::Unresolved);
        // diagnostics never register anything
        assert_eq!(naming.record_count(body.id), 0);
    }

    #[test]
    fn test_disagreeing_references_are_broken() {
        let (mut doc, body_id) = box_document();
        let box_ids = doc.naming().records_for_feature(body_id, &FeatureId::from("Box"));
        let refs = ReferenceSet::from_indices([2]).with_shape_ids([box_ids[6 + 5].id.clone()]);
        doc.body_mut(body_id)
            .unwrap()
            .push_feature(Feature::fillet("Fillet", refs, 1.0).with_id("Fillet"));

        let report = doc.health_report(body_id).unwrap();
        assert!(!report.is_ok());
        let fillet = report.feature(&FeatureId::from("Fillet")).unwrap();
        assert_eq!((fillet.ok_count, fillet.broken_count), (0, 1));
        assert_eq!(fillet.refs[0].category, Some(FailureCategory::Mismatch));

        // a rebuild rejects the feature for the same reason
        let report = doc.rebuild(body_id).unwrap();
        let status = report.status_of(&FeatureId::from("Fillet")).unwrap();
        assert_eq!(status.code, Some(StatusCode::Mismatch));
    }

    #[test]
    fn test_selector_only_references_are_reported() {
        let (mut doc, body_id) = box_document();
        let records = doc.naming().record_count(body_id);
        let solid = doc.body(body_id).unwrap().feature_solids()[0].unwrap();
        let edge = TopologyIndex::build(doc.kernel(), &solid)
            .entity_at(ShapeKind::Edge, 4)
            .unwrap();
        let far = doc
            .kernel()
            .create_box(Vec3::splat(100.0), Vec3::ONE)
            .unwrap();
        let stray = TopologyIndex::build(doc.kernel(), &far)
            .entity_at(ShapeKind::Edge, 0)
            .unwrap();

        let selectors = |entity: &Entity| {
            ReferenceSet::from_selectors([GeometricSelector::from_entity(entity, 1e-3)])
        };
        doc.body_mut(body_id).unwrap().push_feature(
            Feature::chamfer("Chamfer", selectors(&edge), 0.5).with_id("Chamfer"),
        );
        let report = doc.health_report(body_id).unwrap();
        assert!(report.is_ok());
        let chamfer = report.feature(&FeatureId::from("Chamfer")).unwrap();
        assert_eq!(chamfer.refs.len(), 1);
        assert_eq!(chamfer.refs[0].method, ResolutionMethod::Selector);

        let body = doc.body_mut(body_id).unwrap();
        body.features_mut().pop();
        body.push_feature(Feature::chamfer("Stray", selectors(&stray), 0.5).with_id("Stray"));
        let report = doc.health_report(body_id).unwrap();
        let stray = report.feature(&FeatureId::from("Stray")).unwrap();
        assert_eq!((stray.ok_count, stray.broken_count), (0, 1));
        assert_eq!(stray.refs[0].category, Some(FailureCategory::MissingRef));
        assert_eq!(doc.naming().record_count(body_id), records);
    }
}
