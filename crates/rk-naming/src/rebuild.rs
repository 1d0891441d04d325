//! Feature rebuild pipeline
//!
//! Replays the feature list of a body in order. For every feature:
//! 1. resolve its stored references against the current solid and write the
//!    normalized references back
//! 2. take the result from the cache or execute the kernel operation
//! 3. register the produced faces and edges, and log the kernel history as
//!    an [`OperationRecord`]
//! 4. update the dependency graph
//!
//! The first failing feature blocks every later feature of the body.

use std::collections::BTreeSet;

use rk_cad::{CadKernel, KernelOutput, ShapeHistory, Solid};
use uuid::Uuid;

use crate::body::Body;
use crate::cache::ResultCache;
use crate::config::NamingConfig;
use crate::dependency::DependencyGraph;
use crate::error::OperationOutcome;
use crate::feature::{Feature, FeatureStatus, TopologyReferences};
use crate::indexer::{Entity, TopologyIndex};
use crate::naming::{OperationRecord, ResolutionMethod, ShapeNamingService};
use crate::resolve::{FailureNotice, ReferenceResolver};
use crate::shape_id::{FeatureId, ShapeKind};

/// Services a rebuild works with
pub struct RebuildContext<'a> {
    pub kernel: &'a dyn CadKernel,
    pub naming: &'a ShapeNamingService,
    pub cache: &'a ResultCache<KernelOutput>,
    pub dependencies: &'a mut DependencyGraph,
    pub config: &'a NamingConfig,
}

/// Outcome of rebuilding one body
#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    pub body_id: Uuid,
    /// Status of every feature, in history order
    pub statuses: Vec<(FeatureId, FeatureStatus)>,
    /// Resolution methods per feature and reference kind
    pub methods: Vec<(FeatureId, ShapeKind, Vec<ResolutionMethod>)>,
    pub first_failure: Option<FeatureId>,
    pub drift: Vec<(FeatureId, FailureNotice)>,
    pub cache_hits: usize,
    pub executed: usize,
}

impl RebuildReport {
    fn new(body_id: Uuid) -> Self {
        Self {
            body_id,
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first_failure.is_none()
    }

    pub fn status_of(&self, feature_id: &FeatureId) -> Option<&FeatureStatus> {
        self.statuses
            .iter()
            .find(|(id, _)| id == feature_id)
            .map(|(_, status)| status)
    }

    pub fn methods_of(&self, feature_id: &FeatureId, kind: ShapeKind) -> Vec<ResolutionMethod> {
        self.methods
            .iter()
            .find(|(id, k, _)| id == feature_id && *k == kind)
            .map(|(_, _, methods)| methods.clone())
            .unwrap_or_default()
    }

    /// The failed feature and its status
    pub fn failure(&self) -> Option<(&FeatureId, &FeatureStatus)> {
        let failed = self.first_failure.as_ref()?;
        self.status_of(failed).map(|status| (failed, status))
    }
}

/// Rebuild every feature of the body's current generation
///
/// Writes statuses, normalized references and per-feature solids into the
/// current generation. The body keeps the solid of the last feature that
/// succeeded.
pub fn rebuild_body(ctx: &mut RebuildContext<'_>, body: &mut Body) -> RebuildReport {
    let body_id = body.id;
    let mut report = RebuildReport::new(body_id);
    let mut features: Vec<Feature> = body.features().to_vec();
    let mut solids: Vec<Option<Solid>> = Vec::with_capacity(features.len());
    let mut current: Option<Solid> = None;
    let mut producer: Option<FeatureId> = None;

    for feature in features.iter_mut() {
        ctx.dependencies.add_node(feature.id.clone());

        if let Some(upstream) = &report.first_failure {
            feature.status = FeatureStatus::blocked(upstream);
            solids.push(None);
        } else if feature.suppressed {
            feature.status = FeatureStatus::suppressed();
            solids.push(current);
        } else {
            match rebuild_feature(ctx, body_id, feature, current.as_ref(), producer.as_ref(), &mut report)
            {
                Ok(solid) => {
                    current = Some(solid);
                    producer = Some(feature.id.clone());
                    solids.push(current);
                }
                Err(status) => {
                    tracing::warn!("Feature {} failed: {}", feature.name, status);
                    feature.status = status;
                    report.first_failure = Some(feature.id.clone());
                    solids.push(None);
                }
            }
        }

        report
            .statuses
            .push((feature.id.clone(), feature.status.clone()));
    }

    *body.features_mut() = features;
    body.set_feature_solids(solids);
    body.set_solid(current);

    tracing::debug!(
        "Rebuilt body {}: {} executed, {} cached",
        body.name,
        report.executed,
        report.cache_hits
    );
    report
}

fn rebuild_feature(
    ctx: &mut RebuildContext<'_>,
    body_id: Uuid,
    feature: &mut Feature,
    input: Option<&Solid>,
    producer: Option<&FeatureId>,
    report: &mut RebuildReport,
) -> Result<Solid, FeatureStatus> {
    let index = input
        .map(|solid| TopologyIndex::build(ctx.kernel, solid))
        .unwrap_or_default();

    let resolved = ReferenceResolver::new(ctx.naming, &index, body_id, ctx.config)
        .resolve_feature(feature)
        .map_err(FeatureStatus::failed)?;

    let mut inputs: Vec<String> = vec![format!("feature:{}", feature.id)];
    if let Some(solid) = input {
        inputs.push(format!("solid:{}", solid.id));
    }
    let mut dependencies: BTreeSet<FeatureId> = producer.into_iter().cloned().collect();
    let mut notices = Vec::new();
    let mut faces = Vec::new();
    let mut edges = Vec::new();

    for refs in &resolved {
        if let Some(stored) = feature.refs_mut(refs.kind) {
            *stored = refs.to_reference_set();
        }
        report
            .methods
            .push((feature.id.clone(), refs.kind, refs.methods.clone()));
        for id in &refs.shape_ids {
            inputs.push(id.cache_input());
            dependencies.insert(id.feature_id.clone());
        }
        for entity in &refs.entities {
            match entity {
                Entity::Face(face) => faces.push(face.clone()),
                Entity::Edge(edge) => edges.push(edge.clone()),
            }
        }
        notices.extend(refs.notices.iter().cloned());
    }

    let operation = feature.type_name();
    let params = feature.op.cache_params();
    let output = match ctx.cache.get(operation, &inputs, &params) {
        Some(output) => {
            report.cache_hits += 1;
            output
        }
        None => {
            let output = feature
                .op
                .execute(ctx.kernel, input, &faces, &edges)
                .map_err(|outcome| FeatureStatus::from_outcome(&outcome))?;
            ctx.cache
                .put(operation, &inputs, output.clone(), &feature.id, &params);
            report.executed += 1;
            output
        }
    };

    let output_index = TopologyIndex::build(ctx.kernel, &output.solid);
    if output_index.is_empty() {
        let outcome = OperationOutcome::EmptyResult("operation produced no topology".into());
        return Err(FeatureStatus::from_outcome(&outcome));
    }
    ctx.naming
        .register_outputs(body_id, &feature.id, &output_index);

    let record = operation_record(
        ctx.naming,
        body_id,
        &feature.id,
        &index,
        &output_index,
        &output.history,
    );
    if !record.is_empty() {
        ctx.naming.record_operation(body_id, record);
    }

    ctx.dependencies.set_dependencies(&feature.id, dependencies);

    report
        .drift
        .extend(notices.iter().cloned().map(|n| (feature.id.clone(), n)));
    feature.status = FeatureStatus::with_drift(notices);
    Ok(output.solid)
}

/// Translate a kernel history into identity mappings
fn operation_record(
    naming: &ShapeNamingService,
    body_id: Uuid,
    feature_id: &FeatureId,
    before: &TopologyIndex,
    after: &TopologyIndex,
    history: &ShapeHistory,
) -> OperationRecord {
    let mut record = OperationRecord::new(feature_id.clone());
    let identify = |entity: Option<Entity>| {
        entity.and_then(|e| naming.find_shape_id(body_id, &e, true).map(|id| id.uuid))
    };

    for (input, outputs) in &history.faces {
        let entity = before.index_of_face(*input).and_then(|i| before.face_at(i).cloned());
        let Some(input_id) = identify(entity.map(Entity::Face)) else {
            continue;
        };
        let output_ids: Vec<Uuid> = outputs
            .iter()
            .filter_map(|face| {
                let entity = after.index_of_face(*face).and_then(|i| after.face_at(i).cloned());
                identify(entity.map(Entity::Face))
            })
            .collect();
        record.map(input_id, output_ids);
    }

    for (input, outputs) in &history.edges {
        let entity = before.index_of_edge(*input).and_then(|i| before.edge_at(i).cloned());
        let Some(input_id) = identify(entity.map(Entity::Edge)) else {
            continue;
        };
        let output_ids: Vec<Uuid> = outputs
            .iter()
            .filter_map(|edge| {
                let entity = after.index_of_edge(*edge).and_then(|i| after.edge_at(i).cloned());
                identify(entity.map(Entity::Edge))
            })
            .collect();
        record.map(input_id, output_ids);
    }

    record
}
