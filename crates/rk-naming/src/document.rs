//! Documents
//!
//! A document owns bodies and the dependency graph, and holds the shared
//! services (kernel, naming, result cache) by `Arc` so several documents or
//! worker threads can use the same registry and cache.
//!
//! Every feature edit is atomic: it runs inside a transaction and a failed
//! rebuild leaves the body exactly as it was.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use rk_cad::{CadKernel, KernelOutput, TessellatedMesh};
use uuid::Uuid;

use crate::body::Body;
use crate::cache::ResultCache;
use crate::config::NamingConfig;
use crate::dependency::DependencyGraph;
use crate::error::{NamingError, NamingResult, RollbackError};
use crate::feature::Feature;
use crate::health::HealthReport;
use crate::naming::ShapeNamingService;
use crate::rebuild::{RebuildContext, RebuildReport, rebuild_body};
use crate::shape_id::FeatureId;
use crate::transaction::{self, Transaction, TransactionOutcome};
use crate::validator::{OrphanInfo, RollbackReport, RollbackState, RollbackValidator};

/// Result of an atomic feature edit
#[derive(Debug, Clone)]
pub enum EditOutcome {
    /// The edit was committed
    Applied(RebuildReport),
    /// The edit failed and the body was restored
    RolledBack {
        error: RollbackError,
        /// Rebuild that failed, if it got that far
        report: Option<RebuildReport>,
        validation: RollbackReport,
    },
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied(_))
    }

    pub fn report(&self) -> Option<&RebuildReport> {
        match self {
            EditOutcome::Applied(report) => Some(report),
            EditOutcome::RolledBack { report, .. } => report.as_ref(),
        }
    }
}

pub struct Document {
    kernel: Arc<dyn CadKernel>,
    naming: Arc<ShapeNamingService>,
    cache: Arc<ResultCache<KernelOutput>>,
    dependencies: DependencyGraph,
    bodies: BTreeMap<Uuid, Body>,
    config: NamingConfig,
}

impl Document {
    pub fn new(kernel: Arc<dyn CadKernel>) -> Self {
        Self::with_config(kernel, NamingConfig::default())
    }

    pub fn with_config(kernel: Arc<dyn CadKernel>, config: NamingConfig) -> Self {
        let naming = Arc::new(ShapeNamingService::with_config(&config));
        let cache = Arc::new(ResultCache::from_config(&config));
        Self::with_services(kernel, naming, cache, config)
    }

    /// Create a document using existing shared services
    pub fn with_services(
        kernel: Arc<dyn CadKernel>,
        naming: Arc<ShapeNamingService>,
        cache: Arc<ResultCache<KernelOutput>>,
        config: NamingConfig,
    ) -> Self {
        Self {
            kernel,
            naming,
            cache,
            dependencies: DependencyGraph::new(),
            bodies: BTreeMap::new(),
            config,
        }
    }

    // ========== Services ==========

    pub fn kernel(&self) -> &dyn CadKernel {
        self.kernel.as_ref()
    }

    pub fn naming(&self) -> &Arc<ShapeNamingService> {
        &self.naming
    }

    pub fn cache(&self) -> &Arc<ResultCache<KernelOutput>> {
        &self.cache
    }

    pub fn config(&self) -> &NamingConfig {
        &self.config
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    pub(crate) fn dependencies_mut(&mut self) -> &mut DependencyGraph {
        &mut self.dependencies
    }

    // ========== Bodies ==========

    pub fn add_body(&mut self, name: impl Into<String>) -> Uuid {
        self.insert_body(Body::new(name))
    }

    pub fn insert_body(&mut self, body: Body) -> Uuid {
        let id = body.id;
        self.bodies.insert(id, body);
        id
    }

    pub fn body(&self, id: Uuid) -> Option<&Body> {
        self.bodies.get(&id)
    }

    /// Direct access to a body, bypassing transactions
    pub fn body_mut(&mut self, id: Uuid) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    pub(crate) fn require_body(&self, id: Uuid) -> NamingResult<&Body> {
        self.bodies.get(&id).ok_or(NamingError::BodyNotFound(id))
    }

    pub(crate) fn require_body_mut(&mut self, id: Uuid) -> NamingResult<&mut Body> {
        self.bodies.get_mut(&id).ok_or(NamingError::BodyNotFound(id))
    }

    pub fn bodies(&self) -> impl Iterator<Item = &Body> {
        self.bodies.values()
    }

    pub fn body_ids(&self) -> Vec<Uuid> {
        self.bodies.keys().copied().collect()
    }

    /// Remove a body together with its identities, cache entries and graph nodes
    pub fn remove_body(&mut self, id: Uuid) -> Option<Body> {
        let body = self.bodies.remove(&id)?;
        for feature in body.features() {
            self.cache.invalidate_by_feature(&feature.id);
            self.dependencies.remove_node_with_edges(&feature.id);
        }
        self.naming.remove_body(id);
        self.release_unused_solids();
        Some(body)
    }

    /// Ids of every feature of every body
    pub fn live_features(&self) -> BTreeSet<FeatureId> {
        self.bodies
            .values()
            .flat_map(|body| body.features().iter().map(|f| f.id.clone()))
            .collect()
    }

    // ========== Feature Edits ==========

    /// Append a feature and rebuild
    pub fn add_feature(&mut self, body_id: Uuid, feature: Feature) -> NamingResult<EditOutcome> {
        tracing::info!("Adding {} feature {}", feature.type_name(), feature.name);
        self.edit_atomic(body_id, move |doc| {
            doc.require_body_mut(body_id)?.push_feature(feature);
            Ok(())
        })
    }

    /// Modify a feature in place and rebuild
    pub fn edit_feature(
        &mut self,
        body_id: Uuid,
        feature_id: &FeatureId,
        edit: impl FnOnce(&mut Feature),
    ) -> NamingResult<EditOutcome> {
        let feature_id = feature_id.clone();
        self.edit_atomic(body_id, move |doc| {
            let feature = doc
                .require_body_mut(body_id)?
                .feature_mut(&feature_id)
                .ok_or_else(|| NamingError::FeatureNotFound(feature_id.clone()))?;
            edit(feature);
            doc.cache.invalidate_by_feature(&feature_id);
            Ok(())
        })
    }

    /// Remove a feature and rebuild
    ///
    /// The feature's identities are invalidated and its cache entries and
    /// graph node dropped. Fails and rolls back if a later feature still
    /// needs its output.
    pub fn delete_feature(&mut self, body_id: Uuid, feature_id: &FeatureId) -> NamingResult<EditOutcome> {
        let feature_id = feature_id.clone();
        self.edit_atomic(body_id, move |doc| {
            doc.require_body_mut(body_id)?
                .remove_feature(&feature_id)
                .ok_or_else(|| NamingError::FeatureNotFound(feature_id.clone()))?;
            doc.naming.invalidate_feature(body_id, &feature_id);
            doc.cache.invalidate_by_feature(&feature_id);
            doc.dependencies.remove_node_with_edges(&feature_id);
            Ok(())
        })
    }

    fn edit_atomic(
        &mut self,
        body_id: Uuid,
        edit: impl FnOnce(&mut Document) -> NamingResult<()>,
    ) -> NamingResult<EditOutcome> {
        let mut failed = None;
        let outcome = transaction::atomic(self, body_id, |doc| {
            edit(doc)?;
            let report = doc.rebuild_current(body_id)?;
            if let Some((feature_id, status)) = report.failure() {
                let error = RollbackError::FeatureFailed {
                    feature_id: feature_id.clone(),
                    reason: status.to_string(),
                };
                failed = Some(report);
                return Err(error.into());
            }
            Ok(report)
        })?;

        self.release_unused_solids();
        Ok(match outcome {
            TransactionOutcome::Committed(report) => EditOutcome::Applied(report),
            TransactionOutcome::RolledBack { error, report } => EditOutcome::RolledBack {
                error,
                report: failed,
                validation: report,
            },
        })
    }

    // ========== Rebuild ==========

    /// Rebuild a body
    ///
    /// A rebuild in which a feature fails is rolled back, so the body and its
    /// identities stay as they were. The report is returned either way.
    pub fn rebuild(&mut self, body_id: Uuid) -> NamingResult<RebuildReport> {
        let mut tx = Transaction::begin(self, body_id)?;
        let report = tx.document_mut().rebuild_current(body_id)?;
        if let Some((feature_id, status)) = report.failure() {
            tracing::warn!("Feature {} failed: {}", feature_id, status);
            let validation = tx.rollback();
            if !validation.consistent {
                tracing::warn!(
                    "Rollback of body {} left differences: {:?}",
                    body_id,
                    validation.differences
                );
            }
        } else {
            tx.commit()?;
        }
        self.release_unused_solids();
        Ok(report)
    }

    /// Rebuild the current generation of a body in place
    pub(crate) fn rebuild_current(&mut self, body_id: Uuid) -> NamingResult<RebuildReport> {
        let body = self
            .bodies
            .get_mut(&body_id)
            .ok_or(NamingError::BodyNotFound(body_id))?;
        let mut ctx = RebuildContext {
            kernel: self.kernel.as_ref(),
            naming: &self.naming,
            cache: &self.cache,
            dependencies: &mut self.dependencies,
            config: &self.config,
        };
        Ok(rebuild_body(&mut ctx, body))
    }

    /// Release kernel solids that no retained generation or cached result uses
    ///
    /// Skipped while the kernel has other owners, whose solids this document
    /// cannot see. Returns how many solids were released.
    pub fn release_unused_solids(&self) -> usize {
        if Arc::strong_count(&self.kernel) > 1 {
            return 0;
        }
        let mut live: HashSet<Uuid> = self
            .bodies
            .values()
            .flat_map(|body| body.held_solids())
            .map(|solid| solid.id)
            .collect();
        self.cache.for_each_result(|output| {
            live.insert(output.solid.id);
        });
        self.kernel.retain_solids(&live)
    }

    // ========== Diagnostics ==========

    pub fn health_report(&self, body_id: Uuid) -> NamingResult<HealthReport> {
        let body = self.require_body(body_id)?;
        Ok(self
            .naming
            .get_health_report(self.kernel.as_ref(), body, &self.config))
    }

    pub fn rollback_state(&self, body_id: Uuid) -> NamingResult<RollbackState> {
        RollbackState::capture(self, body_id)
    }

    pub fn sweep_orphans(&self, body_id: Uuid) -> NamingResult<Vec<OrphanInfo>> {
        RollbackValidator::sweep(self, body_id)
    }

    /// Remove the removable orphans, returning how many were removed
    pub fn remove_orphans(&mut self, orphans: &[OrphanInfo]) -> usize {
        RollbackValidator::remove(self, orphans)
    }

    /// Tessellation of a body's current solid
    pub fn mesh(&mut self, body_id: Uuid, tolerance: f32) -> Option<&TessellatedMesh> {
        let body = self.bodies.get_mut(&body_id)?;
        body.get_mesh(self.kernel.as_ref(), tolerance)
    }
}
