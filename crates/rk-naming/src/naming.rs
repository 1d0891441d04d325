//! Shape Naming Service
//!
//! Process-wide identity registry. Every body owns one registry holding its
//! [`ShapeRecord`]s and the [`OperationRecord`] log; registries are locked
//! individually so rebuilds of different bodies do not contend.
//!
//! Resolution of a [`ShapeId`] against a solid tries, in order:
//! 1. direct re-registration: the record (or an equivalent record of the same
//!    feature, kind and fingerprint) is bound to an entity of the solid
//! 2. operation history: breadth-first replay of the recorded input → output
//!    mappings
//! 3. geometric fallback with the remembered selector

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rk_cad::{CadKernel, EdgeInfo, EntityRef, FaceInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::body::Body;
use crate::config::NamingConfig;
use crate::health::{self, HealthReport};
use crate::indexer::{Entity, TopologyIndex};
use crate::selector::GeometricSelector;
use crate::shape_id::{FeatureId, ShapeId, ShapeKind, fingerprint};

/// How a reference was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Stored index, confirmed by the ShapeId where one exists
    Index,
    Direct,
    OperationHistory,
    Geometric,
    /// Stored geometric selector, without topological references
    Selector,
    Unresolved,
}

impl ResolutionMethod {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ResolutionMethod::Unresolved)
    }
}

/// Registry entry of one ShapeId
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRecord {
    pub id: ShapeId,
    /// Last known kernel handle; handles do not survive a rebuild
    pub handle: Option<EntityRef>,
    pub valid: bool,
    /// Descriptor captured at the last binding
    pub selector: Option<GeometricSelector>,
}

/// Input → output identity mappings recorded by one feature rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub feature_id: FeatureId,
    pub manual_mappings: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

impl OperationRecord {
    pub fn new(feature_id: FeatureId) -> Self {
        Self {
            feature_id,
            manual_mappings: BTreeMap::new(),
        }
    }

    /// Record that `input` became `outputs` (empty: deleted)
    pub fn map(&mut self, input: Uuid, outputs: impl IntoIterator<Item = Uuid>) {
        self.manual_mappings
            .entry(input)
            .or_default()
            .extend(outputs);
    }

    pub fn is_empty(&self) -> bool {
        self.manual_mappings.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct BodyRegistry {
    records: Vec<ShapeRecord>,
    by_uuid: HashMap<Uuid, usize>,
    by_feature: BTreeMap<FeatureId, Vec<usize>>,
    operations: Vec<OperationRecord>,
}

impl BodyRegistry {
    fn insert(&mut self, record: ShapeRecord) -> usize {
        let slot = self.records.len();
        self.by_uuid.insert(record.id.uuid, slot);
        self.by_feature
            .entry(record.id.feature_id.clone())
            .or_default()
            .push(slot);
        self.records.push(record);
        slot
    }

    fn get(&self, uuid: &Uuid) -> Option<&ShapeRecord> {
        self.by_uuid.get(uuid).map(|&slot| &self.records[slot])
    }

    fn feature_slots(&self, feature_id: &FeatureId) -> &[usize] {
        self.by_feature
            .get(feature_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Records naming the same logical entity as `id`
    fn equivalents<'a>(&'a self, id: &'a ShapeId) -> impl Iterator<Item = &'a ShapeRecord> + 'a {
        self.feature_slots(&id.feature_id)
            .iter()
            .map(|&slot| &self.records[slot])
            .filter(move |r| r.id.kind == id.kind && r.id.fingerprint == id.fingerprint)
    }

    fn retain_records(&mut self, keep: impl Fn(&ShapeRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|r| keep(r));
        self.reindex();
        before - self.records.len()
    }

    fn reindex(&mut self) {
        self.by_uuid.clear();
        self.by_feature.clear();
        for (slot, record) in self.records.iter().enumerate() {
            self.by_uuid.insert(record.id.uuid, slot);
            self.by_feature
                .entry(record.id.feature_id.clone())
                .or_default()
                .push(slot);
        }
    }
}

/// Registry state of one body, captured for rollback
#[derive(Debug, Clone)]
pub struct NamingSavepoint {
    body: Uuid,
    registry: Option<BodyRegistry>,
}

impl NamingSavepoint {
    pub fn body_id(&self) -> Uuid {
        self.body
    }
}

/// The persistent identity registry
pub struct ShapeNamingService {
    bodies: RwLock<HashMap<Uuid, Arc<Mutex<BodyRegistry>>>>,
    precision: f32,
    selector_tolerance: f32,
    selector_threshold: f32,
}

impl Default for ShapeNamingService {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeNamingService {
    pub fn new() -> Self {
        Self::with_config(&NamingConfig::default())
    }

    pub fn with_config(config: &NamingConfig) -> Self {
        Self {
            bodies: RwLock::new(HashMap::new()),
            precision: config.fingerprint_precision,
            selector_tolerance: config.selector_tolerance,
            selector_threshold: config.selector_threshold,
        }
    }

    fn registry(&self, body: Uuid) -> Arc<Mutex<BodyRegistry>> {
        if let Some(registry) = self.bodies.read().get(&body) {
            return registry.clone();
        }
        self.bodies.write().entry(body).or_default().clone()
    }

    fn existing(&self, body: Uuid) -> Option<Arc<Mutex<BodyRegistry>>> {
        self.bodies.read().get(&body).cloned()
    }

    /// Fingerprint of an entity at the configured precision
    pub fn fingerprint(&self, entity: &Entity) -> String {
        fingerprint(entity, self.precision)
    }

    fn bound_record(&self, id: ShapeId, entity: &Entity) -> ShapeRecord {
        ShapeRecord {
            id,
            handle: Some(entity.handle()),
            valid: true,
            selector: Some(GeometricSelector::from_entity(entity, self.selector_tolerance)),
        }
    }

    // ============== Registration ==============

    /// Register an entity under a feature with a fresh identity
    pub fn register_shape(
        &self,
        body: Uuid,
        entity: &Entity,
        feature_id: &FeatureId,
        local_index: usize,
    ) -> ShapeId {
        let id = ShapeId::new(
            entity.kind(),
            feature_id.clone(),
            local_index,
            self.fingerprint(entity),
        );
        let record = self.bound_record(id.clone(), entity);
        self.registry(body).lock().insert(record);
        tracing::trace!("Registered {} {} under {}", id.kind, id.uuid, feature_id);
        id
    }

    /// Register every face and edge produced by a feature
    ///
    /// Records the feature registered earlier are re-bound when their
    /// fingerprint matches. Leftovers are re-bound only to an entity their
    /// stored selector scores above the match threshold, so unchanged or
    /// merely resized geometry keeps its identity. Records not claimed are
    /// invalidated and resolve through history or geometry from then on.
    /// Returns the identities in canonical order, faces first.
    pub fn register_outputs(
        &self,
        body: Uuid,
        feature_id: &FeatureId,
        index: &TopologyIndex,
    ) -> Vec<ShapeId> {
        let registry = self.registry(body);
        let mut reg = registry.lock();
        let existing: Vec<usize> = reg.feature_slots(feature_id).to_vec();
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut ids = Vec::with_capacity(index.len(ShapeKind::Face) + index.len(ShapeKind::Edge));

        for kind in [ShapeKind::Face, ShapeKind::Edge] {
            let entities = index.entities(kind);
            let prints: Vec<String> = entities.iter().map(|e| self.fingerprint(e)).collect();
            let mut slots: Vec<Option<usize>> = vec![None; entities.len()];

            for (i, print) in prints.iter().enumerate() {
                let found = existing.iter().copied().find(|s| {
                    !claimed.contains(s)
                        && reg.records[*s].id.kind == kind
                        && reg.records[*s].id.fingerprint == *print
                });
                if let Some(slot) = found {
                    claimed.insert(slot);
                    slots[i] = Some(slot);
                }
            }

            // Leftovers rebind to the entity their last known geometry
            // describes best. A stale position alone never rebinds.
            let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
            for (i, entity) in entities.iter().enumerate() {
                if slots[i].is_some() {
                    continue;
                }
                for &s in &existing {
                    let record = &reg.records[s];
                    if claimed.contains(&s) || record.id.kind != kind {
                        continue;
                    }
                    let Some(selector) = &record.selector else {
                        continue;
                    };
                    let score = selector.score(entity);
                    if score > self.selector_threshold {
                        pairs.push((score, i, s));
                    }
                }
            }
            pairs.sort_by(|a, b| {
                b.0.total_cmp(&a.0)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.cmp(&b.2))
            });
            for (score, i, s) in pairs {
                if slots[i].is_some() || claimed.contains(&s) {
                    continue;
                }
                tracing::trace!(
                    "Rebinding {} to {} {} (score {:.2})",
                    reg.records[s].id.uuid,
                    kind,
                    i,
                    score
                );
                claimed.insert(s);
                slots[i] = Some(s);
            }

            for (i, entity) in entities.iter().enumerate() {
                let slot = match slots[i] {
                    Some(slot) => {
                        let record = &mut reg.records[slot];
                        record.handle = Some(entity.handle());
                        record.valid = true;
                        record.selector =
                            Some(GeometricSelector::from_entity(entity, self.selector_tolerance));
                        slot
                    }
                    None => {
                        let id = ShapeId::new(kind, feature_id.clone(), i, prints[i].clone());
                        let record = self.bound_record(id, entity);
                        let slot = reg.insert(record);
                        claimed.insert(slot);
                        slot
                    }
                };
                ids.push(reg.records[slot].id.clone());
            }
        }

        let mut invalidated = 0;
        for slot in existing {
            if !claimed.contains(&slot) {
                let record = &mut reg.records[slot];
                record.valid = false;
                record.handle = None;
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            tracing::debug!(
                "Feature {} no longer produces {} registered entities",
                feature_id,
                invalidated
            );
        }
        ids
    }

    /// Insert a persisted identity as an unbound record
    ///
    /// The next rebuild of the owning feature re-binds it. Returns false if
    /// the identity is already known.
    pub fn adopt(&self, body: Uuid, id: &ShapeId) -> bool {
        let registry = self.registry(body);
        let mut reg = registry.lock();
        if reg.by_uuid.contains_key(&id.uuid) {
            return false;
        }
        reg.insert(ShapeRecord {
            id: id.clone(),
            handle: None,
            valid: true,
            selector: None,
        });
        true
    }

    /// Append an operation record
    ///
    /// A record identical to the feature's most recent one is not appended
    /// again. Returns whether the record was stored.
    pub fn record_operation(&self, body: Uuid, record: OperationRecord) -> bool {
        let registry = self.registry(body);
        let mut reg = registry.lock();
        let duplicate = reg
            .operations
            .iter()
            .rev()
            .find(|op| op.feature_id == record.feature_id)
            .is_some_and(|last| *last == record);
        if duplicate {
            return false;
        }
        reg.operations.push(record);
        true
    }

    // ============== Queries ==============

    pub fn record(&self, body: Uuid, uuid: Uuid) -> Option<ShapeRecord> {
        self.existing(body)?.lock().get(&uuid).cloned()
    }

    pub fn records_for_feature(&self, body: Uuid, feature_id: &FeatureId) -> Vec<ShapeRecord> {
        let Some(registry) = self.existing(body) else {
            return Vec::new();
        };
        let reg = registry.lock();
        reg.feature_slots(feature_id)
            .iter()
            .map(|&slot| reg.records[slot].clone())
            .collect()
    }

    pub fn operations(&self, body: Uuid) -> Vec<OperationRecord> {
        self.existing(body)
            .map(|registry| registry.lock().operations.clone())
            .unwrap_or_default()
    }

    pub fn record_count(&self, body: Uuid) -> usize {
        self.existing(body)
            .map(|registry| registry.lock().records.len())
            .unwrap_or(0)
    }

    pub fn operation_count(&self, body: Uuid) -> usize {
        self.existing(body)
            .map(|registry| registry.lock().operations.len())
            .unwrap_or(0)
    }

    // ============== Resolution ==============

    /// Resolve an identity against a solid
    pub fn resolve_shape(&self, body: Uuid, id: &ShapeId, index: &TopologyIndex) -> Option<Entity> {
        let (found, _) = self.resolve_shape_with_method(body, id, index);
        found.and_then(|i| index.entity_at(id.kind, i))
    }

    /// Resolve an identity and report how
    ///
    /// Returns the canonical index of the entity in `index`. Read-only.
    pub fn resolve_shape_with_method(
        &self,
        body: Uuid,
        id: &ShapeId,
        index: &TopologyIndex,
    ) -> (Option<usize>, ResolutionMethod) {
        let Some(registry) = self.existing(body) else {
            return (None, ResolutionMethod::Unresolved);
        };
        let reg = registry.lock();

        if let Some(found) = Self::resolve_direct(&reg, id, index) {
            return (Some(found), ResolutionMethod::Direct);
        }
        if let Some(found) = Self::resolve_history(&reg, id, index) {
            return (Some(found), ResolutionMethod::OperationHistory);
        }

        let selector = reg.get(&id.uuid).and_then(|r| r.selector.clone()).or_else(|| {
            reg.equivalents(id)
                .find_map(|r| r.selector.clone())
        });
        if let Some(selector) = selector
            && selector.kind() == id.kind
        {
            let candidates = index.entities(id.kind);
            if let Some(found) = selector.find_best_match(&candidates, self.selector_threshold) {
                return (Some(found), ResolutionMethod::Geometric);
            }
        }

        (None, ResolutionMethod::Unresolved)
    }

    fn bound_index(record: &ShapeRecord, index: &TopologyIndex) -> Option<usize> {
        if !record.valid {
            return None;
        }
        record.handle.and_then(|handle| index.index_of(handle))
    }

    fn resolve_direct(reg: &BodyRegistry, id: &ShapeId, index: &TopologyIndex) -> Option<usize> {
        if let Some(found) = reg.get(&id.uuid).and_then(|r| Self::bound_index(r, index)) {
            return Some(found);
        }
        reg.equivalents(id)
            .find_map(|r| Self::bound_index(r, index))
    }

    fn resolve_history(reg: &BodyRegistry, id: &ShapeId, index: &TopologyIndex) -> Option<usize> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut frontier: Vec<Uuid> = Vec::new();
        for uuid in std::iter::once(id.uuid).chain(reg.equivalents(id).map(|r| r.id.uuid)) {
            if visited.insert(uuid) {
                frontier.push(uuid);
            }
        }

        // One level at a time; the first level reaching the solid wins
        while !frontier.is_empty() {
            let mut next: Vec<Uuid> = Vec::new();
            for uuid in &frontier {
                for op in &reg.operations {
                    if let Some(outputs) = op.manual_mappings.get(uuid) {
                        for output in outputs {
                            if visited.insert(*output) {
                                next.push(*output);
                            }
                        }
                    }
                }
            }

            let best = next
                .iter()
                .filter_map(|uuid| reg.get(uuid))
                .filter(|r| r.id.kind == id.kind)
                .filter_map(|r| Self::bound_index(r, index))
                .min();
            if best.is_some() {
                return best;
            }
            frontier = next;
        }
        None
    }

    // ============== Reverse lookup ==============

    /// Identity of a face of the current solid
    ///
    /// With `require_exact`, only a record bound to this very face matches;
    /// otherwise a valid record with the same fingerprint is accepted.
    pub fn find_shape_id_by_face(
        &self,
        body: Uuid,
        face: &FaceInfo,
        require_exact: bool,
    ) -> Option<ShapeId> {
        self.find_shape_id(body, &Entity::Face(face.clone()), require_exact)
    }

    /// Identity of an edge of the current solid
    pub fn find_shape_id_by_edge(
        &self,
        body: Uuid,
        edge: &EdgeInfo,
        require_exact: bool,
    ) -> Option<ShapeId> {
        self.find_shape_id(body, &Entity::Edge(edge.clone()), require_exact)
    }

    pub fn find_shape_id(&self, body: Uuid, entity: &Entity, require_exact: bool) -> Option<ShapeId> {
        let registry = self.existing(body)?;
        let reg = registry.lock();
        let handle = entity.handle();
        if let Some(record) = reg
            .records
            .iter()
            .find(|r| r.valid && r.handle == Some(handle))
        {
            return Some(record.id.clone());
        }
        if require_exact {
            return None;
        }
        let print = self.fingerprint(entity);
        reg.records
            .iter()
            .find(|r| r.valid && r.id.kind == entity.kind() && r.id.fingerprint == print)
            .map(|r| r.id.clone())
    }

    // ============== Maintenance ==============

    /// Mark every record of a feature invalid and unbound
    pub fn invalidate_feature(&self, body: Uuid, feature_id: &FeatureId) -> usize {
        let Some(registry) = self.existing(body) else {
            return 0;
        };
        let mut reg = registry.lock();
        let slots = reg.feature_slots(feature_id).to_vec();
        for &slot in &slots {
            let record = &mut reg.records[slot];
            record.valid = false;
            record.handle = None;
        }
        slots.len()
    }

    /// Remove records by identity
    pub fn remove_records(&self, body: Uuid, uuids: &[Uuid]) -> usize {
        let Some(registry) = self.existing(body) else {
            return 0;
        };
        let doomed: HashSet<&Uuid> = uuids.iter().collect();
        registry
            .lock()
            .retain_records(|r| !doomed.contains(&r.id.uuid))
    }

    /// Remove the operation records of a feature
    pub fn remove_operations(&self, body: Uuid, feature_id: &FeatureId) -> usize {
        let Some(registry) = self.existing(body) else {
            return 0;
        };
        let mut reg = registry.lock();
        let before = reg.operations.len();
        reg.operations.retain(|op| op.feature_id != *feature_id);
        before - reg.operations.len()
    }

    /// Drop the whole registry of a body
    pub fn remove_body(&self, body: Uuid) -> bool {
        self.bodies.write().remove(&body).is_some()
    }

    /// Records owned by features not in `live`
    pub fn orphaned_records(&self, body: Uuid, live: &BTreeSet<FeatureId>) -> Vec<ShapeId> {
        let Some(registry) = self.existing(body) else {
            return Vec::new();
        };
        let reg = registry.lock();
        reg.records
            .iter()
            .filter(|r| !live.contains(&r.id.feature_id))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Features not in `live` that still own operation records
    pub fn orphaned_operations(&self, body: Uuid, live: &BTreeSet<FeatureId>) -> Vec<FeatureId> {
        let Some(registry) = self.existing(body) else {
            return Vec::new();
        };
        let reg = registry.lock();
        let owners: BTreeSet<FeatureId> = reg
            .operations
            .iter()
            .filter(|op| !live.contains(&op.feature_id))
            .map(|op| op.feature_id.clone())
            .collect();
        owners.into_iter().collect()
    }

    pub fn savepoint(&self, body: Uuid) -> NamingSavepoint {
        NamingSavepoint {
            body,
            registry: self.existing(body).map(|registry| registry.lock().clone()),
        }
    }

    /// Put a body's registry back to a savepoint
    pub fn restore(&self, savepoint: NamingSavepoint) {
        match savepoint.registry {
            Some(saved) => {
                let registry = self.registry(savepoint.body);
                *registry.lock() = saved;
            }
            None => {
                self.remove_body(savepoint.body);
            }
        }
    }

    /// Read-only diagnostics of every reference held by a body's features
    ///
    /// References are checked under the resolution policy of `config`.
    pub fn get_health_report(
        &self,
        kernel: &dyn CadKernel,
        body: &Body,
        config: &NamingConfig,
    ) -> HealthReport {
        health::build(self, kernel, body, config)
    }
}
