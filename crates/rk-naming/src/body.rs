//! Bodies as generation arenas
//!
//! Every mutation of a body happens in a new [`BodyGeneration`]. Generations
//! share unchanged data through `Arc`, so starting one is cheap and rolling
//! back is a pointer move.

use std::collections::BTreeMap;
use std::sync::Arc;

use rk_cad::{CadKernel, Solid, TessellatedMesh};
use uuid::Uuid;

use crate::feature::Feature;
use crate::shape_id::FeatureId;

/// One immutable state of a body
#[derive(Debug, Clone)]
pub struct BodyGeneration {
    pub id: u64,
    /// Final solid of the body
    pub solid: Option<Solid>,
    pub features: Arc<Vec<Feature>>,
    /// Solid after each feature, parallel to `features`
    pub feature_solids: Arc<Vec<Option<Solid>>>,
    pub metadata: Arc<BTreeMap<String, String>>,
}

impl BodyGeneration {
    fn initial() -> Self {
        Self {
            id: 0,
            solid: None,
            features: Arc::new(Vec::new()),
            feature_solids: Arc::new(Vec::new()),
            metadata: Arc::new(BTreeMap::new()),
        }
    }
}

/// A body built from a feature history
#[derive(Debug, Clone)]
pub struct Body {
    /// Unique identifier
    pub id: Uuid,
    /// Name of the body
    pub name: String,
    generations: Vec<BodyGeneration>,
    current: usize,
    next_generation: u64,
    /// Cached tessellation
    mesh_cache: Option<TessellatedMesh>,
}

impl Default for Body {
    fn default() -> Self {
        Self::new("Body")
    }
}

impl Body {
    /// Create a new body with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            generations: vec![BodyGeneration::initial()],
            current: 0,
            next_generation: 1,
            mesh_cache: None,
        }
    }

    // ========== Generations ==========

    pub fn generation(&self) -> &BodyGeneration {
        &self.generations[self.current]
    }

    fn generation_mut(&mut self) -> &mut BodyGeneration {
        &mut self.generations[self.current]
    }

    pub fn generation_id(&self) -> u64 {
        self.generation().id
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Start a new generation from the current one and return its id
    ///
    /// Generations after the current one are discarded.
    pub fn begin_generation(&mut self) -> u64 {
        self.generations.truncate(self.current + 1);
        let mut next = self.generation().clone();
        next.id = self.next_generation;
        self.next_generation += 1;
        self.generations.push(next);
        self.current = self.generations.len() - 1;
        self.current_id()
    }

    fn current_id(&self) -> u64 {
        self.generations[self.current].id
    }

    /// Make `generation` current again, dropping every later generation
    ///
    /// Returns false if the generation is no longer in the arena.
    pub fn rollback_to(&mut self, generation: u64) -> bool {
        let Some(pos) = self.generations.iter().position(|g| g.id == generation) else {
            return false;
        };
        self.generations.truncate(pos + 1);
        self.current = pos;
        self.invalidate_cache();
        true
    }

    /// Keep at most `max` generations, the current one included
    pub fn prune(&mut self, max: usize) {
        let max = max.max(1);
        let keep_from = (self.current + 1).saturating_sub(max);
        if keep_from > 0 {
            self.generations.drain(..keep_from);
            self.current -= keep_from;
        }
    }

    /// Every solid referenced by a retained generation
    pub fn held_solids(&self) -> impl Iterator<Item = Solid> + '_ {
        self.generations.iter().flat_map(|generation| {
            generation
                .solid
                .into_iter()
                .chain(generation.feature_solids.iter().flatten().copied())
        })
    }

    // ========== Current State ==========

    pub fn solid(&self) -> Option<Solid> {
        self.generation().solid
    }

    pub fn set_solid(&mut self, solid: Option<Solid>) {
        self.generation_mut().solid = solid;
        self.invalidate_cache();
    }

    pub fn features(&self) -> &[Feature] {
        &self.generation().features
    }

    /// Mutable feature list of the current generation
    ///
    /// Copies the list first if an earlier generation shares it.
    pub fn features_mut(&mut self) -> &mut Vec<Feature> {
        Arc::make_mut(&mut self.generation_mut().features)
    }

    pub fn feature(&self, id: &FeatureId) -> Option<&Feature> {
        self.features().iter().find(|f| &f.id == id)
    }

    pub fn feature_mut(&mut self, id: &FeatureId) -> Option<&mut Feature> {
        self.features_mut().iter_mut().find(|f| &f.id == id)
    }

    pub fn feature_position(&self, id: &FeatureId) -> Option<usize> {
        self.features().iter().position(|f| &f.id == id)
    }

    pub fn push_feature(&mut self, feature: Feature) {
        self.features_mut().push(feature);
    }

    /// Remove a feature from the list, leaving every service untouched
    pub fn remove_feature(&mut self, id: &FeatureId) -> Option<Feature> {
        let pos = self.feature_position(id)?;
        Some(self.features_mut().remove(pos))
    }

    pub fn feature_solids(&self) -> &[Option<Solid>] {
        &self.generation().feature_solids
    }

    pub fn set_feature_solids(&mut self, solids: Vec<Option<Solid>>) {
        self.generation_mut().feature_solids = Arc::new(solids);
    }

    /// Solid a feature at `position` starts from
    pub fn input_solid(&self, position: usize) -> Option<Solid> {
        position
            .checked_sub(1)
            .and_then(|prev| self.feature_solids().get(prev).copied().flatten())
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.generation().metadata
    }

    pub fn metadata_mut(&mut self) -> &mut BTreeMap<String, String> {
        Arc::make_mut(&mut self.generation_mut().metadata)
    }

    // ========== Derived Caches ==========

    /// Get the tessellated mesh, tessellating if needed
    pub fn get_mesh(&mut self, kernel: &dyn CadKernel, tolerance: f32) -> Option<&TessellatedMesh> {
        if self.mesh_cache.is_none()
            && let Some(solid) = self.solid()
            && let Ok(mesh) = kernel.tessellate(&solid, tolerance)
        {
            self.mesh_cache = Some(mesh);
        }
        self.mesh_cache.as_ref()
    }

    pub fn has_cached_mesh(&self) -> bool {
        self.mesh_cache.is_some()
    }

    /// Invalidate the mesh cache
    pub fn invalidate_cache(&mut self) {
        self.mesh_cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rk_cad::PolyKernel;

    #[test]
    fn test_rollback_restores_previous_generation() {
        let mut body = Body::new("Body");
        let first = body.begin_generation();
        body.push_feature(Feature::block("Box", Vec3::ZERO, Vec3::ONE).with_id("F1"));

        let second = body.begin_generation();
        assert!(second > first);
        body.push_feature(Feature::hollow("Hollow", 0.1).with_id("F2"));
        body.metadata_mut().insert("color".into(), "red".into());
        assert_eq!(body.features().len(), 2);

        assert!(body.rollback_to(first));
        assert_eq!(body.features().len(), 1);
        assert!(body.metadata().is_empty());
        assert_eq!(body.generation_id(), first);
        assert!(!body.rollback_to(second));
    }

    #[test]
    fn test_generations_share_until_written() {
        let mut body = Body::new("Body");
        body.push_feature(Feature::block("Box", Vec3::ZERO, Vec3::ONE).with_id("F1"));
        body.begin_generation();
        assert!(Arc::ptr_eq(
            &body.generations[0].features,
            &body.generations[1].features
        ));

        if let Some(feature) = body.feature_mut(&FeatureId::from("F1")) {
            feature.name = String::from("Block");
        }
        assert_eq!(body.generations[0].features[0].name, "Box");
        assert_eq!(body.features()[0].name, "Block");
    }

    #[test]
    fn test_begin_discards_redo() {
        let mut body = Body::new("Body");
        let first = body.begin_generation();
        body.begin_generation();
        body.rollback_to(first);
        body.begin_generation();
        assert_eq!(body.generation_count(), 3);
    }

    #[test]
    fn test_prune_keeps_current() {
        let mut body = Body::new("Body");
        for _ in 0..10 {
            body.begin_generation();
        }
        let current = body.generation_id();
        body.prune(4);
        assert_eq!(body.generation_count(), 4);
        assert_eq!(body.generation_id(), current);
    }

    #[test]
    fn test_input_solid() {
        let mut body = Body::new("Body");
        let solid = Solid::new(Uuid::new_v4());
        body.set_feature_solids(vec![Some(solid), None]);
        assert_eq!(body.input_solid(0), None);
        assert_eq!(body.input_solid(1), Some(solid));
        assert_eq!(body.input_solid(2), None);
    }

    #[test]
    fn test_mesh_cache() {
        let kernel = PolyKernel::new();
        let mut body = Body::new("Body");
        assert!(body.get_mesh(&kernel, 0.1).is_none());

        let solid = kernel.create_box(Vec3::ZERO, Vec3::ONE).unwrap();
        body.set_solid(Some(solid));
        assert_eq!(body.get_mesh(&kernel, 0.1).map(|m| m.triangle_count()), Some(12));
        assert!(body.has_cached_mesh());

        body.invalidate_cache();
        assert!(!body.has_cached_mesh());
    }
}
