//! Topology Indexer
//!
//! Canonical, zero-based ordering of the faces and edges of a solid.
//!
//! Faces follow the kernel's shell traversal. Edges are re-derived by walking
//! each face's boundary loop in face order (first visit wins), so the edge
//! order does not depend on how the kernel stores its edges. All lookups use
//! handle identity, never geometric equality.

use std::collections::HashMap;

use glam::Vec3;
use rk_cad::{CadKernel, EdgeId, EdgeInfo, EntityRef, FaceId, FaceInfo, Solid};

use crate::shape_id::ShapeKind;

/// A face or edge of a solid, with its geometric descriptor
#[derive(Debug, Clone)]
pub enum Entity {
    Face(FaceInfo),
    Edge(EdgeInfo),
}

impl Entity {
    /// Kernel handle of the entity
    pub fn handle(&self) -> EntityRef {
        match self {
            Entity::Face(face) => EntityRef::Face(face.id),
            Entity::Edge(edge) => EntityRef::Edge(edge.id),
        }
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            Entity::Face(_) => ShapeKind::Face,
            Entity::Edge(_) => ShapeKind::Edge,
        }
    }

    pub fn center(&self) -> Vec3 {
        match self {
            Entity::Face(face) => face.center,
            Entity::Edge(edge) => edge.midpoint,
        }
    }

    /// Check if both denote the same kernel entity instance
    pub fn is_same(&self, other: &Entity) -> bool {
        self.handle() == other.handle()
    }
}

/// Canonical index over the topology of one solid
#[derive(Debug, Clone, Default)]
pub struct TopologyIndex {
    solid: Option<Solid>,
    faces: Vec<FaceInfo>,
    edges: Vec<EdgeInfo>,
    face_slots: HashMap<FaceId, usize>,
    edge_slots: HashMap<EdgeId, usize>,
}

impl TopologyIndex {
    /// Index the topology of `solid`
    ///
    /// Never fails: a kernel error yields an empty index.
    pub fn build(kernel: &dyn CadKernel, solid: &Solid) -> Self {
        let faces = match kernel.get_faces(solid) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!("Cannot index faces of solid {}: {}", solid.id, e);
                return Self::default();
            }
        };
        let stored_edges = match kernel.get_edges(solid) {
            Ok(edges) => edges,
            Err(e) => {
                tracing::debug!("Cannot index edges of solid {}: {}", solid.id, e);
                return Self::default();
            }
        };
        let by_handle: HashMap<EdgeId, &EdgeInfo> =
            stored_edges.iter().map(|edge| (edge.id, edge)).collect();

        let mut edges = Vec::with_capacity(stored_edges.len());
        let mut edge_slots = HashMap::with_capacity(stored_edges.len());
        for face in &faces {
            let loop_edges = kernel.face_edges(solid, face.id).unwrap_or_else(|e| {
                tracing::debug!("Cannot walk boundary of face {}: {}", face.id.index, e);
                Vec::new()
            });
            for edge_id in loop_edges {
                if !edge_slots.contains_key(&edge_id)
                    && let Some(edge) = by_handle.get(&edge_id)
                {
                    edge_slots.insert(edge_id, edges.len());
                    edges.push((*edge).clone());
                }
            }
        }
        // Edges not bounding any face keep storage order after the rest
        for edge in &stored_edges {
            if !edge_slots.contains_key(&edge.id) {
                edge_slots.insert(edge.id, edges.len());
                edges.push(edge.clone());
            }
        }

        let face_slots = faces
            .iter()
            .enumerate()
            .map(|(i, face)| (face.id, i))
            .collect();

        Self {
            solid: Some(*solid),
            faces,
            edges,
            face_slots,
            edge_slots,
        }
    }

    /// The indexed solid, if any
    pub fn solid(&self) -> Option<Solid> {
        self.solid
    }

    pub fn faces(&self) -> &[FaceInfo] {
        &self.faces
    }

    pub fn edges(&self) -> &[EdgeInfo] {
        &self.edges
    }

    /// Number of entities of `kind`
    pub fn len(&self, kind: ShapeKind) -> usize {
        match kind {
            ShapeKind::Face => self.faces.len(),
            ShapeKind::Edge => self.edges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.edges.is_empty()
    }

    pub fn face_at(&self, index: usize) -> Option<&FaceInfo> {
        self.faces.get(index)
    }

    pub fn edge_at(&self, index: usize) -> Option<&EdgeInfo> {
        self.edges.get(index)
    }

    /// Entity at a canonical index, `None` when out of range
    pub fn entity_at(&self, kind: ShapeKind, index: usize) -> Option<Entity> {
        match kind {
            ShapeKind::Face => self.face_at(index).cloned().map(Entity::Face),
            ShapeKind::Edge => self.edge_at(index).cloned().map(Entity::Edge),
        }
    }

    pub fn index_of_face(&self, face: FaceId) -> Option<usize> {
        self.face_slots.get(&face).copied()
    }

    pub fn index_of_edge(&self, edge: EdgeId) -> Option<usize> {
        self.edge_slots.get(&edge).copied()
    }

    /// Canonical index of a handle, `None` if it is not part of this solid
    pub fn index_of(&self, handle: EntityRef) -> Option<usize> {
        match handle {
            EntityRef::Face(face) => self.index_of_face(face),
            EntityRef::Edge(edge) => self.index_of_edge(edge),
        }
    }

    pub fn contains(&self, handle: EntityRef) -> bool {
        self.index_of(handle).is_some()
    }

    /// All entities of `kind` in canonical order
    pub fn entities(&self, kind: ShapeKind) -> Vec<Entity> {
        match kind {
            ShapeKind::Face => self.faces.iter().cloned().map(Entity::Face).collect(),
            ShapeKind::Edge => self.edges.iter().cloned().map(Entity::Edge).collect(),
        }
    }
}
