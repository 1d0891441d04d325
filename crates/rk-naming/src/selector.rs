//! Geometric Selector
//!
//! Last-resort matcher. A selector remembers what an entity looked like and
//! scores candidates of a new solid against it:
//!
//! | component            | weight |
//! |----------------------|--------|
//! | center proximity     | 0.4    |
//! | normal / direction   | 0.3    |
//! | area / length        | 0.2    |
//! | surface / curve type | 0.1    |
//!
//! A candidate is only returned when its score exceeds the threshold. Binding
//! the wrong face silently is worse than failing.

use glam::Vec3;
use rk_cad::{CurveKind, SurfaceKind};
use serde::{Deserialize, Serialize};

use crate::indexer::Entity;
use crate::shape_id::ShapeKind;

/// Default minimum score of a match
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

const CENTER_WEIGHT: f32 = 0.4;
const DIRECTION_WEIGHT: f32 = 0.3;
const SIZE_WEIGHT: f32 = 0.2;
const TYPE_WEIGHT: f32 = 0.1;

/// Remembered face descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSelector {
    pub center: Vec3,
    pub normal: Vec3,
    pub area: f32,
    #[serde(default)]
    pub surface: SurfaceKind,
    pub tolerance: f32,
}

/// Remembered edge descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSelector {
    pub center: Vec3,
    pub direction: Vec3,
    pub length: f32,
    #[serde(default)]
    pub curve: CurveKind,
    pub tolerance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeometricSelector {
    Face(FaceSelector),
    Edge(EdgeSelector),
}

impl GeometricSelector {
    /// Capture the descriptor of an entity
    pub fn from_entity(entity: &Entity, tolerance: f32) -> Self {
        match entity {
            Entity::Face(face) => GeometricSelector::Face(FaceSelector {
                center: face.center,
                normal: face.normal_at(face.center),
                area: face.area,
                surface: face.surface,
                tolerance,
            }),
            Entity::Edge(edge) => GeometricSelector::Edge(EdgeSelector {
                center: edge.midpoint,
                direction: edge.tangent_at(0.5),
                length: edge.length,
                curve: edge.curve,
                tolerance,
            }),
        }
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            GeometricSelector::Face(_) => ShapeKind::Face,
            GeometricSelector::Edge(_) => ShapeKind::Edge,
        }
    }

    /// Similarity of `entity` to this descriptor, in `[0, 1]`
    ///
    /// Entities of the other kind score zero.
    pub fn score(&self, entity: &Entity) -> f32 {
        match (self, entity) {
            (GeometricSelector::Face(sel), Entity::Face(face)) => {
                let center = center_score(sel.center, face.center, sel.tolerance, sel.area.sqrt());
                let normal = sel.normal.dot(face.normal_at(face.center)).max(0.0);
                let size = size_score(sel.area, face.area);
                let kind = if sel.surface == face.surface { 1.0 } else { 0.0 };
                combine(center, normal, size, kind)
            }
            (GeometricSelector::Edge(sel), Entity::Edge(edge)) => {
                let center = center_score(sel.center, edge.midpoint, sel.tolerance, sel.length);
                // edges have no intrinsic orientation
                let direction = sel.direction.dot(edge.tangent_at(0.5)).abs();
                let size = size_score(sel.length, edge.length);
                let kind = if sel.curve == edge.curve { 1.0 } else { 0.0 };
                combine(center, direction, size, kind)
            }
            _ => 0.0,
        }
    }

    /// Position of the best candidate scoring above `threshold`
    ///
    /// Ties go to the earliest candidate.
    pub fn find_best_match(&self, candidates: &[Entity], threshold: f32) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let score = self.score(candidate);
            if score > threshold && best.is_none_or(|(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| i)
    }
}

fn combine(center: f32, direction: f32, size: f32, kind: f32) -> f32 {
    (CENTER_WEIGHT * center + DIRECTION_WEIGHT * direction + SIZE_WEIGHT * size + TYPE_WEIGHT * kind)
        .clamp(0.0, 1.0)
}

/// 1 at the remembered center, 0.5 at one entity size away
fn center_score(expected: Vec3, actual: Vec3, tolerance: f32, size: f32) -> f32 {
    let scale = tolerance.max(size).max(f32::EPSILON);
    let d = expected.distance(actual) / scale;
    1.0 / (1.0 + d * d)
}

fn size_score(expected: f32, actual: f32) -> f32 {
    let (lo, hi) = (expected.min(actual), expected.max(actual));
    if hi <= f32::EPSILON { 1.0 } else { (lo / hi).max(0.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rk_cad::{CadKernel, PolyKernel};

    use crate::indexer::TopologyIndex;

    fn box_index() -> TopologyIndex {
        let kernel = PolyKernel::new();
        let solid = kernel
            .create_box(Vec3::splat(5.0), Vec3::splat(10.0))
            .unwrap();
        TopologyIndex::build(&kernel, &solid)
    }

    #[test]
    fn test_perfect_match_scores_one() {
        let index = box_index();
        let face = index.entity_at(ShapeKind::Face, 1).unwrap();
        let selector = GeometricSelector::from_entity(&face, 1e-3);
        assert_relative_eq!(selector.score(&face), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_finds_same_face_on_rebuilt_solid() {
        let index = box_index();
        let rebuilt = box_index();
        for i in 0..6 {
            let face = index.entity_at(ShapeKind::Face, i).unwrap();
            let selector = GeometricSelector::from_entity(&face, 1e-3);
            let candidates = rebuilt.entities(ShapeKind::Face);
            assert_eq!(selector.find_best_match(&candidates, DEFAULT_MATCH_THRESHOLD), Some(i));
        }
    }

    #[test]
    fn test_reversed_edge_still_matches() {
        let index = box_index();
        let edge = match index.entity_at(ShapeKind::Edge, 0).unwrap() {
            Entity::Edge(edge) => edge,
            Entity::Face(_) => unreachable!(),
        };
        let selector = GeometricSelector::from_entity(&Entity::Edge(edge.clone()), 1e-3);
        let reversed = rk_cad::EdgeInfo::new(edge.id, edge.end, edge.start);
        assert_relative_eq!(selector.score(&Entity::Edge(reversed)), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let index = box_index();
        let face = index.entity_at(ShapeKind::Face, 0).unwrap();
        let mut selector = GeometricSelector::from_entity(&face, 1e-3);
        if let GeometricSelector::Face(sel) = &mut selector {
            sel.center = Vec3::new(500.0, 500.0, 500.0);
            sel.normal = Vec3::new(0.0, 0.0, 1.0);
            sel.area = 1.0;
        }
        let candidates = index.entities(ShapeKind::Face);
        assert_eq!(selector.find_best_match(&candidates, DEFAULT_MATCH_THRESHOLD), None);
    }

    #[test]
    fn test_wrong_kind_scores_zero() {
        let index = box_index();
        let face = index.entity_at(ShapeKind::Face, 0).unwrap();
        let edge = index.entity_at(ShapeKind::Edge, 0).unwrap();
        let selector = GeometricSelector::from_entity(&face, 1e-3);
        assert_eq!(selector.score(&edge), 0.0);
        assert_eq!(selector.kind(), ShapeKind::Face);
    }

    #[test]
    fn test_ties_break_to_lowest_position() {
        let index = box_index();
        let face = index.entity_at(ShapeKind::Face, 2).unwrap();
        let selector = GeometricSelector::from_entity(&face, 1e-3);
        let candidates = vec![face.clone(), face.clone()];
        assert_eq!(selector.find_best_match(&candidates, DEFAULT_MATCH_THRESHOLD), Some(0));
    }
}
