//! Persistent shape identities
//!
//! A [`ShapeId`] names a logical face or edge across rebuilds. It is created
//! once, when a feature first produces or consumes the entity, and copied
//! into every feature that references it.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indexer::Entity;

/// Identifier of a feature, unique within a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    /// Create a fresh random feature ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FeatureId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of topology entity a ShapeId names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Face,
    Edge,
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeKind::Face => write!(f, "face"),
            ShapeKind::Edge => write!(f, "edge"),
        }
    }
}

/// Persistent identity of a face or edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeId {
    /// Opaque identity
    pub uuid: Uuid,
    /// Face or edge
    pub kind: ShapeKind,
    /// Feature that produced or first consumed the entity
    pub feature_id: FeatureId,
    /// Canonical index at the time the identity was last written
    pub local_index: usize,
    /// Digest of the quantized geometric descriptor
    pub fingerprint: String,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl ShapeId {
    /// Create a new identity with a fresh UUID
    pub fn new(
        kind: ShapeKind,
        feature_id: FeatureId,
        local_index: usize,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind,
            feature_id,
            local_index,
            fingerprint: fingerprint.into(),
            timestamp: now_millis(),
        }
    }

    /// The same identity with a corrected local index
    pub fn reindexed(&self, local_index: usize) -> Self {
        Self {
            local_index,
            ..self.clone()
        }
    }

    /// Identity string used as a cache input
    pub fn cache_input(&self) -> String {
        format!("shape:{}", self.uuid)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Geometry fingerprint of an entity
///
/// Values are quantized to `precision` before hashing so that numerically
/// identical rebuilds produce identical digests. Edge directions are
/// sign-normalized: an edge reversed by the kernel keeps its fingerprint.
pub fn fingerprint(entity: &Entity, precision: f32) -> String {
    let q = |v: f32| (v / precision).round() as i64;
    let qv = |v: Vec3| format!("{},{},{}", q(v.x), q(v.y), q(v.z));

    let descriptor = match entity {
        Entity::Face(face) => format!(
            "face|{:?}|{}|{}|{}",
            face.surface,
            qv(face.center),
            qv(face.normal),
            q(face.area)
        ),
        Entity::Edge(edge) => format!(
            "edge|{:?}|{}|{}|{}",
            edge.curve,
            qv(edge.midpoint),
            qv(canonical_direction(edge.end - edge.start, precision)),
            q(edge.length)
        ),
    };

    let hash = blake3::hash(descriptor.as_bytes());
    hash.to_hex()[..32].to_string()
}

/// Flip a direction so that its first significant component is positive
fn canonical_direction(direction: Vec3, precision: f32) -> Vec3 {
    let dir = direction.normalize_or_zero();
    let first = dir
        .to_array()
        .into_iter()
        .find(|c| c.abs() > precision)
        .unwrap_or(0.0);
    if first < 0.0 { -dir } else { dir }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rk_cad::{EdgeId, EdgeInfo, FaceId, FaceInfo};

    fn edge(start: Vec3, end: Vec3) -> Entity {
        Entity::Edge(EdgeInfo::new(EdgeId::new(Uuid::new_v4(), 0), start, end))
    }

    #[test]
    fn test_fingerprint_ignores_handles_and_orientation() {
        let a = edge(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        let b = edge(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO);
        assert_eq!(fingerprint(&a, 1e-4), fingerprint(&b, 1e-4));
        assert_eq!(fingerprint(&a, 1e-4).len(), 32);
    }

    #[test]
    fn test_fingerprint_sees_geometry() {
        let a = edge(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        let b = edge(Vec3::ZERO, Vec3::new(10.5, 0.0, 0.0));
        assert_ne!(fingerprint(&a, 1e-4), fingerprint(&b, 1e-4));

        let face = Entity::Face(FaceInfo::new(
            FaceId::new(Uuid::new_v4(), 0),
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::NEG_Y,
            100.0,
        ));
        assert_ne!(fingerprint(&a, 1e-4), fingerprint(&face, 1e-4));
    }

    #[test]
    fn test_shape_id_json_round_trip() {
        let id = ShapeId::new(ShapeKind::Edge, FeatureId::from("Box"), 3, "0123abcd");
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("\"kind\":\"edge\""));
        assert!(json.contains("\"feature_id\":\"Box\""));

        let back: ShapeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.timestamp, id.timestamp);
    }

    #[test]
    fn test_shape_id_ron_round_trip() {
        let id = ShapeId::new(ShapeKind::Face, FeatureId::new(), 0, "feedface");
        let text = ron::to_string(&id).unwrap();
        let back: ShapeId = ron::from_str(&text).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_reindexed_keeps_identity() {
        let id = ShapeId::new(ShapeKind::Face, FeatureId::from("F"), 4, "aa");
        let moved = id.reindexed(1);
        assert_eq!(moved.uuid, id.uuid);
        assert_eq!(moved.timestamp, id.timestamp);
        assert_eq!(moved.local_index, 1);
    }
}
