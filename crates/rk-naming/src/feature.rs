//! Feature Operations
//!
//! Parametric features of a body's history. Every feature kind stores its
//! topology references as [`ReferenceSet`]s, exposed uniformly through the
//! [`TopologyReferences`] trait so the orchestrator never needs to know the
//! concrete kind.

use std::fmt;

use glam::Vec3;
use rk_cad::{
    BooleanType, CadError, CadKernel, EdgeId, EdgeInfo, FaceId, FaceInfo, KernelOutput, Solid,
    Wire2D,
};
use serde::{Deserialize, Serialize};

use crate::error::OperationOutcome;
use crate::resolve::{FailureCategory, FailureNotice, ReferenceSet};
use crate::selector::GeometricSelector;
use crate::shape_id::{FeatureId, ShapeId, ShapeKind};

// ============== Feature Kinds ==============

/// Operation performed by a feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureOp {
    /// Box primitive, merged into the body if one exists
    Box {
        /// Box center
        center: Vec3,
        /// Box dimensions
        size: Vec3,
    },

    /// Extrude a profile, optionally sketched on a face of the body
    Extrude {
        /// The 2D profile
        profile: Wire2D,
        /// Sketch plane origin, used when no face is referenced
        plane_origin: Vec3,
        /// Sketch plane normal, used when no face is referenced
        plane_normal: Vec3,
        /// Extrusion distance along the plane normal
        distance: f32,
        /// Face the profile is sketched on
        #[serde(default)]
        faces: ReferenceSet,
    },

    /// Move a planar face along its normal
    PushPull {
        faces: ReferenceSet,
        distance: f32,
    },

    /// Round edges
    Fillet {
        edges: ReferenceSet,
        radius: f32,
    },

    /// Bevel edges
    Chamfer {
        edges: ReferenceSet,
        distance: f32,
    },

    /// Drill a round hole into a face
    Hole {
        faces: ReferenceSet,
        /// Point on the face where the hole is centered
        position: Vec3,
        diameter: f32,
        depth: f32,
    },

    /// Tilt faces relative to a pull direction
    Draft {
        faces: ReferenceSet,
        /// Draft angle in radians
        angle: f32,
        pull_direction: Vec3,
    },

    /// Hollow the body, opening the referenced faces
    Shell {
        faces: ReferenceSet,
        thickness: f32,
    },

    /// Closed hollow with constant wall thickness
    Hollow { thickness: f32 },

    /// Sweep a profile along a referenced edge
    Sweep {
        profile: Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        /// Path edge
        edges: ReferenceSet,
    },

    /// Emboss a texture onto faces
    Texture {
        faces: ReferenceSet,
        depth: f32,
    },
}

impl FeatureOp {
    /// Get the type name of this operation
    pub fn type_name(&self) -> &'static str {
        match self {
            FeatureOp::Box { .. } => "Box",
            FeatureOp::Extrude { .. } => "Extrude",
            FeatureOp::PushPull { .. } => "PushPull",
            FeatureOp::Fillet { .. } => "Fillet",
            FeatureOp::Chamfer { .. } => "Chamfer",
            FeatureOp::Hole { .. } => "Hole",
            FeatureOp::Draft { .. } => "Draft",
            FeatureOp::Shell { .. } => "Shell",
            FeatureOp::Hollow { .. } => "Hollow",
            FeatureOp::Sweep { .. } => "Sweep",
            FeatureOp::Texture { .. } => "Texture",
        }
    }

    /// Check if the operation creates material without needing a body
    pub fn is_base(&self) -> bool {
        matches!(self, FeatureOp::Box { .. } | FeatureOp::Extrude { .. })
    }

    /// Scalar parameters identifying the operation in the result cache
    ///
    /// Topology references are not parameters: they enter the cache key as
    /// input identities.
    pub fn cache_params(&self) -> Vec<(&'static str, String)> {
        match self {
            FeatureOp::Box { center, size } => vec![
                ("center", format!("{:?}", center)),
                ("size", format!("{:?}", size)),
            ],
            FeatureOp::Extrude {
                profile,
                plane_origin,
                plane_normal,
                distance,
                faces,
            } => {
                let mut params = vec![
                    ("profile", profile_key(profile)),
                    ("distance", format!("{:?}", distance)),
                ];
                // the stored plane is ignored when sketched on a face
                if !faces.has_topological() {
                    params.push(("plane_origin", format!("{:?}", plane_origin)));
                    params.push(("plane_normal", format!("{:?}", plane_normal)));
                }
                params
            }
            FeatureOp::PushPull { distance, .. } => vec![("distance", format!("{:?}", distance))],
            FeatureOp::Fillet { radius, .. } => vec![("radius", format!("{:?}", radius))],
            FeatureOp::Chamfer { distance, .. } => vec![("distance", format!("{:?}", distance))],
            FeatureOp::Hole {
                position,
                diameter,
                depth,
                ..
            } => vec![
                ("position", format!("{:?}", position)),
                ("diameter", format!("{:?}", diameter)),
                ("depth", format!("{:?}", depth)),
            ],
            FeatureOp::Draft {
                angle,
                pull_direction,
                ..
            } => vec![
                ("angle", format!("{:?}", angle)),
                ("pull_direction", format!("{:?}", pull_direction)),
            ],
            FeatureOp::Shell { thickness, .. } | FeatureOp::Hollow { thickness } => {
                vec![("thickness", format!("{:?}", thickness))]
            }
            FeatureOp::Sweep {
                profile,
                plane_origin,
                plane_normal,
                ..
            } => vec![
                ("profile", profile_key(profile)),
                ("plane_origin", format!("{:?}", plane_origin)),
                ("plane_normal", format!("{:?}", plane_normal)),
            ],
            FeatureOp::Texture { depth, .. } => vec![("depth", format!("{:?}", depth))],
        }
    }

    /// Execute the operation on the body's current solid
    ///
    /// `faces` and `edges` are the resolved references, in canonical order.
    pub fn execute(
        &self,
        kernel: &dyn CadKernel,
        input: Option<&Solid>,
        faces: &[FaceInfo],
        edges: &[EdgeInfo],
    ) -> Result<KernelOutput, OperationOutcome> {
        let face_ids: Vec<FaceId> = faces.iter().map(|f| f.id).collect();
        let edge_ids: Vec<EdgeId> = edges.iter().map(|e| e.id).collect();

        let output = match self {
            FeatureOp::Box { center, size } => {
                let solid = kernel.create_box(*center, *size)?;
                merge(kernel, input, solid)?
            }

            FeatureOp::Extrude {
                profile,
                plane_origin,
                plane_normal,
                distance,
                ..
            } => {
                let (origin, normal) = match faces.first() {
                    Some(face) => (face.center, face.normal),
                    None => (*plane_origin, *plane_normal),
                };
                let solid = kernel.extrude(profile, origin, normal, normal, *distance)?;
                merge(kernel, input, solid)?
            }

            FeatureOp::PushPull { distance, .. } => {
                let solid = require_input(input)?;
                let face = single(&face_ids, "push-pull")?;
                kernel.push_pull(solid, face, *distance)?
            }

            FeatureOp::Fillet { radius, .. } => {
                kernel.fillet(require_input(input)?, &edge_ids, *radius)?
            }

            FeatureOp::Chamfer { distance, .. } => {
                kernel.chamfer(require_input(input)?, &edge_ids, *distance)?
            }

            FeatureOp::Hole {
                position,
                diameter,
                depth,
                ..
            } => {
                let solid = require_input(input)?;
                let face = single(&face_ids, "hole")?;
                kernel.hole(solid, face, *position, *diameter, *depth)?
            }

            FeatureOp::Draft {
                angle,
                pull_direction,
                ..
            } => kernel.draft(require_input(input)?, &face_ids, *angle, *pull_direction)?,

            FeatureOp::Shell { thickness, .. } => {
                kernel.shell(require_input(input)?, *thickness, &face_ids)?
            }

            FeatureOp::Hollow { thickness } => kernel.hollow(require_input(input)?, *thickness)?,

            FeatureOp::Sweep {
                profile,
                plane_origin,
                plane_normal,
                ..
            } => {
                let path = match edges {
                    [edge] => vec![edge.start, edge.end],
                    _ => {
                        return Err(OperationOutcome::KernelError(format!(
                            "sweep needs exactly one path edge, got {}",
                            edges.len()
                        )));
                    }
                };
                let solid = kernel.sweep(profile, *plane_origin, *plane_normal, &path)?;
                merge(kernel, input, solid)?
            }

            FeatureOp::Texture { depth, .. } => {
                kernel.texture(require_input(input)?, &face_ids, *depth)?
            }
        };

        Ok(output)
    }
}

fn profile_key(profile: &Wire2D) -> String {
    let points: Vec<String> = profile
        .points
        .iter()
        .map(|p| format!("{:?},{:?}", p.x, p.y))
        .collect();
    format!("{}:{}", profile.closed, points.join(";"))
}

fn require_input(input: Option<&Solid>) -> Result<&Solid, OperationOutcome> {
    input.ok_or_else(|| OperationOutcome::KernelError("feature needs an existing solid".into()))
}

fn single<T: Copy>(items: &[T], what: &str) -> Result<T, OperationOutcome> {
    match items {
        [item] => Ok(*item),
        _ => Err(OperationOutcome::from(CadError::InvalidParameter(format!(
            "{} needs exactly one face, got {}",
            what,
            items.len()
        )))),
    }
}

/// Merge a newly created lump into the existing solid
fn merge(
    kernel: &dyn CadKernel,
    input: Option<&Solid>,
    solid: Solid,
) -> Result<KernelOutput, CadError> {
    match input {
        Some(existing) => kernel.boolean(existing, &solid, BooleanType::Union),
        None => Ok(KernelOutput::without_history(solid)),
    }
}

// ============== Topology References ==============

/// Uniform access to the stored topology references of a feature
pub trait TopologyReferences {
    /// Face references, if the kind takes any
    fn face_refs(&self) -> Option<&ReferenceSet>;

    /// Edge references, if the kind takes any
    fn edge_refs(&self) -> Option<&ReferenceSet>;

    fn refs_mut(&mut self, kind: ShapeKind) -> Option<&mut ReferenceSet>;

    /// Whether index/identity disagreement must fail the feature
    fn is_strict(&self) -> bool;

    fn refs(&self, kind: ShapeKind) -> Option<&ReferenceSet> {
        match kind {
            ShapeKind::Face => self.face_refs(),
            ShapeKind::Edge => self.edge_refs(),
        }
    }

    /// All reference kinds the feature takes, faces first
    fn references(&self) -> Vec<(ShapeKind, &ReferenceSet)> {
        [ShapeKind::Face, ShapeKind::Edge]
            .into_iter()
            .filter_map(|kind| self.refs(kind).map(|refs| (kind, refs)))
            .collect()
    }

    fn indices(&self, kind: ShapeKind) -> &[usize] {
        self.refs(kind).map(|r| r.indices.as_slice()).unwrap_or(&[])
    }

    fn shape_ids(&self, kind: ShapeKind) -> &[ShapeId] {
        self.refs(kind).map(|r| r.shape_ids.as_slice()).unwrap_or(&[])
    }

    fn selectors(&self, kind: ShapeKind) -> &[GeometricSelector] {
        self.refs(kind).map(|r| r.selectors.as_slice()).unwrap_or(&[])
    }

    /// Number of stored topology references
    fn reference_count(&self) -> usize {
        self.references().iter().map(|(_, refs)| refs.len()).sum()
    }
}

impl TopologyReferences for FeatureOp {
    fn face_refs(&self) -> Option<&ReferenceSet> {
        match self {
            FeatureOp::Extrude { faces, .. }
            | FeatureOp::PushPull { faces, .. }
            | FeatureOp::Hole { faces, .. }
            | FeatureOp::Draft { faces, .. }
            | FeatureOp::Shell { faces, .. }
            | FeatureOp::Texture { faces, .. } => Some(faces),
            _ => None,
        }
    }

    fn edge_refs(&self) -> Option<&ReferenceSet> {
        match self {
            FeatureOp::Fillet { edges, .. }
            | FeatureOp::Chamfer { edges, .. }
            | FeatureOp::Sweep { edges, .. } => Some(edges),
            _ => None,
        }
    }

    fn refs_mut(&mut self, kind: ShapeKind) -> Option<&mut ReferenceSet> {
        match (kind, self) {
            (
                ShapeKind::Face,
                FeatureOp::Extrude { faces, .. }
                | FeatureOp::PushPull { faces, .. }
                | FeatureOp::Hole { faces, .. }
                | FeatureOp::Draft { faces, .. }
                | FeatureOp::Shell { faces, .. }
                | FeatureOp::Texture { faces, .. },
            ) => Some(faces),
            (
                ShapeKind::Edge,
                FeatureOp::Fillet { edges, .. }
                | FeatureOp::Chamfer { edges, .. }
                | FeatureOp::Sweep { edges, .. },
            ) => Some(edges),
            _ => None,
        }
    }

    fn is_strict(&self) -> bool {
        !matches!(
            self,
            FeatureOp::Texture { .. } | FeatureOp::Sweep { .. } | FeatureOp::Box { .. }
        )
    }
}

// ============== Status ==============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusLevel {
    #[default]
    Ok,
    Warning,
    Error,
}

/// Detail code of a feature status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    MissingRef,
    Mismatch,
    Drift,
    /// An earlier feature of the body failed
    BlockedByUpstream,
    Suppressed,
    EmptyResult,
    KernelError,
}

impl From<FailureCategory> for StatusCode {
    fn from(category: FailureCategory) -> Self {
        match category {
            FailureCategory::MissingRef => StatusCode::MissingRef,
            FailureCategory::Mismatch => StatusCode::Mismatch,
            FailureCategory::Drift => StatusCode::Drift,
        }
    }
}

/// Status of a feature after its last rebuild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStatus {
    pub level: StatusLevel,
    pub code: Option<StatusCode>,
    pub message: Option<String>,
    pub notices: Vec<FailureNotice>,
}

impl FeatureStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success, downgraded to a warning if drift was recorded
    pub fn with_drift(notices: Vec<FailureNotice>) -> Self {
        if notices.is_empty() {
            return Self::ok();
        }
        Self {
            level: StatusLevel::Warning,
            code: Some(StatusCode::Drift),
            message: notices.first().map(|n| n.reason.clone()),
            notices,
        }
    }

    pub fn suppressed() -> Self {
        Self {
            code: Some(StatusCode::Suppressed),
            ..Self::default()
        }
    }

    pub fn blocked(upstream: &FeatureId) -> Self {
        Self {
            level: StatusLevel::Error,
            code: Some(StatusCode::BlockedByUpstream),
            message: Some(format!("blocked by failed feature {}", upstream)),
            notices: Vec::new(),
        }
    }

    /// Resolution failure
    pub fn failed(notice: FailureNotice) -> Self {
        Self {
            level: StatusLevel::Error,
            code: Some(notice.category.into()),
            message: Some(notice.reason.clone()),
            notices: vec![notice],
        }
    }

    pub fn from_outcome(outcome: &OperationOutcome) -> Self {
        let code = match outcome {
            OperationOutcome::Success => return Self::ok(),
            OperationOutcome::EmptyResult(_) => StatusCode::EmptyResult,
            OperationOutcome::KernelError(_) => StatusCode::KernelError,
        };
        Self {
            level: StatusLevel::Error,
            code: Some(code),
            message: Some(outcome.to_string()),
            notices: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.level)?;
        if let Some(code) = self.code {
            write!(f, " ({:?})", code)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

// ============== Feature ==============

/// A parametric feature in a body's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Unique identifier
    pub id: FeatureId,
    /// Name of the feature
    pub name: String,
    /// Whether the feature is suppressed
    #[serde(default)]
    pub suppressed: bool,
    pub op: FeatureOp,
    /// Status of the last rebuild
    #[serde(skip)]
    pub status: FeatureStatus,
}

impl Feature {
    pub fn new(name: impl Into<String>, op: FeatureOp) -> Self {
        Self {
            id: FeatureId::new(),
            name: name.into(),
            suppressed: false,
            op,
            status: FeatureStatus::default(),
        }
    }

    /// Use a fixed identifier
    pub fn with_id(mut self, id: impl Into<FeatureId>) -> Self {
        self.id = id.into();
        self
    }

    /// Get the type name of this feature
    pub fn type_name(&self) -> &'static str {
        self.op.type_name()
    }

    /// Create a box feature
    pub fn block(name: impl Into<String>, center: Vec3, size: Vec3) -> Self {
        Self::new(name, FeatureOp::Box { center, size })
    }

    /// Create an extrude feature on a fixed sketch plane
    pub fn extrude(
        name: impl Into<String>,
        profile: Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        distance: f32,
    ) -> Self {
        Self::new(
            name,
            FeatureOp::Extrude {
                profile,
                plane_origin,
                plane_normal,
                distance,
                faces: ReferenceSet::new(),
            },
        )
    }

    /// Create an extrude feature sketched on a face
    pub fn extrude_on_face(
        name: impl Into<String>,
        profile: Wire2D,
        faces: ReferenceSet,
        distance: f32,
    ) -> Self {
        Self::new(
            name,
            FeatureOp::Extrude {
                profile,
                plane_origin: Vec3::ZERO,
                plane_normal: Vec3::Z,
                distance,
                faces,
            },
        )
    }

    pub fn push_pull(name: impl Into<String>, faces: ReferenceSet, distance: f32) -> Self {
        Self::new(name, FeatureOp::PushPull { faces, distance })
    }

    pub fn fillet(name: impl Into<String>, edges: ReferenceSet, radius: f32) -> Self {
        Self::new(name, FeatureOp::Fillet { edges, radius })
    }

    pub fn chamfer(name: impl Into<String>, edges: ReferenceSet, distance: f32) -> Self {
        Self::new(name, FeatureOp::Chamfer { edges, distance })
    }

    pub fn hole(
        name: impl Into<String>,
        faces: ReferenceSet,
        position: Vec3,
        diameter: f32,
        depth: f32,
    ) -> Self {
        Self::new(
            name,
            FeatureOp::Hole {
                faces,
                position,
                diameter,
                depth,
            },
        )
    }

    pub fn draft(
        name: impl Into<String>,
        faces: ReferenceSet,
        angle: f32,
        pull_direction: Vec3,
    ) -> Self {
        Self::new(
            name,
            FeatureOp::Draft {
                faces,
                angle,
                pull_direction,
            },
        )
    }

    pub fn shell(name: impl Into<String>, faces: ReferenceSet, thickness: f32) -> Self {
        Self::new(name, FeatureOp::Shell { faces, thickness })
    }

    pub fn hollow(name: impl Into<String>, thickness: f32) -> Self {
        Self::new(name, FeatureOp::Hollow { thickness })
    }

    pub fn sweep(
        name: impl Into<String>,
        profile: Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        edges: ReferenceSet,
    ) -> Self {
        Self::new(
            name,
            FeatureOp::Sweep {
                profile,
                plane_origin,
                plane_normal,
                edges,
            },
        )
    }

    pub fn texture(name: impl Into<String>, faces: ReferenceSet, depth: f32) -> Self {
        Self::new(name, FeatureOp::Texture { faces, depth })
    }

    /// Stable content hash of the persisted feature fields
    pub fn content_hash(&self) -> String {
        match serde_json::to_vec(self) {
            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
            Err(e) => {
                tracing::warn!("Feature {} failed to serialize: {}", self.id, e);
                String::from("unserializable")
            }
        }
    }
}

impl TopologyReferences for Feature {
    fn face_refs(&self) -> Option<&ReferenceSet> {
        self.op.face_refs()
    }

    fn edge_refs(&self) -> Option<&ReferenceSet> {
        self.op.edge_refs()
    }

    fn refs_mut(&mut self, kind: ShapeKind) -> Option<&mut ReferenceSet> {
        self.op.refs_mut(kind)
    }

    fn is_strict(&self) -> bool {
        self.op.is_strict()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use rk_cad::PolyKernel;

    #[test]
    fn test_strict_kinds() {
        let edges = ReferenceSet::from_indices([0]);
        let faces = ReferenceSet::from_indices([0]);
        assert!(Feature::fillet("Fillet", edges.clone(), 1.0).is_strict());
        assert!(Feature::chamfer("Chamfer", edges.clone(), 1.0).is_strict());
        assert!(Feature::shell("Shell", faces.clone(), 1.0).is_strict());
        assert!(Feature::hollow("Hollow", 1.0).is_strict());
        assert!(Feature::push_pull("Pull", faces.clone(), 1.0).is_strict());
        assert!(!Feature::texture("Texture", faces, 0.1).is_strict());
        let profile = Wire2D::rectangle(Vec2::ZERO, 1.0, 1.0);
        assert!(!Feature::sweep("Sweep", profile, Vec3::ZERO, Vec3::Z, edges).is_strict());
    }

    #[test]
    fn test_reference_access() {
        let mut feature = Feature::fillet("Fillet", ReferenceSet::from_indices([3, 1]), 1.0);
        assert_eq!(feature.indices(ShapeKind::Edge), &[3, 1]);
        assert!(feature.indices(ShapeKind::Face).is_empty());
        assert!(feature.refs_mut(ShapeKind::Face).is_none());
        assert_eq!(feature.references().len(), 1);
        assert_eq!(feature.reference_count(), 2);

        if let Some(refs) = feature.refs_mut(ShapeKind::Edge) {
            refs.indices = vec![1, 3];
        }
        assert_eq!(feature.indices(ShapeKind::Edge), &[1, 3]);
    }

    #[test]
    fn test_content_hash_ignores_status() {
        let feature = Feature::block("Box", Vec3::ZERO, Vec3::ONE).with_id("F1");
        let mut failed = feature.clone();
        failed.status = FeatureStatus::blocked(&FeatureId::from("F0"));
        assert_eq!(feature.content_hash(), failed.content_hash());

        let mut edited = feature.clone();
        edited.op = FeatureOp::Box {
            center: Vec3::ZERO,
            size: Vec3::splat(2.0),
        };
        assert_ne!(feature.content_hash(), edited.content_hash());
    }

    #[test]
    fn test_cache_params_distinguish_values() {
        let a = Feature::fillet("A", ReferenceSet::from_indices([0]), 1.0);
        let b = Feature::fillet("B", ReferenceSet::from_indices([5]), 1.0);
        let c = Feature::fillet("C", ReferenceSet::from_indices([0]), 1.5);
        assert_eq!(a.op.cache_params(), b.op.cache_params());
        assert_ne!(a.op.cache_params(), c.op.cache_params());
    }

    #[test]
    fn test_execute_box_and_merge() {
        let kernel = PolyKernel::new();
        let first = FeatureOp::Box {
            center: Vec3::ZERO,
            size: Vec3::ONE,
        }
        .execute(&kernel, None, &[], &[])
        .unwrap();
        assert!(first.history.is_empty());

        let second = FeatureOp::Box {
            center: Vec3::new(5.0, 0.0, 0.0),
            size: Vec3::ONE,
        }
        .execute(&kernel, Some(&first.solid), &[], &[])
        .unwrap();
        assert_eq!(kernel.get_faces(&second.solid).unwrap().len(), 12);
        assert!(!second.history.is_empty());
    }

    #[test]
    fn test_execute_requires_input() {
        let kernel = PolyKernel::new();
        let outcome = FeatureOp::Hollow { thickness: 1.0 }
            .execute(&kernel, None, &[], &[])
            .unwrap_err();
        assert!(matches!(outcome, OperationOutcome::KernelError(_)));
    }

    #[test]
    fn test_execute_classifies_empty_result() {
        let kernel = PolyKernel::new();
        let solid = kernel.create_box(Vec3::ZERO, Vec3::splat(2.0)).unwrap();
        let edges = kernel.get_edges(&solid).unwrap();
        let outcome = FeatureOp::Fillet {
            edges: ReferenceSet::new(),
            radius: 5.0,
        }
        .execute(&kernel, Some(&solid), &[], &edges[..1])
        .unwrap_err();
        assert!(matches!(outcome, OperationOutcome::EmptyResult(_)));
    }

    #[test]
    fn test_status_from_notice() {
        let notice = FailureNotice::new(FailureCategory::Mismatch, ShapeKind::Edge, "differs", true);
        let status = FeatureStatus::failed(notice);
        assert!(status.is_error());
        assert_eq!(status.code, Some(StatusCode::Mismatch));

        let status = FeatureStatus::with_drift(Vec::new());
        assert_eq!(status, FeatureStatus::ok());
    }

    #[test]
    fn test_feature_ron_round_trip() {
        let feature = Feature::hole(
            "Hole",
            ReferenceSet::from_indices([1]),
            Vec3::new(0.0, 0.0, 1.0),
            0.5,
            1.0,
        );
        let text = ron::to_string(&feature).unwrap();
        let back: Feature = ron::from_str(&text).unwrap();
        assert_eq!(back, feature);
    }
}
