//! CAD Kernel trait definitions
//!
//! These traits define the interface the naming layer expects from a BRep
//! kernel. Face and edge handles are transient: every operation that produces
//! a solid hands out new handles, even for entities that did not change.

use std::collections::HashSet;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Transient handle of an edge within a solid
///
/// Two handles are equal only if they denote the same underlying edge
/// instance of the same solid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    /// ID of the solid this edge belongs to
    pub solid_id: Uuid,
    /// Storage slot of the edge within the solid
    pub index: u32,
}

impl EdgeId {
    /// Create a new edge ID
    pub fn new(solid_id: Uuid, index: u32) -> Self {
        Self { solid_id, index }
    }
}

/// Transient handle of a face within a solid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaceId {
    /// ID of the solid this face belongs to
    pub solid_id: Uuid,
    /// Storage slot of the face within the solid
    pub index: u32,
}

impl FaceId {
    /// Create a new face ID
    pub fn new(solid_id: Uuid, index: u32) -> Self {
        Self { solid_id, index }
    }
}

/// Handle of either a face or an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Face(FaceId),
    Edge(EdgeId),
}

impl EntityRef {
    /// ID of the solid owning the entity
    pub fn solid_id(&self) -> Uuid {
        match self {
            EntityRef::Face(id) => id.solid_id,
            EntityRef::Edge(id) => id.solid_id,
        }
    }
}

/// Surface type tag of a face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SurfaceKind {
    #[default]
    Plane,
    Cylinder,
    Cone,
    Sphere,
    Torus,
    Other,
}

/// Curve type tag of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CurveKind {
    #[default]
    Line,
    Circle,
    Ellipse,
    BSpline,
    Other,
}

/// Information about an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Start point of the edge
    pub start: Vec3,
    /// End point of the edge
    pub end: Vec3,
    /// Midpoint of the edge
    pub midpoint: Vec3,
    /// Length of the edge
    pub length: f32,
    /// Underlying curve type
    pub curve: CurveKind,
}

impl EdgeInfo {
    /// Create a new straight edge info
    pub fn new(id: EdgeId, start: Vec3, end: Vec3) -> Self {
        let midpoint = (start + end) * 0.5;
        let length = (end - start).length();
        Self {
            id,
            start,
            end,
            midpoint,
            length,
            curve: CurveKind::Line,
        }
    }

    /// Unit tangent at parameter `t` in `[0, 1]`
    ///
    /// Straight edges have a constant tangent; degenerate edges return zero.
    pub fn tangent_at(&self, _t: f32) -> Vec3 {
        (self.end - self.start).normalize_or_zero()
    }
}

/// Information about a face
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceInfo {
    /// Unique identifier for this face
    pub id: FaceId,
    /// Center point of the face
    pub center: Vec3,
    /// Outward normal vector of the face
    pub normal: Vec3,
    /// Area of the face
    pub area: f32,
    /// Underlying surface type
    pub surface: SurfaceKind,
}

impl FaceInfo {
    /// Create a new planar face info
    pub fn new(id: FaceId, center: Vec3, normal: Vec3, area: f32) -> Self {
        Self {
            id,
            center,
            normal: normal.normalize_or_zero(),
            area,
            surface: SurfaceKind::Plane,
        }
    }

    /// Outward normal at `point`
    ///
    /// Planar faces have a constant normal.
    pub fn normal_at(&self, _point: Vec3) -> Vec3 {
        self.normal
    }
}

/// Error type for CAD kernel operations
#[derive(Debug, Clone, Error)]
pub enum CadError {
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Boolean operation failed: {0}")]
    BooleanFailed(String),

    #[error("Tessellation failed: {0}")]
    TessellationFailed(String),

    #[error("Kernel not available: {0}")]
    KernelNotAvailable(String),

    #[error("Operation produced an empty result: {0}")]
    EmptyResult(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Result type for CAD operations
pub type CadResult<T> = Result<T, CadError>;

/// A tessellated mesh output from the CAD kernel
#[derive(Debug, Clone, Default)]
pub struct TessellatedMesh {
    /// Vertex positions (3 floats per vertex)
    pub vertices: Vec<[f32; 3]>,
    /// Vertex normals (3 floats per vertex)
    pub normals: Vec<[f32; 3]>,
    /// Triangle indices (3 indices per triangle)
    pub indices: Vec<u32>,
}

impl TessellatedMesh {
    /// Create an empty tessellated mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Get the number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// A 2D wire (closed loop of edges) for extrusion profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire2D {
    /// Unique identifier
    pub id: Uuid,
    /// Points defining the wire (in order)
    pub points: Vec<Vec2>,
    /// Whether the wire is closed
    pub closed: bool,
}

impl Wire2D {
    /// Create a new wire from points
    pub fn new(points: Vec<Vec2>, closed: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            points,
            closed,
        }
    }

    /// Create a rectangle wire
    pub fn rectangle(center: Vec2, width: f32, height: f32) -> Self {
        let hw = width / 2.0;
        let hh = height / 2.0;
        Self::new(
            vec![
                center + Vec2::new(-hw, -hh),
                center + Vec2::new(hw, -hh),
                center + Vec2::new(hw, hh),
                center + Vec2::new(-hw, hh),
            ],
            true,
        )
    }
}

/// A 3D solid body handle
///
/// The geometry lives inside the kernel; the handle is only an ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Solid {
    /// Unique identifier
    pub id: Uuid,
}

impl Solid {
    /// Create a new solid with the given ID
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

/// Boolean operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanType {
    /// Union (add)
    Union,
    /// Subtraction (cut)
    Subtract,
    /// Intersection (common)
    Intersect,
}

/// What became of the input entities of an operation
///
/// An input mapped to an empty list was deleted; inputs that do not appear
/// were not tracked by the kernel.
#[derive(Debug, Clone, Default)]
pub struct ShapeHistory {
    /// Input face → output faces
    pub faces: Vec<(FaceId, Vec<FaceId>)>,
    /// Input edge → output edges
    pub edges: Vec<(EdgeId, Vec<EdgeId>)>,
}

impl ShapeHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Output faces generated from `face`
    pub fn modified_faces(&self, face: FaceId) -> &[FaceId] {
        self.faces
            .iter()
            .find(|(input, _)| *input == face)
            .map(|(_, outputs)| outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Output edges generated from `edge`
    pub fn modified_edges(&self, edge: EdgeId) -> &[EdgeId] {
        self.edges
            .iter()
            .find(|(input, _)| *input == edge)
            .map(|(_, outputs)| outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Check if the history tracks nothing
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.edges.is_empty()
    }
}

/// Output of a modifying kernel operation
#[derive(Debug, Clone)]
pub struct KernelOutput {
    /// The produced solid
    pub solid: Solid,
    /// Input → output entity history
    pub history: ShapeHistory,
}

impl KernelOutput {
    /// Output of an operation without tracked history
    pub fn without_history(solid: Solid) -> Self {
        Self {
            solid,
            history: ShapeHistory::new(),
        }
    }
}

/// The main CAD kernel trait
///
/// Implementations provide the actual geometry operations. Entity queries
/// must be deterministic for a given solid handle.
pub trait CadKernel: Send + Sync {
    /// Get the name of this kernel
    fn name(&self) -> &str;

    /// Drop every stored solid whose id is not in `live`
    ///
    /// Returns how many solids were dropped. Kernels without solid storage
    /// keep the default.
    fn retain_solids(&self, _live: &HashSet<Uuid>) -> usize {
        0
    }

    /// Extrude a 2D profile along a direction
    ///
    /// # Arguments
    /// * `profile` - The 2D wire profile to extrude
    /// * `plane_origin` - The origin of the sketch plane in 3D
    /// * `plane_normal` - The normal of the sketch plane
    /// * `direction` - The extrusion direction
    /// * `distance` - The extrusion distance
    fn extrude(
        &self,
        profile: &Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        direction: Vec3,
        distance: f32,
    ) -> CadResult<Solid>;

    /// Sweep a profile along a polyline path
    fn sweep(
        &self,
        profile: &Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        path: &[Vec3],
    ) -> CadResult<Solid>;

    /// Perform a boolean operation on two solids
    fn boolean(&self, a: &Solid, b: &Solid, op: BooleanType) -> CadResult<KernelOutput>;

    /// Tessellate a solid into triangles
    fn tessellate(&self, solid: &Solid, tolerance: f32) -> CadResult<TessellatedMesh>;

    /// Create a box primitive
    fn create_box(&self, center: Vec3, size: Vec3) -> CadResult<Solid>;

    // ========== Topology Queries ==========

    /// Get all edges of a solid, in the kernel's storage order
    fn get_edges(&self, solid: &Solid) -> CadResult<Vec<EdgeInfo>>;

    /// Get all faces of a solid, in shell traversal order
    fn get_faces(&self, solid: &Solid) -> CadResult<Vec<FaceInfo>>;

    /// Get the edges bounding a face, in boundary loop order
    fn face_edges(&self, solid: &Solid, face: FaceId) -> CadResult<Vec<EdgeId>>;

    /// Canonical byte export of the solid's geometry
    ///
    /// Two solids with identical geometry export identical bytes, regardless
    /// of their handles.
    fn export_brep(&self, solid: &Solid) -> CadResult<Vec<u8>>;

    // ========== Modifying Operations ==========

    /// Move a planar face along its normal
    fn push_pull(&self, solid: &Solid, face: FaceId, distance: f32) -> CadResult<KernelOutput>;

    /// Apply fillet (rounded edge) to selected edges
    fn fillet(&self, solid: &Solid, edges: &[EdgeId], radius: f32) -> CadResult<KernelOutput>;

    /// Apply chamfer (beveled edge) to selected edges
    fn chamfer(&self, solid: &Solid, edges: &[EdgeId], distance: f32) -> CadResult<KernelOutput>;

    /// Create a hollow shell with openings at the given faces
    fn shell(
        &self,
        solid: &Solid,
        thickness: f32,
        faces_to_remove: &[FaceId],
    ) -> CadResult<KernelOutput>;

    /// Create a closed hollow (inner void) with constant wall thickness
    fn hollow(&self, solid: &Solid, thickness: f32) -> CadResult<KernelOutput>;

    /// Tilt faces by a draft angle (radians) relative to a pull direction
    fn draft(
        &self,
        solid: &Solid,
        faces: &[FaceId],
        angle: f32,
        pull_direction: Vec3,
    ) -> CadResult<KernelOutput>;

    /// Drill a round hole into a face
    fn hole(
        &self,
        solid: &Solid,
        face: FaceId,
        center: Vec3,
        diameter: f32,
        depth: f32,
    ) -> CadResult<KernelOutput>;

    /// Emboss a surface texture onto faces
    fn texture(&self, solid: &Solid, faces: &[FaceId], depth: f32) -> CadResult<KernelOutput>;
}

/// A null kernel that always returns errors (used when no kernel is available)
#[derive(Debug, Default)]
pub struct NullKernel;

impl NullKernel {
    fn unavailable<T>() -> CadResult<T> {
        Err(CadError::KernelNotAvailable(
            "No CAD kernel available".into(),
        ))
    }
}

impl CadKernel for NullKernel {
    fn name(&self) -> &str {
        "null"
    }

    fn extrude(
        &self,
        _profile: &Wire2D,
        _plane_origin: Vec3,
        _plane_normal: Vec3,
        _direction: Vec3,
        _distance: f32,
    ) -> CadResult<Solid> {
        Self::unavailable()
    }

    fn sweep(
        &self,
        _profile: &Wire2D,
        _plane_origin: Vec3,
        _plane_normal: Vec3,
        _path: &[Vec3],
    ) -> CadResult<Solid> {
        Self::unavailable()
    }

    fn boolean(&self, _a: &Solid, _b: &Solid, _op: BooleanType) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn tessellate(&self, _solid: &Solid, _tolerance: f32) -> CadResult<TessellatedMesh> {
        Self::unavailable()
    }

    fn create_box(&self, _center: Vec3, _size: Vec3) -> CadResult<Solid> {
        Self::unavailable()
    }

    fn get_edges(&self, _solid: &Solid) -> CadResult<Vec<EdgeInfo>> {
        Self::unavailable()
    }

    fn get_faces(&self, _solid: &Solid) -> CadResult<Vec<FaceInfo>> {
        Self::unavailable()
    }

    fn face_edges(&self, _solid: &Solid, _face: FaceId) -> CadResult<Vec<EdgeId>> {
        Self::unavailable()
    }

    fn export_brep(&self, _solid: &Solid) -> CadResult<Vec<u8>> {
        Self::unavailable()
    }

    fn push_pull(&self, _solid: &Solid, _face: FaceId, _distance: f32) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn fillet(&self, _solid: &Solid, _edges: &[EdgeId], _radius: f32) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn chamfer(
        &self,
        _solid: &Solid,
        _edges: &[EdgeId],
        _distance: f32,
    ) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn shell(
        &self,
        _solid: &Solid,
        _thickness: f32,
        _faces_to_remove: &[FaceId],
    ) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn hollow(&self, _solid: &Solid, _thickness: f32) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn draft(
        &self,
        _solid: &Solid,
        _faces: &[FaceId],
        _angle: f32,
        _pull_direction: Vec3,
    ) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn hole(
        &self,
        _solid: &Solid,
        _face: FaceId,
        _center: Vec3,
        _diameter: f32,
        _depth: f32,
    ) -> CadResult<KernelOutput> {
        Self::unavailable()
    }

    fn texture(&self, _solid: &Solid, _faces: &[FaceId], _depth: f32) -> CadResult<KernelOutput> {
        Self::unavailable()
    }
}
