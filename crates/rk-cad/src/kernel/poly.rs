//! Polyhedral reference kernel
//!
//! Pure Rust kernel for planar-faced solids. It is small on purpose: it backs
//! the naming layer's tests and demos, not production modelling.
//!
//! Every operation stores a brand-new solid, so all face and edge handles
//! change on every rebuild even when the geometry does not. Dress-up
//! operations (fillet, chamfer, draft, hole, hollow, texture) validate their
//! inputs the way a real kernel would reject them and are recorded as
//! dressings on an otherwise unchanged polyhedron.

use std::collections::{HashMap, HashSet};

use glam::{Vec2, Vec3};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    BooleanType, CadError, CadKernel, CadResult, EdgeId, EdgeInfo, FaceId, FaceInfo,
    KernelOutput, ShapeHistory, Solid, TessellatedMesh, Wire2D,
};

/// Length below which geometry is treated as degenerate
const EPSILON: f32 = 1e-6;

/// Largest accepted draft angle (radians)
const MAX_DRAFT_ANGLE: f32 = std::f32::consts::FRAC_PI_4;

/// A planar face given by its vertex loop, counter-clockwise seen from outside
#[derive(Debug, Clone, PartialEq)]
struct PolyFace {
    vertices: Vec<usize>,
}

/// An undirected edge between two vertices (`a < b`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PolyEdge {
    a: usize,
    b: usize,
}

impl PolyEdge {
    fn new(v0: usize, v1: usize) -> Self {
        Self {
            a: v0.min(v1),
            b: v0.max(v1),
        }
    }

    fn touches(&self, other: &PolyEdge) -> bool {
        self.a == other.a || self.a == other.b || self.b == other.a || self.b == other.b
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DressKind {
    Fillet,
    Chamfer,
    Shell,
    Hollow,
    Draft,
    Hole,
    Texture,
}

#[derive(Debug, Clone, PartialEq)]
enum DressTarget {
    Body,
    Edge(PolyEdge),
    /// Face identified by its sorted vertex set, stable under face removal
    Face(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq)]
struct Dressing {
    kind: DressKind,
    target: DressTarget,
    value: f32,
}

/// Solid data owned by the kernel
#[derive(Debug, Clone)]
struct PolySolid {
    vertices: Vec<Vec3>,
    faces: Vec<PolyFace>,
    /// Sorted by vertex pair; deliberately not the traversal order
    edges: Vec<PolyEdge>,
    dressings: Vec<Dressing>,
}

impl PolySolid {
    fn assemble(vertices: Vec<Vec3>, faces: Vec<PolyFace>, dressings: Vec<Dressing>) -> Self {
        let mut edges: Vec<PolyEdge> = faces
            .iter()
            .flat_map(|face| {
                let n = face.vertices.len();
                (0..n).map(move |i| PolyEdge::new(face.vertices[i], face.vertices[(i + 1) % n]))
            })
            .collect();
        edges.sort_by_key(|e| (e.a, e.b));
        edges.dedup();

        Self {
            vertices,
            faces,
            edges,
            dressings,
        }
    }

    fn edge_slot(&self, edge: &PolyEdge) -> Option<usize> {
        self.edges
            .binary_search_by_key(&(edge.a, edge.b), |e| (e.a, e.b))
            .ok()
    }

    fn face_points(&self, face: &PolyFace) -> Vec<Vec3> {
        face.vertices.iter().map(|&v| self.vertices[v]).collect()
    }

    fn face_info(&self, solid_id: Uuid, slot: usize) -> FaceInfo {
        let points = self.face_points(&self.faces[slot]);
        let newell = newell_vector(&points);
        let area = newell.length() * 0.5;
        FaceInfo::new(
            FaceId::new(solid_id, slot as u32),
            polygon_centroid(&points),
            newell,
            area,
        )
    }

    fn edge_info(&self, solid_id: Uuid, slot: usize) -> EdgeInfo {
        let edge = self.edges[slot];
        EdgeInfo::new(
            EdgeId::new(solid_id, slot as u32),
            self.vertices[edge.a],
            self.vertices[edge.b],
        )
    }

    fn edge_length(&self, edge: &PolyEdge) -> f32 {
        (self.vertices[edge.b] - self.vertices[edge.a]).length()
    }

    fn face_key(&self, slot: usize) -> Vec<usize> {
        let mut key = self.faces[slot].vertices.clone();
        key.sort_unstable();
        key
    }

    /// Signed volume by the divergence theorem
    fn volume(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| {
                let points = self.face_points(face);
                let p0 = points[0];
                (1..points.len().saturating_sub(1))
                    .map(|i| p0.dot(points[i].cross(points[i + 1])))
                    .sum::<f32>()
            })
            .sum::<f32>()
            / 6.0
    }

    fn bounding_extent(&self) -> Vec3 {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for face in &self.faces {
            for &v in &face.vertices {
                min = min.min(self.vertices[v]);
                max = max.max(self.vertices[v]);
            }
        }
        if min.x > max.x { Vec3::ZERO } else { max - min }
    }
}

/// Reference kernel for planar-faced solids
pub struct PolyKernel {
    /// Storage for solid data (keyed by UUID)
    solids: Mutex<HashMap<Uuid, PolySolid>>,
}

impl PolyKernel {
    /// Create a new polyhedral kernel
    pub fn new() -> Self {
        Self {
            solids: Mutex::new(HashMap::new()),
        }
    }

    /// Number of solids currently held by the kernel
    pub fn solid_count(&self) -> usize {
        self.solids.lock().len()
    }

    /// Store a solid and return a Solid reference
    fn store_solid(&self, solid: PolySolid) -> Solid {
        let id = Uuid::new_v4();
        self.solids.lock().insert(id, solid);
        tracing::debug!("PolyKernel stored solid {}", id);
        Solid::new(id)
    }

    /// Get a copy of a stored solid
    fn load_solid(&self, solid: &Solid) -> CadResult<PolySolid> {
        self.solids
            .lock()
            .get(&solid.id)
            .cloned()
            .ok_or_else(|| CadError::EntityNotFound(format!("solid {}", solid.id)))
    }

    fn face_slot(solid: &Solid, poly: &PolySolid, face: FaceId) -> CadResult<usize> {
        let slot = face.index as usize;
        if face.solid_id != solid.id || slot >= poly.faces.len() {
            return Err(CadError::EntityNotFound(format!(
                "face {} of solid {}",
                face.index, face.solid_id
            )));
        }
        Ok(slot)
    }

    fn edge_slot(solid: &Solid, poly: &PolySolid, edge: EdgeId) -> CadResult<usize> {
        let slot = edge.index as usize;
        if edge.solid_id != solid.id || slot >= poly.edges.len() {
            return Err(CadError::EntityNotFound(format!(
                "edge {} of solid {}",
                edge.index, edge.solid_id
            )));
        }
        Ok(slot)
    }

    /// Store `poly` as a new solid whose topology matches `source` slot for slot
    fn store_with_identity_history(&self, source: &Solid, poly: PolySolid) -> KernelOutput {
        let (face_count, edge_count) = (poly.faces.len(), poly.edges.len());
        let solid = self.store_solid(poly);
        let history = ShapeHistory {
            faces: (0..face_count as u32)
                .map(|i| (FaceId::new(source.id, i), vec![FaceId::new(solid.id, i)]))
                .collect(),
            edges: (0..edge_count as u32)
                .map(|i| (EdgeId::new(source.id, i), vec![EdgeId::new(solid.id, i)]))
                .collect(),
        };
        KernelOutput { solid, history }
    }

    /// Shared implementation of edge dress-ups (fillet, chamfer)
    fn dress_edges(
        &self,
        solid: &Solid,
        edges: &[EdgeId],
        value: f32,
        kind: DressKind,
    ) -> CadResult<KernelOutput> {
        let label = match kind {
            DressKind::Fillet => "fillet radius",
            _ => "chamfer distance",
        };
        if edges.is_empty() {
            return Err(CadError::InvalidParameter(format!("{} needs edges", label)));
        }
        if !value.is_finite() || value <= EPSILON {
            return Err(CadError::InvalidParameter(format!(
                "{} must be positive, got {}",
                label, value
            )));
        }

        let mut poly = self.load_solid(solid)?;
        let mut slots = edges
            .iter()
            .map(|edge| Self::edge_slot(solid, &poly, *edge))
            .collect::<CadResult<Vec<_>>>()?;
        slots.sort_unstable();
        slots.dedup();

        for slot in slots {
            let edge = poly.edges[slot];
            let shortest = poly
                .edges
                .iter()
                .filter(|other| other.touches(&edge))
                .map(|other| poly.edge_length(other))
                .fold(f32::MAX, f32::min);
            if value >= shortest * 0.5 {
                return Err(CadError::EmptyResult(format!(
                    "{} {} too large for edge {}",
                    label, value, slot
                )));
            }
            poly.dressings.push(Dressing {
                kind,
                target: DressTarget::Edge(edge),
                value,
            });
        }

        Ok(self.store_with_identity_history(solid, poly))
    }

    fn check_wall_thickness(poly: &PolySolid, thickness: f32) -> CadResult<()> {
        if !thickness.is_finite() || thickness <= EPSILON {
            return Err(CadError::InvalidParameter(format!(
                "wall thickness must be positive, got {}",
                thickness
            )));
        }
        let extent = poly.bounding_extent();
        if thickness * 2.0 >= extent.min_element() {
            return Err(CadError::EmptyResult(format!(
                "wall thickness {} consumes the whole solid",
                thickness
            )));
        }
        Ok(())
    }

    /// Build a prism from a closed base polygon and a sweep vector
    fn prism(base: Vec<Vec3>, sweep: Vec3) -> CadResult<PolySolid> {
        if base.len() < 3 {
            return Err(CadError::InvalidProfile(
                "Profile must have at least 3 points".into(),
            ));
        }
        if sweep.length() <= EPSILON {
            return Err(CadError::InvalidParameter(
                "extrusion vector must be non-zero".into(),
            ));
        }

        let normal = newell_vector(&base);
        let along = normal.dot(sweep);
        if along.abs() <= EPSILON * normal.length().max(1.0) {
            return Err(CadError::InvalidProfile(
                "extrusion direction lies in the profile plane".into(),
            ));
        }

        // Orient the base so that its normal follows the sweep direction
        let base: Vec<Vec3> = if along > 0.0 {
            base
        } else {
            base.into_iter().rev().collect()
        };

        let n = base.len();
        let mut vertices = base.clone();
        vertices.extend(base.iter().map(|p| *p + sweep));

        let mut faces = Vec::with_capacity(n + 2);
        faces.push(PolyFace {
            vertices: (0..n).rev().collect(),
        });
        faces.push(PolyFace {
            vertices: (n..2 * n).collect(),
        });
        for i in 0..n {
            let j = (i + 1) % n;
            faces.push(PolyFace {
                vertices: vec![i, j, n + j, n + i],
            });
        }

        Ok(PolySolid::assemble(vertices, faces, Vec::new()))
    }
}

impl Default for PolyKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl CadKernel for PolyKernel {
    fn name(&self) -> &str {
        "poly"
    }

    fn retain_solids(&self, live: &HashSet<Uuid>) -> usize {
        let mut solids = self.solids.lock();
        let before = solids.len();
        solids.retain(|id, _| live.contains(id));
        let released = before - solids.len();
        if released > 0 {
            tracing::debug!("PolyKernel released {} solids", released);
        }
        released
    }

    fn extrude(
        &self,
        profile: &Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        direction: Vec3,
        distance: f32,
    ) -> CadResult<Solid> {
        if !profile.closed {
            return Err(CadError::InvalidProfile("Profile must be closed".into()));
        }
        let base = points_to_3d(&profile.points, plane_origin, plane_normal)?;
        let poly = Self::prism(base, direction.normalize_or_zero() * distance)?;
        Ok(self.store_solid(poly))
    }

    fn sweep(
        &self,
        profile: &Wire2D,
        plane_origin: Vec3,
        plane_normal: Vec3,
        path: &[Vec3],
    ) -> CadResult<Solid> {
        if path.len() != 2 {
            return Err(CadError::OperationFailed(
                "only straight sweep paths are supported".into(),
            ));
        }
        let base = points_to_3d(&profile.points, plane_origin, plane_normal)?;
        let poly = Self::prism(base, path[1] - path[0])?;
        Ok(self.store_solid(poly))
    }

    fn boolean(&self, a: &Solid, b: &Solid, op: BooleanType) -> CadResult<KernelOutput> {
        if op != BooleanType::Union {
            return Err(CadError::BooleanFailed(format!(
                "{:?} is not supported by the polyhedral kernel",
                op
            )));
        }
        let first = self.load_solid(a)?;
        let second = self.load_solid(b)?;

        // Lumps are merged side by side; overlaps are not resolved.
        let offset = first.vertices.len();
        let mut vertices = first.vertices.clone();
        vertices.extend(second.vertices.iter().copied());
        let mut faces = first.faces.clone();
        faces.extend(second.faces.iter().map(|face| PolyFace {
            vertices: face.vertices.iter().map(|v| v + offset).collect(),
        }));
        let mut dressings = first.dressings.clone();
        dressings.extend(second.dressings.iter().map(|d| Dressing {
            kind: d.kind,
            target: match &d.target {
                DressTarget::Body => DressTarget::Body,
                DressTarget::Edge(e) => DressTarget::Edge(PolyEdge::new(e.a + offset, e.b + offset)),
                DressTarget::Face(key) => DressTarget::Face(key.iter().map(|v| v + offset).collect()),
            },
            value: d.value,
        }));

        let merged = PolySolid::assemble(vertices, faces, dressings);
        let face_count = first.faces.len();

        let mut history = ShapeHistory::new();
        let mut edge_outputs: Vec<(EdgeId, PolyEdge)> = Vec::new();
        for (i, edge) in first.edges.iter().enumerate() {
            edge_outputs.push((EdgeId::new(a.id, i as u32), *edge));
        }
        for (i, edge) in second.edges.iter().enumerate() {
            edge_outputs.push((
                EdgeId::new(b.id, i as u32),
                PolyEdge::new(edge.a + offset, edge.b + offset),
            ));
        }
        let edge_slots: Vec<(EdgeId, Option<usize>)> = edge_outputs
            .iter()
            .map(|(input, edge)| (*input, merged.edge_slot(edge)))
            .collect();
        let merged_face_total = merged.faces.len();

        let solid = self.store_solid(merged);
        for i in 0..merged_face_total {
            let input = if i < face_count {
                FaceId::new(a.id, i as u32)
            } else {
                FaceId::new(b.id, (i - face_count) as u32)
            };
            history.faces.push((input, vec![FaceId::new(solid.id, i as u32)]));
        }
        for (input, slot) in edge_slots {
            let outputs = slot
                .map(|s| vec![EdgeId::new(solid.id, s as u32)])
                .unwrap_or_default();
            history.edges.push((input, outputs));
        }

        Ok(KernelOutput { solid, history })
    }

    fn tessellate(&self, solid: &Solid, _tolerance: f32) -> CadResult<TessellatedMesh> {
        let poly = self.load_solid(solid)?;
        let mut mesh = TessellatedMesh::new();
        for face in &poly.faces {
            let points = poly.face_points(face);
            let normal = newell_vector(&points).normalize_or_zero();
            let base = mesh.vertices.len() as u32;
            for p in &points {
                mesh.vertices.push(p.to_array());
                mesh.normals.push(normal.to_array());
            }
            for i in 1..points.len().saturating_sub(1) as u32 {
                mesh.indices.extend_from_slice(&[base, base + i, base + i + 1]);
            }
        }
        if mesh.is_empty() {
            return Err(CadError::TessellationFailed("solid has no faces".into()));
        }
        Ok(mesh)
    }

    fn create_box(&self, center: Vec3, size: Vec3) -> CadResult<Solid> {
        if size.min_element() <= EPSILON {
            return Err(CadError::InvalidParameter(format!(
                "box size must be positive, got {}",
                size
            )));
        }
        let min = center - size * 0.5;
        let max = center + size * 0.5;
        let vertices = vec![
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(min.x, max.y, max.z),
        ];
        // bottom, top, front, back, left, right
        let loops: [[usize; 4]; 6] = [
            [0, 3, 2, 1],
            [4, 5, 6, 7],
            [0, 1, 5, 4],
            [2, 3, 7, 6],
            [0, 4, 7, 3],
            [1, 2, 6, 5],
        ];
        let faces = loops
            .iter()
            .map(|l| PolyFace {
                vertices: l.to_vec(),
            })
            .collect();
        Ok(self.store_solid(PolySolid::assemble(vertices, faces, Vec::new())))
    }

    fn get_edges(&self, solid: &Solid) -> CadResult<Vec<EdgeInfo>> {
        let poly = self.load_solid(solid)?;
        Ok((0..poly.edges.len())
            .map(|slot| poly.edge_info(solid.id, slot))
            .collect())
    }

    fn get_faces(&self, solid: &Solid) -> CadResult<Vec<FaceInfo>> {
        let poly = self.load_solid(solid)?;
        Ok((0..poly.faces.len())
            .map(|slot| poly.face_info(solid.id, slot))
            .collect())
    }

    fn face_edges(&self, solid: &Solid, face: FaceId) -> CadResult<Vec<EdgeId>> {
        let poly = self.load_solid(solid)?;
        let slot = Self::face_slot(solid, &poly, face)?;
        let loop_vertices = &poly.faces[slot].vertices;
        let n = loop_vertices.len();
        (0..n)
            .map(|i| {
                let edge = PolyEdge::new(loop_vertices[i], loop_vertices[(i + 1) % n]);
                poly.edge_slot(&edge)
                    .map(|s| EdgeId::new(solid.id, s as u32))
                    .ok_or_else(|| CadError::OperationFailed("face loop edge missing".into()))
            })
            .collect()
    }

    fn export_brep(&self, solid: &Solid) -> CadResult<Vec<u8>> {
        let poly = self.load_solid(solid)?;
        let mut bytes = b"RKPOLY1\n".to_vec();
        bytes.extend_from_slice(&(poly.vertices.len() as u32).to_le_bytes());
        for v in &poly.vertices {
            for c in v.to_array() {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        bytes.extend_from_slice(&(poly.faces.len() as u32).to_le_bytes());
        for face in &poly.faces {
            bytes.extend_from_slice(&(face.vertices.len() as u32).to_le_bytes());
            for &v in &face.vertices {
                bytes.extend_from_slice(&(v as u32).to_le_bytes());
            }
        }
        bytes.extend_from_slice(&(poly.dressings.len() as u32).to_le_bytes());
        for dressing in &poly.dressings {
            bytes.push(dressing.kind as u8);
            match &dressing.target {
                DressTarget::Body => bytes.push(0),
                DressTarget::Edge(edge) => {
                    bytes.push(1);
                    bytes.extend_from_slice(&(edge.a as u32).to_le_bytes());
                    bytes.extend_from_slice(&(edge.b as u32).to_le_bytes());
                }
                DressTarget::Face(key) => {
                    bytes.push(2);
                    bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    for &v in key {
                        bytes.extend_from_slice(&(v as u32).to_le_bytes());
                    }
                }
            }
            bytes.extend_from_slice(&dressing.value.to_le_bytes());
        }
        Ok(bytes)
    }

    fn push_pull(&self, solid: &Solid, face: FaceId, distance: f32) -> CadResult<KernelOutput> {
        if !distance.is_finite() || distance.abs() <= EPSILON {
            return Err(CadError::InvalidParameter(format!(
                "push-pull distance must be non-zero, got {}",
                distance
            )));
        }
        let mut poly = self.load_solid(solid)?;
        let slot = Self::face_slot(solid, &poly, face)?;
        let normal = poly.face_info(solid.id, slot).normal;
        let offset = normal * distance;
        for v in poly.faces[slot].vertices.clone() {
            poly.vertices[v] += offset;
        }

        let collapsed = poly
            .faces
            .iter()
            .any(|f| newell_vector(&poly.face_points(f)).length() * 0.5 <= EPSILON);
        if collapsed || poly.volume() <= EPSILON {
            return Err(CadError::EmptyResult(
                "push-pull collapses the solid".into(),
            ));
        }

        Ok(self.store_with_identity_history(solid, poly))
    }

    fn fillet(&self, solid: &Solid, edges: &[EdgeId], radius: f32) -> CadResult<KernelOutput> {
        self.dress_edges(solid, edges, radius, DressKind::Fillet)
    }

    fn chamfer(&self, solid: &Solid, edges: &[EdgeId], distance: f32) -> CadResult<KernelOutput> {
        self.dress_edges(solid, edges, distance, DressKind::Chamfer)
    }

    fn shell(
        &self,
        solid: &Solid,
        thickness: f32,
        faces_to_remove: &[FaceId],
    ) -> CadResult<KernelOutput> {
        let poly = self.load_solid(solid)?;
        Self::check_wall_thickness(&poly, thickness)?;
        let removed = faces_to_remove
            .iter()
            .map(|face| Self::face_slot(solid, &poly, *face))
            .collect::<CadResult<Vec<_>>>()?;
        if removed.len() >= poly.faces.len() {
            return Err(CadError::EmptyResult("shell removes every face".into()));
        }

        let removed_keys: Vec<Vec<usize>> = removed.iter().map(|&s| poly.face_key(s)).collect();
        let kept: Vec<usize> = (0..poly.faces.len()).filter(|s| !removed.contains(s)).collect();
        let faces = kept.iter().map(|&s| poly.faces[s].clone()).collect();
        let mut dressings: Vec<Dressing> = poly
            .dressings
            .iter()
            .filter(|d| !matches!(&d.target, DressTarget::Face(key) if removed_keys.contains(key)))
            .cloned()
            .collect();
        dressings.push(Dressing {
            kind: DressKind::Shell,
            target: DressTarget::Body,
            value: thickness,
        });

        let shelled = PolySolid::assemble(poly.vertices.clone(), faces, dressings);
        let edge_slots: Vec<Option<usize>> =
            poly.edges.iter().map(|e| shelled.edge_slot(e)).collect();
        let output = self.store_solid(shelled);

        let mut history = ShapeHistory::new();
        for slot in 0..poly.faces.len() {
            let outputs = kept
                .iter()
                .position(|&k| k == slot)
                .map(|new| vec![FaceId::new(output.id, new as u32)])
                .unwrap_or_default();
            history.faces.push((FaceId::new(solid.id, slot as u32), outputs));
        }
        for (slot, new) in edge_slots.into_iter().enumerate() {
            let outputs = new
                .map(|n| vec![EdgeId::new(output.id, n as u32)])
                .unwrap_or_default();
            history.edges.push((EdgeId::new(solid.id, slot as u32), outputs));
        }

        Ok(KernelOutput {
            solid: output,
            history,
        })
    }

    fn hollow(&self, solid: &Solid, thickness: f32) -> CadResult<KernelOutput> {
        let mut poly = self.load_solid(solid)?;
        Self::check_wall_thickness(&poly, thickness)?;
        poly.dressings.push(Dressing {
            kind: DressKind::Hollow,
            target: DressTarget::Body,
            value: thickness,
        });
        Ok(self.store_with_identity_history(solid, poly))
    }

    fn draft(
        &self,
        solid: &Solid,
        faces: &[FaceId],
        angle: f32,
        pull_direction: Vec3,
    ) -> CadResult<KernelOutput> {
        if faces.is_empty() {
            return Err(CadError::InvalidParameter("draft needs faces".into()));
        }
        if !angle.is_finite() || angle.abs() >= MAX_DRAFT_ANGLE {
            return Err(CadError::InvalidParameter(format!(
                "draft angle {} out of range",
                angle
            )));
        }
        if pull_direction.length() <= EPSILON {
            return Err(CadError::InvalidParameter(
                "pull direction must be non-zero".into(),
            ));
        }
        let mut poly = self.load_solid(solid)?;
        let pull = pull_direction.normalize();
        for face in faces {
            let slot = Self::face_slot(solid, &poly, *face)?;
            let normal = poly.face_info(solid.id, slot).normal;
            if normal.dot(pull).abs() > 1.0 - 1e-4 {
                return Err(CadError::OperationFailed(format!(
                    "face {} is perpendicular to the pull direction",
                    slot
                )));
            }
            let key = poly.face_key(slot);
            poly.dressings.push(Dressing {
                kind: DressKind::Draft,
                target: DressTarget::Face(key),
                value: angle,
            });
        }
        Ok(self.store_with_identity_history(solid, poly))
    }

    fn hole(
        &self,
        solid: &Solid,
        face: FaceId,
        center: Vec3,
        diameter: f32,
        depth: f32,
    ) -> CadResult<KernelOutput> {
        if !diameter.is_finite() || diameter <= EPSILON || !depth.is_finite() || depth <= EPSILON {
            return Err(CadError::InvalidParameter(format!(
                "hole needs positive diameter and depth, got {} x {}",
                diameter, depth
            )));
        }
        let mut poly = self.load_solid(solid)?;
        let slot = Self::face_slot(solid, &poly, face)?;
        let info = poly.face_info(solid.id, slot);
        let points = poly.face_points(&poly.faces[slot]);

        let projected = center - info.normal * (center - info.center).dot(info.normal);
        let (flat, flat_points) = flatten(projected, &points, info.normal);
        if !point_in_polygon(flat, &flat_points) {
            return Err(CadError::EmptyResult("hole center misses the face".into()));
        }
        if distance_to_boundary(flat, &flat_points) < diameter * 0.5 {
            return Err(CadError::EmptyResult(
                "hole breaks through the face boundary".into(),
            ));
        }

        let key = poly.face_key(slot);
        poly.dressings.push(Dressing {
            kind: DressKind::Hole,
            target: DressTarget::Face(key),
            value: diameter,
        });
        Ok(self.store_with_identity_history(solid, poly))
    }

    fn texture(&self, solid: &Solid, faces: &[FaceId], depth: f32) -> CadResult<KernelOutput> {
        if faces.is_empty() {
            return Err(CadError::InvalidParameter("texture needs faces".into()));
        }
        if !depth.is_finite() || depth <= EPSILON {
            return Err(CadError::InvalidParameter(format!(
                "texture depth must be positive, got {}",
                depth
            )));
        }
        let mut poly = self.load_solid(solid)?;
        for face in faces {
            let slot = Self::face_slot(solid, &poly, *face)?;
            let key = poly.face_key(slot);
            poly.dressings.push(Dressing {
                kind: DressKind::Texture,
                target: DressTarget::Face(key),
                value: depth,
            });
        }
        Ok(self.store_with_identity_history(solid, poly))
    }
}

/// Convert 2D profile points to 3D points on a plane
fn points_to_3d(points: &[Vec2], plane_origin: Vec3, plane_normal: Vec3) -> CadResult<Vec<Vec3>> {
    let normal = plane_normal.try_normalize().ok_or_else(|| {
        CadError::InvalidProfile("sketch plane normal must be non-zero".into())
    })?;

    let up = if normal.z.abs() < 0.9 { Vec3::Z } else { Vec3::X };
    let u = normal.cross(up).normalize();
    let v = normal.cross(u);

    Ok(points
        .iter()
        .map(|p| plane_origin + u * p.x + v * p.y)
        .collect())
}

/// Newell's method; the result has length twice the polygon area
fn newell_vector(points: &[Vec3]) -> Vec3 {
    let n = points.len();
    let mut normal = Vec3::ZERO;
    for i in 0..n {
        let curr = points[i];
        let next = points[(i + 1) % n];
        normal.x += (curr.y - next.y) * (curr.z + next.z);
        normal.y += (curr.z - next.z) * (curr.x + next.x);
        normal.z += (curr.x - next.x) * (curr.y + next.y);
    }
    normal
}

/// Area-weighted centroid of a planar polygon
fn polygon_centroid(points: &[Vec3]) -> Vec3 {
    let average = points.iter().copied().sum::<Vec3>() / points.len().max(1) as f32;
    let p0 = points[0];
    let mut weighted = Vec3::ZERO;
    let mut total = 0.0;
    for i in 1..points.len().saturating_sub(1) {
        let area = (points[i] - p0).cross(points[i + 1] - p0).length() * 0.5;
        weighted += (p0 + points[i] + points[i + 1]) / 3.0 * area;
        total += area;
    }
    if total <= EPSILON { average } else { weighted / total }
}

/// Project a point and a polygon onto the plane's dominant axes
fn flatten(point: Vec3, polygon: &[Vec3], normal: Vec3) -> (Vec2, Vec<Vec2>) {
    let abs = normal.abs();
    let drop = |p: Vec3| {
        if abs.x >= abs.y && abs.x >= abs.z {
            Vec2::new(p.y, p.z)
        } else if abs.y >= abs.z {
            Vec2::new(p.x, p.z)
        } else {
            Vec2::new(p.x, p.y)
        }
    };
    (drop(point), polygon.iter().map(|p| drop(*p)).collect())
}

/// Even-odd point containment test
fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn distance_to_boundary(point: Vec2, polygon: &[Vec2]) -> f32 {
    let n = polygon.len();
    (0..n)
        .map(|i| {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            let ab = b - a;
            let t = ((point - a).dot(ab) / ab.length_squared().max(EPSILON)).clamp(0.0, 1.0);
            (a + ab * t - point).length()
        })
        .fold(f32::MAX, f32::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box(kernel: &PolyKernel) -> Solid {
        kernel
            .create_box(Vec3::new(5.0, 5.0, 5.0), Vec3::splat(10.0))
            .unwrap()
    }

    #[test]
    fn test_box_topology() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);

        let faces = kernel.get_faces(&solid).unwrap();
        let edges = kernel.get_edges(&solid).unwrap();
        assert_eq!(faces.len(), 6);
        assert_eq!(edges.len(), 12);

        for face in &faces {
            assert_relative_eq!(face.area, 100.0, epsilon = 1e-3);
            assert_eq!(kernel.face_edges(&solid, face.id).unwrap().len(), 4);
        }
        // bottom face points down, top face up
        assert_relative_eq!(faces[0].normal.z, -1.0, epsilon = 1e-6);
        assert_relative_eq!(faces[1].normal.z, 1.0, epsilon = 1e-6);
        assert_relative_eq!(faces[1].center.z, 10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_box_volume_is_positive() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let poly = kernel.load_solid(&solid).unwrap();
        assert_relative_eq!(poly.volume(), 1000.0, epsilon = 1e-2);
    }

    #[test]
    fn test_retain_solids_drops_the_rest() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let edges = kernel.get_edges(&solid).unwrap();
        let out = kernel.fillet(&solid, &[edges[0].id], 1.0).unwrap();
        assert_eq!(kernel.solid_count(), 2);

        let live: HashSet<Uuid> = [out.solid.id].into_iter().collect();
        assert_eq!(kernel.retain_solids(&live), 1);
        assert_eq!(kernel.solid_count(), 1);
        assert!(kernel.get_faces(&out.solid).is_ok());
        assert!(matches!(
            kernel.get_faces(&solid),
            Err(CadError::EntityNotFound(_))
        ));
    }

    #[test]
    fn test_every_operation_issues_fresh_handles() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let edges = kernel.get_edges(&solid).unwrap();

        let out = kernel.fillet(&solid, &[edges[0].id], 1.0).unwrap();
        assert_ne!(out.solid.id, solid.id);
        let new_edges = kernel.get_edges(&out.solid).unwrap();
        assert_eq!(new_edges.len(), 12);
        assert!(new_edges.iter().all(|e| e.id.solid_id == out.solid.id));
        assert_eq!(out.history.modified_edges(edges[0].id), &[new_edges[0].id]);
    }

    #[test]
    fn test_export_ignores_handles() {
        let kernel = PolyKernel::new();
        let a = unit_box(&kernel);
        let b = unit_box(&kernel);
        assert_eq!(kernel.export_brep(&a).unwrap(), kernel.export_brep(&b).unwrap());

        let edges = kernel.get_edges(&a).unwrap();
        let filleted = kernel.fillet(&a, &[edges[0].id], 1.0).unwrap();
        assert_ne!(
            kernel.export_brep(&a).unwrap(),
            kernel.export_brep(&filleted.solid).unwrap()
        );
    }

    #[test]
    fn test_fillet_radius_too_large() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let edges = kernel.get_edges(&solid).unwrap();

        let result = kernel.fillet(&solid, &[edges[0].id], 6.0);
        assert!(matches!(result, Err(CadError::EmptyResult(_))));
        let result = kernel.chamfer(&solid, &[edges[0].id], -1.0);
        assert!(matches!(result, Err(CadError::InvalidParameter(_))));
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let kernel = PolyKernel::new();
        let a = unit_box(&kernel);
        let b = unit_box(&kernel);
        let edges = kernel.get_edges(&a).unwrap();
        let result = kernel.fillet(&b, &[edges[0].id], 1.0);
        assert!(matches!(result, Err(CadError::EntityNotFound(_))));
    }

    #[test]
    fn test_shell_removes_face_and_tracks_history() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let faces = kernel.get_faces(&solid).unwrap();

        let out = kernel.shell(&solid, 1.0, &[faces[1].id]).unwrap();
        let new_faces = kernel.get_faces(&out.solid).unwrap();
        assert_eq!(new_faces.len(), 5);
        assert!(out.history.modified_faces(faces[1].id).is_empty());
        // front face moves up one slot
        assert_eq!(out.history.modified_faces(faces[2].id), &[new_faces[1].id]);
        // no edge disappears: every box edge still bounds a kept face
        assert_eq!(kernel.get_edges(&out.solid).unwrap().len(), 12);
    }

    #[test]
    fn test_shell_too_thick() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let result = kernel.shell(&solid, 5.0, &[]);
        assert!(matches!(result, Err(CadError::EmptyResult(_))));
    }

    #[test]
    fn test_push_pull_moves_face() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let faces = kernel.get_faces(&solid).unwrap();

        let out = kernel.push_pull(&solid, faces[1].id, 5.0).unwrap();
        let moved = kernel.get_faces(&out.solid).unwrap();
        assert_relative_eq!(moved[1].center.z, 15.0, epsilon = 1e-4);
        assert_relative_eq!(moved[2].area, 150.0, epsilon = 1e-2);

        let collapse = kernel.push_pull(&solid, faces[1].id, -10.0);
        assert!(matches!(collapse, Err(CadError::EmptyResult(_))));
    }

    #[test]
    fn test_hole_must_hit_face() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let faces = kernel.get_faces(&solid).unwrap();
        let top = faces[1].id;

        assert!(kernel
            .hole(&solid, top, Vec3::new(5.0, 5.0, 10.0), 2.0, 3.0)
            .is_ok());
        let miss = kernel.hole(&solid, top, Vec3::new(50.0, 5.0, 10.0), 2.0, 3.0);
        assert!(matches!(miss, Err(CadError::EmptyResult(_))));
        let breaks = kernel.hole(&solid, top, Vec3::new(9.5, 5.0, 10.0), 2.0, 3.0);
        assert!(matches!(breaks, Err(CadError::EmptyResult(_))));
    }

    #[test]
    fn test_extrude_triangle() {
        let kernel = PolyKernel::new();
        let profile = Wire2D::new(
            vec![Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), Vec2::new(1.5, 2.0)],
            true,
        );
        let solid = kernel
            .extrude(&profile, Vec3::ZERO, Vec3::Z, Vec3::Z, 4.0)
            .unwrap();
        assert_eq!(kernel.get_faces(&solid).unwrap().len(), 5);
        assert_eq!(kernel.get_edges(&solid).unwrap().len(), 9);
        let poly = kernel.load_solid(&solid).unwrap();
        assert_relative_eq!(poly.volume(), 12.0, epsilon = 1e-3);
    }

    #[test]
    fn test_extrude_in_plane_direction_fails() {
        let kernel = PolyKernel::new();
        let profile = Wire2D::rectangle(Vec2::ZERO, 2.0, 2.0);
        let result = kernel.extrude(&profile, Vec3::ZERO, Vec3::Z, Vec3::X, 4.0);
        assert!(matches!(result, Err(CadError::InvalidProfile(_))));
    }

    #[test]
    fn test_sweep_and_union() {
        let kernel = PolyKernel::new();
        let body = unit_box(&kernel);
        let profile = Wire2D::rectangle(Vec2::ZERO, 1.0, 1.0);
        let tool = kernel
            .sweep(
                &profile,
                Vec3::new(20.0, 0.0, 0.0),
                Vec3::Z,
                &[Vec3::ZERO, Vec3::new(0.0, 0.0, 3.0)],
            )
            .unwrap();

        let out = kernel.boolean(&body, &tool, BooleanType::Union).unwrap();
        assert_eq!(kernel.get_faces(&out.solid).unwrap().len(), 12);
        assert_eq!(out.history.faces.len(), 12);
        assert!(kernel.boolean(&body, &tool, BooleanType::Subtract).is_err());
    }

    #[test]
    fn test_tessellate_box() {
        let kernel = PolyKernel::new();
        let solid = unit_box(&kernel);
        let mesh = kernel.tessellate(&solid, 0.1).unwrap();
        assert_eq!(mesh.triangle_count(), 12);
    }
}
