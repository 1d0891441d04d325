//! CAD Kernel Abstraction
//!
//! This crate provides:
//! - The CAD kernel trait consumed by the naming layer
//! - Transient face/edge handles and the entity descriptors kernels report
//! - Kernel history (input handle → output handles) for modifying operations
//! - A polyhedral reference kernel for planar-faced solids

pub mod kernel;

// Re-exports for convenience
pub use kernel::{
    BooleanType, CadError, CadKernel, CadResult, CurveKind, EdgeId, EdgeInfo, EntityRef, FaceId,
    FaceInfo, KernelOutput, NullKernel, PolyKernel, ShapeHistory, Solid, SurfaceKind,
    TessellatedMesh, Wire2D,
};
