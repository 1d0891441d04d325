//! Persistent Topological Naming
//!
//! Feature references to faces and edges survive rebuilds even though the
//! kernel hands out new transient handles every time.
//!
//! # Architecture
//!
//! - [`indexer::TopologyIndex`] - Canonical, deterministic ordering of faces and edges
//! - [`selector::GeometricSelector`] - Geometric signature used to find an entity again
//! - [`naming::ShapeNamingService`] - Registry of persistent [`shape_id::ShapeId`]s and kernel history
//! - [`resolve::ReferenceResolver`] - Reconciles stored indices, ShapeIDs and selectors
//! - [`cache::ResultCache`] - Identity-keyed LRU cache of kernel results
//! - [`transaction::Transaction`] - Snapshot/commit/rollback around body mutations
//! - [`validator::RollbackValidator`] - Consistency checks and orphan sweep after rollback
//!
//! # Module Structure
//!
//! ```text
//! rk-naming/
//! ├── shape_id.rs      # ShapeId, FeatureId, fingerprints
//! ├── indexer.rs       # Topology indexer
//! ├── selector.rs      # Geometric selectors and scoring
//! ├── naming.rs        # Shape naming service
//! ├── resolve.rs       # Reference resolution policy
//! ├── feature.rs       # Feature model and status
//! ├── body.rs          # Bodies and generations
//! ├── dependency.rs    # Feature dependency graph
//! ├── cache.rs         # Result cache
//! ├── rebuild.rs       # Rebuild pipeline
//! ├── health.rs        # Reference diagnostics
//! ├── document.rs      # Documents and atomic edits
//! ├── transaction.rs   # Transactions
//! ├── validator.rs     # Rollback validation
//! ├── project.rs       # Project files
//! ├── config.rs        # Configuration
//! └── error.rs         # Error types
//! ```

pub mod body;
pub mod cache;
pub mod config;
pub mod dependency;
pub mod document;
pub mod error;
pub mod feature;
pub mod health;
pub mod indexer;
pub mod naming;
pub mod project;
pub mod rebuild;
pub mod resolve;
pub mod selector;
pub mod shape_id;
pub mod transaction;
pub mod validator;

// Re-exports for convenience
pub use body::{Body, BodyGeneration};
pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use config::NamingConfig;
pub use dependency::DependencyGraph;
pub use document::{Document, EditOutcome};
pub use error::{NamingError, NamingResult, OperationOutcome, RollbackError};
pub use feature::{
    Feature, FeatureOp, FeatureStatus, StatusCode, StatusLevel, TopologyReferences,
};
pub use health::{FeatureHealth, HealthReport, HealthStatus, ReferenceHealth};
pub use indexer::{Entity, TopologyIndex};
pub use naming::{
    NamingSavepoint, OperationRecord, ResolutionMethod, ShapeNamingService, ShapeRecord,
};
pub use project::{Project, ProjectBody};
pub use rebuild::{RebuildContext, RebuildReport, rebuild_body};
pub use resolve::{
    FailureCategory, FailureNotice, ReferenceResolver, ReferenceSet, ResolvedReferences,
};
pub use selector::{EdgeSelector, FaceSelector, GeometricSelector};
pub use shape_id::{FeatureId, ShapeId, ShapeKind};
pub use transaction::{
    BatchOutcome, BatchTransaction, Transaction, TransactionOutcome, TransactionState, atomic,
    batch,
};
pub use validator::{
    OrphanInfo, OrphanKind, RollbackReport, RollbackState, RollbackValidator, Severity,
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use glam::Vec3;
    use rk_cad::PolyKernel;
    use uuid::Uuid;

    use crate::document::Document;
    use crate::feature::Feature;

    /// Route `tracing` output to the test harness, honoring `RUST_LOG`
    pub fn init_tracing() {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "rk_naming=warn,rk_cad=warn".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    }

    /// A document holding one body built from a 10x10x10 box spanning the origin to (10, 10, 10)
    pub fn box_document() -> (Document, Uuid) {
        init_tracing();
        let mut doc = Document::new(Arc::new(PolyKernel::new()));
        let body_id = doc.add_body("Body");
        let outcome = doc
            .add_feature(
                body_id,
                Feature::block("Box", Vec3::splat(5.0), Vec3::splat(10.0)).with_id("Box"),
            )
            .expect("box feature");
        assert!(outcome.is_applied());
        (doc, body_id)
    }
}
