//! Transactions
//!
//! A transaction snapshots one body before a mutation: its generation, its
//! identity registry and the document's dependency graph. Rollback puts all
//! three back and then validates the result against the state captured at
//! snapshot time. A transaction dropped without commit rolls back.

use uuid::Uuid;

use crate::dependency::DependencyGraph;
use crate::document::Document;
use crate::error::{NamingError, NamingResult, RollbackError};
use crate::naming::NamingSavepoint;
use crate::validator::{RollbackReport, RollbackState, RollbackValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Snapshotted,
    Committed,
    RolledBack,
}

/// Result of [`atomic`]
#[derive(Debug, Clone)]
pub enum TransactionOutcome<T> {
    Committed(T),
    /// The closure raised a [`RollbackError`] and the body was restored
    RolledBack {
        error: RollbackError,
        report: RollbackReport,
    },
}

impl<T> TransactionOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed(_))
    }
}

// ============== Savepoints ==============

#[derive(Debug)]
struct Savepoint {
    generation: u64,
    naming: NamingSavepoint,
    dependencies: DependencyGraph,
    before: Option<RollbackState>,
}

impl Savepoint {
    /// Capture the state of a body and open a new generation on it
    fn take(doc: &mut Document, body_id: Uuid) -> NamingResult<Self> {
        let generation = doc.require_body(body_id)?.generation_id();
        let before = if doc.config().validate_after_rollback {
            Some(RollbackState::capture(doc, body_id)?)
        } else {
            None
        };
        let savepoint = Self {
            generation,
            naming: doc.naming().savepoint(body_id),
            dependencies: doc.dependencies().clone(),
            before,
        };
        doc.require_body_mut(body_id)?.begin_generation();
        Ok(savepoint)
    }

    /// Put the body, registry and graph back, returning the captured state
    fn restore(self, doc: &mut Document, body_id: Uuid) -> Option<RollbackState> {
        match doc.body_mut(body_id) {
            Some(body) => {
                if !body.rollback_to(self.generation) {
                    tracing::warn!(
                        "Generation {} of body {} is gone, keeping current state",
                        self.generation,
                        body_id
                    );
                }
            }
            None => tracing::warn!("Body {} disappeared during the transaction", body_id),
        }
        doc.naming().restore(self.naming);
        *doc.dependencies_mut() = self.dependencies;
        self.before
    }
}

fn prune(doc: &mut Document, body_id: Uuid) {
    let max = doc.config().max_generations;
    if let Some(body) = doc.body_mut(body_id) {
        body.prune(max);
    }
}

// ============== Transaction ==============

/// Snapshot/commit/rollback guard around one body
pub struct Transaction<'a> {
    doc: &'a mut Document,
    body_id: Uuid,
    state: TransactionState,
    savepoint: Option<Savepoint>,
}

impl<'a> Transaction<'a> {
    pub fn new(doc: &'a mut Document, body_id: Uuid) -> Self {
        Self {
            doc,
            body_id,
            state: TransactionState::Idle,
            savepoint: None,
        }
    }

    /// Create a transaction and snapshot the body
    pub fn begin(doc: &'a mut Document, body_id: Uuid) -> NamingResult<Self> {
        let mut tx = Self::new(doc, body_id);
        tx.snapshot()?;
        Ok(tx)
    }

    pub fn snapshot(&mut self) -> NamingResult<()> {
        if self.state != TransactionState::Idle {
            return Err(NamingError::Transaction(format!(
                "cannot snapshot a transaction in state {:?}",
                self.state
            )));
        }
        self.savepoint = Some(Savepoint::take(self.doc, self.body_id)?);
        self.state = TransactionState::Snapshotted;
        tracing::debug!("Snapshotted body {}", self.body_id);
        Ok(())
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn body_id(&self) -> Uuid {
        self.body_id
    }

    pub fn document(&self) -> &Document {
        &*self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut *self.doc
    }

    /// Keep the changes and discard the savepoint
    pub fn commit(mut self) -> NamingResult<()> {
        if self.state != TransactionState::Snapshotted {
            return Err(NamingError::Transaction(format!(
                "cannot commit a transaction in state {:?}",
                self.state
            )));
        }
        self.savepoint = None;
        self.state = TransactionState::Committed;
        prune(self.doc, self.body_id);
        tracing::debug!("Committed body {}", self.body_id);
        Ok(())
    }

    /// Restore the snapshot and validate the result
    pub fn rollback(mut self) -> RollbackReport {
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> RollbackReport {
        let Some(savepoint) = self.savepoint.take() else {
            return RollbackReport {
                body_id: self.body_id,
                consistent: true,
                ..RollbackReport::default()
            };
        };
        self.state = TransactionState::RolledBack;
        let before = savepoint.restore(self.doc, self.body_id);
        let report = RollbackValidator::validate(self.doc, self.body_id, before.as_ref());
        tracing::info!("Rolled back body {}", self.body_id);
        report
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Snapshotted {
            tracing::warn!("Transaction on body {} dropped without commit", self.body_id);
            self.rollback_in_place();
        }
    }
}

/// Run `f` atomically on one body
///
/// A [`NamingError::Rollback`] raised by `f` rolls back and is reported as
/// [`TransactionOutcome::RolledBack`]. Any other error rolls back and is
/// returned.
pub fn atomic<T>(
    doc: &mut Document,
    body_id: Uuid,
    f: impl FnOnce(&mut Document) -> NamingResult<T>,
) -> NamingResult<TransactionOutcome<T>> {
    let mut tx = Transaction::begin(doc, body_id)?;
    match f(tx.document_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(TransactionOutcome::Committed(value))
        }
        Err(NamingError::Rollback(error)) => {
            tracing::info!("Rolling back body {}: {}", body_id, error);
            let report = tx.rollback();
            Ok(TransactionOutcome::RolledBack { error, report })
        }
        Err(e) => {
            tx.rollback();
            Err(e)
        }
    }
}

// ============== Batch ==============

/// Result of [`batch`]
#[derive(Debug, Clone)]
pub enum BatchOutcome<T> {
    Committed(T),
    RolledBack {
        error: RollbackError,
        /// One report per body, in rollback order
        reports: Vec<(Uuid, RollbackReport)>,
    },
}

/// Transaction spanning several bodies
///
/// Enter every body before mutating any of them. Rollback restores the
/// bodies in reverse entry order, then validates each one.
pub struct BatchTransaction<'a> {
    doc: &'a mut Document,
    entries: Vec<(Uuid, Savepoint)>,
    state: TransactionState,
}

impl<'a> BatchTransaction<'a> {
    pub fn new(doc: &'a mut Document) -> Self {
        Self {
            doc,
            entries: Vec::new(),
            state: TransactionState::Idle,
        }
    }

    /// Snapshot a body; entering a body twice is a no-op
    pub fn enter(&mut self, body_id: Uuid) -> NamingResult<()> {
        match self.state {
            TransactionState::Idle | TransactionState::Snapshotted => {}
            state => {
                return Err(NamingError::Transaction(format!(
                    "cannot enter a batch in state {:?}",
                    state
                )));
            }
        }
        if self.entries.iter().any(|(id, _)| *id == body_id) {
            return Ok(());
        }
        let savepoint = Savepoint::take(self.doc, body_id)?;
        self.entries.push((body_id, savepoint));
        self.state = TransactionState::Snapshotted;
        Ok(())
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn body_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut *self.doc
    }

    pub fn commit(mut self) -> NamingResult<()> {
        if self.state != TransactionState::Snapshotted {
            return Err(NamingError::Transaction(format!(
                "cannot commit a batch in state {:?}",
                self.state
            )));
        }
        for (body_id, _) in std::mem::take(&mut self.entries) {
            prune(self.doc, body_id);
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn rollback(mut self) -> Vec<(Uuid, RollbackReport)> {
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> Vec<(Uuid, RollbackReport)> {
        self.state = TransactionState::RolledBack;
        let mut restored = Vec::with_capacity(self.entries.len());
        for (body_id, savepoint) in std::mem::take(&mut self.entries).into_iter().rev() {
            let before = savepoint.restore(self.doc, body_id);
            restored.push((body_id, before));
        }
        restored
            .into_iter()
            .map(|(body_id, before)| {
                let report = RollbackValidator::validate(self.doc, body_id, before.as_ref());
                (body_id, report)
            })
            .collect()
    }
}

impl Drop for BatchTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Snapshotted {
            tracing::warn!("Batch over {} bodies dropped without commit", self.entries.len());
            self.rollback_in_place();
        }
    }
}

/// Run `f` atomically over several bodies
pub fn batch<T>(
    doc: &mut Document,
    body_ids: &[Uuid],
    f: impl FnOnce(&mut Document) -> NamingResult<T>,
) -> NamingResult<BatchOutcome<T>> {
    let mut tx = BatchTransaction::new(doc);
    for &body_id in body_ids {
        tx.enter(body_id)?;
    }
    match f(tx.document_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(BatchOutcome::Committed(value))
        }
        Err(NamingError::Rollback(error)) => {
            tracing::info!("Rolling back batch: {}", error);
            let reports = tx.rollback();
            Ok(BatchOutcome::RolledBack { error, reports })
        }
        Err(e) => {
            tx.rollback();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::resolve::ReferenceSet;
    use crate::shape_id::FeatureId;
    use crate::test_support::box_document;
    use crate::validator::OrphanKind;
    use glam::Vec3;

    fn fillet() -> Feature {
        Feature::fillet("Fillet", ReferenceSet::from_indices([0, 1]), 1.0).with_id("Fillet")
    }

    #[test]
    fn test_rollback_restores_state() {
        let (mut doc, body_id) = box_document();
        let before = doc.rollback_state(body_id).unwrap();
        let generation = doc.body(body_id).unwrap().generation_id();

        let mut tx = Transaction::begin(&mut doc, body_id).unwrap();
        tx.document_mut().body_mut(body_id).unwrap().push_feature(fillet());
        let report = tx.document_mut().rebuild_current(body_id).unwrap();
        assert!(report.is_ok());
        let rollback = tx.rollback();

        assert!(rollback.validated);
        assert!(rollback.consistent, "{:?}", rollback.differences);
        // the fillet result was cached during the attempt
        assert!(rollback.orphans.iter().all(|o| o.kind == OrphanKind::StaleCacheEntry));
        assert_eq!(doc.cache().count_for_feature(&FeatureId::from("Fillet")), 0);

        assert_eq!(doc.body(body_id).unwrap().generation_id(), generation);
        let after = doc.rollback_state(body_id).unwrap();
        assert_eq!(after.geometry_hash, before.geometry_hash);
        assert!(before.differences(&after).is_empty());
    }

    #[test]
    fn test_commit_keeps_changes() {
        let (mut doc, body_id) = box_document();
        let generations = doc.body(body_id).unwrap().generation_count();

        let mut tx = Transaction::begin(&mut doc, body_id).unwrap();
        assert_eq!(tx.state(), TransactionState::Snapshotted);
        tx.document_mut().body_mut(body_id).unwrap().push_feature(fillet());
        tx.document_mut().rebuild_current(body_id).unwrap();
        tx.commit().unwrap();

        let body = doc.body(body_id).unwrap();
        assert_eq!(body.features().len(), 2);
        assert_eq!(body.generation_count(), generations + 1);
        assert!(doc.dependencies().contains(&FeatureId::from("Fillet")));
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let (mut doc, body_id) = box_document();
        {
            let mut tx = Transaction::begin(&mut doc, body_id).unwrap();
            tx.document_mut().body_mut(body_id).unwrap().push_feature(fillet());
        }
        assert_eq!(doc.body(body_id).unwrap().features().len(), 1);
    }

    #[test]
    fn test_commit_requires_snapshot() {
        let (mut doc, body_id) = box_document();
        let tx = Transaction::new(&mut doc, body_id);
        assert!(matches!(tx.commit(), Err(NamingError::Transaction(_))));
    }

    #[test]
    fn test_begin_on_missing_body() {
        let (mut doc, _) = box_document();
        let missing = Uuid::new_v4();
        assert!(matches!(
            Transaction::begin(&mut doc, missing),
            Err(NamingError::BodyNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn test_atomic_suppresses_rollback_errors() {
        let (mut doc, body_id) = box_document();
        let outcome = atomic(&mut doc, body_id, |doc| -> NamingResult<()> {
            doc.require_body_mut(body_id)?.push_feature(fillet());
            Err(RollbackError::Validation(String::from("rejected")).into())
        })
        .unwrap();

        let TransactionOutcome::RolledBack { error, report } = outcome else {
            panic!("expected rollback");
        };
        assert!(matches!(error, RollbackError::Validation(_)));
        assert!(report.consistent);
        assert_eq!(doc.body(body_id).unwrap().features().len(), 1);
    }

    #[test]
    fn test_atomic_propagates_other_errors() {
        let (mut doc, body_id) = box_document();
        let result = atomic(&mut doc, body_id, |doc| -> NamingResult<()> {
            doc.require_body_mut(body_id)?.push_feature(fillet());
            Err(NamingError::InvalidFeature(String::from("bad")))
        });
        assert!(matches!(result, Err(NamingError::InvalidFeature(_))));
        assert_eq!(doc.body(body_id).unwrap().features().len(), 1);
    }

    #[test]
    fn test_batch_rolls_back_in_reverse_order() {
        let (mut doc, first) = box_document();
        let second = doc.add_body("Second");
        doc.add_feature(second, Feature::block("Block", Vec3::ZERO, Vec3::ONE).with_id("Block"))
            .unwrap();
        let hash_first = doc.rollback_state(first).unwrap().geometry_hash;
        let hash_second = doc.rollback_state(second).unwrap().geometry_hash;

        let outcome = batch(&mut doc, &[first, second], |doc| -> NamingResult<()> {
            for id in [first, second] {
                doc.require_body_mut(id)?
                    .push_feature(Feature::hollow("Hollow", 0.1).with_id(format!("Hollow-{}", id)));
                doc.rebuild_current(id)?;
            }
            Err(RollbackError::Validation(String::from("rejected")).into())
        })
        .unwrap();

        let BatchOutcome::RolledBack { reports, .. } = outcome else {
            panic!("expected rollback");
        };
        let order: Vec<Uuid> = reports.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![second, first]);
        assert!(reports.iter().all(|(_, report)| report.consistent));

        assert_eq!(doc.body(first).unwrap().features().len(), 1);
        assert_eq!(doc.body(second).unwrap().features().len(), 1);
        assert_eq!(doc.rollback_state(first).unwrap().geometry_hash, hash_first);
        assert_eq!(doc.rollback_state(second).unwrap().geometry_hash, hash_second);
    }

    #[test]
    fn test_batch_commit() {
        let (mut doc, first) = box_document();
        let second = doc.add_body("Second");
        let outcome = batch(&mut doc, &[first, second], |doc| {
            doc.require_body_mut(second)?
                .push_feature(Feature::block("Block", Vec3::ZERO, Vec3::ONE).with_id("Block"));
            doc.rebuild_current(second)
        })
        .unwrap();
        assert!(matches!(outcome, BatchOutcome::Committed(report) if report.is_ok()));
        assert!(doc.body(second).unwrap().solid().is_some());
    }
}
