//! Batch and single-operation writes against one evaluation key.
//!
//! A batch moves through `Idle -> PeriodResolved -> Precomputed ->
//! TransactionOpen -> Committed | RolledBack`. The precheck only proves the
//! key would be complete if every operation succeeded. Operations that fail
//! inside the transaction are collected rather than aborting the batch, and
//! the transaction commits as long as one operation went through, so a
//! partially applied batch can leave the key incomplete. The outcome then
//! carries the sum re-read after commit.
//!
//! No lock is taken on the key. Two batches against the same key can both
//! pass the precheck on the same snapshot and commit one after the other.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, StoreError};
use crate::linkage::{ActivityLinkageGuard, LinkageCheck};
use crate::models::{
    AppliedOperation, BatchOutcome, BatchPreview, BatchStatus, BlockedDelete, CreateAdjustment,
    EvaluationComponent, EvaluationKey, EvaluationTarget, MutationBatch, MutationOperation,
    OperationFailure, OperationKind, SingleOutcome, WeightReport,
};
use crate::period::PeriodResolver;
use crate::store::{EvaluationScope, EvaluationStore};
use crate::weights::{round2, WeightValidator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    PeriodResolved,
    Precomputed,
    TransactionOpen,
    Committed,
    RolledBack,
}

struct BatchPlan {
    preview: BatchPreview,
    /// Deletes, then creates (with adjusted weights), then modifies; batch
    /// order is kept within each kind.
    ordered: Vec<(usize, MutationOperation)>,
}

impl MutationOperation {
    /// Applies this operation inside an open scope. Deletes re-check linkage
    /// first.
    pub async fn apply(
        &self,
        index: usize,
        scope: &mut (dyn EvaluationScope + '_),
        key: &EvaluationKey,
        guard: &ActivityLinkageGuard,
    ) -> EngineResult<AppliedOperation> {
        match self {
            MutationOperation::Create { name, weight } => {
                let id = scope.create_component(key, name, *weight).await?;
                Ok(AppliedOperation {
                    index,
                    kind: OperationKind::Create,
                    component_id: id,
                    name: Some(name.clone()),
                    weight: Some(*weight),
                })
            }
            MutationOperation::Modify { id, name, weight } => {
                scope.update_component(*id, name, *weight).await?;
                Ok(AppliedOperation {
                    index,
                    kind: OperationKind::Modify,
                    component_id: *id,
                    name: Some(name.clone()),
                    weight: Some(*weight),
                })
            }
            MutationOperation::Delete { id } => {
                let activities = scope.count_linked_activities(*id).await?;
                if let Some(conflict) = guard.assess(activities).into_conflict(*id) {
                    return Err(conflict);
                }
                scope.delete_component(*id).await?;
                Ok(AppliedOperation {
                    index,
                    kind: OperationKind::Delete,
                    component_id: *id,
                    name: None,
                    weight: None,
                })
            }
        }
    }
}

impl OperationFailure {
    fn new(index: usize, operation: &MutationOperation, err: &EngineError) -> Self {
        Self {
            index,
            kind: operation.kind(),
            component_id: operation.target_id(),
            error: err.kind(),
            message: err.to_string(),
            blocking_activities: err.blocking_activities().to_vec(),
        }
    }
}

/// Rolls back a scope that must not be committed. A failed rollback is
/// logged; the store discards the transaction once the scope is gone.
async fn abandon(scope: Box<dyn EvaluationScope + '_>) {
    if let Err(err) = scope.rollback().await {
        error!(error = %err, "rollback failed");
    }
}

pub struct BulkMutationCoordinator<S: ?Sized> {
    store: Arc<S>,
    resolver: PeriodResolver,
    validator: WeightValidator,
    guard: ActivityLinkageGuard,
}

impl<S> BulkMutationCoordinator<S>
where
    S: EvaluationStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            resolver: PeriodResolver::default(),
            validator: WeightValidator::default(),
            guard: ActivityLinkageGuard,
        }
    }

    pub fn with_resolver(mut self, resolver: PeriodResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub async fn resolve_key(&self, target: EvaluationTarget) -> EvaluationKey {
        let period = self
            .resolver
            .resolve(self.store.as_ref(), target.requested_period.as_deref())
            .await;
        target.into_key(period)
    }

    /// Read-only state of a key.
    pub async fn validation_query(&self, target: EvaluationTarget) -> EngineResult<WeightReport> {
        let key = self.resolve_key(target).await;
        let components = self.store.fetch_components(&key).await?;
        let sum = self.validator.sum(&components);
        let remaining = self.validator.remaining(sum);
        Ok(WeightReport {
            classification: self.validator.classify(sum),
            can_add_more: remaining > 0.0,
            remaining,
            sum,
            components,
            key,
        })
    }

    /// Dry run: resolves the period and simulates the batch without writing.
    pub async fn validate_batch(&self, batch: &MutationBatch) -> EngineResult<BatchPreview> {
        let key = self.resolve_key(batch.target.clone()).await;
        let plan = self.precompute(&key, &batch.operations).await?;
        Ok(plan.preview)
    }

    pub async fn apply_batch(&self, batch: MutationBatch) -> EngineResult<BatchOutcome> {
        let MutationBatch { target, operations } = batch;
        debug!(phase = ?BatchPhase::Idle, operations = operations.len(), "batch received");

        let key = self.resolve_key(target).await;
        info!(phase = ?BatchPhase::PeriodResolved, key = %key, "period resolved");

        let plan = self.precompute(&key, &operations).await?;
        if !plan.preview.ready {
            warn!(
                key = %key,
                hypothetical_sum = plan.preview.hypothetical_sum,
                "batch rejected by precheck"
            );
            return Err(EngineError::SumMismatch {
                hypothetical: plan.preview.hypothetical_sum,
                target: self.validator.target(),
            });
        }
        for blocked in &plan.preview.blocked_deletes {
            warn!(
                key = %key,
                component = %blocked.component_id,
                activities = blocked.activities.count,
                "delete is blocked by linked activities"
            );
        }
        info!(
            phase = ?BatchPhase::Precomputed,
            key = %key,
            hypothetical_sum = plan.preview.hypothetical_sum,
            "precheck passed"
        );

        let mut scope = self.store.begin().await?;
        info!(phase = ?BatchPhase::TransactionOpen, key = %key, "transaction open");

        let (applied, errors) = match self.run_operations(scope.as_mut(), &key, &plan.ordered).await
        {
            Ok(results) => results,
            Err(err) => {
                abandon(scope).await;
                error!(phase = ?BatchPhase::RolledBack, key = %key, error = %err, "batch aborted");
                return Err(err.into());
            }
        };

        if applied.is_empty() {
            abandon(scope).await;
            warn!(
                phase = ?BatchPhase::RolledBack,
                key = %key,
                failures = errors.len(),
                "no operation succeeded, batch rolled back"
            );
            return Ok(BatchOutcome {
                key,
                status: BatchStatus::RolledBack,
                applied,
                errors,
                final_sum: None,
                classification: None,
            });
        }

        if let Err(err) = scope.commit().await {
            error!(key = %key, error = %err, "commit failed");
            return Err(err.into());
        }

        let final_sum = match self.store.fetch_weight_sum(&key).await {
            Ok(sum) => Some(sum),
            Err(err) => {
                warn!(key = %key, error = %err, "could not re-read sum after commit");
                None
            }
        };
        let status = if errors.is_empty() {
            BatchStatus::Committed
        } else {
            BatchStatus::PartialSuccess
        };
        info!(
            phase = ?BatchPhase::Committed,
            key = %key,
            applied = applied.len(),
            failed = errors.len(),
            final_sum = ?final_sum,
            "batch committed"
        );

        Ok(BatchOutcome {
            classification: final_sum.map(|sum| self.validator.classify(sum)),
            key,
            status,
            applied,
            errors,
            final_sum,
        })
    }

    pub async fn create_single(
        &self,
        target: EvaluationTarget,
        name: &str,
        weight: f64,
    ) -> EngineResult<SingleOutcome> {
        let key = self.resolve_key(target).await;
        let name = self.checked_name(name)?;
        self.check_weight(weight)?;

        let components = self.store.fetch_components(&key).await?;
        let sum_excluding = self.validator.sum(&components);
        let adjustment = self.validator.auto_adjust(weight, sum_excluding);
        self.ensure_capacity(adjustment.weight, sum_excluding)?;

        let mut scope = self.store.begin().await?;
        let created = scope
            .create_component(&key, name, adjustment.weight)
            .await
            .map_err(EngineError::from);
        let id = self.settle(scope, created).await?;
        info!(key = %key, component = %id, weight = adjustment.weight, "component created");

        let sum = self
            .sum_after_write(&key, sum_excluding + adjustment.weight)
            .await;
        Ok(self.single_outcome(
            key,
            OperationKind::Create,
            id,
            Some(name.to_string()),
            Some(adjustment.weight),
            adjustment.was_adjusted,
            sum,
        ))
    }

    pub async fn modify_single(
        &self,
        target: EvaluationTarget,
        id: Uuid,
        name: &str,
        weight: f64,
    ) -> EngineResult<SingleOutcome> {
        let key = self.resolve_key(target).await;
        let name = self.checked_name(name)?;
        self.check_weight(weight)?;

        let components = self.store.fetch_components(&key).await?;
        if !components.iter().any(|c| c.id == id) {
            return Err(EngineError::NotFound(format!("component {id} in {key}")));
        }
        let sum_excluding = self
            .validator
            .sum_weights(components.iter().filter(|c| c.id != id).map(|c| c.weight));
        let adjustment = self.validator.auto_adjust(weight, sum_excluding);
        self.ensure_capacity(adjustment.weight, sum_excluding)?;

        let mut scope = self.store.begin().await?;
        let updated = scope
            .update_component(id, name, adjustment.weight)
            .await
            .map_err(EngineError::from);
        self.settle(scope, updated).await?;
        info!(key = %key, component = %id, weight = adjustment.weight, "component modified");

        let sum = self
            .sum_after_write(&key, sum_excluding + adjustment.weight)
            .await;
        Ok(self.single_outcome(
            key,
            OperationKind::Modify,
            id,
            Some(name.to_string()),
            Some(adjustment.weight),
            adjustment.was_adjusted,
            sum,
        ))
    }

    pub async fn delete_single(&self, target: EvaluationTarget, id: Uuid) -> EngineResult<SingleOutcome> {
        let key = self.resolve_key(target).await;
        let components = self.store.fetch_components(&key).await?;
        let Some(existing) = components.iter().find(|c| c.id == id) else {
            return Err(EngineError::NotFound(format!("component {id} in {key}")));
        };
        let expected = round2(self.validator.sum(&components) - existing.weight);

        let mut scope = self.store.begin().await?;
        let deleted = MutationOperation::Delete { id }
            .apply(0, scope.as_mut(), &key, &self.guard)
            .await;
        self.settle(scope, deleted).await?;
        info!(key = %key, component = %id, "component deleted");

        let sum = self.sum_after_write(&key, expected).await;
        Ok(self.single_outcome(key, OperationKind::Delete, id, None, None, false, sum))
    }

    async fn precompute(
        &self,
        key: &EvaluationKey,
        operations: &[MutationOperation],
    ) -> EngineResult<BatchPlan> {
        if operations.is_empty() {
            return Err(EngineError::Validation("batch has no operations".to_string()));
        }

        let current = self.store.fetch_components(key).await?;
        self.check_operations(key, &current, operations)?;

        let targeted: HashSet<Uuid> = operations.iter().filter_map(|op| op.target_id()).collect();
        let untouched = current
            .iter()
            .filter(|c| !targeted.contains(&c.id))
            .map(|c| c.weight);
        let requested = operations.iter().filter_map(|op| match op {
            MutationOperation::Modify { weight, .. } | MutationOperation::Create { weight, .. } => {
                Some(*weight)
            }
            MutationOperation::Delete { .. } => None,
        });
        // A create is adjusted against every other requested weight in the batch.
        let mut hypothetical_sum = self.validator.sum_weights(untouched.chain(requested));

        let mut ordered = Vec::with_capacity(operations.len());
        let mut adjustments = Vec::new();
        for (index, op) in operations.iter().enumerate() {
            match op {
                MutationOperation::Create { name, weight } => {
                    let others = round2(hypothetical_sum - *weight);
                    let adjustment = self.validator.auto_adjust(*weight, others);
                    if adjustment.was_adjusted {
                        adjustments.push(CreateAdjustment {
                            index,
                            requested: *weight,
                            applied: adjustment.weight,
                        });
                        hypothetical_sum = round2(others + adjustment.weight);
                    }
                    ordered.push((
                        index,
                        MutationOperation::Create {
                            name: name.trim().to_string(),
                            weight: adjustment.weight,
                        },
                    ));
                }
                MutationOperation::Modify { id, name, weight } => ordered.push((
                    index,
                    MutationOperation::Modify {
                        id: *id,
                        name: name.trim().to_string(),
                        weight: *weight,
                    },
                )),
                MutationOperation::Delete { .. } => ordered.push((index, op.clone())),
            }
        }
        ordered.sort_by_key(|(_, op)| op.kind());

        let mut blocked_deletes = Vec::new();
        for (index, op) in operations.iter().enumerate() {
            if let MutationOperation::Delete { id } = op {
                match self.guard.linked_activities(self.store.as_ref(), *id).await {
                    LinkageCheck::Clear => {}
                    LinkageCheck::Blocked { activities } => blocked_deletes.push(BlockedDelete {
                        index,
                        component_id: *id,
                        activities,
                    }),
                    LinkageCheck::Unknown { reason } => {
                        debug!(component = %id, reason = %reason, "linkage pre-screen unavailable");
                    }
                }
            }
        }

        Ok(BatchPlan {
            preview: BatchPreview {
                key: key.clone(),
                current_sum: self.validator.sum(&current),
                hypothetical_sum,
                classification: self.validator.classify(hypothetical_sum),
                adjustments,
                blocked_deletes,
                ready: self.validator.is_complete(hypothetical_sum),
            },
            ordered,
        })
    }

    /// Field-level checks that reject the whole batch before any write.
    fn check_operations(
        &self,
        key: &EvaluationKey,
        current: &[EvaluationComponent],
        operations: &[MutationOperation],
    ) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for (index, op) in operations.iter().enumerate() {
            if let Some(name) = op.name() {
                if name.trim().is_empty() {
                    return Err(EngineError::Validation(format!(
                        "operation {index}: component name is required"
                    )));
                }
            }
            if let Some(weight) = op.weight() {
                if !self.validator.is_valid_weight(weight) {
                    return Err(EngineError::Validation(format!(
                        "operation {index}: weight {weight} must be greater than 0 and at most {}",
                        self.validator.target()
                    )));
                }
            }
            if let Some(id) = op.target_id() {
                if !current.iter().any(|c| c.id == id) {
                    return Err(EngineError::NotFound(format!(
                        "operation {index}: component {id} in {key}"
                    )));
                }
                if !seen.insert(id) {
                    return Err(EngineError::Validation(format!(
                        "operation {index}: component {id} is targeted more than once"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies operations one at a time. Per-operation failures are collected;
    /// a structural store failure aborts the run.
    async fn run_operations(
        &self,
        scope: &mut (dyn EvaluationScope + '_),
        key: &EvaluationKey,
        ordered: &[(usize, MutationOperation)],
    ) -> Result<(Vec<AppliedOperation>, Vec<OperationFailure>), StoreError> {
        let mut applied = Vec::new();
        let mut errors = Vec::new();

        for (index, op) in ordered {
            match op.apply(*index, &mut *scope, key, &self.guard).await {
                Ok(done) => {
                    debug!(index, kind = %done.kind, component = %done.component_id, "operation applied");
                    applied.push(done);
                }
                Err(EngineError::Persistence(err)) if err.is_structural() => return Err(err),
                Err(err) => {
                    warn!(index, kind = %op.kind(), error = %err, "operation failed");
                    errors.push(OperationFailure::new(*index, op, &err));
                }
            }
        }

        Ok((applied, errors))
    }

    /// Commits on success, rolls back on failure.
    async fn settle<T>(
        &self,
        scope: Box<dyn EvaluationScope + '_>,
        result: EngineResult<T>,
    ) -> EngineResult<T> {
        match result {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(err) => {
                abandon(scope).await;
                Err(err)
            }
        }
    }

    async fn sum_after_write(&self, key: &EvaluationKey, expected: f64) -> f64 {
        match self.store.fetch_weight_sum(key).await {
            Ok(sum) => sum,
            Err(err) => {
                warn!(key = %key, error = %err, "could not re-read sum, reporting expected value");
                round2(expected)
            }
        }
    }

    fn checked_name<'n>(&self, name: &'n str) -> EngineResult<&'n str> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            Err(EngineError::Validation("component name is required".to_string()))
        } else {
            Ok(trimmed)
        }
    }

    fn check_weight(&self, weight: f64) -> EngineResult<()> {
        if self.validator.is_valid_weight(weight) {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "weight {weight} must be greater than 0 and at most {}",
                self.validator.target()
            )))
        }
    }

    fn ensure_capacity(&self, candidate: f64, sum_excluding: f64) -> EngineResult<()> {
        self.validator
            .check_capacity(candidate, sum_excluding)
            .map_err(|exceeded| EngineError::CapacityExceeded {
                candidate,
                excess: exceeded.excess,
                remaining: exceeded.remaining,
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn single_outcome(
        &self,
        key: EvaluationKey,
        kind: OperationKind,
        component_id: Uuid,
        name: Option<String>,
        weight: Option<f64>,
        was_adjusted: bool,
        sum: f64,
    ) -> SingleOutcome {
        SingleOutcome {
            key,
            kind,
            component_id,
            name,
            weight,
            was_adjusted,
            sum,
            remaining: self.validator.remaining(sum),
            classification: self.validator.classify(sum),
        }
    }
}
