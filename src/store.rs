//! Persistence collaborator contract.
//!
//! Reads go through [`EvaluationStore`]; every write happens inside an
//! [`EvaluationScope`] obtained from [`EvaluationStore::begin`]. A scope is
//! released exactly once, by `commit` or `rollback`. Dropping a scope
//! without releasing it discards its writes.
//!
//! Implementations: `db::PgStore` (Postgres) and `fakes::MemoryStore`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{AcademicPeriod, EvaluationComponent, EvaluationKey, LinkedActivities};

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// The period flagged as current, if any.
    async fn fetch_current_period(&self) -> StoreResult<Option<AcademicPeriod>>;

    /// Live components of a key, in a stable order.
    async fn fetch_components(&self, key: &EvaluationKey) -> StoreResult<Vec<EvaluationComponent>>;

    async fn count_linked_activities(&self, id: Uuid) -> StoreResult<LinkedActivities>;

    async fn fetch_weight_sum(&self, key: &EvaluationKey) -> StoreResult<f64>;

    /// Open a transactional scope.
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn EvaluationScope + 'a>>;
}

/// An open transaction against the store. Each write is isolated, so a
/// failed write leaves earlier writes of the same scope intact.
#[async_trait]
pub trait EvaluationScope: Send {
    async fn create_component(
        &mut self,
        key: &EvaluationKey,
        name: &str,
        weight: f64,
    ) -> StoreResult<Uuid>;

    async fn update_component(&mut self, id: Uuid, name: &str, weight: f64) -> StoreResult<()>;

    async fn delete_component(&mut self, id: Uuid) -> StoreResult<()>;

    /// Linkage as seen from inside the scope.
    async fn count_linked_activities(&mut self, id: Uuid) -> StoreResult<LinkedActivities>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
