//! In-memory store (testing only)
//!
//! `MemoryStore` satisfies the [`EvaluationStore`] contract without a
//! database. Scopes stage writes on a copy of the state and publish it on
//! commit. Faults can be injected to exercise failure paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{AcademicPeriod, EvaluationComponent, EvaluationKey, LinkedActivities};
use crate::store::{EvaluationScope, EvaluationStore};
use crate::weights::round2;

#[derive(Debug, Clone)]
struct StoredComponent {
    key: EvaluationKey,
    component: EvaluationComponent,
    /// Insertion order, used for stable listing.
    seq: u64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    current_period: Option<AcademicPeriod>,
    components: BTreeMap<Uuid, StoredComponent>,
    activities: Vec<(Uuid, String)>,
    next_seq: u64,
}

impl MemoryState {
    fn components_of(&self, key: &EvaluationKey) -> Vec<EvaluationComponent> {
        let mut rows: Vec<&StoredComponent> = self
            .components
            .values()
            .filter(|stored| &stored.key == key)
            .collect();
        rows.sort_by_key(|stored| stored.seq);
        rows.into_iter().map(|stored| stored.component.clone()).collect()
    }

    fn linked(&self, id: Uuid) -> LinkedActivities {
        LinkedActivities::from_names(
            self.activities
                .iter()
                .filter(|(component_id, _)| *component_id == id)
                .map(|(_, name)| name.clone())
                .collect(),
        )
    }

    fn insert(&mut self, key: &EvaluationKey, name: &str, weight: f64) -> Uuid {
        let id = Uuid::new_v4();
        self.next_seq += 1;
        self.components.insert(
            id,
            StoredComponent {
                key: key.clone(),
                component: EvaluationComponent {
                    id,
                    name: name.to_string(),
                    weight: round2(weight),
                },
                seq: self.next_seq,
            },
        );
        id
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Component ids or names whose writes fail with a query error.
    failing_writes: HashSet<String>,
    /// Component ids or names whose writes time out.
    stalled_writes: HashSet<String>,
    fail_begin: bool,
    fail_commit: bool,
    fail_sum_reads: bool,
    fail_period_reads: bool,
}

impl Faults {
    fn check_write(&self, subject: &str) -> StoreResult<()> {
        if self.stalled_writes.contains(subject) {
            return Err(StoreError::Timeout(30));
        }
        if self.failing_writes.contains(subject) {
            return Err(StoreError::Query(format!("simulated write failure for {subject}")));
        }
        Ok(())
    }
}

/// In-memory evaluation store backed by a `BTreeMap<id, component>`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current_period(period: &str) -> Self {
        let store = Self::new();
        store.set_current_period(AcademicPeriod::parse(period));
        store
    }

    pub fn set_current_period(&self, period: Option<AcademicPeriod>) {
        self.state.lock().unwrap().current_period = period;
    }

    /// Seeds a component directly, bypassing every weight rule.
    pub fn insert_component(&self, key: &EvaluationKey, name: &str, weight: f64) -> Uuid {
        self.state.lock().unwrap().insert(key, name, weight)
    }

    pub fn link_activity(&self, component_id: Uuid, name: &str) {
        self.state
            .lock()
            .unwrap()
            .activities
            .push((component_id, name.to_string()));
    }

    /// Committed components of a key.
    pub fn components(&self, key: &EvaluationKey) -> Vec<EvaluationComponent> {
        self.state.lock().unwrap().components_of(key)
    }

    pub fn component(&self, id: Uuid) -> Option<EvaluationComponent> {
        self.state
            .lock()
            .unwrap()
            .components
            .get(&id)
            .map(|stored| stored.component.clone())
    }

    /// Writes touching this component id or carrying this name fail.
    pub fn fail_writes_for(&self, subject: impl ToString) {
        self.faults
            .lock()
            .unwrap()
            .failing_writes
            .insert(subject.to_string());
    }

    /// Writes touching this component id or carrying this name time out.
    pub fn stall_writes_for(&self, subject: impl ToString) {
        self.faults
            .lock()
            .unwrap()
            .stalled_writes
            .insert(subject.to_string());
    }

    pub fn fail_begin(&self) {
        self.faults.lock().unwrap().fail_begin = true;
    }

    pub fn fail_commit(&self) {
        self.faults.lock().unwrap().fail_commit = true;
    }

    pub fn fail_sum_reads(&self) {
        self.faults.lock().unwrap().fail_sum_reads = true;
    }

    pub fn fail_period_reads(&self) {
        self.faults.lock().unwrap().fail_period_reads = true;
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    async fn fetch_current_period(&self) -> StoreResult<Option<AcademicPeriod>> {
        if self.faults.lock().unwrap().fail_period_reads {
            return Err(StoreError::Query("simulated period lookup failure".into()));
        }
        Ok(self.state.lock().unwrap().current_period.clone())
    }

    async fn fetch_components(&self, key: &EvaluationKey) -> StoreResult<Vec<EvaluationComponent>> {
        Ok(self.components(key))
    }

    async fn count_linked_activities(&self, id: Uuid) -> StoreResult<LinkedActivities> {
        Ok(self.state.lock().unwrap().linked(id))
    }

    async fn fetch_weight_sum(&self, key: &EvaluationKey) -> StoreResult<f64> {
        if self.faults.lock().unwrap().fail_sum_reads {
            return Err(StoreError::Query("simulated sum read failure".into()));
        }
        let components = self.components(key);
        Ok(round2(components.iter().map(|c| c.weight).sum()))
    }

    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn EvaluationScope + 'a>> {
        if self.faults.lock().unwrap().fail_begin {
            return Err(StoreError::Transaction("simulated connection failure".into()));
        }
        let working = self.state.lock().unwrap().clone();
        Ok(Box::new(MemoryScope {
            store: self,
            working,
        }))
    }
}

/// Open scope over a `MemoryStore`. Dropped scopes discard their writes.
#[derive(Debug)]
pub struct MemoryScope<'a> {
    store: &'a MemoryStore,
    working: MemoryState,
}

impl MemoryScope<'_> {
    fn check_write(&self, id: Option<Uuid>, name: Option<&str>) -> StoreResult<()> {
        let faults = self.store.faults.lock().unwrap();
        if let Some(id) = id {
            faults.check_write(&id.to_string())?;
        }
        if let Some(name) = name {
            faults.check_write(name)?;
        }
        Ok(())
    }

    fn existing_name(&self, id: Uuid) -> StoreResult<String> {
        self.working
            .components
            .get(&id)
            .map(|stored| stored.component.name.clone())
            .ok_or_else(|| StoreError::NotFound(format!("component {id}")))
    }
}

#[async_trait]
impl EvaluationScope for MemoryScope<'_> {
    async fn create_component(
        &mut self,
        key: &EvaluationKey,
        name: &str,
        weight: f64,
    ) -> StoreResult<Uuid> {
        self.check_write(None, Some(name))?;
        Ok(self.working.insert(key, name, weight))
    }

    async fn update_component(&mut self, id: Uuid, name: &str, weight: f64) -> StoreResult<()> {
        let current = self.existing_name(id)?;
        self.check_write(Some(id), Some(&current))?;
        if let Some(stored) = self.working.components.get_mut(&id) {
            stored.component.name = name.to_string();
            stored.component.weight = round2(weight);
        }
        Ok(())
    }

    async fn delete_component(&mut self, id: Uuid) -> StoreResult<()> {
        let current = self.existing_name(id)?;
        self.check_write(Some(id), Some(&current))?;
        if !self.working.linked(id).is_empty() {
            return Err(StoreError::Query(format!(
                "component {id} is still referenced by activities"
            )));
        }
        self.working.components.remove(&id);
        Ok(())
    }

    async fn count_linked_activities(&mut self, id: Uuid) -> StoreResult<LinkedActivities> {
        Ok(self.working.linked(id))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryScope { store, working } = *self;
        if store.faults.lock().unwrap().fail_commit {
            return Err(StoreError::Transaction("simulated commit failure".into()));
        }
        *store.state.lock().unwrap() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EvaluationKey {
        EvaluationKey {
            course_code: "MAT101".to_string(),
            teacher_code: "T-01".to_string(),
            partial: 1,
            period: AcademicPeriod::parse("20251").unwrap(),
        }
    }

    #[tokio::test]
    async fn uncommitted_scope_leaves_store_untouched() {
        let store = MemoryStore::new();
        {
            let mut scope = store.begin().await.unwrap();
            scope.create_component(&key(), "Exam", 5.0).await.unwrap();
        }
        assert!(store.components(&key()).is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut scope = store.begin().await.unwrap();
        scope.create_component(&key(), "Exam", 5.0).await.unwrap();
        scope.commit().await.unwrap();
        assert_eq!(store.fetch_weight_sum(&key()).await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn injected_failures_hit_matching_writes_only() {
        let store = MemoryStore::new();
        store.fail_writes_for("Broken");
        let mut scope = store.begin().await.unwrap();
        assert!(scope.create_component(&key(), "Broken", 1.0).await.is_err());
        assert!(scope.create_component(&key(), "Fine", 1.0).await.is_ok());
    }
}
