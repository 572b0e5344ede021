use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, StoreResult};
use crate::models::LinkedActivities;
use crate::store::EvaluationStore;

/// Whether a component may be deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkageCheck {
    Clear,
    Blocked { activities: LinkedActivities },
    /// The lookup itself failed; deletion must not proceed.
    Unknown { reason: String },
}

impl LinkageCheck {
    fn from_lookup(lookup: StoreResult<LinkedActivities>) -> Self {
        match lookup {
            Ok(activities) => Self::from_activities(activities),
            Err(err) => LinkageCheck::Unknown {
                reason: err.to_string(),
            },
        }
    }

    fn from_activities(activities: LinkedActivities) -> Self {
        if activities.is_empty() {
            LinkageCheck::Clear
        } else {
            LinkageCheck::Blocked { activities }
        }
    }

    pub fn can_delete(&self) -> bool {
        matches!(self, LinkageCheck::Clear)
    }

    /// Converts a blocked check into a conflict naming the activities
    /// verbatim.
    pub fn into_conflict(self, component_id: Uuid) -> Option<EngineError> {
        match self {
            LinkageCheck::Blocked { activities } => Some(EngineError::LinkageConflict {
                component_id,
                names: activities.names,
            }),
            _ => None,
        }
    }
}

/// Screens component deletions against dependent activities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityLinkageGuard;

impl ActivityLinkageGuard {
    pub async fn linked_activities<S>(&self, store: &S, id: Uuid) -> LinkageCheck
    where
        S: EvaluationStore + ?Sized,
    {
        LinkageCheck::from_lookup(store.count_linked_activities(id).await)
    }

    pub async fn can_delete<S>(&self, store: &S, id: Uuid) -> bool
    where
        S: EvaluationStore + ?Sized,
    {
        self.linked_activities(store, id).await.can_delete()
    }

    /// Judges linkage already fetched by the caller, e.g. from inside an
    /// open scope right before a delete.
    pub fn assess(&self, activities: LinkedActivities) -> LinkageCheck {
        LinkageCheck::from_activities(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn empty_linkage_is_clear() {
        let check = LinkageCheck::from_lookup(Ok(LinkedActivities::default()));
        assert!(check.can_delete());
        assert!(check.into_conflict(Uuid::nil()).is_none());
    }

    #[test]
    fn linked_activities_block_with_names() {
        let check = LinkageCheck::from_lookup(Ok(LinkedActivities::from_names(vec![
            "Homework 1".to_string(),
            "Homework 2".to_string(),
        ])));
        assert!(!check.can_delete());
        match check.into_conflict(Uuid::nil()) {
            Some(EngineError::LinkageConflict { names, .. }) => {
                assert_eq!(names, vec!["Homework 1", "Homework 2"]);
            }
            other => panic!("expected linkage conflict, got {other:?}"),
        }
    }

    #[test]
    fn assess_matches_lookup_result() {
        let guard = ActivityLinkageGuard;
        assert!(guard.assess(LinkedActivities::default()).can_delete());
        assert!(!guard
            .assess(LinkedActivities::from_names(vec!["Lab".to_string()]))
            .can_delete());
    }

    #[test]
    fn failed_lookup_never_allows_delete() {
        let check = LinkageCheck::from_lookup(Err(StoreError::Query("boom".into())));
        assert!(!check.can_delete());
        assert!(matches!(check, LinkageCheck::Unknown { .. }));
    }
}
