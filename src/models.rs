use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// Earliest academic year accepted from client-supplied period tokens.
pub const FIRST_ACADEMIC_YEAR: i32 = 2020;

/// Used when neither the client nor the store can supply a period.
pub const DEFAULT_FALLBACK_PERIOD: &str = "20252";

/// Academic term token `YYYYC`: four-digit year followed by the
/// sub-period index (1, 2 or 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AcademicPeriod(String);

impl AcademicPeriod {
    /// Checks the token shape only: exactly five ASCII digits with a
    /// sub-period index in 1..=3. Surrounding whitespace is rejected.
    pub fn parse(token: &str) -> Option<Self> {
        if token.len() != 5 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (_, index) = token.split_at(4);
        match index {
            "1" | "2" | "3" => Some(Self(token.to_string())),
            _ => None,
        }
    }

    /// Like [`AcademicPeriod::parse`], but also requires the year to fall
    /// in `[FIRST_ACADEMIC_YEAR, current_year + 2]`.
    pub fn parse_within(token: &str, current_year: i32) -> Option<Self> {
        let period = Self::parse(token)?;
        let year = period.year();
        if (FIRST_ACADEMIC_YEAR..=current_year + 2).contains(&year) {
            Some(period)
        } else {
            None
        }
    }

    pub fn fallback() -> Self {
        Self(DEFAULT_FALLBACK_PERIOD.to_string())
    }

    pub fn year(&self) -> i32 {
        self.0[..4].parse().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AcademicPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AcademicPeriod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid academic period: {value}"))
    }
}

impl From<AcademicPeriod> for String {
    fn from(period: AcademicPeriod) -> Self {
        period.0
    }
}

/// Scope of every weight invariant: one partial of one course offering
/// taught by one teacher in one period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationKey {
    pub course_code: String,
    pub teacher_code: String,
    pub partial: i32,
    pub period: AcademicPeriod,
}

impl fmt::Display for EvaluationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} partial {} ({})",
            self.course_code, self.teacher_code, self.partial, self.period
        )
    }
}

/// An evaluation key whose period has not been canonicalized yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTarget {
    pub course_code: String,
    pub teacher_code: String,
    pub partial: i32,
    #[serde(default)]
    pub requested_period: Option<String>,
}

impl EvaluationTarget {
    pub fn new(course_code: impl Into<String>, teacher_code: impl Into<String>, partial: i32) -> Self {
        Self {
            course_code: course_code.into(),
            teacher_code: teacher_code.into(),
            partial,
            requested_period: None,
        }
    }

    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.requested_period = Some(period.into());
        self
    }

    pub fn into_key(self, period: AcademicPeriod) -> EvaluationKey {
        EvaluationKey {
            course_code: self.course_code,
            teacher_code: self.teacher_code,
            partial: self.partial,
            period,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationComponent {
    pub id: Uuid,
    pub name: String,
    pub weight: f64,
}

/// Activities graded under a component. Any entry blocks deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedActivities {
    pub count: usize,
    pub names: Vec<String>,
}

impl LinkedActivities {
    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            count: names.len(),
            names,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum MutationOperation {
    Create { name: String, weight: f64 },
    Modify { id: Uuid, name: String, weight: f64 },
    Delete { id: Uuid },
}

impl MutationOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            MutationOperation::Create { .. } => OperationKind::Create,
            MutationOperation::Modify { .. } => OperationKind::Modify,
            MutationOperation::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn target_id(&self) -> Option<Uuid> {
        match self {
            MutationOperation::Create { .. } => None,
            MutationOperation::Modify { id, .. } | MutationOperation::Delete { id } => Some(*id),
        }
    }

    pub fn weight(&self) -> Option<f64> {
        match self {
            MutationOperation::Create { weight, .. } | MutationOperation::Modify { weight, .. } => {
                Some(*weight)
            }
            MutationOperation::Delete { .. } => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            MutationOperation::Create { name, .. } | MutationOperation::Modify { name, .. } => {
                Some(name)
            }
            MutationOperation::Delete { .. } => None,
        }
    }
}

/// Application order inside a transaction: deletes, then creates, then modifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Delete,
    Create,
    Modify,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::Delete => "delete",
            OperationKind::Create => "create",
            OperationKind::Modify => "modify",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationBatch {
    pub target: EvaluationTarget,
    pub operations: Vec<MutationOperation>,
}

impl MutationBatch {
    pub fn new(target: EvaluationTarget, operations: Vec<MutationOperation>) -> Self {
        Self { target, operations }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightClassification {
    pub valid: bool,
    pub complete: bool,
    pub excess: f64,
    pub missing: f64,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub weight: f64,
    pub was_adjusted: bool,
}

/// Read-only view of one evaluation key.
#[derive(Debug, Clone, Serialize)]
pub struct WeightReport {
    pub key: EvaluationKey,
    pub components: Vec<EvaluationComponent>,
    pub sum: f64,
    pub remaining: f64,
    pub can_add_more: bool,
    pub classification: WeightClassification,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateAdjustment {
    pub index: usize,
    pub requested: f64,
    pub applied: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedDelete {
    pub index: usize,
    pub component_id: Uuid,
    pub activities: LinkedActivities,
}

/// Dry-run result of a batch: what the key would sum to if every
/// operation succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPreview {
    pub key: EvaluationKey,
    pub current_sum: f64,
    pub hypothetical_sum: f64,
    pub classification: WeightClassification,
    pub adjustments: Vec<CreateAdjustment>,
    pub blocked_deletes: Vec<BlockedDelete>,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedOperation {
    pub index: usize,
    pub kind: OperationKind,
    pub component_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationFailure {
    pub index: usize,
    pub kind: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<Uuid>,
    pub error: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking_activities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Committed,
    PartialSuccess,
    RolledBack,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub key: EvaluationKey,
    pub status: BatchStatus,
    pub applied: Vec<AppliedOperation>,
    pub errors: Vec<OperationFailure>,
    /// Sum re-read after commit; `None` when rolled back or the re-read failed.
    pub final_sum: Option<f64>,
    pub classification: Option<WeightClassification>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.status != BatchStatus::RolledBack
    }

    pub fn status_code(&self) -> u16 {
        match self.status {
            BatchStatus::Committed | BatchStatus::PartialSuccess => 200,
            BatchStatus::RolledBack => {
                if self.errors.iter().all(|e| e.error != ErrorKind::Persistence) {
                    400
                } else {
                    500
                }
            }
        }
    }
}

/// Result of a single create/modify/delete.
#[derive(Debug, Clone, Serialize)]
pub struct SingleOutcome {
    pub key: EvaluationKey,
    pub kind: OperationKind,
    pub component_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub was_adjusted: bool,
    pub sum: f64,
    pub remaining: f64,
    pub classification: WeightClassification,
}

impl SingleOutcome {
    pub fn status_code(&self) -> u16 {
        match self.kind {
            OperationKind::Create => 201,
            OperationKind::Modify | OperationKind::Delete => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_shape_rules() {
        assert!(AcademicPeriod::parse("20251").is_some());
        assert!(AcademicPeriod::parse("20253").is_some());
        assert!(AcademicPeriod::parse("20254").is_none());
        assert!(AcademicPeriod::parse("20259").is_none());
        assert!(AcademicPeriod::parse("2025").is_none());
        assert!(AcademicPeriod::parse("2025-1").is_none());
        assert!(AcademicPeriod::parse("abcd1").is_none());
        assert!(AcademicPeriod::parse(" 20251").is_none());
        assert!(AcademicPeriod::parse("20251 ").is_none());
    }

    #[test]
    fn period_year_range_tracks_current_year() {
        assert!(AcademicPeriod::parse_within("20191", 2025).is_none());
        assert!(AcademicPeriod::parse_within("20201", 2025).is_some());
        assert!(AcademicPeriod::parse_within("20272", 2025).is_some());
        assert!(AcademicPeriod::parse_within("20281", 2025).is_none());
    }

    #[test]
    fn period_accessors() {
        let period = AcademicPeriod::parse("20242").unwrap();
        assert_eq!(period.year(), 2024);
        assert_eq!(period.to_string(), "20242");
    }

    #[test]
    fn operations_serialize_with_tag() {
        let op = MutationOperation::Create {
            name: "Exam".to_string(),
            weight: 5.0,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "create");
        assert_eq!(op.kind(), OperationKind::Create);
        assert!(op.target_id().is_none());
    }

    #[test]
    fn application_order_is_delete_create_modify() {
        let mut kinds = vec![OperationKind::Modify, OperationKind::Create, OperationKind::Delete];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![OperationKind::Delete, OperationKind::Create, OperationKind::Modify]
        );
    }
}
