use std::fmt::Write;

use crate::models::{
    BatchOutcome, BatchPreview, BatchStatus, SingleOutcome, WeightClassification, WeightReport,
};
use crate::weights::TARGET_TOTAL;

fn write_classification(output: &mut String, sum: f64, classification: &WeightClassification) {
    let state = if classification.complete {
        "complete"
    } else if classification.valid {
        "incomplete"
    } else {
        "over target"
    };
    let _ = writeln!(
        output,
        "Sum {:.2} of {} ({:.0}%), {}",
        sum, TARGET_TOTAL, classification.progress_percent, state
    );
    if classification.missing > 0.0 {
        let _ = writeln!(output, "Missing {:.2} points", classification.missing);
    }
    if classification.excess > 0.0 {
        let _ = writeln!(output, "Excess {:.2} points", classification.excess);
    }
}

pub fn render_weight_report(report: &WeightReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Evaluation Weights");
    let _ = writeln!(output, "{}", report.key);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Components");

    if report.components.is_empty() {
        let _ = writeln!(output, "No components configured for this partial.");
    } else {
        for component in report.components.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) weight {:.2}",
                component.name, component.id, component.weight
            );
        }
    }

    let _ = writeln!(output);
    write_classification(&mut output, report.sum, &report.classification);
    if report.can_add_more {
        let _ = writeln!(output, "Remaining capacity {:.2}", report.remaining);
    }

    output
}

pub fn render_preview(preview: &BatchPreview) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Batch Check");
    let _ = writeln!(output, "{}", preview.key);
    let _ = writeln!(output);
    let _ = writeln!(output, "Current sum {:.2}", preview.current_sum);
    write_classification(&mut output, preview.hypothetical_sum, &preview.classification);

    if !preview.adjustments.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Adjusted Weights");
        for adjustment in preview.adjustments.iter() {
            let _ = writeln!(
                output,
                "- operation {}: {:.2} -> {:.2}",
                adjustment.index, adjustment.requested, adjustment.applied
            );
        }
    }

    if !preview.blocked_deletes.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Blocked Deletes");
        for blocked in preview.blocked_deletes.iter() {
            let _ = writeln!(
                output,
                "- operation {}: component {} is used by {}",
                blocked.index,
                blocked.component_id,
                blocked.activities.names.join(", ")
            );
        }
    }

    let _ = writeln!(output);
    if preview.ready {
        let _ = writeln!(output, "Ready to apply.");
    } else {
        let _ = writeln!(
            output,
            "Not ready: the partial must total exactly {}.",
            TARGET_TOTAL
        );
    }

    output
}

pub fn render_outcome(outcome: &BatchOutcome) -> String {
    let mut output = String::new();

    let status = match outcome.status {
        BatchStatus::Committed => "committed",
        BatchStatus::PartialSuccess => "committed with errors",
        BatchStatus::RolledBack => "rolled back",
    };
    let _ = writeln!(output, "# Batch Result");
    let _ = writeln!(output, "{} ({})", outcome.key, status);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Applied");

    if outcome.applied.is_empty() {
        let _ = writeln!(output, "No operations were applied.");
    } else {
        for applied in outcome.applied.iter() {
            match (&applied.name, applied.weight) {
                (Some(name), Some(weight)) => {
                    let _ = writeln!(
                        output,
                        "- {} {} ({}) weight {:.2}",
                        applied.kind, name, applied.component_id, weight
                    );
                }
                _ => {
                    let _ = writeln!(output, "- {} {}", applied.kind, applied.component_id);
                }
            }
        }
    }

    if !outcome.errors.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Errors");
        for failure in outcome.errors.iter() {
            let _ = writeln!(
                output,
                "- operation {} ({}): {}",
                failure.index, failure.kind, failure.message
            );
        }
    }

    if let (Some(sum), Some(classification)) = (outcome.final_sum, &outcome.classification) {
        let _ = writeln!(output);
        write_classification(&mut output, sum, classification);
    }

    output
}

pub fn render_single(outcome: &SingleOutcome) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "{} component {} in {}",
        outcome.kind, outcome.component_id, outcome.key
    );
    if let Some(weight) = outcome.weight {
        let adjusted = if outcome.was_adjusted {
            " (auto-adjusted)"
        } else {
            ""
        };
        let _ = writeln!(output, "Weight {:.2}{}", weight, adjusted);
    }
    write_classification(&mut output, outcome.sum, &outcome.classification);

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{
        AcademicPeriod, AppliedOperation, EvaluationKey, OperationFailure, OperationKind,
    };
    use crate::weights::WeightValidator;
    use uuid::Uuid;

    fn key() -> EvaluationKey {
        EvaluationKey {
            course_code: "MAT101".to_string(),
            teacher_code: "DOC-014".to_string(),
            partial: 2,
            period: AcademicPeriod::parse("20251").unwrap(),
        }
    }

    #[test]
    fn empty_report_says_so() {
        let classification = WeightValidator::default().classify(0.0);
        let report = WeightReport {
            key: key(),
            components: Vec::new(),
            sum: 0.0,
            remaining: 10.0,
            can_add_more: true,
            classification,
        };
        let rendered = render_weight_report(&report);
        assert!(rendered.contains("MAT101/DOC-014 partial 2 (20251)"));
        assert!(rendered.contains("No components configured"));
        assert!(rendered.contains("Missing 10.00 points"));
        assert!(rendered.contains("Remaining capacity 10.00"));
    }

    #[test]
    fn partial_outcome_lists_errors_and_real_sum() {
        let outcome = BatchOutcome {
            key: key(),
            status: BatchStatus::PartialSuccess,
            applied: vec![AppliedOperation {
                index: 0,
                kind: OperationKind::Create,
                component_id: Uuid::nil(),
                name: Some("Exam".to_string()),
                weight: Some(4.0),
            }],
            errors: vec![OperationFailure {
                index: 1,
                kind: OperationKind::Delete,
                component_id: Some(Uuid::nil()),
                error: ErrorKind::LinkageConflict,
                message: "component has 1 linked activities: Quiz 1".to_string(),
                blocking_activities: vec!["Quiz 1".to_string()],
            }],
            final_sum: Some(8.0),
            classification: Some(WeightValidator::default().classify(8.0)),
        };
        let rendered = render_outcome(&outcome);
        assert!(rendered.contains("committed with errors"));
        assert!(rendered.contains("- create Exam"));
        assert!(rendered.contains("operation 1 (delete)"));
        assert!(rendered.contains("Sum 8.00 of 10 (80%), incomplete"));
    }
}
