use crate::models::{Adjustment, EvaluationComponent, WeightClassification};

/// Points every partial must add up to.
pub const TARGET_TOTAL: f64 = 10.0;
/// Tolerance for "exactly complete".
pub const EPSILON: f64 = 0.01;
/// Window below completion (and entry granularity) treated as rounding noise.
pub const ADJUST_WINDOW: f64 = 0.1;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Remaining capacity is smaller than `candidate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityExceeded {
    pub excess: f64,
    pub remaining: f64,
}

/// Pure arithmetic over component weights for one evaluation key.
#[derive(Debug, Clone, Copy)]
pub struct WeightValidator {
    target: f64,
}

impl Default for WeightValidator {
    fn default() -> Self {
        Self {
            target: TARGET_TOTAL,
        }
    }
}

impl WeightValidator {
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn sum(&self, components: &[EvaluationComponent]) -> f64 {
        self.sum_weights(components.iter().map(|c| c.weight))
    }

    pub fn sum_weights(&self, weights: impl IntoIterator<Item = f64>) -> f64 {
        round2(weights.into_iter().sum())
    }

    pub fn classify(&self, sum: f64) -> WeightClassification {
        WeightClassification {
            valid: sum <= self.target + f64::EPSILON,
            complete: self.is_complete(sum),
            excess: round2((sum - self.target).max(0.0)),
            missing: round2((self.target - sum).max(0.0)),
            progress_percent: round2(sum / self.target * 100.0),
        }
    }

    pub fn is_complete(&self, sum: f64) -> bool {
        (sum - self.target).abs() <= EPSILON
    }

    pub fn remaining(&self, sum: f64) -> f64 {
        round2((self.target - sum).max(0.0))
    }

    /// Individual weights live in `(0, target]`.
    pub fn is_valid_weight(&self, weight: f64) -> bool {
        weight.is_finite() && weight > 0.0 && weight <= self.target
    }

    /// Snaps a candidate onto the target when the result would otherwise sit
    /// just short of it, or overshoot a gap smaller than one entry step.
    pub fn auto_adjust(&self, candidate: f64, sum_excluding: f64) -> Adjustment {
        let total = round2(sum_excluding + candidate);
        let remaining = round2(self.target - sum_excluding);

        let just_short = total > self.target - ADJUST_WINDOW && total < self.target;
        let overshoots_small_gap = total > self.target
            && remaining > 0.0
            && remaining < ADJUST_WINDOW
            && total - self.target < 2.0 * ADJUST_WINDOW;

        if (just_short || overshoots_small_gap) && !self.is_complete(total) {
            Adjustment {
                weight: remaining,
                was_adjusted: true,
            }
        } else {
            Adjustment {
                weight: candidate,
                was_adjusted: false,
            }
        }
    }

    /// Hard rule: a write may never push the key above the target.
    pub fn check_capacity(&self, candidate: f64, sum_excluding: f64) -> Result<(), CapacityExceeded> {
        let total = round2(sum_excluding + candidate);
        if total > self.target + EPSILON / 2.0 {
            Err(CapacityExceeded {
                excess: round2(total - self.target),
                remaining: self.remaining(sum_excluding),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn component(weight: f64) -> EvaluationComponent {
        EvaluationComponent {
            id: Uuid::new_v4(),
            name: "Quiz".to_string(),
            weight,
        }
    }

    #[test]
    fn sum_rounds_to_two_decimals() {
        let validator = WeightValidator::default();
        let components = vec![component(0.1), component(0.2), component(3.333)];
        assert_eq!(validator.sum(&components), 3.63);
    }

    #[test]
    fn sum_is_order_independent() {
        let validator = WeightValidator::default();
        let forward = vec![component(2.5), component(0.1), component(4.4), component(3.0)];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(validator.sum(&forward), validator.sum(&reversed));
        assert_eq!(validator.sum(&forward), 10.0);
    }

    #[test]
    fn classify_complete_sum() {
        let classification = WeightValidator::default().classify(10.0);
        assert_eq!(
            classification,
            WeightClassification {
                valid: true,
                complete: true,
                excess: 0.0,
                missing: 0.0,
                progress_percent: 100.0,
            }
        );
    }

    #[test]
    fn classify_reports_excess_and_missing() {
        let validator = WeightValidator::default();
        let over = validator.classify(10.5);
        assert!(!over.valid);
        assert!(!over.complete);
        assert_eq!(over.excess, 0.5);
        assert_eq!(over.missing, 0.0);

        let under = validator.classify(7.5);
        assert!(under.valid);
        assert!(!under.complete);
        assert_eq!(under.missing, 2.5);
        assert_eq!(under.progress_percent, 75.0);
    }

    #[test]
    fn classify_tolerates_epsilon() {
        assert!(WeightValidator::default().classify(9.995).complete);
        assert!(!WeightValidator::default().classify(9.98).complete);
    }

    #[test]
    fn auto_adjust_fills_small_gap() {
        let adjustment = WeightValidator::default().auto_adjust(0.2, 9.95);
        assert!(adjustment.was_adjusted);
        assert_eq!(adjustment.weight, 0.05);
    }

    #[test]
    fn auto_adjust_snaps_just_short_totals() {
        let adjustment = WeightValidator::default().auto_adjust(2.95, 7.0);
        assert!(adjustment.was_adjusted);
        assert_eq!(adjustment.weight, 3.0);
    }

    #[test]
    fn auto_adjust_leaves_ordinary_weights() {
        let adjustment = WeightValidator::default().auto_adjust(3.0, 5.0);
        assert!(!adjustment.was_adjusted);
        assert_eq!(adjustment.weight, 3.0);

        let exact = WeightValidator::default().auto_adjust(5.0, 5.0);
        assert!(!exact.was_adjusted);
        assert_eq!(exact.weight, 5.0);
    }

    #[test]
    fn auto_adjust_does_not_hide_real_overshoot() {
        let adjustment = WeightValidator::default().auto_adjust(5.0, 9.95);
        assert!(!adjustment.was_adjusted);
        assert_eq!(adjustment.weight, 5.0);
    }

    #[test]
    fn capacity_rejects_overshoot_with_details() {
        let err = WeightValidator::default()
            .check_capacity(4.0, 7.5)
            .unwrap_err();
        assert_eq!(err.excess, 1.5);
        assert_eq!(err.remaining, 2.5);
        assert!(WeightValidator::default().check_capacity(2.5, 7.5).is_ok());
    }

    #[test]
    fn weight_bounds() {
        let validator = WeightValidator::default();
        assert!(!validator.is_valid_weight(0.0));
        assert!(!validator.is_valid_weight(-1.0));
        assert!(!validator.is_valid_weight(10.5));
        assert!(!validator.is_valid_weight(f64::NAN));
        assert!(validator.is_valid_weight(0.1));
        assert!(validator.is_valid_weight(10.0));
    }
}
