use chrono::{Datelike, Utc};
use tracing::{debug, warn};

use crate::models::AcademicPeriod;
use crate::store::EvaluationStore;

const UNSET_MARKERS: [&str; 3] = ["auto", "null", "undefined"];

/// Turns a client-supplied period token into a canonical period. Never
/// fails: every path ends in some period.
#[derive(Debug, Clone)]
pub struct PeriodResolver {
    current_year: i32,
    fallback: AcademicPeriod,
}

impl Default for PeriodResolver {
    fn default() -> Self {
        Self::new(Utc::now().year(), None)
    }
}

impl PeriodResolver {
    /// An invalid `fallback` is ignored in favour of
    /// [`crate::models::DEFAULT_FALLBACK_PERIOD`].
    pub fn new(current_year: i32, fallback: Option<&str>) -> Self {
        let fallback = fallback
            .and_then(AcademicPeriod::parse)
            .unwrap_or_else(AcademicPeriod::fallback);
        Self {
            current_year,
            fallback,
        }
    }

    pub fn fallback(&self) -> &AcademicPeriod {
        &self.fallback
    }

    pub fn is_unset(requested: Option<&str>) -> bool {
        match requested.map(str::trim) {
            None => true,
            Some(token) => token.is_empty() || UNSET_MARKERS.contains(&token),
        }
    }

    pub async fn resolve<S>(&self, store: &S, requested: Option<&str>) -> AcademicPeriod
    where
        S: EvaluationStore + ?Sized,
    {
        if !Self::is_unset(requested) {
            let token = requested.unwrap_or_default();
            if let Some(period) = AcademicPeriod::parse_within(token, self.current_year) {
                return period;
            }
            debug!(token, "requested period rejected, consulting store");
        }

        match store.fetch_current_period().await {
            Ok(Some(period)) => period,
            Ok(None) => {
                warn!(fallback = %self.fallback, "no current period configured");
                self.fallback.clone()
            }
            Err(err) => {
                warn!(error = %err, fallback = %self.fallback, "current period lookup failed");
                self.fallback.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_FALLBACK_PERIOD;

    #[test]
    fn markers_count_as_unset() {
        assert!(PeriodResolver::is_unset(None));
        assert!(PeriodResolver::is_unset(Some("")));
        assert!(PeriodResolver::is_unset(Some("  ")));
        assert!(PeriodResolver::is_unset(Some("auto")));
        assert!(PeriodResolver::is_unset(Some("null")));
        assert!(PeriodResolver::is_unset(Some("undefined")));
        assert!(!PeriodResolver::is_unset(Some("20251")));
    }

    #[test]
    fn bad_fallback_is_replaced() {
        let resolver = PeriodResolver::new(2025, Some("20259"));
        assert_eq!(resolver.fallback().as_str(), DEFAULT_FALLBACK_PERIOD);

        let resolver = PeriodResolver::new(2025, Some("20243"));
        assert_eq!(resolver.fallback().as_str(), "20243");
    }
}
