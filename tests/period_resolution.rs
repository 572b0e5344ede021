//! Period resolution against the in-memory store.

use evaluation_weights::fakes::MemoryStore;
use evaluation_weights::models::AcademicPeriod;
use evaluation_weights::PeriodResolver;

fn resolver() -> PeriodResolver {
    PeriodResolver::new(2025, None)
}

#[tokio::test]
async fn auto_uses_store_current_period() {
    let store = MemoryStore::with_current_period("20251");
    let period = resolver().resolve(&store, Some("auto")).await;
    assert_eq!(period.as_str(), "20251");
}

#[tokio::test]
async fn unset_markers_all_consult_store() {
    let store = MemoryStore::with_current_period("20243");
    for requested in [None, Some(""), Some("null"), Some("undefined")] {
        let period = resolver().resolve(&store, requested).await;
        assert_eq!(period.as_str(), "20243", "requested {requested:?}");
    }
}

#[tokio::test]
async fn valid_token_is_returned_unchanged() {
    let store = MemoryStore::with_current_period("20251");
    let period = resolver().resolve(&store, Some("20232")).await;
    assert_eq!(period.as_str(), "20232");
}

#[tokio::test]
async fn invalid_sub_period_falls_back_to_store() {
    let store = MemoryStore::with_current_period("20251");
    let period = resolver().resolve(&store, Some("20259")).await;
    assert_eq!(period.as_str(), "20251");
}

#[tokio::test]
async fn padded_token_falls_back_to_store() {
    let store = MemoryStore::with_current_period("20251");
    let period = resolver().resolve(&store, Some(" 20232")).await;
    assert_eq!(period.as_str(), "20251");
}

#[tokio::test]
async fn out_of_range_years_fall_back_to_store() {
    let store = MemoryStore::with_current_period("20252");
    assert_eq!(resolver().resolve(&store, Some("20191")).await.as_str(), "20252");
    assert_eq!(resolver().resolve(&store, Some("20281")).await.as_str(), "20252");
    assert_eq!(resolver().resolve(&store, Some("20271")).await.as_str(), "20271");
}

#[tokio::test]
async fn missing_current_period_uses_literal_fallback() {
    let store = MemoryStore::new();
    let period = resolver().resolve(&store, Some("garbage")).await;
    assert_eq!(period.as_str(), "20252");

    let period = resolver().resolve(&store, Some("auto")).await;
    assert_eq!(period.as_str(), "20252");
}

#[tokio::test]
async fn store_failure_degrades_to_fallback() {
    let store = MemoryStore::with_current_period("20251");
    store.fail_period_reads();
    let period = resolver().resolve(&store, None).await;
    assert_eq!(period, AcademicPeriod::fallback());
}

#[tokio::test]
async fn configured_fallback_is_used() {
    let store = MemoryStore::new();
    let resolver = PeriodResolver::new(2026, Some("20261"));
    assert_eq!(resolver.resolve(&store, None).await.as_str(), "20261");
}
