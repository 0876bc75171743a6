use super::*;
use crate::error::{AppError, AppResult, MetricsError};
use crate::time::Timestamp;

fn lg_k(value: u8) -> AppResult<LgK> {
    Ok(LgK::try_from(value)?)
}

fn assert_non_decreasing(precision: LgK, coupons: impl Iterator<Item = u64>) -> AppResult<()> {
    let mut previous = icon::estimate(precision, 0);
    for c in coupons {
        let current = icon::estimate(precision, c);
        if current < previous {
            return Err(AppError::metrics(MetricsError::TestExpectationValue {
                message: "ICON estimate decreased",
                value: format!("lg_k={} c={}", precision.get(), c),
            }));
        }
        previous = current;
    }
    Ok(())
}

#[test]
fn lg_k_rejects_out_of_range_precision() {
    assert!(LgK::try_from(3).is_err());
    assert!(LgK::try_from(27).is_err());
    assert!(LgK::try_from(icon::MIN_LG_K).is_ok());
    assert!(LgK::try_from(icon::MAX_LG_K).is_ok());
}

#[test]
fn icon_is_exact_for_zero_and_one_coupon() -> AppResult<()> {
    for value in icon::MIN_LG_K..=icon::MAX_LG_K {
        let precision = lg_k(value)?;
        if icon::estimate(precision, 0).to_bits() != 0.0_f64.to_bits() {
            return Err(AppError::metrics("Expected zero estimate for zero coupons"));
        }
        if icon::estimate(precision, 1).to_bits() != 1.0_f64.to_bits() {
            return Err(AppError::metrics("Expected unit estimate for one coupon"));
        }
    }
    Ok(())
}

#[test]
fn icon_is_monotone_over_full_range_for_small_precision() -> AppResult<()> {
    for value in icon::MIN_LG_K..=10 {
        let precision = lg_k(value)?;
        let max_coupons = u64::try_from(precision.rows())
            .unwrap_or(u64::MAX)
            .saturating_mul(64);
        assert_non_decreasing(precision, 1..=max_coupons)?;
    }
    Ok(())
}

#[test]
fn icon_is_monotone_across_crossover_for_every_precision() -> AppResult<()> {
    for value in icon::MIN_LG_K..=icon::MAX_LG_K {
        let precision = lg_k(value)?;
        let k = u64::try_from(precision.rows()).unwrap_or(u64::MAX);
        // Crossover sits between 5.6k and 5.7k.
        let low = k.saturating_mul(55).saturating_div(10);
        let high = k.saturating_mul(58).saturating_div(10);
        let step = (k / 1024).max(1);
        assert_non_decreasing(precision, (low..=high).step_by(usize::try_from(step).unwrap_or(1)))?;
        // Coarse sweep of the rest of the working range.
        let coarse = (k / 16).max(1);
        assert_non_decreasing(
            precision,
            (1..=k.saturating_mul(20)).step_by(usize::try_from(coarse).unwrap_or(1)),
        )?;
    }
    Ok(())
}

#[test]
fn cardinality_counts_trivial_cases_exactly() -> AppResult<()> {
    let mut sketch = Cardinality::new(lg_k(11)?);
    if sketch.estimate() != 0 {
        return Err(AppError::metrics("Expected empty sketch to estimate 0"));
    }
    sketch.update(b"10.0.0.1".as_slice());
    sketch.update(b"10.0.0.1".as_slice());
    if sketch.estimate() != 1 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Expected one distinct value",
            value: sketch.estimate().to_string(),
        }));
    }
    Ok(())
}

#[test]
fn cardinality_estimate_is_within_ten_percent() -> AppResult<()> {
    let mut sketch = Cardinality::new(lg_k(11)?);
    let distinct = 20_000u32;
    for value in 0..distinct {
        sketch.observe(&value);
    }
    let estimate = sketch.estimate();
    let truth = u64::from(distinct);
    if estimate.abs_diff(truth).saturating_mul(10) > truth {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Estimate outside tolerance",
            value: estimate.to_string(),
        }));
    }
    Ok(())
}

#[test]
fn cardinality_merge_matches_single_sketch() -> AppResult<()> {
    let precision = lg_k(10)?;
    let mut single = Cardinality::new(precision);
    let mut left = Cardinality::new(precision);
    let mut right = Cardinality::new(precision);
    for value in 0..5_000u32 {
        single.observe(&value);
        if value % 3 == 0 {
            left.observe(&value);
        } else {
            right.observe(&value);
        }
    }
    // Overlap must not be double counted.
    for value in 0..500u32 {
        right.observe(&value);
    }
    left.merge(&right)?;
    if left.coupons() != single.coupons() || left.estimate() != single.estimate() {
        return Err(AppError::metrics("Merged sketch differs from single sketch"));
    }
    Ok(())
}

#[test]
fn cardinality_merge_rejects_mismatched_precision() -> AppResult<()> {
    let mut left = Cardinality::new(lg_k(10)?);
    let right = Cardinality::new(lg_k(12)?);
    match left.merge(&right) {
        Err(MetricsError::MergeMismatch { left: 10, right: 12, .. }) => Ok(()),
        Err(_) | Ok(()) => Err(AppError::metrics("Expected merge mismatch")),
    }
}

#[test]
fn cardinality_grows_with_new_values() -> AppResult<()> {
    let mut sketch = Cardinality::new(lg_k(8)?);
    let mut previous = 0;
    for value in 0..10_000u32 {
        sketch.observe(&value);
        let current = sketch.estimate();
        if current < previous {
            return Err(AppError::metrics("Cardinality estimate decreased"));
        }
        previous = current;
    }
    Ok(())
}

#[test]
fn top_n_keeps_heavy_hitters() -> AppResult<()> {
    let mut top = TopN::new(16);
    for round in 0..100u32 {
        top.update(&"heavy".to_owned());
        if round % 2 == 0 {
            top.update(&"medium".to_owned());
        }
        top.update(&format!("noise-{round}"));
    }
    let entries = top.top(2);
    let names: Vec<&str> = entries.iter().map(|entry| entry.item.as_str()).collect();
    if names != ["heavy", "medium"] {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected heavy hitters",
            value: format!("{names:?}"),
        }));
    }
    for entry in &entries {
        if entry.upper_bound < entry.count {
            return Err(AppError::metrics("Upper bound below count"));
        }
    }
    Ok(())
}

#[test]
fn top_n_merge_sums_counts() -> AppResult<()> {
    let mut left = TopN::new(8);
    let mut right = TopN::new(8);
    left.update_weighted("a", 5);
    left.update_weighted("b", 1);
    right.update_weighted("a", 2);
    right.update_weighted("c", 4);
    left.merge(&right)?;
    let entries = left.estimate();
    let first = entries
        .first()
        .ok_or_else(|| AppError::metrics("Missing entries"))?;
    if first.item != "a" || first.count != 7 || entries.len() != 3 {
        return Err(AppError::metrics("Unexpected merged counts"));
    }
    let mut mismatched = TopN::new(2);
    if mismatched.merge(&TopN::<&str>::new(3)).is_ok() {
        return Err(AppError::metrics("Expected capacity mismatch"));
    }
    Ok(())
}

#[test]
fn quantile_summary_and_merge() -> AppResult<()> {
    let mut left = Quantile::new()?;
    let mut right = Quantile::new()?;
    for value in 1..=50u64 {
        left.record(value);
    }
    for value in 51..=100u64 {
        right.record(value);
    }
    left.merge(&right)?;
    let summary = left.summary();
    if summary.count != 100 || summary.min != 1 || summary.max != 100 {
        return Err(AppError::metrics("Unexpected merged summary bounds"));
    }
    if !(49..=51).contains(&summary.p50) || !(89..=91).contains(&summary.p90) {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected percentiles",
            value: format!("{summary:?}"),
        }));
    }
    if Quantile::new()?.quantile(0.5).is_some() {
        return Err(AppError::metrics("Empty quantile should have no value"));
    }
    Ok(())
}

#[test]
fn quantile_tracks_values_beyond_initial_range() -> AppResult<()> {
    let mut latencies = Quantile::new()?;
    for value in [1_500u64, 3_000, 40_000, 1_000_000, 5_000_000] {
        latencies.update(&value);
    }
    let summary = latencies.summary();
    if summary.count != 5 || !(1_499..=1_501).contains(&summary.min) {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected minimum",
            value: format!("{summary:?}"),
        }));
    }
    if !(4_990_000..=5_010_000).contains(&summary.max)
        || !(39_950..=40_050).contains(&summary.p50)
    {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Large values were clamped",
            value: format!("{summary:?}"),
        }));
    }
    Ok(())
}

#[test]
fn counter_and_gauge_follow_aggregate_operator() -> AppResult<()> {
    let mut total = Counter::new();
    total.add(3);
    let mut other = Counter::new();
    other.add(4);
    total.merge_with(&other, Aggregate::Sum);
    if total.value() != 7 {
        return Err(AppError::metrics("Expected additive merge"));
    }
    total.merge_with(&other, Aggregate::Latest);
    if total.value() != 4 {
        return Err(AppError::metrics("Expected latest-value merge"));
    }

    let mut gauge = Gauge::default();
    gauge.set(10);
    gauge.merge(&Gauge::default())?;
    if gauge.value() != Some(10) {
        return Err(AppError::metrics("Unset gauge must not clear value"));
    }
    let mut newer = Gauge::default();
    newer.set(2);
    gauge.merge(&newer)?;
    if gauge.estimate() != Some(2) {
        return Err(AppError::metrics("Expected newest gauge value"));
    }

    let mut reading = Gauge::default();
    reading.set(7);
    reading.merge_with(&Gauge::default(), Aggregate::Latest);
    if reading.value() != Some(7) {
        return Err(AppError::metrics("Idle period must not clear the latest reading"));
    }
    reading.merge_with(&newer, Aggregate::Sum);
    let mut unset = Gauge::default();
    unset.merge_with(&newer, Aggregate::Sum);
    if reading.value() != Some(9) || unset.value() != Some(2) {
        return Err(AppError::metrics("Expected additive gauge merge"));
    }
    Ok(())
}

#[test]
fn rate_tracks_completed_seconds() -> AppResult<()> {
    let mut rate = Rate::new()?;
    for millis in (0..1_000u64).step_by(100) {
        rate.update(&Timestamp::from_millis(10_000 + millis));
    }
    if rate.live_rate() != 0 {
        return Err(AppError::metrics("Rate must wait for the second to finish"));
    }
    rate.update(&Timestamp::from_secs(11));
    if rate.live_rate() != 10 {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected live rate",
            value: rate.live_rate().to_string(),
        }));
    }
    // Idle gap is back-filled with zero-rate seconds.
    rate.update(&Timestamp::from_secs(14));
    let summary = rate.summary(true);
    if summary.per_second.count != 4 || summary.live != Some(0) {
        return Err(AppError::metrics(MetricsError::TestExpectationValue {
            message: "Unexpected rate summary",
            value: format!("{summary:?}"),
        }));
    }
    Ok(())
}

#[test]
fn rate_cancel_freezes_last_value() -> AppResult<()> {
    let mut rate = Rate::new()?;
    for _ in 0..5 {
        rate.update(&Timestamp::from_secs(100));
    }
    rate.cancel();
    if !rate.is_frozen() || rate.live_rate() != 5 {
        return Err(AppError::metrics("Cancel must flush and freeze"));
    }
    rate.update(&Timestamp::from_secs(200));
    if rate.live_rate() != 5 || rate.estimate().count != 1 {
        return Err(AppError::metrics("Frozen rate must ignore new events"));
    }
    Ok(())
}
