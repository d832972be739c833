//! Reduction of a daily bucket sequence into the weekly scalar.

use crate::catalog::AggregationPolicy;
use crate::query::DailyBucket;

/// Reduce buckets to the weekly total under the metric's policy.
///
/// `Sum` adds every bucket value. `MostRecent` takes the latest bucket that
/// actually carried a sample, skipping empty-window gaps, and yields 0 when
/// the whole window is empty. Pure and deterministic: re-running it on the
/// same snapshot never drifts or double-counts.
pub fn weekly_total(buckets: &[DailyBucket], policy: AggregationPolicy) -> f64 {
    match policy {
        AggregationPolicy::Sum => buckets.iter().map(|b| b.value).sum(),
        AggregationPolicy::MostRecent => buckets
            .iter()
            .rev()
            .find(|b| b.has_samples())
            .map(|b| b.value)
            .unwrap_or(0.0),
    }
}
