//! Aggregation helpers shared by the funnel, milestone and experience
//! summaries: safe ratios, means, percentiles, time windows and trend
//! classification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `num / den`, or 0 when the denominator is zero.
pub fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Index of the `p` percentile in a sorted slice of length `n`:
/// `floor(n * p)` clamped to `[0, n - 1]`.
pub fn percentile_index(n: usize, p: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let idx = (n as f64 * p).floor();
    if idx <= 0.0 {
        0
    } else {
        (idx as usize).min(n - 1)
    }
}

/// Percentile of an ascending-sorted slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    Some(sorted[percentile_index(sorted.len(), p)])
}

/// Longest look-back a query may ask for.
pub const MAX_PERIOD_DAYS: u32 = 3650;

/// Look-back window `[now - period_days, now]` split at its midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// Starts at the earliest representable instant when `period_days`
    /// reaches past chrono's range.
    pub fn trailing(now: DateTime<Utc>, period_days: u32) -> Self {
        let start = now
            .checked_sub_signed(Duration::days(i64::from(period_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }

    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    pub fn in_first_half(&self, ts: DateTime<Utc>) -> bool {
        ts < self.midpoint()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Compare second-half against first-half values; differences within
/// `±band` are stable. A half with no samples is not scored as zero, so a
/// window with data on only one side is `Stable` rather than a swing.
pub fn classify_trend(first: Option<f64>, second: Option<f64>, band: f64) -> Trend {
    match (first, second) {
        (Some(first), Some(second)) if second > first + band => Trend::Improving,
        (Some(first), Some(second)) if second < first - band => Trend::Declining,
        _ => Trend::Stable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_zero_denominator() {
        assert_eq!(ratio(5, 0), 0.0);
        assert_eq!(ratio(3, 4), 0.75);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
    }

    #[test]
    fn test_percentile_of_ten() {
        let sorted: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.5), Some(6.0));
        assert_eq!(percentile(&sorted, 0.95), Some(10.0));
    }

    #[test]
    fn test_percentile_small_samples() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[4.0], 0.5), Some(4.0));
        assert_eq!(percentile(&[4.0], 0.95), Some(4.0));
        assert_eq!(percentile(&[1.0, 9.0], 0.95), Some(9.0));
        assert_eq!(percentile_index(3, 1.0), 2);
    }

    #[test]
    fn test_window_halves() {
        let now = Utc::now();
        let window = Window::trailing(now, 30);
        assert!(window.contains(now - Duration::days(29)));
        assert!(!window.contains(now - Duration::days(31)));
        assert!(window.in_first_half(now - Duration::days(20)));
        assert!(!window.in_first_half(now - Duration::days(5)));
    }

    #[test]
    fn test_window_beyond_chrono_range() {
        let now = Utc::now();
        let window = Window::trailing(now, 4_000_000_000);
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);
        assert!(window.contains(now - Duration::days(365 * 100)));
        assert!(window.midpoint() < now);
    }

    #[test]
    fn test_trend_band() {
        assert_eq!(classify_trend(Some(3.9), Some(4.2), 0.2), Trend::Improving);
        assert_eq!(classify_trend(Some(4.0), Some(4.1), 0.2), Trend::Stable);
        assert_eq!(classify_trend(Some(4.5), Some(4.0), 0.2), Trend::Declining);
        assert_eq!(classify_trend(None, Some(5.0), 0.2), Trend::Stable);
        assert_eq!(classify_trend(Some(1.0), None, 0.2), Trend::Stable);
        assert_eq!(classify_trend(Some(20.0), Some(26.0), 5.0), Trend::Improving);
    }
}
