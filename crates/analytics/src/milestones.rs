//! Milestone timer: durations between funnel stages, summarised as
//! average/median/p95 minutes per milestone.

use chrono::{DateTime, Utc};
use quality_core::error::{QualityError, QualityResult};
use quality_core::funnel::{Milestone, MilestoneRecord, MilestoneStats};
use quality_core::stats::{mean, percentile, Window};
use quality_core::store::MilestoneStore;
use quality_core::types::Metadata;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct MilestoneTimer {
    store: Arc<dyn MilestoneStore>,
}

impl MilestoneTimer {
    pub fn new(store: Arc<dyn MilestoneStore>) -> Self {
        Self { store }
    }

    pub fn record(
        &self,
        domain_id: &str,
        user_id: &str,
        milestone: Milestone,
        duration_ms: u64,
        metadata: Metadata,
    ) -> QualityResult<MilestoneRecord> {
        if domain_id.trim().is_empty() {
            return Err(QualityError::Validation("domain_id must not be empty".into()));
        }
        let record = MilestoneRecord {
            id: Uuid::new_v4(),
            domain_id: domain_id.to_string(),
            user_id: user_id.to_string(),
            milestone,
            duration_ms,
            timestamp: Utc::now(),
            metadata,
        };

        if let Err(e) = self.store.append_milestone(record.clone()) {
            warn!(error = %e, domain_id = %domain_id, milestone = milestone.as_str(), "Failed to record milestone");
            return Err(e);
        }
        metrics::counter!("quality.milestones.recorded").increment(1);
        debug!(
            domain_id = %domain_id,
            milestone = milestone.as_str(),
            minutes = record.duration_minutes(),
            "Milestone recorded"
        );
        Ok(record)
    }

    pub fn average_times(&self, domain_id: &str, period_days: u32) -> BTreeMap<Milestone, MilestoneStats> {
        self.average_times_at(domain_id, period_days, Utc::now())
    }

    /// Per-milestone statistics over the trailing window ending at `now`.
    /// Milestones without samples are omitted.
    pub fn average_times_at(
        &self,
        domain_id: &str,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> BTreeMap<Milestone, MilestoneStats> {
        let window = Window::trailing(now, period_days);
        match self.store.milestones(domain_id, window.start) {
            Ok(records) => {
                let in_window: Vec<MilestoneRecord> = records
                    .into_iter()
                    .filter(|r| window.contains(r.timestamp))
                    .collect();
                summarize(&in_window)
            }
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to read milestones");
                BTreeMap::new()
            }
        }
    }
}

pub fn summarize(records: &[MilestoneRecord]) -> BTreeMap<Milestone, MilestoneStats> {
    let mut minutes: BTreeMap<Milestone, Vec<f64>> = BTreeMap::new();
    for record in records {
        minutes
            .entry(record.milestone)
            .or_default()
            .push(record.duration_minutes());
    }

    minutes
        .into_iter()
        .filter_map(|(milestone, mut times)| {
            times.sort_by(f64::total_cmp);
            let stats = MilestoneStats {
                avg: mean(&times)?,
                p50: percentile(&times, 0.5)?,
                p95: percentile(&times, 0.95)?,
                samples: times.len(),
            };
            Some((milestone, stats))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quality_store::InMemoryStore;

    fn record(milestone: Milestone, minutes: u64, at: DateTime<Utc>) -> MilestoneRecord {
        MilestoneRecord {
            id: Uuid::new_v4(),
            domain_id: "acme.cl".into(),
            user_id: "e1".into(),
            milestone,
            duration_ms: minutes * 60_000,
            timestamp: at,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_summary_of_ten_samples() {
        let now = Utc::now();
        let records: Vec<MilestoneRecord> = (1..=10)
            .rev()
            .map(|m| record(Milestone::FeedbackToEval, m, now))
            .collect();
        let stats = summarize(&records);

        let feedback = stats[&Milestone::FeedbackToEval];
        assert_eq!(feedback.avg, 5.5);
        assert_eq!(feedback.p50, 6.0);
        assert_eq!(feedback.p95, 10.0);
        assert_eq!(feedback.samples, 10);
        assert!(!stats.contains_key(&Milestone::EvalToApprove));
    }

    #[test]
    fn test_single_sample() {
        let stats = summarize(&[record(Milestone::ApproveToApply, 3, Utc::now())]);
        let only = stats[&Milestone::ApproveToApply];
        assert_eq!((only.avg, only.p50, only.p95), (3.0, 3.0, 3.0));
    }

    #[test]
    fn test_timer_window() {
        let store = Arc::new(InMemoryStore::new());
        let timer = MilestoneTimer::new(store.clone());
        timer
            .record("acme.cl", "e1", Milestone::EvalToApprove, 120_000, Metadata::new())
            .unwrap();
        store
            .append_milestone(record(Milestone::EvalToApprove, 60, Utc::now() - Duration::days(40)))
            .unwrap();

        let stats = timer.average_times("acme.cl", 30);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[&Milestone::EvalToApprove].avg, 2.0);
        assert!(timer.average_times("other.cl", 30).is_empty());

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("eval_to_approve").is_some());
    }

    struct FailingStore;

    impl MilestoneStore for FailingStore {
        fn append_milestone(&self, _record: MilestoneRecord) -> QualityResult<()> {
            Err(QualityError::Store("unavailable".into()))
        }
        fn milestones(&self, _domain_id: &str, _since: DateTime<Utc>) -> QualityResult<Vec<MilestoneRecord>> {
            Err(QualityError::Store("unavailable".into()))
        }
    }

    #[test]
    fn test_store_failure() {
        let timer = MilestoneTimer::new(Arc::new(FailingStore));
        assert!(timer.average_times("acme.cl", 30).is_empty());
        assert!(timer
            .record("acme.cl", "e1", Milestone::ApplyToValidate, 1_000, Metadata::new())
            .is_err());
    }
}
