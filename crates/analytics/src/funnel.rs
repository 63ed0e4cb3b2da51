//! Funnel aggregation: stage events in, per-funnel conversion rates out.
//!
//! Raw interaction and queue-entry events are never logged, so each funnel's
//! entry count is back-calculated from its anchor stage and an assumed
//! baseline rate. Results carry `entry_count_is_estimated` so callers never
//! mistake that figure for a measurement.

use chrono::{DateTime, NaiveDate, Utc};
use quality_core::config::FunnelConfig;
use quality_core::error::{QualityError, QualityResult};
use quality_core::funnel::{
    ConversionRates, DailyFunnelSnapshot, FunnelEvent, FunnelStage, FunnelType, StageRate,
};
use quality_core::stats::{ratio, Window};
use quality_core::store::{FunnelEventStore, SnapshotStore};
use quality_core::types::Metadata;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

// ─── Funnel Shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum StageSource {
    /// Back-calculated from the anchor stage.
    Entry,
    Counted(FunnelStage),
    /// Events flagged `ai_assisted` in their metadata.
    AiAssisted,
}

#[derive(Debug, Clone, Copy)]
struct StageSpec {
    name: &'static str,
    source: StageSource,
    /// Index of the stage this one's rate is measured against.
    against: Option<usize>,
}

impl StageSpec {
    const fn entry(name: &'static str) -> Self {
        Self {
            name,
            source: StageSource::Entry,
            against: None,
        }
    }

    const fn counted(name: &'static str, stage: FunnelStage, against: usize) -> Self {
        Self {
            name,
            source: StageSource::Counted(stage),
            against: Some(against),
        }
    }
}

struct FunnelShape {
    anchor: FunnelStage,
    baseline: f64,
    stages: &'static [StageSpec],
}

const USER_STAGES: &[StageSpec] = &[
    StageSpec::entry("Interactions"),
    StageSpec::counted("Feedback", FunnelStage::Feedback, 0),
    StageSpec::counted("Priority", FunnelStage::Priority, 1),
    StageSpec::counted("Evaluated", FunnelStage::Evaluated, 2),
    StageSpec::counted("Approved", FunnelStage::Approved, 3),
    StageSpec::counted("Applied", FunnelStage::Applied, 4),
    StageSpec::counted("Validated", FunnelStage::Validated, 5),
];

// AI-Assisted is a side measurement: Approved is still measured against
// Evaluated.
const EXPERT_STAGES: &[StageSpec] = &[
    StageSpec::entry("Queue"),
    StageSpec::counted("Evaluated", FunnelStage::Evaluated, 0),
    StageSpec {
        name: "AI-Assisted",
        source: StageSource::AiAssisted,
        against: Some(1),
    },
    StageSpec::counted("Approved", FunnelStage::Approved, 1),
    StageSpec::counted("Applied", FunnelStage::Applied, 3),
    StageSpec::counted("Validated", FunnelStage::Validated, 4),
];

const ADMIN_STAGES: &[StageSpec] = &[
    StageSpec::entry("Proposals"),
    StageSpec {
        name: "Reviewed",
        source: StageSource::Entry,
        against: Some(0),
    },
    StageSpec::counted("Approved", FunnelStage::Approved, 0),
    StageSpec::counted("Applied", FunnelStage::Applied, 2),
    StageSpec::counted("Success", FunnelStage::Validated, 3),
];

impl FunnelShape {
    fn of(funnel_type: FunnelType) -> Self {
        match funnel_type {
            FunnelType::User => Self {
                anchor: FunnelStage::Feedback,
                baseline: 0.37,
                stages: USER_STAGES,
            },
            FunnelType::Expert => Self {
                anchor: FunnelStage::Evaluated,
                baseline: 0.81,
                stages: EXPERT_STAGES,
            },
            FunnelType::Admin => Self {
                anchor: FunnelStage::Approved,
                baseline: 0.79,
                stages: ADMIN_STAGES,
            },
        }
    }
}

/// Ordered stage names of a funnel shape.
pub fn stage_names(funnel_type: FunnelType) -> Vec<&'static str> {
    FunnelShape::of(funnel_type)
        .stages
        .iter()
        .map(|s| s.name)
        .collect()
}

/// `round(anchor / baseline)`, 0 when nothing reached the anchor stage.
pub fn infer_entry_count(anchor_count: u64, baseline: f64) -> u64 {
    if anchor_count == 0 || baseline <= 0.0 {
        return 0;
    }
    (anchor_count as f64 / baseline).round() as u64
}

fn bounded(rate: f64) -> f64 {
    rate.clamp(0.0, 1.0)
}

/// Build the conversion view for one funnel from raw events. Events outside
/// the trailing window or for other domains are ignored.
pub fn compute_conversion_rates(
    funnel_type: FunnelType,
    domain_id: &str,
    period_days: u32,
    events: &[FunnelEvent],
    now: DateTime<Utc>,
) -> ConversionRates {
    let window = Window::trailing(now, period_days);
    let mut counts: BTreeMap<FunnelStage, u64> = BTreeMap::new();
    let mut ai_assisted = 0u64;
    for event in events
        .iter()
        .filter(|e| e.domain_id == domain_id && window.contains(e.timestamp))
    {
        *counts.entry(event.stage).or_insert(0) += 1;
        if event.ai_assisted() {
            ai_assisted += 1;
        }
    }

    let shape = FunnelShape::of(funnel_type);
    let anchor = counts.get(&shape.anchor).copied().unwrap_or(0);
    let entry = infer_entry_count(anchor, shape.baseline);

    let mut stages: Vec<StageRate> = Vec::with_capacity(shape.stages.len());
    for spec in shape.stages {
        let (count, estimated) = match spec.source {
            StageSource::Entry => (entry, true),
            StageSource::Counted(stage) => (counts.get(&stage).copied().unwrap_or(0), false),
            StageSource::AiAssisted => (ai_assisted, false),
        };
        let rate = match spec.against.and_then(|idx| stages.get(idx)) {
            Some(base) => bounded(ratio(count, base.count)),
            None if entry > 0 => 1.0,
            None => 0.0,
        };
        stages.push(StageRate {
            name: spec.name.to_string(),
            count,
            rate,
            estimated,
        });
    }

    let last = stages.last().map(|s| s.count).unwrap_or(0);
    ConversionRates {
        funnel_type,
        domain_id: domain_id.to_string(),
        period_days,
        overall_conversion: bounded(ratio(last, entry)),
        stages,
        entry_count_is_estimated: true,
        calculated_at: now,
    }
}

// ─── Aggregator ─────────────────────────────────────────────────────────────

/// Records funnel stage events and serves conversion views over them.
pub struct FunnelAggregator {
    events: Arc<dyn FunnelEventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    config: FunnelConfig,
}

impl FunnelAggregator {
    pub fn new(
        events: Arc<dyn FunnelEventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: &FunnelConfig,
    ) -> Self {
        Self {
            events,
            snapshots,
            config: config.clone(),
        }
    }

    pub fn default_period_days(&self) -> u32 {
        self.config.default_period_days
    }

    pub fn record_event(
        &self,
        domain_id: &str,
        user_id: &str,
        user_email: &str,
        stage: FunnelStage,
        metadata: Metadata,
    ) -> QualityResult<FunnelEvent> {
        self.record(FunnelEvent::new(domain_id, user_id, user_email, stage, metadata))
    }

    /// Append an event. The daily stage counter is updated best-effort; only
    /// a failed append is reported to the caller.
    pub fn record(&self, event: FunnelEvent) -> QualityResult<FunnelEvent> {
        if event.domain_id.trim().is_empty() {
            return Err(QualityError::Validation("domain_id must not be empty".into()));
        }

        if let Err(e) = self.events.append_funnel_event(event.clone()) {
            metrics::counter!("quality.funnel.store_errors").increment(1);
            warn!(error = %e, domain_id = %event.domain_id, stage = %event.stage, "Failed to record funnel event");
            return Err(e);
        }
        metrics::counter!("quality.funnel.events_recorded").increment(1);

        if let Err(e) = self.events.increment_daily_stage(
            &event.domain_id,
            event.timestamp.date_naive(),
            event.stage,
        ) {
            warn!(error = %e, domain_id = %event.domain_id, "Failed to update daily stage counter");
        }

        debug!(
            domain_id = %event.domain_id,
            user_id = %event.user_id,
            stage = %event.stage,
            "Funnel event recorded"
        );
        Ok(event)
    }

    pub fn conversion_rates(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
        period_days: u32,
    ) -> ConversionRates {
        self.conversion_rates_at(domain_id, funnel_type, period_days, Utc::now())
    }

    /// Conversion view as of `now`. A failed read yields an empty view with
    /// no stages.
    pub fn conversion_rates_at(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> ConversionRates {
        let window = Window::trailing(now, period_days);
        let events = match self.events.funnel_events(domain_id, window.start) {
            Ok(events) => events,
            Err(e) => {
                metrics::counter!("quality.funnel.store_errors").increment(1);
                warn!(error = %e, domain_id = %domain_id, funnel_type = %funnel_type, "Failed to read funnel events");
                return ConversionRates::empty(domain_id, funnel_type, period_days);
            }
        };

        let rates = compute_conversion_rates(funnel_type, domain_id, period_days, &events, now);
        debug!(
            domain_id = %domain_id,
            funnel_type = %funnel_type,
            events = events.len(),
            overall = rates.overall_conversion,
            "Conversion rates computed"
        );

        if self.config.persist_snapshots {
            self.persist_snapshot(&rates, now);
        }
        rates
    }

    fn persist_snapshot(&self, rates: &ConversionRates, now: DateTime<Utc>) {
        let snapshot = DailyFunnelSnapshot {
            domain_id: rates.domain_id.clone(),
            funnel_type: rates.funnel_type,
            date: now.date_naive(),
            rates: rates.clone(),
            updated_at: now,
        };
        if let Err(e) = self.snapshots.save_funnel_snapshot(snapshot) {
            warn!(error = %e, domain_id = %rates.domain_id, "Failed to save funnel snapshot");
        }
    }

    pub fn snapshot(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
        date: NaiveDate,
    ) -> QualityResult<Option<DailyFunnelSnapshot>> {
        self.snapshots.funnel_snapshot(domain_id, funnel_type, date)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use quality_core::funnel::{BottleneckReport, DailyStageCounts};
    use quality_store::InMemoryStore;

    pub(crate) fn events(
        domain_id: &str,
        now: DateTime<Utc>,
        counts: &[(FunnelStage, usize)],
    ) -> Vec<FunnelEvent> {
        counts
            .iter()
            .flat_map(|&(stage, n)| {
                (0..n).map(move |i| {
                    FunnelEvent::new(domain_id, format!("u{i}"), format!("u{i}@{domain_id}"), stage, Metadata::new())
                        .at(now - Duration::hours(1 + i as i64))
                })
            })
            .collect()
    }

    pub(crate) fn acme_user_events(now: DateTime<Utc>) -> Vec<FunnelEvent> {
        events(
            "acme.cl",
            now,
            &[
                (FunnelStage::Feedback, 100),
                (FunnelStage::Priority, 40),
                (FunnelStage::Evaluated, 32),
                (FunnelStage::Approved, 24),
                (FunnelStage::Applied, 23),
                (FunnelStage::Validated, 20),
            ],
        )
    }

    /// Store whose every call fails.
    pub(crate) struct FailingStore;

    fn unavailable<T>() -> QualityResult<T> {
        Err(QualityError::Store("unavailable".into()))
    }

    impl FunnelEventStore for FailingStore {
        fn append_funnel_event(&self, _event: FunnelEvent) -> QualityResult<()> {
            unavailable()
        }
        fn funnel_events(&self, _domain_id: &str, _since: DateTime<Utc>) -> QualityResult<Vec<FunnelEvent>> {
            unavailable()
        }
        fn increment_daily_stage(
            &self,
            _domain_id: &str,
            _date: NaiveDate,
            _stage: FunnelStage,
        ) -> QualityResult<DailyStageCounts> {
            unavailable()
        }
    }

    impl SnapshotStore for FailingStore {
        fn save_funnel_snapshot(&self, _snapshot: DailyFunnelSnapshot) -> QualityResult<()> {
            unavailable()
        }
        fn funnel_snapshot(
            &self,
            _domain_id: &str,
            _funnel_type: FunnelType,
            _date: NaiveDate,
        ) -> QualityResult<Option<DailyFunnelSnapshot>> {
            unavailable()
        }
        fn save_bottleneck_report(&self, _report: BottleneckReport) -> QualityResult<()> {
            unavailable()
        }
        fn latest_bottleneck_report(
            &self,
            _domain_id: &str,
            _funnel_type: FunnelType,
        ) -> QualityResult<Option<BottleneckReport>> {
            unavailable()
        }
        fn bottleneck_history(
            &self,
            _domain_id: &str,
            _funnel_type: FunnelType,
        ) -> QualityResult<Vec<BottleneckReport>> {
            unavailable()
        }
    }

    fn config() -> FunnelConfig {
        FunnelConfig {
            default_period_days: 30,
            persist_snapshots: true,
        }
    }

    #[test]
    fn test_acme_user_funnel() {
        let now = Utc::now();
        let rates = compute_conversion_rates(FunnelType::User, "acme.cl", 30, &acme_user_events(now), now);

        assert!(rates.entry_count_is_estimated);
        let names: Vec<&str> = rates.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, stage_names(FunnelType::User));

        let entry = &rates.stages[0];
        assert_eq!(entry.count, 270);
        assert!(entry.estimated);
        assert_eq!(rates.stage("Approved").unwrap().rate, 0.75);
        assert!((rates.overall_conversion - 20.0 / 270.0).abs() < 1e-9);
        assert!((rates.overall_conversion - 0.074).abs() < 0.001);
        assert!(!rates.stage("Feedback").unwrap().estimated);
    }

    #[test]
    fn test_zero_denominators() {
        let now = Utc::now();
        let only_applied = events("acme.cl", now, &[(FunnelStage::Applied, 5)]);
        let rates = compute_conversion_rates(FunnelType::User, "acme.cl", 30, &only_applied, now);

        assert_eq!(rates.stages[0].count, 0);
        assert_eq!(rates.stages[0].rate, 0.0);
        assert_eq!(rates.stage("Applied").unwrap().count, 5);
        assert_eq!(rates.stage("Applied").unwrap().rate, 0.0);
        assert_eq!(rates.overall_conversion, 0.0);
    }

    #[test]
    fn test_rates_bounded() {
        let now = Utc::now();
        // More approvals than evaluations in the window.
        let skewed = events(
            "acme.cl",
            now,
            &[(FunnelStage::Evaluated, 2), (FunnelStage::Approved, 9), (FunnelStage::Validated, 40)],
        );
        for funnel_type in FunnelType::ALL {
            let rates = compute_conversion_rates(funnel_type, "acme.cl", 30, &skewed, now);
            for stage in &rates.stages {
                assert!((0.0..=1.0).contains(&stage.rate), "{} {}", stage.name, stage.rate);
            }
            assert!((0.0..=1.0).contains(&rates.overall_conversion));
        }
    }

    #[test]
    fn test_expert_ai_assisted_is_side_measurement() {
        let now = Utc::now();
        let mut evts = events("acme.cl", now, &[(FunnelStage::Evaluated, 10), (FunnelStage::Approved, 8)]);
        for event in evts.iter_mut().take(7) {
            event.metadata.insert("ai_assisted".into(), serde_json::json!(true));
        }
        let rates = compute_conversion_rates(FunnelType::Expert, "acme.cl", 30, &evts, now);

        assert_eq!(rates.stages[0].name, "Queue");
        assert_eq!(rates.stages[0].count, 12);
        assert_eq!(rates.stage("AI-Assisted").unwrap().count, 7);
        assert!((rates.stage("AI-Assisted").unwrap().rate - 0.7).abs() < 1e-9);
        assert!((rates.stage("Approved").unwrap().rate - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_admin_reviewed_equals_proposals() {
        let now = Utc::now();
        let evts = events("acme.cl", now, &[(FunnelStage::Approved, 79), (FunnelStage::Applied, 70)]);
        let rates = compute_conversion_rates(FunnelType::Admin, "acme.cl", 30, &evts, now);

        assert_eq!(rates.stages[0].count, 100);
        let reviewed = rates.stage("Reviewed").unwrap();
        assert_eq!(reviewed.count, 100);
        assert_eq!(reviewed.rate, 1.0);
        assert!(reviewed.estimated);
        assert!((rates.stage("Approved").unwrap().rate - 0.79).abs() < 1e-9);
        assert_eq!(rates.stage("Success").unwrap().count, 0);
    }

    #[test]
    fn test_window_and_domain_filter() {
        let now = Utc::now();
        let mut evts = events("acme.cl", now, &[(FunnelStage::Feedback, 3)]);
        evts.push(
            FunnelEvent::new("acme.cl", "old", "old@acme.cl", FunnelStage::Feedback, Metadata::new())
                .at(now - Duration::days(45)),
        );
        evts.push(FunnelEvent::new("other.cl", "x", "x@other.cl", FunnelStage::Feedback, Metadata::new()).at(now));

        let rates = compute_conversion_rates(FunnelType::User, "acme.cl", 30, &evts, now);
        assert_eq!(rates.stage("Feedback").unwrap().count, 3);
    }

    #[test]
    fn test_aggregator_records_and_snapshots() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = FunnelAggregator::new(store.clone(), store.clone(), &config());
        let now = Utc::now();

        for event in acme_user_events(now) {
            aggregator.record(event).unwrap();
        }
        assert_eq!(store.funnel_event_count("acme.cl"), 239);

        let rates = aggregator.conversion_rates_at("acme.cl", FunnelType::User, 30, now);
        assert_eq!(rates.stages[0].count, 270);

        let snapshot = aggregator
            .snapshot("acme.cl", FunnelType::User, now.date_naive())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.rates.stages.len(), 7);
    }

    #[test]
    fn test_record_rejects_empty_domain() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = FunnelAggregator::new(store.clone(), store, &config());
        let err = aggregator
            .record_event(" ", "u1", "u1@acme.cl", FunnelStage::Feedback, Metadata::new())
            .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_unbounded_period_covers_all_history() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = FunnelAggregator::new(store.clone(), store, &config());
        let now = Utc::now();
        for event in acme_user_events(now) {
            aggregator.record(event).unwrap();
        }

        let rates = aggregator.conversion_rates_at("acme.cl", FunnelType::User, 4_000_000_000, now);
        assert_eq!(rates.period_days, 4_000_000_000);
        assert_eq!(rates.stages[0].count, 270);
    }

    #[test]
    fn test_store_failure_yields_empty_view() {
        let failing = Arc::new(FailingStore);
        let aggregator = FunnelAggregator::new(failing.clone(), failing, &config());

        let rates = aggregator.conversion_rates("acme.cl", FunnelType::Expert, 30);
        assert!(rates.stages.is_empty());
        assert_eq!(rates.overall_conversion, 0.0);

        let err = aggregator
            .record_event("acme.cl", "u1", "u1@acme.cl", FunnelStage::Feedback, Metadata::new())
            .unwrap_err();
        assert!(!err.is_invalid_input());
    }

    #[test]
    fn test_snapshot_failure_does_not_fail_read() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = FunnelAggregator::new(store, Arc::new(FailingStore), &config());
        aggregator
            .record_event("acme.cl", "u1", "u1@acme.cl", FunnelStage::Feedback, Metadata::new())
            .unwrap();
        let rates = aggregator.conversion_rates("acme.cl", FunnelType::User, 30);
        assert_eq!(rates.stage("Feedback").unwrap().count, 1);
    }
}
