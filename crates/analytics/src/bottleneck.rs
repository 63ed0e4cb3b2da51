//! Bottleneck detection: compare observed stage rates with per-funnel targets
//! and rank the stages that fall short.

use chrono::{DateTime, Utc};
use quality_core::funnel::{
    BottleneckReport, ConversionRates, FunnelBottleneck, FunnelType, Severity,
};
use quality_core::store::SnapshotStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::funnel::FunnelAggregator;

/// Target conversion rate for a stage, if the stage has one.
pub fn target_rate(funnel_type: FunnelType, stage: &str) -> Option<f64> {
    let target = match (funnel_type, stage) {
        (FunnelType::User, "Feedback") => 0.40,
        (FunnelType::User, "Priority") => 0.80,
        (FunnelType::User, "Evaluated") => 0.80,
        (FunnelType::User, "Approved") => 0.75,
        (FunnelType::User, "Applied") => 0.95,
        (FunnelType::User, "Validated") => 0.85,

        (FunnelType::Expert, "Evaluated") => 0.80,
        (FunnelType::Expert, "AI-Assisted") => 0.70,
        (FunnelType::Expert, "Approved") => 0.80,
        (FunnelType::Expert, "Applied") => 0.95,
        (FunnelType::Expert, "Validated") => 0.85,

        (FunnelType::Admin, "Approved") => 0.75,
        (FunnelType::Admin, "Applied") => 0.95,
        (FunnelType::Admin, "Success") => 0.85,
        _ => return None,
    };
    Some(target)
}

fn percent(rate: f64) -> String {
    format!("{:.0}", rate * 100.0)
}

/// Suggested action for a stage below target.
pub fn recommendation(funnel_type: FunnelType, stage: &str, current: f64, target: f64) -> String {
    let gap = percent(target - current);
    match (funnel_type, stage) {
        (FunnelType::User, "Feedback") => format!(
            "Raise the feedback rate from {}% to {}%. Show feedback prompts right after answers and reward early feedback.",
            percent(current),
            percent(target)
        ),
        (FunnelType::User, "Priority") => format!(
            "Improve prioritisation: {gap}% more feedback should be marked as priority. Review the auto-priority criteria."
        ),
        (FunnelType::User, "Evaluated") => format!(
            "Increase evaluation coverage by {gap}%. Assign more experts or improve routing to specialists."
        ),
        (FunnelType::Expert, "Evaluated") => format!(
            "Increase coverage by {gap}%. Add experts or balance the review load."
        ),
        (FunnelType::Expert, "AI-Assisted") => format!(
            "Increase AI adoption by {gap}%. Train experts or improve the quality of AI suggestions."
        ),
        (FunnelType::Expert, "Approved") => format!(
            "Improve the approval rate by {gap}%. Review evaluation criteria or expert training."
        ),
        (FunnelType::Admin, "Approved") => format!(
            "Increase the approval rate by {gap}%. Strengthen earlier quality gates or clarify admin criteria."
        ),
        _ => format!("Improve conversion by {gap}% to reach target."),
    }
}

/// Below-target stages of a conversion view, most severe first. Ties keep the
/// larger gap first, then funnel order.
pub fn detect_from(rates: &ConversionRates) -> Vec<FunnelBottleneck> {
    let mut findings: Vec<FunnelBottleneck> = rates
        .stages
        .iter()
        .enumerate()
        .filter_map(|(idx, stage)| {
            let target = target_rate(rates.funnel_type, &stage.name)?;
            let severity = Severity::classify(stage.rate, target)?;
            let affected_count = match idx.checked_sub(1).and_then(|prev| rates.stages.get(prev)) {
                Some(prev) => prev.count.saturating_sub(stage.count),
                None => 0,
            };
            Some(FunnelBottleneck {
                stage: stage.name.clone(),
                current_rate: stage.rate,
                target_rate: target,
                gap: target - stage.rate,
                severity,
                recommendation: recommendation(rates.funnel_type, &stage.name, stage.rate, target),
                affected_count,
            })
        })
        .collect();

    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.gap.total_cmp(&a.gap))
    });
    findings
}

/// A finding labelled with the funnel it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedBottleneck {
    pub funnel: FunnelType,
    #[serde(flatten)]
    pub bottleneck: FunnelBottleneck,
}

/// All three funnels of a domain with their combined findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelSummary {
    pub user: ConversionRates,
    pub expert: ConversionRates,
    pub admin: ConversionRates,
    pub bottlenecks: Vec<TaggedBottleneck>,
}

/// Runs detection over the aggregator's views and keeps a versioned report
/// per `(domain, funnel)`.
pub struct BottleneckDetector {
    aggregator: Arc<FunnelAggregator>,
    reports: Arc<dyn SnapshotStore>,
}

impl BottleneckDetector {
    pub fn new(aggregator: Arc<FunnelAggregator>, reports: Arc<dyn SnapshotStore>) -> Self {
        Self { aggregator, reports }
    }

    pub fn detect(&self, domain_id: &str, funnel_type: FunnelType) -> Vec<FunnelBottleneck> {
        self.detect_at(
            domain_id,
            funnel_type,
            self.aggregator.default_period_days(),
            Utc::now(),
        )
    }

    pub fn detect_at(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> Vec<FunnelBottleneck> {
        let rates = self
            .aggregator
            .conversion_rates_at(domain_id, funnel_type, period_days, now);
        // No stages means the events could not be read; there is nothing to judge.
        if rates.stages.is_empty() {
            return Vec::new();
        }

        let bottlenecks = detect_from(&rates);
        let mut report = BottleneckReport::new(domain_id, funnel_type, bottlenecks.clone());
        report.computed_at = now;
        let severity = report.severity;

        if let Err(e) = self.reports.save_bottleneck_report(report) {
            warn!(error = %e, domain_id = %domain_id, funnel_type = %funnel_type, "Failed to save bottleneck report");
        }

        if bottlenecks.is_empty() {
            debug!(domain_id = %domain_id, funnel_type = %funnel_type, "No bottlenecks detected");
        } else {
            metrics::counter!("quality.funnel.bottlenecks_detected").increment(bottlenecks.len() as u64);
            info!(
                domain_id = %domain_id,
                funnel_type = %funnel_type,
                count = bottlenecks.len(),
                severity = ?severity,
                "Funnel bottlenecks detected"
            );
        }
        bottlenecks
    }

    pub fn latest_report(&self, domain_id: &str, funnel_type: FunnelType) -> Option<BottleneckReport> {
        match self.reports.latest_bottleneck_report(domain_id, funnel_type) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to read bottleneck report");
                None
            }
        }
    }

    /// Every stored report for the funnel, oldest first.
    pub fn history(&self, domain_id: &str, funnel_type: FunnelType) -> Vec<BottleneckReport> {
        self.reports
            .bottleneck_history(domain_id, funnel_type)
            .unwrap_or_else(|e| {
                warn!(error = %e, domain_id = %domain_id, "Failed to read bottleneck history");
                Vec::new()
            })
    }

    pub fn funnel_summary(&self, domain_id: &str, period_days: u32) -> FunnelSummary {
        self.funnel_summary_at(domain_id, period_days, Utc::now())
    }

    pub fn funnel_summary_at(
        &self,
        domain_id: &str,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> FunnelSummary {
        let rates = |funnel_type: FunnelType| {
            self.aggregator
                .conversion_rates_at(domain_id, funnel_type, period_days, now)
        };
        let bottlenecks = FunnelType::ALL
            .into_iter()
            .flat_map(|funnel_type| {
                self.detect_at(domain_id, funnel_type, period_days, now)
                    .into_iter()
                    .map(move |bottleneck| TaggedBottleneck {
                        funnel: funnel_type,
                        bottleneck,
                    })
            })
            .collect();

        FunnelSummary {
            user: rates(FunnelType::User),
            expert: rates(FunnelType::Expert),
            admin: rates(FunnelType::Admin),
            bottlenecks,
        }
    }
}
