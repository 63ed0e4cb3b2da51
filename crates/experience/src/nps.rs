//! NPS tracker: 0–10 recommendation scores, the domain score, and the
//! detractors waiting for a follow-up.

use crate::sharing::SharingTracker;
use chrono::{DateTime, Duration, Utc};
use quality_core::config::ExperienceConfig;
use quality_core::error::{QualityError, QualityResult};
use quality_core::experience::{nps_score, NpsCategory, NpsEvent, SharePlatform, ShareType};
use quality_core::stats::{classify_trend, Trend, Window};
use quality_core::store::ExperienceStore;
use quality_core::types::Metadata;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpsSummary {
    pub score: i32,
    pub promoters: u64,
    pub passives: u64,
    pub detractors: u64,
    pub total_responses: u64,
    pub trend: Trend,
    pub target_met: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetractorFollowUp {
    pub user_id: String,
    pub user_email: String,
    pub score: u8,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub days_since: i64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    promoters: u64,
    passives: u64,
    detractors: u64,
}

impl Tally {
    fn of<'a>(events: impl IntoIterator<Item = &'a NpsEvent>) -> Self {
        let mut tally = Tally::default();
        for event in events {
            match event.category {
                NpsCategory::Promoter => tally.promoters += 1,
                NpsCategory::Passive => tally.passives += 1,
                NpsCategory::Detractor => tally.detractors += 1,
            }
        }
        tally
    }

    fn total(&self) -> u64 {
        self.promoters + self.passives + self.detractors
    }

    fn score(&self) -> Option<i32> {
        (self.total() > 0).then(|| nps_score(self.promoters, self.detractors, self.total()))
    }
}

pub struct NpsTracker {
    store: Arc<dyn ExperienceStore>,
    sharing: Arc<SharingTracker>,
    config: ExperienceConfig,
}

impl NpsTracker {
    pub fn new(store: Arc<dyn ExperienceStore>, sharing: Arc<SharingTracker>, config: &ExperienceConfig) -> Self {
        Self {
            store,
            sharing,
            config: config.clone(),
        }
    }

    /// Record a response. A promoter who shared the product with colleagues
    /// also produces an internal success-story share; failing to record that
    /// share does not fail the response.
    pub fn record(
        &self,
        user_id: &str,
        user_email: &str,
        domain_id: &str,
        score: u8,
        reason: Option<String>,
        shared_with: Vec<String>,
    ) -> QualityResult<NpsEvent> {
        if domain_id.trim().is_empty() {
            return Err(QualityError::Validation("domain_id must not be empty".into()));
        }
        let event = NpsEvent::new(
            user_id,
            user_email,
            domain_id,
            score,
            reason,
            shared_with,
            self.config.follow_up_days,
        )?;

        if let Err(e) = self.store.append_nps(event.clone()) {
            warn!(error = %e, domain_id = %domain_id, "Failed to record NPS response");
            return Err(e);
        }
        metrics::counter!("quality.nps.recorded").increment(1);
        debug!(domain_id = %domain_id, user_id = %user_id, score = score, category = ?event.category, "NPS response recorded");

        if event.category == NpsCategory::Promoter && !event.shared_with.is_empty() {
            let mut context = Metadata::new();
            context.insert("nps_score".into(), serde_json::json!(score));
            // Best effort; the sharing tracker logs its own failures.
            let _ = self.sharing.record(
                user_id,
                domain_id,
                ShareType::SuccessStory,
                SharePlatform::Internal,
                u32::try_from(event.shared_with.len()).unwrap_or(u32::MAX),
                context,
            );
        }
        Ok(event)
    }

    pub fn score(&self, domain_id: &str, period_days: u32) -> NpsSummary {
        self.score_at(domain_id, period_days, Utc::now())
    }

    pub fn score_at(&self, domain_id: &str, period_days: u32, now: DateTime<Utc>) -> NpsSummary {
        let window = Window::trailing(now, period_days);
        let events = match self.store.nps_events(domain_id, window.start) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to read NPS responses");
                Vec::new()
            }
        };
        let in_window: Vec<&NpsEvent> = events.iter().filter(|e| window.contains(e.timestamp)).collect();

        let tally = Tally::of(in_window.iter().copied());
        let first = Tally::of(in_window.iter().copied().filter(|e| window.in_first_half(e.timestamp)));
        let second = Tally::of(in_window.iter().copied().filter(|e| !window.in_first_half(e.timestamp)));
        let score = tally.score().unwrap_or(0);

        NpsSummary {
            score,
            promoters: tally.promoters,
            passives: tally.passives,
            detractors: tally.detractors,
            total_responses: tally.total(),
            trend: classify_trend(
                first.score().map(f64::from),
                second.score().map(f64::from),
                self.config.nps_trend_band,
            ),
            target_met: score >= self.config.nps_target,
        }
    }

    pub fn detractors_needing_follow_up(&self, domain_id: &str) -> Vec<DetractorFollowUp> {
        self.detractors_needing_follow_up_at(domain_id, Utc::now())
    }

    /// Detractor responses from the follow-up period, newest first.
    pub fn detractors_needing_follow_up_at(&self, domain_id: &str, now: DateTime<Utc>) -> Vec<DetractorFollowUp> {
        let since = now - Duration::days(self.config.follow_up_days);
        let events = match self.store.nps_events(domain_id, since) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to read NPS detractors");
                return Vec::new();
            }
        };

        let mut follow_ups: Vec<DetractorFollowUp> = events
            .into_iter()
            .filter(|e| e.category == NpsCategory::Detractor && e.timestamp <= now)
            .map(|e| DetractorFollowUp {
                days_since: (now - e.timestamp).num_days(),
                user_id: e.user_id,
                user_email: e.user_email,
                score: e.score,
                reason: e.reason,
                timestamp: e.timestamp,
            })
            .collect();
        follow_ups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if !follow_ups.is_empty() {
            info!(domain_id = %domain_id, detractors = follow_ups.len(), "Detractors awaiting follow-up");
        }
        follow_ups
    }
}
