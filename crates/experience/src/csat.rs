//! CSAT tracker: 1–5 star ratings per experience type.

use chrono::{DateTime, Duration, Utc};
use quality_core::config::ExperienceConfig;
use quality_core::error::{QualityError, QualityResult};
use quality_core::experience::{validate_rating, CsatEvent, ExperienceType};
use quality_core::stats::{classify_trend, mean, Trend, Window};
use quality_core::store::ExperienceStore;
use quality_core::types::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceStatus {
    Excellent,
    Good,
    NeedsImprovement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceCsat {
    pub avg: f64,
    pub count: usize,
    pub target: f64,
    pub status: ExperienceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsatSummary {
    /// Mean of all ratings in the window; 0 without ratings.
    pub overall: f64,
    pub by_experience: BTreeMap<ExperienceType, ExperienceCsat>,
    pub trend: Trend,
    /// Ratings of 1 or 2.
    pub detractor_count: usize,
    /// Ratings of 4 or 5.
    pub promoter_count: usize,
    pub total_responses: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyTrigger {
    pub should_show: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_id: Option<Uuid>,
    pub experience_type: ExperienceType,
    #[serde(default)]
    pub context: Metadata,
}

pub struct CsatTracker {
    store: Arc<dyn ExperienceStore>,
    config: ExperienceConfig,
}

impl CsatTracker {
    pub fn new(store: Arc<dyn ExperienceStore>, config: &ExperienceConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        user_id: &str,
        domain_id: &str,
        interaction_id: &str,
        experience_type: ExperienceType,
        rating: u8,
        comment: Option<String>,
        metadata: Metadata,
    ) -> QualityResult<CsatEvent> {
        if domain_id.trim().is_empty() {
            return Err(QualityError::Validation("domain_id must not be empty".into()));
        }
        let event = CsatEvent {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            domain_id: domain_id.to_string(),
            interaction_id: interaction_id.to_string(),
            experience_type,
            rating: validate_rating(rating)?,
            comment,
            timestamp: Utc::now(),
            metadata,
        };

        if let Err(e) = self.store.append_csat(event.clone()) {
            warn!(error = %e, domain_id = %domain_id, "Failed to record CSAT rating");
            return Err(e);
        }
        metrics::counter!("quality.csat.recorded").increment(1);
        debug!(
            domain_id = %domain_id,
            user_id = %user_id,
            experience = ?experience_type,
            rating = rating,
            "CSAT rating recorded"
        );
        Ok(event)
    }

    pub fn summary(&self, domain_id: &str, period_days: u32) -> CsatSummary {
        self.summary_at(domain_id, period_days, Utc::now())
    }

    pub fn summary_at(&self, domain_id: &str, period_days: u32, now: DateTime<Utc>) -> CsatSummary {
        let window = Window::trailing(now, period_days);
        let events = match self.store.csat_events(domain_id, window.start) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to read CSAT ratings");
                Vec::new()
            }
        };
        let in_window: Vec<&CsatEvent> = events.iter().filter(|e| window.contains(e.timestamp)).collect();
        summarize(&in_window, &window, &self.config)
    }

    pub fn should_survey(
        &self,
        user_id: &str,
        domain_id: &str,
        experience_type: ExperienceType,
        context: Metadata,
    ) -> SurveyTrigger {
        self.should_survey_at(user_id, domain_id, experience_type, context, Utc::now())
    }

    /// Offer a survey unless the user already rated this experience within
    /// the cooldown. A store failure suppresses the survey.
    pub fn should_survey_at(
        &self,
        user_id: &str,
        domain_id: &str,
        experience_type: ExperienceType,
        context: Metadata,
        now: DateTime<Utc>,
    ) -> SurveyTrigger {
        let since = now - Duration::hours(self.config.survey_cooldown_hours);
        let recently_rated = match self.store.csat_events(domain_id, since) {
            Ok(events) => events
                .iter()
                .any(|e| e.user_id == user_id && e.experience_type == experience_type && e.timestamp <= now),
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to check survey cooldown");
                true
            }
        };

        if recently_rated {
            return SurveyTrigger {
                should_show: false,
                survey_id: None,
                experience_type,
                context: Metadata::new(),
            };
        }
        SurveyTrigger {
            should_show: true,
            survey_id: Some(Uuid::new_v4()),
            experience_type,
            context,
        }
    }
}

fn status(avg: f64, config: &ExperienceConfig) -> ExperienceStatus {
    if avg >= config.csat_excellent {
        ExperienceStatus::Excellent
    } else if avg >= config.csat_target {
        ExperienceStatus::Good
    } else {
        ExperienceStatus::NeedsImprovement
    }
}

fn summarize(events: &[&CsatEvent], window: &Window, config: &ExperienceConfig) -> CsatSummary {
    let ratings: Vec<f64> = events.iter().map(|e| f64::from(e.rating)).collect();

    let mut grouped: BTreeMap<ExperienceType, Vec<f64>> = BTreeMap::new();
    for event in events {
        grouped
            .entry(event.experience_type)
            .or_default()
            .push(f64::from(event.rating));
    }
    let by_experience = grouped
        .into_iter()
        .filter_map(|(experience, ratings)| {
            let avg = mean(&ratings)?;
            Some((
                experience,
                ExperienceCsat {
                    avg,
                    count: ratings.len(),
                    target: config.csat_target,
                    status: status(avg, config),
                },
            ))
        })
        .collect();

    let (first, second): (Vec<&CsatEvent>, Vec<&CsatEvent>) =
        events.iter().copied().partition(|e| window.in_first_half(e.timestamp));
    let half_mean = |half: &[&CsatEvent]| {
        let ratings: Vec<f64> = half.iter().map(|e| f64::from(e.rating)).collect();
        mean(&ratings)
    };

    CsatSummary {
        overall: mean(&ratings).unwrap_or(0.0),
        by_experience,
        trend: classify_trend(half_mean(&first), half_mean(&second), config.csat_trend_band),
        detractor_count: events.iter().filter(|e| e.rating <= 2).count(),
        promoter_count: events.iter().filter(|e| e.rating >= 4).count(),
        total_responses: events.len(),
    }
}
