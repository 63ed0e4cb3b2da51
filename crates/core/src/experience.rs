//! Experience tracking types: CSAT ratings, NPS responses and share events.

use crate::error::{QualityError, QualityResult};
use crate::types::Metadata;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Moment in the quality loop a CSAT rating refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceType {
    FeedbackFlow,
    ExpertReview,
    AdminApproval,
    CorrectionImpact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsatEvent {
    pub id: Uuid,
    pub user_id: String,
    pub domain_id: String,
    pub interaction_id: String,
    pub experience_type: ExperienceType,
    /// 1 to 5 stars.
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

pub fn validate_rating(rating: u8) -> QualityResult<u8> {
    if (1..=5).contains(&rating) {
        Ok(rating)
    } else {
        Err(QualityError::Validation(format!(
            "CSAT rating must be between 1 and 5, got {rating}"
        )))
    }
}

// ─── NPS ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NpsCategory {
    Promoter,
    Passive,
    Detractor,
}

impl NpsCategory {
    /// 9–10 promoter, 7–8 passive, 0–6 detractor.
    pub fn from_score(score: u8) -> Self {
        match score {
            9.. => NpsCategory::Promoter,
            7 | 8 => NpsCategory::Passive,
            _ => NpsCategory::Detractor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpsEvent {
    pub id: Uuid,
    pub user_id: String,
    pub user_email: String,
    pub domain_id: String,
    /// 0 to 10.
    pub score: u8,
    pub category: NpsCategory,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub shared_with: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Set for detractors only.
    #[serde(default)]
    pub follow_up_date: Option<DateTime<Utc>>,
}

impl NpsEvent {
    pub fn new(
        user_id: &str,
        user_email: &str,
        domain_id: &str,
        score: u8,
        reason: Option<String>,
        shared_with: Vec<String>,
        follow_up_days: i64,
    ) -> QualityResult<Self> {
        if score > 10 {
            return Err(QualityError::Validation(format!(
                "NPS score must be between 0 and 10, got {score}"
            )));
        }
        let category = NpsCategory::from_score(score);
        let timestamp = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
            domain_id: domain_id.to_string(),
            score,
            category,
            reason,
            shared_with,
            timestamp,
            follow_up_date: (category == NpsCategory::Detractor)
                .then(|| timestamp + Duration::days(follow_up_days)),
        })
    }
}

/// `100 × (promoters − detractors) / total`, rounded; 0 with no responses.
pub fn nps_score(promoters: u64, detractors: u64, total: u64) -> i32 {
    if total == 0 {
        return 0;
    }
    let diff = promoters as f64 - detractors as f64;
    (diff / total as f64 * 100.0).round() as i32
}

// ─── Sharing ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    Improvement,
    Achievement,
    Milestone,
    SuccessStory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SharePlatform {
    Slack,
    Teams,
    Email,
    Internal,
}

impl fmt::Display for SharePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SharePlatform::Slack => "slack",
            SharePlatform::Teams => "teams",
            SharePlatform::Email => "email",
            SharePlatform::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareEvent {
    pub id: Uuid,
    pub user_id: String,
    pub domain_id: String,
    pub share_type: ShareType,
    pub platform: SharePlatform,
    pub recipient_count: u32,
    #[serde(default)]
    pub context: Metadata,
    pub timestamp: DateTime<Utc>,
}
