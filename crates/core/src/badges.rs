//! Gamification domain types: badge catalogue entries, per-user badge
//! accumulators, achievement events and the metric snapshots badges are
//! evaluated against.
//!
//! Points by rarity:
//! - common 10, uncommon 25, rare 50, epic 100, legendary 250

use crate::error::QualityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ─── Rarity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    /// Leaderboard points awarded for a badge of this rarity.
    pub fn points(&self) -> u32 {
        match self {
            Rarity::Common => 10,
            Rarity::Uncommon => 25,
            Rarity::Rare => 50,
            Rarity::Epic => 100,
            Rarity::Legendary => 250,
        }
    }
}

// ─── Criteria ───────────────────────────────────────────────────────────────

/// Comparison between a metric value and a badge threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Gte,
    Lte,
    Eq,
    Gt,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Gt => ">",
        }
    }

    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gte => value >= threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Gt => value > threshold,
        }
    }

    /// Progress toward a threshold only has a direction for "at least"
    /// style comparisons.
    pub fn has_progress(&self) -> bool {
        matches!(self, Operator::Gte | Operator::Gt)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">=" => Ok(Operator::Gte),
            "<=" => Ok(Operator::Lte),
            "==" => Ok(Operator::Eq),
            ">" => Ok(Operator::Gt),
            other => Err(QualityError::UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = QualityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadgeCriteria {
    pub metric: String,
    pub threshold: f64,
    pub operator: Operator,
}

impl BadgeCriteria {
    /// `None` when the snapshot does not carry the metric at all.
    pub fn is_met(&self, metrics: &MetricSnapshot) -> Option<bool> {
        metrics
            .get(&self.metric)
            .map(|value| self.operator.evaluate(value, self.threshold))
    }
}

// ─── Badges ─────────────────────────────────────────────────────────────────

/// Catalogue entry; `earned_at` is set once the badge is held by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Badge {
    #[serde(rename = "type")]
    pub badge_type: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub criteria: BadgeCriteria,
    pub rarity: Rarity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earned_at: Option<DateTime<Utc>>,
}

impl Badge {
    pub fn earned(&self, at: DateTime<Utc>) -> Badge {
        Badge {
            earned_at: Some(at),
            ..self.clone()
        }
    }

    pub fn points(&self) -> u32 {
        self.rarity.points()
    }
}

/// Sum of rarity points over a badge list.
pub fn total_points(badges: &[Badge]) -> u32 {
    badges.iter().map(Badge::points).sum()
}

/// Per-user badge accumulator. A badge type appears at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBadges {
    pub user_id: String,
    pub user_email: String,
    pub badges: Vec<Badge>,
    pub total_points: u32,
    /// 0 until the first ranking sweep.
    pub rank: u32,
    pub updated_at: DateTime<Utc>,
}

impl UserBadges {
    pub fn new(user_id: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_email: user_email.into(),
            badges: Vec::new(),
            total_points: 0,
            rank: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn has(&self, badge_type: &str) -> bool {
        self.badges.iter().any(|b| b.badge_type == badge_type)
    }

    /// Append badges the user does not hold yet and recompute points.
    /// Returns the badges actually added.
    pub fn add_badges(&mut self, badges: Vec<Badge>) -> Vec<Badge> {
        let mut added = Vec::new();
        for badge in badges {
            if !self.has(&badge.badge_type) {
                self.badges.push(badge.clone());
                added.push(badge);
            }
        }
        self.recompute_points();
        if !added.is_empty() {
            self.updated_at = Utc::now();
        }
        added
    }

    pub fn recompute_points(&mut self) {
        self.total_points = total_points(&self.badges);
    }

    /// Most recently earned badge, for leaderboard display.
    pub fn most_recent(&self) -> Option<&Badge> {
        self.badges.iter().max_by_key(|b| b.earned_at)
    }
}

/// Record of when a badge was earned. Only `celebration_shown` ever changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementEvent {
    pub id: Uuid,
    pub user_id: String,
    pub badge_type: String,
    pub badge_name: String,
    pub rarity: Rarity,
    pub earned_at: DateTime<Utc>,
    pub celebration_shown: bool,
    #[serde(default)]
    pub shown_at: Option<DateTime<Utc>>,
}

impl AchievementEvent {
    pub fn for_badge(user_id: &str, badge: &Badge) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            badge_type: badge.badge_type.clone(),
            badge_name: badge.name.clone(),
            rarity: badge.rarity,
            earned_at: badge.earned_at.unwrap_or_else(Utc::now),
            celebration_shown: false,
            shown_at: None,
        }
    }

    /// Flip the celebration flag. Returns false if it was already shown.
    pub fn mark_shown(&mut self) -> bool {
        if self.celebration_shown {
            return false;
        }
        self.celebration_shown = true;
        self.shown_at = Some(Utc::now());
        true
    }
}

// ─── Metric Snapshots ───────────────────────────────────────────────────────

/// Named metric values supplied by the caller; badge criteria look metrics up
/// by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MetricSnapshot(BTreeMap<String, f64>);

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.insert(metric, value);
        self
    }

    pub fn insert(&mut self, metric: impl Into<String>, value: f64) {
        self.0.insert(metric.into(), value);
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for MetricSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// End-user contribution metrics for a period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContributionMetrics {
    pub total_interactions: u64,
    pub feedback_given: u64,
    pub feedback_useful: u64,
    pub priority_feedback: u64,
    pub responses_improved: u64,
    pub share_count: u64,
    pub helped_colleagues: u64,
    pub trained_users: u64,
    pub suggestions_implemented: u64,
    /// Position in the domain's sign-up order, when known.
    #[serde(default)]
    pub signup_order: Option<u64>,
}

impl From<&UserContributionMetrics> for MetricSnapshot {
    fn from(m: &UserContributionMetrics) -> Self {
        let mut snapshot = MetricSnapshot::new()
            .with("total_interactions", m.total_interactions as f64)
            .with("feedback_given", m.feedback_given as f64)
            .with("feedback_useful", m.feedback_useful as f64)
            .with("priority_feedback", m.priority_feedback as f64)
            .with("responses_improved", m.responses_improved as f64)
            .with("share_count", m.share_count as f64)
            .with("helped_colleagues", m.helped_colleagues as f64)
            .with("trained_users", m.trained_users as f64)
            .with("suggestions_implemented", m.suggestions_implemented as f64);
        if let Some(order) = m.signup_order {
            snapshot.insert("signup_order", order as f64);
        }
        snapshot
    }
}

/// Expert evaluation performance for a period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpertPerformanceMetrics {
    pub evaluated: u64,
    pub ai_assisted: u64,
    pub ai_adoption_rate: f64,
    pub approval_rate: f64,
    /// Minutes.
    pub avg_evaluation_time: f64,
    pub correction_accuracy: f64,
    pub speed_rank: u32,
}

impl From<&ExpertPerformanceMetrics> for MetricSnapshot {
    fn from(m: &ExpertPerformanceMetrics) -> Self {
        let mut snapshot = MetricSnapshot::new()
            .with("evaluated", m.evaluated as f64)
            .with("ai_assisted", m.ai_assisted as f64)
            .with("ai_adoption_rate", m.ai_adoption_rate)
            .with("approval_rate", m.approval_rate)
            .with("correction_accuracy", m.correction_accuracy);
        // An expert with no evaluations has no meaningful average time or rank.
        if m.evaluated > 0 {
            snapshot.insert("avg_evaluation_time", m.avg_evaluation_time);
            snapshot.insert("speed_rank", m.speed_rank as f64);
        }
        snapshot
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialistPerformanceMetrics {
    pub specialty: String,
    pub assignments_received: u64,
    pub assignments_completed: u64,
    pub approval_rate_in_specialty: f64,
    /// 0 when the specialty has not been ranked.
    pub specialty_rank: u32,
}

impl From<&SpecialistPerformanceMetrics> for MetricSnapshot {
    fn from(m: &SpecialistPerformanceMetrics) -> Self {
        let mut snapshot = MetricSnapshot::new()
            .with("assignments_received", m.assignments_received as f64)
            .with("assignments_completed", m.assignments_completed as f64)
            .with("approval_rate_in_specialty", m.approval_rate_in_specialty);
        if m.specialty_rank > 0 {
            snapshot.insert("specialty_rank", m.specialty_rank as f64);
        }
        snapshot
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminDomainMetrics {
    pub proposals_reviewed: u64,
    pub approval_rate: f64,
    pub batch_approvals_count: u64,
    pub dqs_start: f64,
    pub dqs_end: f64,
    pub roi_estimate: f64,
}

impl From<&AdminDomainMetrics> for MetricSnapshot {
    fn from(m: &AdminDomainMetrics) -> Self {
        MetricSnapshot::new()
            .with("proposals_reviewed", m.proposals_reviewed as f64)
            .with("approval_rate", m.approval_rate)
            .with("batch_approvals_count", m.batch_approvals_count as f64)
            .with("dqs_end", m.dqs_end)
            .with("dqs_change", m.dqs_end - m.dqs_start)
            .with("roi_estimate", m.roi_estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn badge(badge_type: &str, rarity: Rarity) -> Badge {
        Badge {
            badge_type: badge_type.into(),
            name: badge_type.into(),
            description: String::new(),
            icon: String::new(),
            color: String::new(),
            criteria: BadgeCriteria {
                metric: "feedback_given".into(),
                threshold: 1.0,
                operator: Operator::Gte,
            },
            rarity,
            earned_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_rarity_points() {
        let points: Vec<u32> = Rarity::ALL.iter().map(Rarity::points).collect();
        assert_eq!(points, vec![10, 25, 50, 100, 250]);
    }

    #[test]
    fn test_operator_parsing_and_evaluation() {
        assert_eq!(">=".parse::<Operator>().unwrap(), Operator::Gte);
        assert!(matches!(
            "~=".parse::<Operator>(),
            Err(QualityError::UnknownOperator(_))
        ));
        assert!(Operator::Gte.evaluate(5.0, 5.0));
        assert!(!Operator::Gt.evaluate(5.0, 5.0));
        assert!(Operator::Lte.evaluate(7.5, 8.0));
        assert!(Operator::Eq.evaluate(1.0, 1.0));
        assert!(!Operator::Eq.evaluate(2.0, 1.0));
        assert!(!Operator::Lte.has_progress());
    }

    #[test]
    fn test_operator_serde_rejects_unknown() {
        let ok: BadgeCriteria =
            serde_json::from_str(r#"{"metric": "evaluated", "threshold": 50, "operator": ">="}"#)
                .unwrap();
        assert_eq!(ok.operator, Operator::Gte);
        let bad = serde_json::from_str::<BadgeCriteria>(
            r#"{"metric": "evaluated", "threshold": 50, "operator": "=>"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_add_badges_is_idempotent() {
        let mut user = UserBadges::new("u1", "u1@acme.cl");
        let added = user.add_badges(vec![badge("power-user", Rarity::Common), badge("mentor", Rarity::Rare)]);
        assert_eq!(added.len(), 2);
        assert_eq!(user.total_points, 60);

        let added = user.add_badges(vec![badge("mentor", Rarity::Rare)]);
        assert!(added.is_empty());
        assert_eq!(user.badges.len(), 2);
        assert_eq!(user.total_points, 60);
    }

    #[test]
    fn test_achievement_marked_once() {
        let mut event = AchievementEvent::for_badge("u1", &badge("mentor", Rarity::Rare));
        assert!(!event.celebration_shown);
        assert!(event.mark_shown());
        assert!(event.shown_at.is_some());
        assert!(!event.mark_shown());
    }

    #[test]
    fn test_missing_metric_is_not_evaluated() {
        let criteria = BadgeCriteria {
            metric: "speed_rank".into(),
            threshold: 10.0,
            operator: Operator::Lte,
        };
        let idle = ExpertPerformanceMetrics::default();
        assert_eq!(criteria.is_met(&MetricSnapshot::from(&idle)), None);

        let busy = ExpertPerformanceMetrics {
            evaluated: 12,
            speed_rank: 4,
            ..Default::default()
        };
        assert_eq!(criteria.is_met(&MetricSnapshot::from(&busy)), Some(true));
    }

    #[test]
    fn test_admin_snapshot_derives_dqs_change() {
        let metrics = AdminDomainMetrics {
            dqs_start: 72.0,
            dqs_end: 84.5,
            ..Default::default()
        };
        let snapshot = MetricSnapshot::from(&metrics);
        assert_eq!(snapshot.get("dqs_change"), Some(12.5));
    }
}
