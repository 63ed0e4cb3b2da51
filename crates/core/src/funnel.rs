//! Funnel domain types: stage events, conversion views, bottleneck findings
//! and milestone durations.

use crate::error::QualityError;
use crate::types::{metadata_flag, Metadata};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ─── Stages ─────────────────────────────────────────────────────────────────

/// Checkpoints a piece of feedback passes through on its way to becoming an
/// applied, validated correction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    Feedback,
    Priority,
    Evaluated,
    Approved,
    Applied,
    Validated,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 6] = [
        FunnelStage::Feedback,
        FunnelStage::Priority,
        FunnelStage::Evaluated,
        FunnelStage::Approved,
        FunnelStage::Applied,
        FunnelStage::Validated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::Feedback => "feedback",
            FunnelStage::Priority => "priority",
            FunnelStage::Evaluated => "evaluated",
            FunnelStage::Approved => "approved",
            FunnelStage::Applied => "applied",
            FunnelStage::Validated => "validated",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunnelStage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QualityError::UnknownStage(s.to_string()))
    }
}

/// The three funnel shapes: end users, domain experts and administrators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FunnelType {
    User,
    Expert,
    Admin,
}

impl FunnelType {
    pub const ALL: [FunnelType; 3] = [FunnelType::User, FunnelType::Expert, FunnelType::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelType::User => "user",
            FunnelType::Expert => "expert",
            FunnelType::Admin => "admin",
        }
    }
}

impl fmt::Display for FunnelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelType {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(FunnelType::User),
            "expert" => Ok(FunnelType::Expert),
            "admin" => Ok(FunnelType::Admin),
            _ => Err(QualityError::UnknownFunnelType(s.to_string())),
        }
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Immutable fact: an actor passed a funnel stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelEvent {
    pub id: Uuid,
    pub domain_id: String,
    pub user_id: String,
    pub user_email: String,
    pub stage: FunnelStage,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl FunnelEvent {
    pub fn new(
        domain_id: impl Into<String>,
        user_id: impl Into<String>,
        user_email: impl Into<String>,
        stage: FunnelStage,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain_id: domain_id.into(),
            user_id: user_id.into(),
            user_email: user_email.into(),
            stage,
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the expert used the AI suggestion for this step.
    pub fn ai_assisted(&self) -> bool {
        metadata_flag(&self.metadata, "ai_assisted")
    }
}

// ─── Conversion View ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRate {
    pub name: String,
    pub count: u64,
    pub rate: f64,
    /// Count was inferred from a baseline rate rather than measured.
    #[serde(default)]
    pub estimated: bool,
}

/// Derived per-funnel conversion view, recomputed on each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRates {
    pub funnel_type: FunnelType,
    pub domain_id: String,
    pub period_days: u32,
    pub stages: Vec<StageRate>,
    pub overall_conversion: f64,
    /// The funnel-entry count is back-calculated from an assumed baseline
    /// rate, so it and `overall_conversion` are approximations.
    pub entry_count_is_estimated: bool,
    pub calculated_at: DateTime<Utc>,
}

impl ConversionRates {
    /// Zero-valued view returned when the event store cannot be read.
    pub fn empty(domain_id: &str, funnel_type: FunnelType, period_days: u32) -> Self {
        Self {
            funnel_type,
            domain_id: domain_id.to_string(),
            period_days,
            stages: Vec::new(),
            overall_conversion: 0.0,
            entry_count_is_estimated: false,
            calculated_at: Utc::now(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageRate> {
        self.stages.iter().find(|s| s.name == name)
    }
}

// ─── Bottlenecks ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Classify an observed rate against its target. `None` means the stage
    /// meets or beats the target and is not a bottleneck.
    pub fn classify(observed: f64, target: f64) -> Option<Severity> {
        if target <= 0.0 {
            return None;
        }
        let ratio = observed / target;
        if ratio < 0.8 {
            Some(Severity::Critical)
        } else if ratio < 0.9 {
            Some(Severity::High)
        } else if ratio < 1.0 {
            Some(Severity::Medium)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelBottleneck {
    pub stage: String,
    pub current_rate: f64,
    pub target_rate: f64,
    pub gap: f64,
    pub severity: Severity,
    pub recommendation: String,
    pub affected_count: u64,
}

/// Versioned snapshot of one bottleneck computation. Readers take the latest
/// per `(domain_id, funnel_type)`; older ones remain for trend queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub domain_id: String,
    pub funnel_type: FunnelType,
    pub bottlenecks: Vec<FunnelBottleneck>,
    /// Highest severity among `bottlenecks`, `Low` when there are none.
    pub severity: Severity,
    pub computed_at: DateTime<Utc>,
}

impl BottleneckReport {
    pub fn new(domain_id: &str, funnel_type: FunnelType, bottlenecks: Vec<FunnelBottleneck>) -> Self {
        let severity = bottlenecks
            .iter()
            .map(|b| b.severity)
            .max()
            .unwrap_or(Severity::Low);
        Self {
            domain_id: domain_id.to_string(),
            funnel_type,
            bottlenecks,
            severity,
            computed_at: Utc::now(),
        }
    }
}

// ─── Daily Aggregates ───────────────────────────────────────────────────────

/// Conversion view cached per `(domain_id, funnel_type, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyFunnelSnapshot {
    pub domain_id: String,
    pub funnel_type: FunnelType,
    pub date: NaiveDate,
    pub rates: ConversionRates,
    pub updated_at: DateTime<Utc>,
}

/// Raw per-stage event counter per `(domain_id, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStageCounts {
    pub domain_id: String,
    pub date: NaiveDate,
    pub stages: BTreeMap<FunnelStage, u64>,
    pub updated_at: DateTime<Utc>,
}

// ─── Milestones ─────────────────────────────────────────────────────────────

/// Named latency between two funnel stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    FeedbackToEval,
    EvalToApprove,
    ApproveToApply,
    ApplyToValidate,
}

impl Milestone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::FeedbackToEval => "feedback_to_eval",
            Milestone::EvalToApprove => "eval_to_approve",
            Milestone::ApproveToApply => "approve_to_apply",
            Milestone::ApplyToValidate => "apply_to_validate",
        }
    }
}

impl FromStr for Milestone {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "feedback_to_eval" => Ok(Milestone::FeedbackToEval),
            "eval_to_approve" => Ok(Milestone::EvalToApprove),
            "approve_to_apply" => Ok(Milestone::ApproveToApply),
            "apply_to_validate" => Ok(Milestone::ApplyToValidate),
            _ => Err(QualityError::UnknownMilestone(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneRecord {
    pub id: Uuid,
    pub domain_id: String,
    pub user_id: String,
    pub milestone: Milestone,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MilestoneRecord {
    pub fn duration_minutes(&self) -> f64 {
        self.duration_ms as f64 / 1000.0 / 60.0
    }
}

/// Duration statistics for one milestone, in minutes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MilestoneStats {
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub samples: usize,
}
