//! Storage collaborator contracts.
//!
//! Services accept `Arc<dyn ...Store>` so the same aggregation code runs over
//! the in-memory store in development and tests, and over a document
//! database in production. Every method may fail with
//! [`QualityError::Store`](crate::error::QualityError::Store); callers treat
//! that as a transient collaborator failure.

use crate::badges::{AchievementEvent, Badge, UserBadges};
use crate::error::QualityResult;
use crate::experience::{CsatEvent, NpsEvent, ShareEvent};
use crate::funnel::{
    BottleneckReport, DailyFunnelSnapshot, DailyStageCounts, FunnelEvent, FunnelStage, FunnelType,
    MilestoneRecord,
};
use crate::types::UserIdentity;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Append-only log of funnel stage events.
pub trait FunnelEventStore: Send + Sync {
    fn append_funnel_event(&self, event: FunnelEvent) -> QualityResult<()>;

    /// Events for a domain with `timestamp >= since`.
    fn funnel_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<FunnelEvent>>;

    fn increment_daily_stage(
        &self,
        domain_id: &str,
        date: NaiveDate,
        stage: FunnelStage,
    ) -> QualityResult<DailyStageCounts>;
}

pub trait MilestoneStore: Send + Sync {
    fn append_milestone(&self, record: MilestoneRecord) -> QualityResult<()>;

    fn milestones(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<MilestoneRecord>>;
}

/// Derived aggregates kept for dashboards.
pub trait SnapshotStore: Send + Sync {
    /// Upsert keyed by `(domain_id, funnel_type, date)`.
    fn save_funnel_snapshot(&self, snapshot: DailyFunnelSnapshot) -> QualityResult<()>;

    fn funnel_snapshot(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
        date: NaiveDate,
    ) -> QualityResult<Option<DailyFunnelSnapshot>>;

    /// Append a new version; earlier versions are kept.
    fn save_bottleneck_report(&self, report: BottleneckReport) -> QualityResult<()>;

    fn latest_bottleneck_report(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
    ) -> QualityResult<Option<BottleneckReport>>;

    /// All versions, oldest first.
    fn bottleneck_history(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
    ) -> QualityResult<Vec<BottleneckReport>>;
}

/// Mutation applied to a user's badges inside the store's per-user critical
/// section. Returns the badges it added.
pub type AwardOp<'a> = dyn FnMut(&mut UserBadges) -> Vec<Badge> + 'a;

/// Result of an atomic award.
#[derive(Debug, Clone)]
pub struct AwardOutcome {
    pub user_badges: UserBadges,
    pub awarded: Vec<Badge>,
    pub achievements: Vec<AchievementEvent>,
}

pub trait BadgeStore: Send + Sync {
    fn user_badges(&self, user_id: &str) -> QualityResult<Option<UserBadges>>;

    /// Run `op` against the user's current badges while holding an exclusive
    /// per-user lock, then persist the result together with one
    /// achievement event per badge `op` returned. The document is created
    /// only if `op` awards something.
    fn award_atomically(
        &self,
        user_id: &str,
        user_email: &str,
        op: &mut AwardOp<'_>,
    ) -> QualityResult<AwardOutcome>;

    /// Badge documents whose owner's email belongs to the domain.
    fn domain_user_badges(&self, domain_id: &str) -> QualityResult<Vec<UserBadges>>;

    fn set_rank(&self, user_id: &str, rank: u32) -> QualityResult<()>;

    /// Achievements whose celebration has not been shown, newest first.
    fn unshown_achievements(&self, user_id: &str, limit: usize) -> QualityResult<Vec<AchievementEvent>>;

    /// Returns false if the achievement is unknown or was already shown.
    fn mark_celebration_shown(&self, achievement_id: Uuid) -> QualityResult<bool>;
}

pub trait ExperienceStore: Send + Sync {
    fn append_csat(&self, event: CsatEvent) -> QualityResult<()>;
    fn csat_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<CsatEvent>>;

    fn append_nps(&self, event: NpsEvent) -> QualityResult<()>;
    fn nps_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<NpsEvent>>;

    fn append_share(&self, event: ShareEvent) -> QualityResult<()>;
    fn share_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<ShareEvent>>;
}

pub trait UserDirectory: Send + Sync {
    fn register_user(&self, identity: UserIdentity) -> QualityResult<()>;

    fn domain_users(&self, domain_id: &str) -> QualityResult<Vec<UserIdentity>>;
}
