//! In-process store backed by DashMap for lock-free concurrent access.
//!
//! Implements every storage contract the analytics services depend on.
//! Production deployments swap this for a document database adapter with
//! the same trait surface.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use quality_core::badges::{AchievementEvent, Badge, UserBadges};
use quality_core::error::QualityResult;
use quality_core::experience::{CsatEvent, NpsEvent, ShareEvent};
use quality_core::funnel::{
    BottleneckReport, DailyFunnelSnapshot, DailyStageCounts, FunnelEvent, FunnelStage, FunnelType,
    MilestoneRecord,
};
use quality_core::store::{
    AwardOp, AwardOutcome, BadgeStore, ExperienceStore, FunnelEventStore, MilestoneStore,
    SnapshotStore, UserDirectory,
};
use quality_core::types::{email_in_domain, Metadata, UserIdentity};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Thread-safe in-memory store for funnel events, aggregates, badges and
/// experience events.
pub struct InMemoryStore {
    funnel_events: DashMap<String, Vec<FunnelEvent>>,
    daily_stages: DashMap<(String, NaiveDate), DailyStageCounts>,
    milestones: DashMap<String, Vec<MilestoneRecord>>,
    funnel_snapshots: DashMap<(String, FunnelType, NaiveDate), DailyFunnelSnapshot>,
    bottleneck_reports: DashMap<(String, FunnelType), Vec<BottleneckReport>>,
    user_badges: DashMap<String, UserBadges>,
    achievements: DashMap<Uuid, AchievementEvent>,
    csat: DashMap<String, Vec<CsatEvent>>,
    nps: DashMap<String, Vec<NpsEvent>>,
    shares: DashMap<String, Vec<ShareEvent>>,
    users: DashMap<String, UserIdentity>,
}

/// Funnel event row as exported by other tools; the stage is free text.
#[derive(Debug, Deserialize)]
struct RawFunnelEvent {
    #[serde(default)]
    id: Option<Uuid>,
    domain_id: String,
    user_id: String,
    #[serde(default)]
    user_email: String,
    stage: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: Metadata,
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Quality store initialized (in-memory, development mode)");
        Self {
            funnel_events: DashMap::new(),
            daily_stages: DashMap::new(),
            milestones: DashMap::new(),
            funnel_snapshots: DashMap::new(),
            bottleneck_reports: DashMap::new(),
            user_badges: DashMap::new(),
            achievements: DashMap::new(),
            csat: DashMap::new(),
            nps: DashMap::new(),
            shares: DashMap::new(),
            users: DashMap::new(),
        }
    }

    /// Load JSON-lines funnel events. Rows whose stage is not a known funnel
    /// stage are skipped. Returns the number of rows imported.
    pub fn import_funnel_events_json(&self, payload: &str) -> QualityResult<usize> {
        let mut imported = 0;
        let mut skipped = 0;
        for line in payload.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let raw: RawFunnelEvent = serde_json::from_str(line)?;
            let Ok(stage) = raw.stage.parse::<FunnelStage>() else {
                debug!(stage = %raw.stage, domain_id = %raw.domain_id, "Skipping event with unknown stage");
                skipped += 1;
                continue;
            };
            let event = FunnelEvent {
                id: raw.id.unwrap_or_else(Uuid::new_v4),
                domain_id: raw.domain_id,
                user_id: raw.user_id,
                user_email: raw.user_email,
                stage,
                timestamp: raw.timestamp,
                metadata: raw.metadata,
            };
            self.funnel_events
                .entry(event.domain_id.clone())
                .or_default()
                .push(event);
            imported += 1;
        }
        info!(imported = imported, skipped = skipped, "Funnel events imported");
        Ok(imported)
    }

    pub fn funnel_event_count(&self, domain_id: &str) -> usize {
        self.funnel_events.get(domain_id).map(|e| e.len()).unwrap_or(0)
    }

    fn record_achievements(&self, user_id: &str, awarded: &[Badge]) -> Vec<AchievementEvent> {
        awarded
            .iter()
            .map(|badge| {
                let event = AchievementEvent::for_badge(user_id, badge);
                self.achievements.insert(event.id, event.clone());
                event
            })
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn since_filter<T: Clone>(
    map: &DashMap<String, Vec<T>>,
    domain_id: &str,
    since: DateTime<Utc>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    map.get(domain_id)
        .map(|events| {
            events
                .iter()
                .filter(|e| timestamp(e) >= since)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

// ─── Funnel Events ──────────────────────────────────────────────────────────

impl FunnelEventStore for InMemoryStore {
    fn append_funnel_event(&self, event: FunnelEvent) -> QualityResult<()> {
        self.funnel_events
            .entry(event.domain_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    fn funnel_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<FunnelEvent>> {
        Ok(since_filter(&self.funnel_events, domain_id, since, |e| e.timestamp))
    }

    fn increment_daily_stage(
        &self,
        domain_id: &str,
        date: NaiveDate,
        stage: FunnelStage,
    ) -> QualityResult<DailyStageCounts> {
        let mut entry = self
            .daily_stages
            .entry((domain_id.to_string(), date))
            .or_insert_with(|| DailyStageCounts {
                domain_id: domain_id.to_string(),
                date,
                stages: BTreeMap::new(),
                updated_at: Utc::now(),
            });
        *entry.stages.entry(stage).or_insert(0) += 1;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }
}

impl MilestoneStore for InMemoryStore {
    fn append_milestone(&self, record: MilestoneRecord) -> QualityResult<()> {
        self.milestones
            .entry(record.domain_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn milestones(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<MilestoneRecord>> {
        Ok(since_filter(&self.milestones, domain_id, since, |r| r.timestamp))
    }
}

// ─── Snapshots ──────────────────────────────────────────────────────────────

impl SnapshotStore for InMemoryStore {
    fn save_funnel_snapshot(&self, snapshot: DailyFunnelSnapshot) -> QualityResult<()> {
        let key = (snapshot.domain_id.clone(), snapshot.funnel_type, snapshot.date);
        self.funnel_snapshots.insert(key, snapshot);
        Ok(())
    }

    fn funnel_snapshot(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
        date: NaiveDate,
    ) -> QualityResult<Option<DailyFunnelSnapshot>> {
        Ok(self
            .funnel_snapshots
            .get(&(domain_id.to_string(), funnel_type, date))
            .map(|s| s.clone()))
    }

    fn save_bottleneck_report(&self, report: BottleneckReport) -> QualityResult<()> {
        self.bottleneck_reports
            .entry((report.domain_id.clone(), report.funnel_type))
            .or_default()
            .push(report);
        Ok(())
    }

    fn latest_bottleneck_report(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
    ) -> QualityResult<Option<BottleneckReport>> {
        Ok(self
            .bottleneck_reports
            .get(&(domain_id.to_string(), funnel_type))
            .and_then(|reports| reports.iter().max_by_key(|r| r.computed_at).cloned()))
    }

    fn bottleneck_history(
        &self,
        domain_id: &str,
        funnel_type: FunnelType,
    ) -> QualityResult<Vec<BottleneckReport>> {
        let mut reports = self
            .bottleneck_reports
            .get(&(domain_id.to_string(), funnel_type))
            .map(|r| r.clone())
            .unwrap_or_default();
        reports.sort_by_key(|r| r.computed_at);
        Ok(reports)
    }
}

// ─── Badges ─────────────────────────────────────────────────────────────────

impl BadgeStore for InMemoryStore {
    fn user_badges(&self, user_id: &str) -> QualityResult<Option<UserBadges>> {
        Ok(self.user_badges.get(user_id).map(|b| b.clone()))
    }

    fn award_atomically(
        &self,
        user_id: &str,
        user_email: &str,
        op: &mut AwardOp<'_>,
    ) -> QualityResult<AwardOutcome> {
        // The entry guard holds the shard write lock for the whole
        // read-evaluate-write sequence.
        let outcome = match self.user_badges.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                if current.user_email.is_empty() && !user_email.is_empty() {
                    current.user_email = user_email.to_string();
                }
                let awarded = op(current);
                let achievements = self.record_achievements(user_id, &awarded);
                AwardOutcome {
                    user_badges: current.clone(),
                    awarded,
                    achievements,
                }
            }
            Entry::Vacant(entry) => {
                let mut fresh = UserBadges::new(user_id, user_email);
                let awarded = op(&mut fresh);
                let achievements = if awarded.is_empty() {
                    Vec::new()
                } else {
                    let achievements = self.record_achievements(user_id, &awarded);
                    entry.insert(fresh.clone());
                    achievements
                };
                AwardOutcome {
                    user_badges: fresh,
                    awarded,
                    achievements,
                }
            }
        };
        Ok(outcome)
    }

    fn domain_user_badges(&self, domain_id: &str) -> QualityResult<Vec<UserBadges>> {
        Ok(self
            .user_badges
            .iter()
            .filter(|r| email_in_domain(&r.value().user_email, domain_id))
            .map(|r| r.value().clone())
            .collect())
    }

    fn set_rank(&self, user_id: &str, rank: u32) -> QualityResult<()> {
        if let Some(mut entry) = self.user_badges.get_mut(user_id) {
            entry.rank = rank;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    fn unshown_achievements(&self, user_id: &str, limit: usize) -> QualityResult<Vec<AchievementEvent>> {
        let mut pending: Vec<AchievementEvent> = self
            .achievements
            .iter()
            .filter(|r| r.value().user_id == user_id && !r.value().celebration_shown)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        pending.truncate(limit);
        Ok(pending)
    }

    fn mark_celebration_shown(&self, achievement_id: Uuid) -> QualityResult<bool> {
        Ok(self
            .achievements
            .get_mut(&achievement_id)
            .map(|mut event| event.mark_shown())
            .unwrap_or(false))
    }
}

// ─── Experience ─────────────────────────────────────────────────────────────

impl ExperienceStore for InMemoryStore {
    fn append_csat(&self, event: CsatEvent) -> QualityResult<()> {
        self.csat.entry(event.domain_id.clone()).or_default().push(event);
        Ok(())
    }

    fn csat_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<CsatEvent>> {
        Ok(since_filter(&self.csat, domain_id, since, |e| e.timestamp))
    }

    fn append_nps(&self, event: NpsEvent) -> QualityResult<()> {
        self.nps.entry(event.domain_id.clone()).or_default().push(event);
        Ok(())
    }

    fn nps_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<NpsEvent>> {
        Ok(since_filter(&self.nps, domain_id, since, |e| e.timestamp))
    }

    fn append_share(&self, event: ShareEvent) -> QualityResult<()> {
        self.shares.entry(event.domain_id.clone()).or_default().push(event);
        Ok(())
    }

    fn share_events(&self, domain_id: &str, since: DateTime<Utc>) -> QualityResult<Vec<ShareEvent>> {
        Ok(since_filter(&self.shares, domain_id, since, |e| e.timestamp))
    }
}

impl UserDirectory for InMemoryStore {
    fn register_user(&self, identity: UserIdentity) -> QualityResult<()> {
        self.users.insert(identity.user_id.clone(), identity);
        Ok(())
    }

    fn domain_users(&self, domain_id: &str) -> QualityResult<Vec<UserIdentity>> {
        Ok(self
            .users
            .iter()
            .filter(|r| r.value().belongs_to(domain_id))
            .map(|r| r.value().clone())
            .collect())
    }
}
