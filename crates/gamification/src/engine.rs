//! Badge engine: evaluates the catalogue against a user's metric snapshot and
//! awards each badge at most once.

use chrono::{DateTime, Utc};
use quality_core::badges::{AchievementEvent, Badge, MetricSnapshot, Rarity, UserBadges};
use quality_core::config::GamificationConfig;
use quality_core::store::BadgeStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalogue::{rarity_stats, BadgeCatalogue};

/// Closest unearned badge and how far along the user is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadgeProgress {
    pub badge_type: String,
    pub name: String,
    /// `current / threshold`, capped at 1.
    pub progress: f64,
    pub current: f64,
    pub requirement: String,
}

/// Badges from `catalogue` the user does not hold and whose criteria the
/// snapshot meets, stamped with `now`. Metrics absent from the snapshot never
/// match.
pub fn eligible_badges(
    catalogue: &BadgeCatalogue,
    held: &UserBadges,
    metrics: &MetricSnapshot,
    now: DateTime<Utc>,
) -> Vec<Badge> {
    catalogue
        .badges()
        .iter()
        .filter(|badge| !held.has(&badge.badge_type))
        .filter(|badge| badge.criteria.is_met(metrics).unwrap_or(false))
        .map(|badge| badge.earned(now))
        .collect()
}

/// Unearned "at least" badge with the smallest remaining relative gap. Ties go
/// to the badge listed first.
pub fn next_badge(
    catalogue: &BadgeCatalogue,
    held: &UserBadges,
    metrics: &MetricSnapshot,
) -> Option<BadgeProgress> {
    let mut best: Option<(f64, BadgeProgress)> = None;
    for badge in catalogue.badges() {
        let criteria = &badge.criteria;
        if held.has(&badge.badge_type) || !criteria.operator.has_progress() || criteria.threshold <= 0.0 {
            continue;
        }
        let Some(current) = metrics.get(&criteria.metric) else {
            continue;
        };
        if criteria.operator.evaluate(current, criteria.threshold) {
            continue;
        }
        let gap = (criteria.threshold - current) / criteria.threshold;
        if best.as_ref().map_or(true, |(best_gap, _)| gap < *best_gap) {
            best = Some((
                gap,
                BadgeProgress {
                    badge_type: badge.badge_type.clone(),
                    name: badge.name.clone(),
                    progress: (current / criteria.threshold).clamp(0.0, 1.0),
                    current,
                    requirement: format!(
                        "{} {} {}",
                        criteria.metric, criteria.operator, criteria.threshold
                    ),
                },
            ));
        }
    }
    best.map(|(_, progress)| progress)
}

/// Progress toward one badge: 1 once held or met, `current / threshold`
/// for "at least" criteria, `None` for criteria without a direction.
pub fn badge_progress(badge: &Badge, held: &UserBadges, metrics: &MetricSnapshot) -> Option<f64> {
    let criteria = &badge.criteria;
    if held.has(&badge.badge_type) || criteria.is_met(metrics).unwrap_or(false) {
        return Some(1.0);
    }
    if !criteria.operator.has_progress() || criteria.threshold <= 0.0 {
        return None;
    }
    let current = metrics.get(&criteria.metric).unwrap_or(0.0);
    Some((current / criteria.threshold).clamp(0.0, 1.0))
}

pub struct BadgeEngine {
    catalogue: Arc<BadgeCatalogue>,
    store: Arc<dyn BadgeStore>,
    achievement_batch: usize,
}

impl BadgeEngine {
    pub fn new(
        catalogue: Arc<BadgeCatalogue>,
        store: Arc<dyn BadgeStore>,
        config: &GamificationConfig,
    ) -> Self {
        info!(badges = catalogue.len(), "Badge engine initialized");
        Self {
            catalogue,
            store,
            achievement_batch: config.achievement_batch,
        }
    }

    pub fn catalogue(&self) -> &BadgeCatalogue {
        &self.catalogue
    }

    pub fn badge_definition(&self, badge_type: &str) -> Option<&Badge> {
        self.catalogue.get(badge_type)
    }

    pub fn check_and_award(&self, user_id: &str, user_email: &str, snapshot: &MetricSnapshot) -> Vec<Badge> {
        self.check_and_award_at(user_id, user_email, snapshot, Utc::now())
    }

    /// Award every newly met badge. Reading the held set, adding badges and
    /// recording achievements happen in one critical section per user, so
    /// concurrent calls never award a badge twice. A failing store yields no
    /// awards.
    pub fn check_and_award_at(
        &self,
        user_id: &str,
        user_email: &str,
        snapshot: &MetricSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Badge> {
        let catalogue = &self.catalogue;
        let mut award = |current: &mut UserBadges| {
            let eligible = eligible_badges(catalogue, current, snapshot, now);
            current.add_badges(eligible)
        };

        match self.store.award_atomically(user_id, user_email, &mut award) {
            Ok(outcome) => {
                if outcome.awarded.is_empty() {
                    debug!(user_id = %user_id, metrics = snapshot.len(), "No new badges");
                } else {
                    metrics::counter!("quality.badges.awarded").increment(outcome.awarded.len() as u64);
                    info!(
                        user_id = %user_id,
                        awarded = outcome.awarded.len(),
                        total_points = outcome.user_badges.total_points,
                        "Badges awarded"
                    );
                }
                outcome.awarded
            }
            Err(e) => {
                metrics::counter!("quality.badges.store_errors").increment(1);
                warn!(error = %e, user_id = %user_id, "Failed to award badges");
                Vec::new()
            }
        }
    }

    /// The user's badges; an empty record when none were earned yet or the
    /// store cannot be read.
    pub fn user_badges(&self, user_id: &str) -> UserBadges {
        match self.store.user_badges(user_id) {
            Ok(Some(badges)) => badges,
            Ok(None) => UserBadges::new(user_id, ""),
            Err(e) => {
                warn!(error = %e, user_id = %user_id, "Failed to read user badges");
                UserBadges::new(user_id, "")
            }
        }
    }

    pub fn next_badge_progress(&self, user_id: &str, metrics: &MetricSnapshot) -> Option<BadgeProgress> {
        next_badge(&self.catalogue, &self.user_badges(user_id), metrics)
    }

    pub fn badge_progress(&self, user_id: &str, badge_type: &str, metrics: &MetricSnapshot) -> Option<f64> {
        let badge = self.catalogue.get(badge_type)?;
        badge_progress(badge, &self.user_badges(user_id), metrics)
    }

    /// Newest uncelebrated achievements, up to the configured batch size.
    pub fn unshown_achievements(&self, user_id: &str) -> Vec<AchievementEvent> {
        self.store
            .unshown_achievements(user_id, self.achievement_batch)
            .unwrap_or_else(|e| {
                warn!(error = %e, user_id = %user_id, "Failed to read achievements");
                Vec::new()
            })
    }

    pub fn mark_celebration_shown(&self, achievement_id: Uuid) -> bool {
        match self.store.mark_celebration_shown(achievement_id) {
            Ok(flipped) => flipped,
            Err(e) => {
                warn!(error = %e, achievement_id = %achievement_id, "Failed to mark celebration shown");
                false
            }
        }
    }

    pub fn rarity_stats(&self, user_id: &str) -> BTreeMap<Rarity, usize> {
        rarity_stats(&self.user_badges(user_id).badges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quality_core::badges::{ExpertPerformanceMetrics, UserContributionMetrics};
    use quality_core::error::{QualityError, QualityResult};
    use quality_core::store::{AwardOp, AwardOutcome};
    use quality_store::InMemoryStore;

    fn engine(store: Arc<InMemoryStore>) -> BadgeEngine {
        let catalogue = Arc::new(BadgeCatalogue::builtin().unwrap());
        BadgeEngine::new(catalogue, store, &GamificationConfig::default())
    }

    fn contributor(feedback_given: u64, feedback_useful: u64) -> MetricSnapshot {
        MetricSnapshot::from(&UserContributionMetrics {
            total_interactions: 25,
            feedback_given,
            feedback_useful,
            ..Default::default()
        })
    }

    #[test]
    fn test_awards_once() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store);
        let metrics = contributor(12, 6);

        let first = engine.check_and_award("u1", "u1@acme.cl", &metrics);
        let mut types: Vec<&str> = first.iter().map(|b| b.badge_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["power-user", "quality-contributor"]);
        assert!(first.iter().all(|b| b.earned_at.is_some()));

        assert!(engine.check_and_award("u1", "u1@acme.cl", &metrics).is_empty());

        let held = engine.user_badges("u1");
        assert_eq!(held.badges.len(), 2);
        assert_eq!(held.total_points, 20);
        assert_eq!(engine.unshown_achievements("u1").len(), 2);
    }

    #[test]
    fn test_no_document_without_award() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());
        assert!(engine.check_and_award("u1", "u1@acme.cl", &MetricSnapshot::new()).is_empty());
        assert!(store.user_badges("u1").unwrap().is_none());
        assert_eq!(engine.user_badges("u1").total_points, 0);
    }

    #[test]
    fn test_expert_without_evaluations_gets_no_speed_badges() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store);
        let idle = MetricSnapshot::from(&ExpertPerformanceMetrics::default());
        let awarded = engine.check_and_award("e1", "e1@acme.cl", &idle);
        assert!(awarded
            .iter()
            .all(|b| b.badge_type != "speed-demon" && b.badge_type != "efficiency-expert"));
    }

    #[test]
    fn test_early_adopter_and_exact_rank() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store);

        let metrics = MetricSnapshot::new().with("signup_order", 100.0).with("specialty_rank", 1.0);
        let mut types: Vec<String> = engine
            .check_and_award("u1", "u1@acme.cl", &metrics)
            .into_iter()
            .map(|b| b.badge_type)
            .collect();
        types.sort();
        assert_eq!(types, vec!["early-adopter", "specialist-elite"]);
        assert_eq!(engine.user_badges("u1").total_points, 300);
        let stats = engine.rarity_stats("u1");
        assert_eq!(stats[&Rarity::Rare], 1);
        assert_eq!(stats[&Rarity::Legendary], 1);
    }

    #[test]
    fn test_concurrent_awards_are_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(engine(store.clone()));
        let metrics = contributor(60, 6);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let metrics = metrics.clone();
                std::thread::spawn(move || engine.check_and_award("u1", "u1@acme.cl", &metrics).len())
            })
            .collect();
        let awarded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // power-user, quality-contributor, feedback-hero
        assert_eq!(awarded, 3);
        let held = engine.user_badges("u1");
        assert_eq!(held.badges.len(), 3);
        assert_eq!(held.total_points, 120);
        assert_eq!(store.unshown_achievements("u1", 10).unwrap().len(), 3);
    }

    #[test]
    fn test_next_badge_progress() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store);
        let metrics = contributor(40, 2).with("share_count", 4.0);

        // community-champion (4/5) and feedback-hero (40/50) tie; the former is listed first.
        let next = engine.next_badge_progress("u1", &metrics).unwrap();
        assert_eq!(next.badge_type, "community-champion");
        assert!((next.progress - 0.8).abs() < 1e-9);
        assert_eq!(next.requirement, "share_count >= 5");
    }

    #[test]
    fn test_badge_progress_monotonic() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store);
        let mut last = 0.0;
        for shares in 0..=6 {
            let metrics = MetricSnapshot::new().with("share_count", f64::from(shares));
            let progress = engine.badge_progress("u1", "community-champion", &metrics).unwrap();
            assert!(progress >= last);
            last = progress;
        }
        assert_eq!(last, 1.0);
        assert!(engine.badge_progress("u1", "early-adopter", &MetricSnapshot::new()).is_none());
        assert!(engine.badge_progress("u1", "no-such-badge", &MetricSnapshot::new()).is_none());
    }

    #[test]
    fn test_next_badge_none_when_all_met() {
        let catalogue = BadgeCatalogue::builtin().unwrap();
        let metrics = MetricSnapshot::new().with("feedback_useful", 9.0);
        let mut held = UserBadges::new("u1", "u1@acme.cl");
        held.add_badges(eligible_badges(&catalogue, &held, &metrics, Utc::now()));
        assert!(next_badge(&catalogue, &held, &metrics).is_none());
    }

    #[test]
    fn test_celebration_flow() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store);
        let metrics = MetricSnapshot::new().with("feedback_useful", 5.0);
        engine.check_and_award("u1", "u1@acme.cl", &metrics);

        let pending = engine.unshown_achievements("u1");
        assert_eq!(pending.len(), 1);
        assert!(engine.mark_celebration_shown(pending[0].id));
        assert!(!engine.mark_celebration_shown(pending[0].id));
        assert!(engine.unshown_achievements("u1").is_empty());
        assert!(!engine.mark_celebration_shown(Uuid::new_v4()));
    }

    struct FailingStore;

    fn unavailable<T>() -> QualityResult<T> {
        Err(QualityError::Store("unavailable".into()))
    }

    impl BadgeStore for FailingStore {
        fn user_badges(&self, _user_id: &str) -> QualityResult<Option<UserBadges>> {
            unavailable()
        }
        fn award_atomically(
            &self,
            _user_id: &str,
            _user_email: &str,
            _op: &mut AwardOp<'_>,
        ) -> QualityResult<AwardOutcome> {
            unavailable()
        }
        fn domain_user_badges(&self, _domain_id: &str) -> QualityResult<Vec<UserBadges>> {
            unavailable()
        }
        fn set_rank(&self, _user_id: &str, _rank: u32) -> QualityResult<()> {
            unavailable()
        }
        fn unshown_achievements(&self, _user_id: &str, _limit: usize) -> QualityResult<Vec<AchievementEvent>> {
            unavailable()
        }
        fn mark_celebration_shown(&self, _achievement_id: Uuid) -> QualityResult<bool> {
            unavailable()
        }
    }

    #[test]
    fn test_store_failure_awards_nothing() {
        let catalogue = Arc::new(BadgeCatalogue::builtin().unwrap());
        let engine = BadgeEngine::new(catalogue, Arc::new(FailingStore), &GamificationConfig::default());
        assert!(engine.check_and_award("u1", "u1@acme.cl", &contributor(60, 6)).is_empty());
        assert_eq!(engine.user_badges("u1").badges.len(), 0);
        assert!(engine.unshown_achievements("u1").is_empty());
    }
}
