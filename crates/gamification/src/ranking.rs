//! Domain rankings by badge points and the leaderboard read over them.

use dashmap::DashMap;
use parking_lot::Mutex;
use quality_core::badges::{Badge, UserBadges};
use quality_core::store::BadgeStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub user_email: String,
    pub rank: u32,
    pub total_points: u32,
    pub badges: Vec<Badge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_badge: Option<Badge>,
}

impl From<UserBadges> for LeaderboardEntry {
    fn from(user: UserBadges) -> Self {
        let recent_badge = user.most_recent().cloned();
        Self {
            user_id: user.user_id,
            user_email: user.user_email,
            rank: user.rank,
            total_points: user.total_points,
            badges: user.badges,
            recent_badge,
        }
    }
}

/// Ordinal ranks `1..=n`: most points first, ties broken by user id.
pub fn assign_ranks(users: &[UserBadges]) -> Vec<(String, u32)> {
    let mut order: Vec<&UserBadges> = users.iter().collect();
    order.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    order
        .into_iter()
        .zip(1u32..)
        .map(|(user, rank)| (user.user_id.clone(), rank))
        .collect()
}

pub struct RankingService {
    store: Arc<dyn BadgeStore>,
    /// One sweep at a time per domain.
    sweeps: DashMap<String, Arc<Mutex<()>>>,
}

impl RankingService {
    pub fn new(store: Arc<dyn BadgeStore>) -> Self {
        Self {
            store,
            sweeps: DashMap::new(),
        }
    }

    /// Recompute and persist ranks for every badge holder in the domain.
    /// Returns how many ranks were written.
    pub fn update_rankings(&self, domain_id: &str) -> usize {
        let lock = self.sweeps.entry(domain_id.to_string()).or_default().clone();
        let _sweep = lock.lock();

        let users = match self.store.domain_user_badges(domain_id) {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to load domain badges");
                return 0;
            }
        };
        if users.is_empty() {
            debug!(domain_id = %domain_id, "No badge holders to rank");
            return 0;
        }

        let mut written = 0;
        for (user_id, rank) in assign_ranks(&users) {
            match self.store.set_rank(&user_id, rank) {
                Ok(()) => written += 1,
                Err(e) => warn!(error = %e, user_id = %user_id, rank = rank, "Failed to write rank"),
            }
        }

        metrics::counter!("quality.rankings.sweeps").increment(1);
        info!(domain_id = %domain_id, users = users.len(), written = written, "Rankings updated");
        written
    }

    /// Ranked users first by rank, then users never ranked; at most `limit`.
    pub fn leaderboard(&self, domain_id: &str, limit: usize) -> Vec<LeaderboardEntry> {
        let mut users = match self.store.domain_user_badges(domain_id) {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to load leaderboard");
                return Vec::new();
            }
        };
        users.sort_by(|a, b| {
            (a.rank == 0, a.rank, &a.user_id).cmp(&(b.rank == 0, b.rank, &b.user_id))
        });
        users
            .into_iter()
            .take(limit)
            .map(LeaderboardEntry::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use quality_core::badges::{BadgeCriteria, Operator, Rarity};
    use quality_store::InMemoryStore;

    fn holder(user_id: &str, points: u32) -> UserBadges {
        let mut user = UserBadges::new(user_id, format!("{user_id}@acme.cl"));
        user.total_points = points;
        user
    }

    fn badge(badge_type: &str, rarity: Rarity, minutes_ago: i64) -> Badge {
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
            earned_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
        }
    }

    fn award(store: &InMemoryStore, user_id: &str, email: &str, badges: Vec<Badge>) {
        store
            .award_atomically(user_id, email, &mut |current: &mut UserBadges| {
                current.add_badges(badges.clone())
            })
            .unwrap();
    }

    #[test]
    fn test_ordinal_ranks_with_ties() {
        let users = vec![holder("u2", 100), holder("u1", 250), holder("u3", 100)];
        assert_eq!(
            assign_ranks(&users),
            vec![("u1".to_string(), 1), ("u2".to_string(), 2), ("u3".to_string(), 3)]
        );
        assert!(assign_ranks(&[]).is_empty());
    }

    #[test]
    fn test_update_and_leaderboard() {
        let store = Arc::new(InMemoryStore::new());
        award(&store, "ana", "ana@acme.cl", vec![badge("a", Rarity::Legendary, 30)]);
        award(
            &store,
            "bo",
            "bo@acme.cl",
            vec![badge("a", Rarity::Epic, 20), badge("b", Rarity::Common, 5)],
        );
        award(&store, "cy", "cy@ACME.cl", vec![badge("a", Rarity::Epic, 10)]);
        award(&store, "dee", "dee@other.cl", vec![badge("a", Rarity::Legendary, 10)]);

        let rankings = RankingService::new(store.clone());
        assert_eq!(rankings.update_rankings("acme.cl"), 3);

        let board = rankings.leaderboard("acme.cl", 10);
        let order: Vec<(&str, u32, u32)> = board
            .iter()
            .map(|e| (e.user_id.as_str(), e.rank, e.total_points))
            .collect();
        assert_eq!(order, vec![("ana", 1, 250), ("bo", 2, 110), ("cy", 3, 100)]);
        assert_eq!(board[1].recent_badge.as_ref().unwrap().badge_type, "b");
        assert_eq!(rankings.leaderboard("acme.cl", 2).len(), 2);
    }

    #[test]
    fn test_unranked_users_listed_last() {
        let store = Arc::new(InMemoryStore::new());
        award(&store, "zed", "zed@acme.cl", vec![badge("a", Rarity::Common, 1)]);
        let rankings = RankingService::new(store.clone());
        rankings.update_rankings("acme.cl");
        award(&store, "amy", "amy@acme.cl", vec![badge("a", Rarity::Legendary, 1)]);

        let board = rankings.leaderboard("acme.cl", 10);
        assert_eq!(board[0].user_id, "zed");
        assert_eq!(board[1].user_id, "amy");
        assert_eq!(board[1].rank, 0);
    }

    #[test]
    fn test_empty_domain() {
        let rankings = RankingService::new(Arc::new(InMemoryStore::new()));
        assert_eq!(rankings.update_rankings("acme.cl"), 0);
        assert!(rankings.leaderboard("acme.cl", 10).is_empty());
    }

    #[test]
    fn test_concurrent_sweeps() {
        let store = Arc::new(InMemoryStore::new());
        for (i, user) in ["a", "b", "c", "d"].iter().enumerate() {
            let rarity = Rarity::ALL[i];
            award(&store, user, &format!("{user}@acme.cl"), vec![badge("x", rarity, 1)]);
        }
        let rankings = Arc::new(RankingService::new(store.clone()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rankings = rankings.clone();
                std::thread::spawn(move || rankings.update_rankings("acme.cl"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
        let ranks: Vec<u32> = rankings.leaderboard("acme.cl", 10).iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(store.user_badges("d").unwrap().unwrap().rank, 1);
    }
}
