//! Sharing tracker: who shares quality-loop outcomes, where, and how far
//! they reach.

use chrono::{DateTime, Utc};
use quality_core::config::ExperienceConfig;
use quality_core::error::{QualityError, QualityResult};
use quality_core::experience::{ShareEvent, SharePlatform, ShareType};
use quality_core::stats::{ratio, Window};
use quality_core::store::{ExperienceStore, UserDirectory};
use quality_core::types::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopSharer {
    pub user_id: String,
    pub share_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareActivity {
    pub total_shares: u64,
    pub total_recipients: u64,
    pub by_platform: BTreeMap<SharePlatform, u64>,
    pub top_sharers: Vec<TopSharer>,
    /// Recipients per known user of the domain.
    pub viral_coefficient: f64,
}

pub struct SharingTracker {
    store: Arc<dyn ExperienceStore>,
    directory: Arc<dyn UserDirectory>,
    config: ExperienceConfig,
}

impl SharingTracker {
    pub fn new(
        store: Arc<dyn ExperienceStore>,
        directory: Arc<dyn UserDirectory>,
        config: &ExperienceConfig,
    ) -> Self {
        Self {
            store,
            directory,
            config: config.clone(),
        }
    }

    pub fn record(
        &self,
        user_id: &str,
        domain_id: &str,
        share_type: ShareType,
        platform: SharePlatform,
        recipient_count: u32,
        context: Metadata,
    ) -> QualityResult<ShareEvent> {
        if domain_id.trim().is_empty() {
            return Err(QualityError::Validation("domain_id must not be empty".into()));
        }
        let event = ShareEvent {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            domain_id: domain_id.to_string(),
            share_type,
            platform,
            recipient_count,
            context,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.append_share(event.clone()) {
            warn!(error = %e, domain_id = %domain_id, "Failed to record share");
            return Err(e);
        }
        metrics::counter!("quality.shares.recorded", "platform" => platform.to_string()).increment(1);
        debug!(
            domain_id = %domain_id,
            user_id = %user_id,
            platform = %platform,
            recipients = recipient_count,
            "Share recorded"
        );
        Ok(event)
    }

    pub fn activity(&self, domain_id: &str, period_days: u32) -> ShareActivity {
        self.activity_at(domain_id, period_days, Utc::now())
    }

    pub fn activity_at(&self, domain_id: &str, period_days: u32, now: DateTime<Utc>) -> ShareActivity {
        let window = Window::trailing(now, period_days);
        let events = match self.store.share_events(domain_id, window.start) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to read shares");
                Vec::new()
            }
        };
        let in_window: Vec<&ShareEvent> = events.iter().filter(|e| window.contains(e.timestamp)).collect();

        let active_users = match self.directory.domain_users(domain_id) {
            Ok(users) => users.len() as u64,
            Err(e) => {
                warn!(error = %e, domain_id = %domain_id, "Failed to count domain users");
                0
            }
        };
        summarize(&in_window, active_users, self.config.top_sharers)
    }
}

fn summarize(events: &[&ShareEvent], active_users: u64, top: usize) -> ShareActivity {
    let mut by_platform: BTreeMap<SharePlatform, u64> = BTreeMap::new();
    let mut per_user: HashMap<&str, u64> = HashMap::new();
    let mut total_recipients = 0u64;
    for event in events {
        *by_platform.entry(event.platform).or_insert(0) += 1;
        *per_user.entry(event.user_id.as_str()).or_insert(0) += 1;
        total_recipients += u64::from(event.recipient_count);
    }

    let mut top_sharers: Vec<TopSharer> = per_user
        .into_iter()
        .map(|(user_id, share_count)| TopSharer {
            user_id: user_id.to_string(),
            share_count,
        })
        .collect();
    top_sharers.sort_by(|a, b| {
        b.share_count
            .cmp(&a.share_count)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    top_sharers.truncate(top);

    ShareActivity {
        total_shares: events.len() as u64,
        total_recipients,
        by_platform,
        top_sharers,
        viral_coefficient: ratio(total_recipients, active_users),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FailingStore;
    use chrono::Duration;
    use quality_core::types::UserIdentity;
    use quality_store::InMemoryStore;

    fn tracker(store: &Arc<InMemoryStore>) -> SharingTracker {
        SharingTracker::new(store.clone(), store.clone(), &ExperienceConfig::default())
    }

    fn share(tracker: &SharingTracker, user_id: &str, platform: SharePlatform, recipients: u32) {
        tracker
            .record(user_id, "acme.cl", ShareType::Improvement, platform, recipients, Metadata::new())
            .unwrap();
    }

    #[test]
    fn test_activity_summary() {
        let store = Arc::new(InMemoryStore::new());
        for user in ["ana", "bo", "cy", "dee"] {
            store
                .register_user(UserIdentity::new(user, format!("{user}@acme.cl")))
                .unwrap();
        }
        store.register_user(UserIdentity::new("eve", "eve@other.cl")).unwrap();
        let sharing = tracker(&store);
        share(&sharing, "bo", SharePlatform::Slack, 3);
        share(&sharing, "ana", SharePlatform::Slack, 2);
        share(&sharing, "ana", SharePlatform::Email, 1);
        share(&sharing, "cy", SharePlatform::Teams, 4);

        let activity = sharing.activity("acme.cl", 30);
        assert_eq!(activity.total_shares, 4);
        assert_eq!(activity.total_recipients, 10);
        assert_eq!(activity.by_platform[&SharePlatform::Slack], 2);
        assert!(!activity.by_platform.contains_key(&SharePlatform::Internal));
        assert_eq!(activity.viral_coefficient, 2.5);

        let order: Vec<(&str, u64)> = activity
            .top_sharers
            .iter()
            .map(|s| (s.user_id.as_str(), s.share_count))
            .collect();
        assert_eq!(order, vec![("ana", 2), ("bo", 1), ("cy", 1)]);
    }

    #[test]
    fn test_top_sharers_limited() {
        let store = Arc::new(InMemoryStore::new());
        let config = ExperienceConfig {
            top_sharers: 2,
            ..ExperienceConfig::default()
        };
        let sharing = SharingTracker::new(store.clone(), store.clone(), &config);
        for user in ["a", "b", "c"] {
            share(&sharing, user, SharePlatform::Internal, 1);
        }
        let activity = sharing.activity("acme.cl", 30);
        assert_eq!(activity.top_sharers.len(), 2);
        // No registered users: coefficient falls back to zero.
        assert_eq!(activity.viral_coefficient, 0.0);
    }

    #[test]
    fn test_window_excludes_old_shares() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .append_share(ShareEvent {
                id: Uuid::new_v4(),
                user_id: "ana".into(),
                domain_id: "acme.cl".into(),
                share_type: ShareType::Achievement,
                platform: SharePlatform::Teams,
                recipient_count: 8,
                context: Metadata::new(),
                timestamp: now - Duration::days(45),
            })
            .unwrap();
        let activity = tracker(&store).activity_at("acme.cl", 30, now);
        assert_eq!(activity.total_shares, 0);
        assert!(activity.top_sharers.is_empty());
    }

    #[test]
    fn test_store_failure() {
        let failing = Arc::new(FailingStore);
        let sharing = SharingTracker::new(failing.clone(), failing, &ExperienceConfig::default());
        let activity = sharing.activity("acme.cl", 30);
        assert_eq!(activity.total_shares, 0);
        assert_eq!(activity.viral_coefficient, 0.0);
        assert!(sharing
            .record("ana", "acme.cl", ShareType::Milestone, SharePlatform::Slack, 1, Metadata::new())
            .is_err());
    }
}
