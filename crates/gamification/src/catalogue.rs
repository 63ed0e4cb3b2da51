//! Declarative badge catalogue.
//!
//! Badges are data: a JSON array of definitions compiled into the binary as
//! the default, replaceable at startup with a file so thresholds and new
//! badges ship without code changes.

use quality_core::badges::{Badge, Rarity};
use quality_core::error::{QualityError, QualityResult};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

const BUILTIN_CATALOGUE: &str = include_str!("../catalogue/badges.json");

/// Immutable, ordered set of badge definitions.
#[derive(Debug, Clone)]
pub struct BadgeCatalogue {
    badges: Vec<Badge>,
}

impl BadgeCatalogue {
    /// The catalogue shipped with the crate.
    pub fn builtin() -> QualityResult<Self> {
        Self::from_json(BUILTIN_CATALOGUE)
    }

    pub fn from_path(path: impl AsRef<Path>) -> QualityResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            QualityError::Catalogue(format!("cannot read {}: {e}", path.display()))
        })?;
        let catalogue = Self::from_json(&json)?;
        info!(path = %path.display(), badges = catalogue.len(), "Badge catalogue loaded");
        Ok(catalogue)
    }

    /// Load the configured catalogue file, or the built-in one.
    pub fn load(path: Option<&str>) -> QualityResult<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    pub fn from_json(json: &str) -> QualityResult<Self> {
        let badges: Vec<Badge> = serde_json::from_str(json)
            .map_err(|e| QualityError::Catalogue(format!("invalid catalogue: {e}")))?;
        Self::new(badges)
    }

    pub fn new(badges: Vec<Badge>) -> QualityResult<Self> {
        let mut seen = HashSet::new();
        for badge in &badges {
            if badge.badge_type.trim().is_empty() {
                return Err(QualityError::Catalogue("badge with empty type".into()));
            }
            if badge.criteria.metric.trim().is_empty() {
                return Err(QualityError::Catalogue(format!(
                    "badge {} has no criteria metric",
                    badge.badge_type
                )));
            }
            if !badge.criteria.threshold.is_finite() {
                return Err(QualityError::Catalogue(format!(
                    "badge {} has a non-finite threshold",
                    badge.badge_type
                )));
            }
            if !seen.insert(badge.badge_type.as_str()) {
                return Err(QualityError::Catalogue(format!(
                    "duplicate badge type {}",
                    badge.badge_type
                )));
            }
        }
        // Definitions never carry an award time.
        let badges = badges
            .into_iter()
            .map(|badge| Badge {
                earned_at: None,
                ..badge
            })
            .collect();
        Ok(Self { badges })
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    pub fn get(&self, badge_type: &str) -> Option<&Badge> {
        self.badges.iter().find(|b| b.badge_type == badge_type)
    }

    pub fn len(&self) -> usize {
        self.badges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.badges.is_empty()
    }
}

/// Count of badges per rarity; every rarity is present.
pub fn rarity_stats(badges: &[Badge]) -> BTreeMap<Rarity, usize> {
    let mut stats: BTreeMap<Rarity, usize> = Rarity::ALL.into_iter().map(|r| (r, 0)).collect();
    for badge in badges {
        *stats.entry(badge.rarity).or_insert(0) += 1;
    }
    stats
}
