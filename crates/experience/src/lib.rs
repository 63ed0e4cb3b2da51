#![warn(clippy::unwrap_used)]

//! Experience trackers: CSAT ratings, NPS responses and share events, each
//! recorded as immutable events and summarised over a trailing window.

pub mod csat;
pub mod nps;
pub mod sharing;

pub use csat::{CsatSummary, CsatTracker, ExperienceCsat, ExperienceStatus, SurveyTrigger};
pub use nps::{DetractorFollowUp, NpsSummary, NpsTracker};
pub use sharing::{ShareActivity, SharingTracker, TopSharer};
