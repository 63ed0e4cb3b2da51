#![warn(clippy::unwrap_used)]

pub mod badges;
pub mod config;
pub mod error;
pub mod experience;
pub mod funnel;
pub mod stats;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{QualityError, QualityResult};
