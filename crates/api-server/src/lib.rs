#![warn(clippy::unwrap_used)]

pub mod experience_rest;
pub mod gamification_rest;
pub mod rest;
pub mod server;

pub use rest::AppState;
pub use server::{router, ApiServer};
