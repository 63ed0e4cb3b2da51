#![warn(clippy::unwrap_used)]

//! Funnel analytics for the quality loop: conversion rates per funnel shape,
//! bottleneck detection against stage targets, and milestone latency
//! statistics.

pub mod bottleneck;
pub mod funnel;
pub mod milestones;

pub use bottleneck::{BottleneckDetector, FunnelSummary, TaggedBottleneck};
pub use funnel::{compute_conversion_rates, FunnelAggregator};
pub use milestones::MilestoneTimer;
