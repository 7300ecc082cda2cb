//! SENTINEL: risk-gated trade-decision pipeline.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod advisors;
pub mod alerts;
pub mod config;
pub mod data;
pub mod engine;
pub mod journal;
pub mod resilience;
pub mod strategy;
pub mod types;
