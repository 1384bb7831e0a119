//! Forgesync - sync issues and pull requests from code forges into JIRA
//!
//! Reconciles issue/PR state from upstream platforms (GitHub, Pagure) into
//! downstream JIRA tickets, driven by near-real-time events and periodic
//! full re-scans. Convergence is idempotent: re-delivering an event, or
//! re-walking a whole repository, never produces a second ticket or a
//! redundant write.
//!
//! # Architecture
//!
//! - **model**: platform-agnostic intermediary objects (Issue, PullRequest)
//! - **config**: global configuration and the per-repository policy table
//! - **upstream**: GitHub/Pagure adapters, event routing, rate/retry guard
//! - **downstream**: field-update engine, JIRA client, reconciler,
//!   duplicate detection
//! - **notify**: alert dispatch behind a transport-agnostic trait
//! - **service**: the single-worker pipeline and batch initialization

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

// Components
pub mod downstream;
pub mod notify;
pub mod service;
pub mod upstream;

// Re-exports
pub use error::{Result, SyncError};
