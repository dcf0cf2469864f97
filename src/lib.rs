//! Postline: caching and consistency engine for a social-content backend.
//!
//! Read-through caching of posts, comments and profiles over a key-value
//! store, write-behind like counters flushed on a schedule, per-user like
//! flags, and a profile replica kept current from broker events.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
