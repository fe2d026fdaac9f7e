//! Civic Report Service
//!
//! Tracks citizen-filed civic issues from submission to an on-site,
//! photo-backed resolution, and credits civic coins along the way.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{LifecycleError, Result};
