//! Client-side query cache with tag-based invalidation and a derived
//! session view.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
