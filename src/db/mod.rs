//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed domain entities and view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `meta_publisher::db` — we re-export
//! the repository API and commonly used models for convenience.

pub mod model;
pub mod repo;

// Re-export the repository API at `crate::db::*`.
pub use repo::*;

// Surface view models used by callers (resolver, orchestrator, runner).
pub use model::{AssetForResolve, DraftForPublish, InstanceForPublish, UnitForPublish};
