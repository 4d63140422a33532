//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{AssetStatus, DestinationType, DraftStatus, UnitKind};
use chrono::{DateTime, Utc};

/// Draft slice used when queueing and finishing units.
#[derive(Debug, Clone)]
pub struct DraftForPublish {
    pub id: i64,
    pub caption: String,
    pub status: DraftStatus,
}

/// One image of a draft, as seen by the asset resolver.
#[derive(Debug, Clone)]
pub struct AssetForResolve {
    pub id: i64,
    pub draft_id: i64,
    pub source_ref: String,
    pub resolved_url: Option<String>,
    pub sort_position: i64,
    pub status: AssetStatus,
}

/// Connected destination account slice used by the fan-out orchestrator.
#[derive(Debug, Clone)]
pub struct InstanceForPublish {
    pub id: i64,
    pub name: String,
    pub access_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub scopes: String,
    pub ig_user_id: Option<String>,
    pub page_id: Option<String>,
}

impl InstanceForPublish {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.split(',').any(|s| s.trim() == scope)
    }

    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.token_expires_at, Some(exp) if exp <= now)
    }
}

/// Unit-of-work slice pulled by the batch runner.
#[derive(Debug, Clone)]
pub struct UnitForPublish {
    pub id: i64,
    pub kind: UnitKind,
    pub draft_id: Option<i64>,
    pub caption: Option<String>,
    pub media_urls: Option<Vec<String>>,
    pub destinations: Vec<DestinationType>,
    pub run_at: DateTime<Utc>,
}
