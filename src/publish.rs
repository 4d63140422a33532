//! Fan-out orchestration: media assembly and per-destination publishing.
//!
//! One unit of work fans out over (account, destination) pairs. Pairs are
//! attempted independently: a failed pair never prevents its siblings, and
//! every attempted pair leaves an outcome in the unit's result payload.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::assets;
use crate::db::{self, InstanceForPublish, UnitForPublish};
use crate::filehost::FileHostService;
use crate::graph::GraphService;
use crate::model::{DestinationType, PairOutcome, UnitOutcome};
use crate::storage::StorageService;

/// Media inputs of a unit, unified over the two unit shapes (draft-backed
/// job vs. scheduled post with inline URLs). The orchestrator and runner are
/// written once against this seam.
#[async_trait]
pub trait MediaSource: Send + Sync {
    fn caption(&self) -> &str;

    /// Durable, publicly fetchable image URLs in carousel order.
    async fn resolve_media(&self) -> Result<Vec<String>>;
}

/// Draft-backed source: assets may still need materialization.
pub struct DraftSource<'a> {
    pool: &'a SqlitePool,
    filehost: &'a dyn FileHostService,
    storage: &'a dyn StorageService,
    draft_id: i64,
    caption: String,
}

#[async_trait]
impl MediaSource for DraftSource<'_> {
    fn caption(&self) -> &str {
        &self.caption
    }

    async fn resolve_media(&self) -> Result<Vec<String>> {
        assets::resolve_draft_media(self.pool, self.filehost, self.storage, self.draft_id).await
    }
}

/// Inline source: URLs were already durable when the unit was created.
pub struct InlineSource {
    caption: String,
    urls: Vec<String>,
}

#[async_trait]
impl MediaSource for InlineSource {
    fn caption(&self) -> &str {
        &self.caption
    }

    async fn resolve_media(&self) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// Build the media source for a unit. Draft-backed units take their caption
/// from the draft unless the unit overrides it.
pub async fn media_source_for_unit<'a>(
    pool: &'a SqlitePool,
    filehost: &'a dyn FileHostService,
    storage: &'a dyn StorageService,
    unit: &UnitForPublish,
) -> Result<Box<dyn MediaSource + 'a>> {
    if let Some(draft_id) = unit.draft_id {
        let draft = db::fetch_draft(pool, draft_id).await?;
        let caption = unit.caption.clone().unwrap_or(draft.caption);
        return Ok(Box::new(DraftSource {
            pool,
            filehost,
            storage,
            draft_id,
            caption,
        }));
    }
    let urls = unit
        .media_urls
        .clone()
        .ok_or_else(|| anyhow!("unit {} has neither draft nor media URLs", unit.id))?;
    Ok(Box::new(InlineSource {
        caption: unit.caption.clone().unwrap_or_default(),
        urls,
    }))
}

/// Why an instance cannot be used for a destination right now. A non-ready
/// pair is excluded from fan-out before any platform call, with the reason
/// retained in the result payload.
pub fn readiness_error(
    instance: &InstanceForPublish,
    destination: DestinationType,
    now: DateTime<Utc>,
) -> Option<String> {
    if instance.token_expired(now) {
        return Some(format!("instance {}: access token expired", instance.name));
    }
    for scope in destination.required_scopes() {
        if !instance.has_scope(scope) {
            return Some(format!("instance {}: missing scope {}", instance.name, scope));
        }
    }
    match destination {
        DestinationType::Feed if instance.ig_user_id.is_none() => Some(format!(
            "instance {}: no business account id",
            instance.name
        )),
        DestinationType::Page if instance.page_id.is_none() => {
            Some(format!("instance {}: no page id", instance.name))
        }
        _ => None,
    }
}

/// Assemble containers for the photo feed and publish them. One container
/// per image in input order; a carousel container groups two or more. Any
/// creation failure aborts the pair: no partial media group is published.
async fn publish_feed(
    graph: &dyn GraphService,
    instance: &InstanceForPublish,
    urls: &[String],
    caption: &str,
) -> Result<String> {
    let ig_user_id = instance
        .ig_user_id
        .as_deref()
        .ok_or_else(|| anyhow!("instance {} has no business account id", instance.name))?;
    if urls.is_empty() {
        return Err(anyhow!("no media to publish"));
    }

    let creation_id = if urls.len() == 1 {
        // Single image: the container itself is the publishable unit and
        // carries the caption.
        graph
            .create_image_container(ig_user_id, &instance.access_token, &urls[0], caption, false)
            .await?
    } else {
        // Captions belong to the group container, not individual children.
        let mut children = Vec::with_capacity(urls.len());
        for url in urls {
            let child = graph
                .create_image_container(ig_user_id, &instance.access_token, url, "", true)
                .await?;
            children.push(child);
        }
        graph
            .create_carousel_container(ig_user_id, &instance.access_token, &children, caption)
            .await?
    };

    graph
        .publish_media(ig_user_id, &instance.access_token, &creation_id)
        .await
}

async fn publish_page(
    graph: &dyn GraphService,
    instance: &InstanceForPublish,
    caption: &str,
) -> Result<String> {
    let page_id = instance
        .page_id
        .as_deref()
        .ok_or_else(|| anyhow!("instance {} has no page id", instance.name))?;
    graph
        .publish_page_feed(page_id, &instance.access_token, caption)
        .await
}

/// Attempt one (account, destination) pair, returning its outcome without
/// propagating errors to sibling pairs.
#[instrument(skip_all, fields(instance_id = instance.id, destination = destination.as_str()))]
pub async fn publish_pair(
    graph: &dyn GraphService,
    instance: &InstanceForPublish,
    destination: DestinationType,
    urls: &[String],
    caption: &str,
    now: DateTime<Utc>,
) -> PairOutcome {
    if let Some(reason) = readiness_error(instance, destination, now) {
        warn!(reason = %reason, "destination not ready; excluded from fan-out");
        return PairOutcome::failure(instance.id, destination, reason);
    }

    let result = match destination {
        DestinationType::Feed => publish_feed(graph, instance, urls, caption).await,
        DestinationType::Page => publish_page(graph, instance, caption).await,
    };

    match result {
        Ok(media_id) => {
            info!(%media_id, "pair published");
            PairOutcome::success(instance.id, destination, media_id)
        }
        Err(err) => {
            warn!(?err, "pair failed");
            PairOutcome::failure(instance.id, destination, format!("{err:#}"))
        }
    }
}

/// Run one unit of work end to end: resolve media once up front, then fan
/// out over every requested pair and derive the terminal status.
#[instrument(skip_all)]
pub async fn run_unit(
    graph: &dyn GraphService,
    source: &dyn MediaSource,
    instances: &[InstanceForPublish],
    destinations: &[DestinationType],
) -> UnitOutcome {
    // Asset materialization failure is fatal for the whole unit: no partial
    // post with missing images, no pair attempted.
    let urls = match source.resolve_media().await {
        Ok(urls) => urls,
        Err(err) => {
            warn!(?err, "media resolution failed");
            return UnitOutcome::fatal(format!("media resolution failed: {err:#}"));
        }
    };

    let now = Utc::now();
    let mut pairs = Vec::new();
    for instance in instances {
        for destination in destinations {
            let outcome =
                publish_pair(graph, instance, *destination, &urls, source.caption(), now).await;
            pairs.push(outcome);
        }
    }
    UnitOutcome::from_pairs(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn instance(scopes: &str, ig: Option<&str>, page: Option<&str>) -> InstanceForPublish {
        InstanceForPublish {
            id: 1,
            name: "main".into(),
            access_token: "tok".into(),
            token_expires_at: None,
            scopes: scopes.into(),
            ig_user_id: ig.map(str::to_string),
            page_id: page.map(str::to_string),
        }
    }

    #[test]
    fn ready_instance_passes() {
        let inst = instance(
            "instagram_basic,instagram_content_publish,pages_manage_posts",
            Some("ig-1"),
            Some("pg-1"),
        );
        assert!(readiness_error(&inst, DestinationType::Feed, Utc::now()).is_none());
        assert!(readiness_error(&inst, DestinationType::Page, Utc::now()).is_none());
    }

    #[test]
    fn expired_token_is_not_ready() {
        let mut inst = instance("instagram_basic,instagram_content_publish", Some("ig-1"), None);
        inst.token_expires_at = Some(Utc::now() - Duration::hours(1));
        let reason = readiness_error(&inst, DestinationType::Feed, Utc::now()).unwrap();
        assert!(reason.contains("token expired"));
    }

    #[test]
    fn unexpired_token_is_ready() {
        let mut inst = instance("instagram_basic,instagram_content_publish", Some("ig-1"), None);
        inst.token_expires_at = Some(Utc::now() + Duration::hours(1));
        assert!(readiness_error(&inst, DestinationType::Feed, Utc::now()).is_none());
    }

    #[test]
    fn missing_scope_names_the_grant() {
        let inst = instance("instagram_basic", Some("ig-1"), Some("pg-1"));
        let reason = readiness_error(&inst, DestinationType::Feed, Utc::now()).unwrap();
        assert!(reason.contains("instagram_content_publish"));
    }

    #[test]
    fn missing_identifiers_are_not_ready() {
        let inst = instance(
            "instagram_basic,instagram_content_publish,pages_manage_posts",
            None,
            None,
        );
        assert!(readiness_error(&inst, DestinationType::Feed, Utc::now())
            .unwrap()
            .contains("business account"));
        assert!(readiness_error(&inst, DestinationType::Page, Utc::now())
            .unwrap()
            .contains("page id"));
    }
}
