//! Asset Resolver: turns a draft's declared image sources into durable,
//! publicly fetchable URLs.
//!
//! Resolution is idempotent and re-entrant. An asset that already carries a
//! resolved URL is returned as-is with no network calls; a durable source
//! URL is adopted without copying; only opaque file-host pointers are
//! materialized into object storage.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::db::{self, AssetForResolve};
use crate::filehost::FileHostService;
use crate::storage::StorageService;

static DURABLE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").expect("valid regex"));

/// A source reference that is already a fetchable URL needs no copy.
pub fn is_durable_url(source_ref: &str) -> bool {
    DURABLE_URL.is_match(source_ref)
}

/// Select a file extension from the reported content type. Anything outside
/// the allow-list is stored as jpg.
pub fn pick_extension(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Storage path namespaced by draft and carousel position, so repeated
/// resolution of the same asset lands on the same object.
pub fn storage_path(draft_id: i64, sort_position: i64, ext: &str) -> String {
    format!("drafts/{}/{}.{}", draft_id, sort_position, ext)
}

#[instrument(skip_all, fields(asset_id = asset.id))]
pub async fn resolve_asset(
    pool: &SqlitePool,
    filehost: &dyn FileHostService,
    storage: &dyn StorageService,
    asset: &AssetForResolve,
) -> Result<String> {
    if let Some(url) = &asset.resolved_url {
        return Ok(url.clone());
    }

    if is_durable_url(&asset.source_ref) {
        db::mark_asset_resolved(pool, asset.id, &asset.source_ref).await?;
        return Ok(asset.source_ref.clone());
    }

    let file = filehost
        .download(&asset.source_ref)
        .await
        .with_context(|| format!("failed to fetch asset source {}", asset.source_ref))?;

    let ext = pick_extension(&file.content_type);
    let path = storage_path(asset.draft_id, asset.sort_position, ext);
    storage
        .upload(&path, file.content, &file.content_type)
        .await
        .with_context(|| format!("failed to upload asset to {}", path))?;

    let url = storage.public_url(&path);
    db::mark_asset_resolved(pool, asset.id, &url).await?;
    info!(draft_id = asset.draft_id, position = asset.sort_position, %url, "materialized asset");
    Ok(url)
}

/// All media URLs of a draft in carousel order. Any single failure aborts:
/// a post must never go out with missing images.
pub async fn resolve_draft_media(
    pool: &SqlitePool,
    filehost: &dyn FileHostService,
    storage: &dyn StorageService,
    draft_id: i64,
) -> Result<Vec<String>> {
    let assets = db::assets_for_draft(pool, draft_id).await?;
    let mut urls = Vec::with_capacity(assets.len());
    for asset in &assets {
        urls.push(resolve_asset(pool, filehost, storage, asset).await?);
    }
    Ok(urls)
}
