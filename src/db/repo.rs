use super::model::{AssetForResolve, DraftForPublish, InstanceForPublish, UnitForPublish};
use crate::model::{AssetStatus, DestinationType, DraftStatus, UnitKind, UnitStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Transaction};
use sqlx::{Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let (_had_slashes, path_with_query) = if let Some(r) = rest.strip_prefix("//") {
        (true, r)
    } else {
        (false, rest)
    };

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_draft(pool: &Pool, user_id: i64, caption: &str) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO drafts (user_id, caption, status) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(caption)
    .bind(DraftStatus::Draft.as_str())
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn add_draft_asset(
    pool: &Pool,
    draft_id: i64,
    source_ref: &str,
    sort_position: i64,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO draft_assets (draft_id, source_ref, sort_position, status) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(draft_id)
    .bind(source_ref)
    .bind(sort_position)
    .bind(AssetStatus::Pending.as_str())
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

pub async fn fetch_draft(pool: &Pool, draft_id: i64) -> Result<DraftForPublish> {
    let row = sqlx::query("SELECT id, caption, status FROM drafts WHERE id = ?")
        .bind(draft_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(anyhow!("draft {} not found", draft_id));
    };

    let status_str: String = row.get("status");
    let status = DraftStatus::parse_str(&status_str)
        .ok_or_else(|| anyhow!("draft {} has unknown status {}", draft_id, status_str))?;

    Ok(DraftForPublish {
        id: row.get("id"),
        caption: row.get("caption"),
        status,
    })
}

#[instrument(skip_all)]
pub async fn set_draft_status(pool: &Pool, draft_id: i64, status: DraftStatus) -> Result<()> {
    sqlx::query("UPDATE drafts SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(status.as_str())
        .bind(draft_id)
        .execute(pool)
        .await
        .context("failed to update draft status")?;
    Ok(())
}

/// Assets of a draft in carousel order.
pub async fn assets_for_draft(pool: &Pool, draft_id: i64) -> Result<Vec<AssetForResolve>> {
    let rows = sqlx::query(
        "SELECT id, draft_id, source_ref, resolved_url, sort_position, status \
         FROM draft_assets WHERE draft_id = ? ORDER BY sort_position ASC",
    )
    .bind(draft_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let status_str: String = row.get("status");
            let status = AssetStatus::parse_str(&status_str)
                .ok_or_else(|| anyhow!("asset has unknown status {}", status_str))?;
            Ok(AssetForResolve {
                id: row.get("id"),
                draft_id: row.get("draft_id"),
                source_ref: row.get("source_ref"),
                resolved_url: row.try_get::<Option<String>, _>("resolved_url").ok().flatten(),
                sort_position: row.get("sort_position"),
                status,
            })
        })
        .collect()
}

/// Persist a durable URL onto an asset. Once set the URL is never cleared;
/// a second resolution of the same asset leaves the stored value untouched.
#[instrument(skip_all)]
pub async fn mark_asset_resolved(pool: &Pool, asset_id: i64, url: &str) -> Result<()> {
    sqlx::query(
        "UPDATE draft_assets SET resolved_url = COALESCE(resolved_url, ?), status = ? WHERE id = ?",
    )
    .bind(url)
    .bind(AssetStatus::Processed.as_str())
    .bind(asset_id)
    .execute(pool)
    .await
    .context("failed to persist resolved asset URL")?;
    Ok(())
}

#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub async fn insert_instance(
    pool: &Pool,
    name: &str,
    access_token: &str,
    token_expires_at: Option<DateTime<Utc>>,
    scopes: &str,
    ig_user_id: Option<&str>,
    page_id: Option<&str>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO instances (name, access_token, token_expires_at, scopes, ig_user_id, page_id) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(access_token)
    .bind(token_expires_at)
    .bind(scopes)
    .bind(ig_user_id)
    .bind(page_id)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

fn instance_from_row(row: sqlx::sqlite::SqliteRow) -> InstanceForPublish {
    InstanceForPublish {
        id: row.get("id"),
        name: row.get("name"),
        access_token: row.get("access_token"),
        token_expires_at: row
            .try_get::<Option<DateTime<Utc>>, _>("token_expires_at")
            .ok()
            .flatten(),
        scopes: row.get("scopes"),
        ig_user_id: row.try_get::<Option<String>, _>("ig_user_id").ok().flatten(),
        page_id: row.try_get::<Option<String>, _>("page_id").ok().flatten(),
    }
}

pub async fn fetch_instance(pool: &Pool, instance_id: i64) -> Result<InstanceForPublish> {
    let row = sqlx::query(
        "SELECT id, name, access_token, token_expires_at, scopes, ig_user_id, page_id \
         FROM instances WHERE id = ?",
    )
    .bind(instance_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(anyhow!("instance {} not found", instance_id));
    };
    Ok(instance_from_row(row))
}

/// Requested accounts of a unit, in stable id order.
pub async fn instances_for_unit(pool: &Pool, unit_id: i64) -> Result<Vec<InstanceForPublish>> {
    let rows = sqlx::query(
        "SELECT i.id, i.name, i.access_token, i.token_expires_at, i.scopes, i.ig_user_id, i.page_id \
         FROM instances i \
         JOIN publish_unit_targets t ON t.instance_id = i.id \
         WHERE t.unit_id = ? ORDER BY i.id ASC",
    )
    .bind(unit_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(instance_from_row).collect())
}

/// Create a unit of work referencing a draft or inline media URLs, plus the
/// accounts it targets. A draft-backed unit flips its draft to `queued` in
/// the same transaction.
#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub async fn create_unit(
    pool: &Pool,
    kind: UnitKind,
    draft_id: Option<i64>,
    caption: Option<&str>,
    media_urls: Option<&[String]>,
    destinations: &[DestinationType],
    run_at: DateTime<Utc>,
    instance_ids: &[i64],
) -> Result<i64> {
    if draft_id.is_none() && media_urls.is_none() {
        return Err(anyhow!("unit needs a draft or inline media URLs"));
    }
    if destinations.is_empty() {
        return Err(anyhow!("unit needs at least one destination type"));
    }
    if instance_ids.is_empty() {
        return Err(anyhow!("unit needs at least one target instance"));
    }

    let destinations_str = destinations
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let media_json = media_urls
        .map(serde_json::to_string)
        .transpose()
        .context("failed to encode media URLs")?;

    let mut tx = pool.begin().await?;
    let unit_id: i64 = sqlx::query(
        "INSERT INTO publish_units (kind, draft_id, caption, media_urls, destinations, run_at, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(draft_id)
    .bind(caption)
    .bind(media_json)
    .bind(&destinations_str)
    .bind(run_at)
    .bind(UnitStatus::Queued.as_str())
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    for instance_id in instance_ids {
        insert_unit_target_tx(&mut tx, unit_id, *instance_id).await?;
    }

    if let Some(draft_id) = draft_id {
        sqlx::query("UPDATE drafts SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(DraftStatus::Queued.as_str())
            .bind(draft_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(unit_id)
}

async fn insert_unit_target_tx(
    tx: &mut Transaction<'_, Sqlite>,
    unit_id: i64,
    instance_id: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO publish_unit_targets (unit_id, instance_id) VALUES (?, ?)")
        .bind(unit_id)
        .bind(instance_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn unit_from_row(row: sqlx::sqlite::SqliteRow) -> Result<UnitForPublish> {
    let kind_str: String = row.get("kind");
    let kind = UnitKind::parse_str(&kind_str)
        .ok_or_else(|| anyhow!("unit has unknown kind {}", kind_str))?;
    let media_urls = row
        .try_get::<Option<String>, _>("media_urls")
        .ok()
        .flatten()
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()
        .context("invalid media_urls payload")?;
    let destinations_str: String = row.get("destinations");
    Ok(UnitForPublish {
        id: row.get("id"),
        kind,
        draft_id: row.try_get::<Option<i64>, _>("draft_id").ok().flatten(),
        caption: row.try_get::<Option<String>, _>("caption").ok().flatten(),
        media_urls,
        destinations: DestinationType::parse_list(&destinations_str),
        run_at: row.get("run_at"),
    })
}

/// Due units in scheduled order, capped to bound per-invocation latency and
/// external-API load. The remainder waits for the next invocation.
#[instrument(skip_all)]
pub async fn list_due_units(pool: &Pool, cap: u32) -> Result<Vec<UnitForPublish>> {
    let rows = sqlx::query(
        "SELECT id, kind, draft_id, caption, media_urls, destinations, run_at \
         FROM publish_units \
         WHERE status = 'queued' AND datetime(run_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(run_at) ASC LIMIT ?",
    )
    .bind(cap as i64)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(unit_from_row).collect()
}

/// Claim a due unit by conditionally flipping `queued -> publishing`.
/// Returns false when another invocation already took it; the caller must
/// skip the unit without issuing any external call.
#[instrument(skip_all)]
pub async fn claim_unit(pool: &Pool, unit_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE publish_units SET status = ?, started_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status = ?",
    )
    .bind(UnitStatus::Publishing.as_str())
    .bind(unit_id)
    .bind(UnitStatus::Queued.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Persist the terminal state of a unit with its result payload.
#[instrument(skip_all)]
pub async fn finish_unit(
    pool: &Pool,
    unit_id: i64,
    status: UnitStatus,
    result_json: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE publish_units SET status = ?, result = ?, error = ?, finished_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(result_json)
    .bind(error)
    .bind(unit_id)
    .execute(pool)
    .await
    .context("failed to persist unit result")?;
    Ok(())
}

pub async fn unit_status(pool: &Pool, unit_id: i64) -> Result<UnitStatus> {
    let status_str: String = sqlx::query_scalar("SELECT status FROM publish_units WHERE id = ?")
        .bind(unit_id)
        .fetch_one(pool)
        .await?;
    UnitStatus::parse_str(&status_str)
        .ok_or_else(|| anyhow!("unit {} has unknown status {}", unit_id, status_str))
}

pub async fn unit_result(pool: &Pool, unit_id: i64) -> Result<Option<String>> {
    let row: Option<Option<String>> =
        sqlx::query_scalar("SELECT result FROM publish_units WHERE id = ?")
            .bind(unit_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.flatten())
}

#[instrument(skip_all)]
pub async fn count_due_units(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM publish_units \
         WHERE status = 'queued' AND datetime(run_at) <= CURRENT_TIMESTAMP",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_draft_and_assets_roundtrip() {
        let pool = setup_pool().await;
        let draft_id = create_draft(&pool, 1, "Sunday service").await.unwrap();

        add_draft_asset(&pool, draft_id, "https://cdn/a.jpg", 1)
            .await
            .unwrap();
        let asset_id = add_draft_asset(&pool, draft_id, "file-123", 2).await.unwrap();

        let assets = assets_for_draft(&pool, draft_id).await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].sort_position, 1);
        assert_eq!(assets[1].source_ref, "file-123");
        assert!(assets.iter().all(|a| a.status == AssetStatus::Pending));

        mark_asset_resolved(&pool, asset_id, "https://store/drafts/1/2.jpg")
            .await
            .unwrap();
        // A later resolution must not overwrite the stored URL.
        mark_asset_resolved(&pool, asset_id, "https://store/other.jpg")
            .await
            .unwrap();

        let assets = assets_for_draft(&pool, draft_id).await.unwrap();
        assert_eq!(
            assets[1].resolved_url.as_deref(),
            Some("https://store/drafts/1/2.jpg")
        );
        assert_eq!(assets[1].status, AssetStatus::Processed);
    }

    #[tokio::test]
    async fn test_duplicate_sort_position_rejected() {
        let pool = setup_pool().await;
        let draft_id = create_draft(&pool, 1, "c").await.unwrap();
        add_draft_asset(&pool, draft_id, "file-1", 1).await.unwrap();
        assert!(add_draft_asset(&pool, draft_id, "file-2", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_create_unit_queues_draft_and_targets() {
        let pool = setup_pool().await;
        let draft_id = create_draft(&pool, 1, "hello").await.unwrap();
        let instance_id = insert_instance(
            &pool,
            "main",
            "tok",
            None,
            "instagram_basic,instagram_content_publish",
            Some("ig-1"),
            None,
        )
        .await
        .unwrap();

        let unit_id = create_unit(
            &pool,
            UnitKind::Job,
            Some(draft_id),
            None,
            None,
            &[DestinationType::Feed],
            Utc::now() - Duration::minutes(1),
            &[instance_id],
        )
        .await
        .unwrap();

        assert_eq!(
            fetch_draft(&pool, draft_id).await.unwrap().status,
            DraftStatus::Queued
        );

        let due = list_due_units(&pool, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, unit_id);
        assert_eq!(due[0].destinations, vec![DestinationType::Feed]);

        let targets = instances_for_unit(&pool, unit_id).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, instance_id);
    }

    #[tokio::test]
    async fn test_create_unit_rejects_empty_inputs() {
        let pool = setup_pool().await;
        let err = create_unit(
            &pool,
            UnitKind::Scheduled,
            None,
            Some("caption"),
            None,
            &[DestinationType::Feed],
            Utc::now(),
            &[1],
        )
        .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_claim_unit_is_conditional() {
        let pool = setup_pool().await;
        let instance_id = insert_instance(&pool, "main", "tok", None, "", Some("ig-1"), None)
            .await
            .unwrap();
        let unit_id = create_unit(
            &pool,
            UnitKind::Scheduled,
            None,
            Some("caption"),
            Some(&["https://cdn/a.jpg".to_string()]),
            &[DestinationType::Feed],
            Utc::now() - Duration::minutes(1),
            &[instance_id],
        )
        .await
        .unwrap();

        assert!(claim_unit(&pool, unit_id).await.unwrap());
        // Second claim observes publishing status and must lose.
        assert!(!claim_unit(&pool, unit_id).await.unwrap());
        assert_eq!(
            unit_status(&pool, unit_id).await.unwrap(),
            UnitStatus::Publishing
        );
    }

    #[tokio::test]
    async fn test_due_selection_orders_and_caps() {
        let pool = setup_pool().await;
        let instance_id = insert_instance(&pool, "main", "tok", None, "", Some("ig-1"), None)
            .await
            .unwrap();
        let urls = vec!["https://cdn/a.jpg".to_string()];
        let mut ids = Vec::new();
        for minutes_ago in [5i64, 3, 1] {
            let id = create_unit(
                &pool,
                UnitKind::Scheduled,
                None,
                Some("caption"),
                Some(&urls),
                &[DestinationType::Feed],
                Utc::now() - Duration::minutes(minutes_ago),
                &[instance_id],
            )
            .await
            .unwrap();
            ids.push(id);
        }
        // Not yet due; must never be selected.
        create_unit(
            &pool,
            UnitKind::Scheduled,
            None,
            Some("caption"),
            Some(&urls),
            &[DestinationType::Feed],
            Utc::now() + Duration::hours(1),
            &[instance_id],
        )
        .await
        .unwrap();

        let due = list_due_units(&pool, 2).await.unwrap();
        assert_eq!(due.len(), 2);
        // Oldest scheduled time first.
        assert_eq!(due[0].id, ids[0]);
        assert_eq!(due[1].id, ids[1]);
        assert_eq!(count_due_units(&pool).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_finish_unit_persists_result() {
        let pool = setup_pool().await;
        let instance_id = insert_instance(&pool, "main", "tok", None, "", Some("ig-1"), None)
            .await
            .unwrap();
        let unit_id = create_unit(
            &pool,
            UnitKind::Scheduled,
            None,
            Some("caption"),
            Some(&["https://cdn/a.jpg".to_string()]),
            &[DestinationType::Feed],
            Utc::now() - Duration::minutes(1),
            &[instance_id],
        )
        .await
        .unwrap();

        claim_unit(&pool, unit_id).await.unwrap();
        finish_unit(
            &pool,
            unit_id,
            UnitStatus::Failed,
            Some("[{\"ok\":false}]"),
            Some("token expired"),
        )
        .await
        .unwrap();

        assert_eq!(unit_status(&pool, unit_id).await.unwrap(), UnitStatus::Failed);
        assert_eq!(
            unit_result(&pool, unit_id).await.unwrap().as_deref(),
            Some("[{\"ok\":false}]")
        );
    }
}
