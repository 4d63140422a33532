//! Batch Runner: selects due units, claims them, and drives the fan-out
//! orchestrator, persisting each terminal state.
//!
//! Units are processed sequentially within one invocation to keep external
//! rate-limit exposure predictable. The due-set is capped; the remainder
//! waits for the next trigger.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::db::{self, UnitForPublish};
use crate::filehost::FileHostService;
use crate::graph::GraphService;
use crate::model::{DraftStatus, UnitOutcome, UnitStatus};
use crate::publish;
use crate::storage::StorageService;

/// Summary returned to the triggering caller. The per-unit result payload
/// stored on each row remains the durable source of truth.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub results: Vec<UnitReport>,
}

#[derive(Debug, Serialize)]
pub struct UnitReport {
    pub id: i64,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Process one batch of due units. Both trigger entry points (cron and
/// manual) call this routine.
#[instrument(skip_all)]
pub async fn process_due(
    pool: &SqlitePool,
    graph: &dyn GraphService,
    filehost: &dyn FileHostService,
    storage: &dyn StorageService,
    batch_cap: u32,
) -> Result<BatchReport> {
    let due = db::list_due_units(pool, batch_cap).await?;
    info!(due = due.len(), "selected due units");

    let mut results = Vec::new();
    for unit in due {
        // Claim before any external call. Losing the conditional update
        // means a concurrent invocation already took the unit.
        if !db::claim_unit(pool, unit.id).await? {
            warn!(unit_id = unit.id, "unit already claimed; skipping");
            continue;
        }

        let outcome = run_claimed_unit(pool, graph, filehost, storage, &unit).await;
        let result_json = serde_json::to_string(&outcome.pairs)?;
        db::finish_unit(
            pool,
            unit.id,
            outcome.status,
            Some(&result_json),
            outcome.error.as_deref(),
        )
        .await?;

        if let Some(draft_id) = unit.draft_id {
            let draft_status = if outcome.status == UnitStatus::Published {
                DraftStatus::Published
            } else {
                DraftStatus::Failed
            };
            db::set_draft_status(pool, draft_id, draft_status).await?;
        }

        match outcome.status {
            UnitStatus::Published => info!(unit_id = unit.id, "unit published"),
            _ => warn!(unit_id = unit.id, error = ?outcome.error, "unit failed"),
        }
        results.push(UnitReport {
            id: unit.id,
            status: outcome.status,
            error: outcome.error,
        });
    }

    Ok(BatchReport {
        processed: results.len(),
        results,
    })
}

async fn run_claimed_unit(
    pool: &SqlitePool,
    graph: &dyn GraphService,
    filehost: &dyn FileHostService,
    storage: &dyn StorageService,
    unit: &UnitForPublish,
) -> UnitOutcome {
    let source = match publish::media_source_for_unit(pool, filehost, storage, unit).await {
        Ok(source) => source,
        Err(err) => return UnitOutcome::fatal(format!("failed to load unit media: {err:#}")),
    };
    let instances = match db::instances_for_unit(pool, unit.id).await {
        Ok(instances) => instances,
        Err(err) => return UnitOutcome::fatal(format!("failed to load unit targets: {err:#}")),
    };
    publish::run_unit(graph, source.as_ref(), &instances, &unit.destinations).await
}
