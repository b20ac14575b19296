use rocket::{post, routes, serde::json::Json, Route};

use crate::error::Result;
use crate::ledger;
use crate::model::api::SyncRootResponse;
use crate::reconciler::Publication;

use super::{AdminKey, Relayer};

pub fn routes() -> Vec<Route> {
    routes![sync_root]
}

/// Publish the root of the current eligibility set for the active election.
#[post("/admin/sync-root")]
async fn sync_root(_admin: AdminKey, relayer: Relayer<'_>) -> Result<Json<SyncRootResponse>> {
    let reconciler = relayer.reconciler();
    let election = ledger::active_election(&**relayer.ledger)
        .await?
        .require_active()?;
    let (root, publication) = reconciler.sync(election).await?;

    let tx_ref = match publication {
        Publication::Unchanged => None,
        Publication::Published(tx_ref) => Some(tx_ref),
    };
    Ok(Json(SyncRootResponse {
        election_id: election,
        root,
        unchanged: tx_ref.is_none(),
        tx_ref,
    }))
}
