use rocket::{get, routes, serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{MerkleProofResponse, MerkleRootResponse, RootStatusResponse},
    identity::Leaf,
};

use super::Relayer;

pub fn routes() -> Vec<Route> {
    routes![root, root_nested, proof, root_status]
}

/// Shared by both spellings of the root endpoint.
async fn merkle_root(relayer: &Relayer<'_>) -> Result<MerkleRootResponse> {
    let accumulator = relayer.reconciler().accumulator().await?;
    Ok(MerkleRootResponse {
        root: accumulator.root(),
        count: accumulator.len(),
    })
}

#[get("/merkle-root")]
async fn root(relayer: Relayer<'_>) -> Result<Json<MerkleRootResponse>> {
    merkle_root(&relayer).await.map(Json)
}

#[get("/merkle/root")]
async fn root_nested(relayer: Relayer<'_>) -> Result<Json<MerkleRootResponse>> {
    merkle_root(&relayer).await.map(Json)
}

#[get("/merkle-proof/<leaf>")]
async fn proof(leaf: &str, relayer: Relayer<'_>) -> Result<Json<MerkleProofResponse>> {
    let leaf = leaf.parse::<Leaf>()?;
    let accumulator = relayer.reconciler().accumulator().await?;
    let proof = accumulator
        .proof(&leaf)
        .ok_or_else(|| Error::NotEligible(format!("{} is not in the eligibility set", leaf.short())))?;
    Ok(Json(MerkleProofResponse {
        leaf,
        root: accumulator.root(),
        proof,
    }))
}

#[get("/election/root-status")]
async fn root_status(relayer: Relayer<'_>) -> Result<Json<RootStatusResponse>> {
    relayer.reconciler().status().await.map(Json)
}
