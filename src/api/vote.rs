use rocket::{post, routes, serde::json::Json, Route};

use crate::error::Result;
use crate::logging::RequestId;
use crate::model::{
    api::{CandidateVoteRequest, VoteRequest, VoteResponse},
    election::CandidateId,
};

use super::Relayer;

pub fn routes() -> Vec<Route> {
    routes![vote_for, vote]
}

/// Shared by both vote endpoints.
async fn cast(
    relayer: &Relayer<'_>,
    id: &RequestId,
    request: VoteRequest,
    candidate: CandidateId,
) -> Result<VoteResponse> {
    let (key, evidence) = request.validate()?;
    debug!("req{id}: vote for candidate {candidate}");
    let receipt = relayer
        .orchestrator()
        .cast(key, evidence, candidate)
        .await?;
    Ok(VoteResponse {
        tx_ref: receipt.tx_ref,
        election_id: receipt.election,
    })
}

#[post("/vote/<candidate_id>", data = "<request>", format = "json")]
async fn vote_for(
    candidate_id: &str,
    request: Json<VoteRequest>,
    relayer: Relayer<'_>,
    id: &RequestId,
) -> Result<Json<VoteResponse>> {
    let candidate = candidate_id.parse::<CandidateId>()?;
    cast(&relayer, id, request.into_inner(), candidate)
        .await
        .map(Json)
}

#[post("/vote", data = "<request>", format = "json")]
async fn vote(
    request: Json<CandidateVoteRequest>,
    relayer: Relayer<'_>,
    id: &RequestId,
) -> Result<Json<VoteResponse>> {
    let CandidateVoteRequest {
        candidate_id,
        credentials,
    } = request.into_inner();
    cast(&relayer, id, credentials, candidate_id).await.map(Json)
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{json, serde_json},
        uri,
    };

    use crate::error::{Reason, Rejection};
    use crate::model::election::ElectionId;
    use crate::testing::{other_leaf, voter, MemoryAudit, MemoryLedger, MemoryRegistry};

    use super::*;

    fn credentials(evidence: &str) -> String {
        json!({
            "identityKey": voter().key.as_str(),
            "biometricEvidence": evidence,
        })
        .to_string()
    }

    async fn vote_as_voter<'c>(client: &'c Client, evidence: &str) -> LocalResponse<'c> {
        client
            .post(uri!(vote_for("2")))
            .header(ContentType::JSON)
            .body(credentials(evidence))
            .dispatch()
            .await
    }

    async fn rejection(response: LocalResponse<'_>) -> Rejection {
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    /// An eligible voter votes once: confirmed, then refused as a duplicate.
    #[backend_test(synced)]
    async fn vote_then_duplicate(client: Client, ledger: MemoryLedger, audit: MemoryAudit) {
        let response = vote_as_voter(&client, "fingerprint").await;
        assert_eq!(Status::Ok, response.status());
        let body: VoteResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(body.election_id, ElectionId(1));
        assert_eq!(ledger.votes().len(), 1);
        assert_eq!(ledger.votes()[0].nullifier, voter().nullifier(ElectionId(1)));
        assert_eq!(audit.records()[0].tx_ref, body.tx_ref);

        let response = vote_as_voter(&client, "fingerprint").await;
        assert_eq!(Status::Conflict, response.status());
        assert_eq!(rejection(response).await.reason, Reason::DuplicateVote);
        assert_eq!(ledger.votes().len(), 1);
        assert_eq!(audit.records().len(), 1);
    }

    /// A registry change without a root sync blocks voting until the sync runs.
    #[backend_test(synced)]
    async fn stale_root_blocks_until_synced(
        client: Client,
        registry: MemoryRegistry,
        ledger: MemoryLedger,
    ) {
        registry.add_leaf(crate::model::digest::Digest([3; 32]));

        let response = vote_as_voter(&client, "fingerprint").await;
        assert_eq!(Status::Conflict, response.status());
        let body = rejection(response).await;
        assert_eq!(body.reason, Reason::StateInconsistency);
        assert!(body.message.contains("root sync"));
        assert_eq!(ledger.submissions(), 0);

        let response = client
            .post("/admin/sync-root")
            .header(rocket::http::Header::new(
                crate::api::ADMIN_KEY_HEADER,
                crate::testing::ADMIN_KEY,
            ))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = vote_as_voter(&client, "fingerprint").await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(ledger.votes().len(), 1);
    }

    /// A failed biometric match ends the request before any proof or ledger call.
    #[backend_test(synced)]
    async fn failed_match(client: Client, registry: MemoryRegistry, ledger: MemoryLedger) {
        let calls_before = ledger.calls();
        let fetches_before = registry.leaf_fetches();
        let response = vote_as_voter(&client, "someone else's finger").await;
        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(rejection(response).await.reason, Reason::AuthenticationFailure);
        assert_eq!(registry.verify_calls(), 1);
        assert_eq!(registry.leaf_fetches(), fetches_before);
        assert_eq!(ledger.calls(), calls_before);
    }

    #[backend_test(synced)]
    async fn unlisted_voter_is_not_eligible(client: Client, registry: MemoryRegistry, ledger: MemoryLedger) {
        let outsider = crate::model::identity::IdentityRecord::new(
            crate::model::identity::IdentityKey::new("D3").unwrap(),
            crate::model::identity::Salt::from_hex("0x33").unwrap(),
        );
        registry.enroll(&outsider, "thumb");

        let response = client
            .post(uri!(vote_for("1")))
            .header(ContentType::JSON)
            .body(json!({"identityKey": "D3", "biometricEvidence": "thumb"}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
        assert_eq!(rejection(response).await.reason, Reason::NotEligible);
        assert_eq!(ledger.submissions(), 0);
    }

    #[backend_test(synced)]
    async fn candidate_in_body(client: Client, ledger: MemoryLedger) {
        let response = client
            .post(uri!(vote))
            .header(ContentType::JSON)
            .body(
                json!({
                    "candidateId": 7,
                    "identityKey": voter().key.as_str(),
                    "biometricEvidence": "fingerprint",
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(ledger.votes()[0].candidate, CandidateId(7));
        assert_eq!(ledger.votes()[0].leaf, voter().leaf());
        assert_ne!(ledger.votes()[0].leaf, other_leaf());
    }

    #[backend_test(synced)]
    async fn input_is_validated(client: Client, registry: MemoryRegistry) {
        let response = client
            .post(uri!(vote_for("two")))
            .header(ContentType::JSON)
            .body(credentials("fingerprint"))
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        assert_eq!(rejection(response).await.reason, Reason::InputValidation);

        let response = client
            .post(uri!(vote_for("2")))
            .header(ContentType::JSON)
            .body(json!({"identityKey": "", "biometricEvidence": "x"}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        let response = client
            .post(uri!(vote_for("2")))
            .header(ContentType::JSON)
            .body(json!({"identityKey": "D1"}).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::UnprocessableEntity, response.status());
        assert_eq!(rejection(response).await.reason, Reason::InputValidation);

        assert_eq!(registry.verify_calls(), 0);
    }

    #[backend_test]
    async fn unsynced_election_is_refused(client: Client, ledger: MemoryLedger) {
        let response = vote_as_voter(&client, "fingerprint").await;
        assert_eq!(Status::Conflict, response.status());
        assert_eq!(rejection(response).await.reason, Reason::StateInconsistency);
        assert_eq!(ledger.submissions(), 0);
    }

    #[backend_test(synced)]
    async fn concurrent_duplicates_confirm_once(client: Client, ledger: MemoryLedger) {
        ledger.set_nullifier_lookup(false);
        let (a, b) = rocket::tokio::join!(
            vote_as_voter(&client, "fingerprint"),
            vote_as_voter(&client, "fingerprint")
        );
        let mut statuses = [a.status(), b.status()];
        statuses.sort_by_key(|s| s.code);
        assert_eq!(statuses, [Status::Ok, Status::Conflict]);
        assert_eq!(ledger.votes().len(), 1);
    }
}
