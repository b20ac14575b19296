//! Client for the external identity registry.
//!
//! The registry owns biometric matching and the eligibility set. The relayer
//! reads the set fresh on every use and never caches a verification result.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::identity::{BiometricEvidence, IdentityKey, Leaf, Salt};

pub type SharedRegistry = Arc<dyn Registry>;

/// Outcome of a biometric verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The evidence matched; the registry issued this voter's salt.
    Matched(Salt),
    Rejected,
}

#[rocket::async_trait]
pub trait Registry: Send + Sync {
    /// The ordered set of currently enabled leaves.
    async fn leaves(&self) -> Result<Vec<Leaf>>;

    /// Match the evidence against the identity.
    async fn verify(&self, key: &IdentityKey, evidence: &BiometricEvidence)
        -> Result<Verification>;
}

#[derive(Debug, Deserialize)]
struct LeavesBody {
    leaves: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyBody<'a> {
    identity_key: &'a IdentityKey,
    biometric_evidence: &'a BiometricEvidence,
}

#[derive(Debug, Deserialize)]
struct VerifyReply {
    #[serde(rename = "match")]
    matched: bool,
    #[serde(default)]
    salt: Option<String>,
}

/// The registry's HTTP surface: `GET /leaves` and `POST /verify`.
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    /// Every request made through this client is bounded by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("registry client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[rocket::async_trait]
impl Registry for HttpRegistry {
    async fn leaves(&self) -> Result<Vec<Leaf>> {
        let response = self
            .client
            .get(self.url("leaves"))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Error::RegistryUnavailable(format!(
                "GET /leaves returned {}",
                response.status()
            )));
        }
        let body: LeavesBody = response.json().await.map_err(unavailable)?;
        decode_leaves(body)
    }

    async fn verify(
        &self,
        key: &IdentityKey,
        evidence: &BiometricEvidence,
    ) -> Result<Verification> {
        let response = self
            .client
            .post(self.url("verify"))
            .json(&VerifyBody {
                identity_key: key,
                biometric_evidence: evidence,
            })
            .send()
            .await
            .map_err(unavailable)?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Ok(Verification::Rejected);
            }
            status => {
                return Err(Error::RegistryUnavailable(format!(
                    "POST /verify returned {status}"
                )));
            }
        }
        let reply: VerifyReply = response.json().await.map_err(unavailable)?;
        interpret(reply)
    }
}

fn unavailable(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::RegistryUnavailable("request timed out".to_string())
    } else {
        Error::RegistryUnavailable(err.to_string())
    }
}

/// Parse the registry's hex leaves. A malformed entry poisons the whole set.
fn decode_leaves(body: LeavesBody) -> Result<Vec<Leaf>> {
    body.leaves
        .iter()
        .map(|hex| {
            hex.parse::<Leaf>().map_err(|_| {
                Error::RegistryUnavailable(format!("registry returned a malformed leaf {hex:?}"))
            })
        })
        .collect()
}

/// A match is only usable together with a salt.
fn interpret(reply: VerifyReply) -> Result<Verification> {
    match (reply.matched, reply.salt) {
        (false, _) => Ok(Verification::Rejected),
        (true, Some(salt)) => Salt::from_hex(&salt).map(Verification::Matched).map_err(|_| {
            Error::RegistryUnavailable("registry returned a malformed salt".to_string())
        }),
        (true, None) => Err(Error::AuthenticationFailure(
            "registry reported a match but issued no salt".to_string(),
        )),
    }
}
