use std::fmt::{Display, Formatter};

use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{digest::Digest, election::ElectionId};

pub type Result<T> = std::result::Result<T, Error>;

/// Upstream diagnostics are cut to this many characters before leaving the relayer.
const DIAGNOSTIC_LIMIT: usize = 160;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InputValidation(String),
    #[error("Identity registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("Not eligible: {0}")]
    NotEligible(String),
    #[error("The eligibility set has no members yet")]
    EmptyEligibilitySet,
    #[error(transparent)]
    StateInconsistency(#[from] Inconsistency),
    #[error("A vote has already been recorded for this voter in election {0}")]
    DuplicateVote(ElectionId),
    #[error("Unsupported ledger contract: {0}")]
    UnsupportedLedgerContract(String),
    #[error("Ledger error: {0}")]
    Chain(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Ways the locally computed root can disagree with the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Inconsistency {
    #[error("No election is currently active on the ledger")]
    NoActiveElection,
    #[error("Election {0} has no eligibility root on the ledger; run an administrative root sync")]
    RootNotSet(ElectionId),
    #[error(
        "Eligibility root for election {election} is out of date \
         (ledger {persisted}, computed {local}); run an administrative root sync"
    )]
    RootMismatch {
        election: ElectionId,
        local: Digest,
        persisted: Digest,
    },
}

impl Error {
    /// Shorthand for the most common validation failure.
    pub fn invalid_identity() -> Self {
        Self::InputValidation("identity key must not be empty".to_string())
    }

    /// The stable, machine-distinguishable reason code for this error.
    pub fn reason(&self) -> Reason {
        match self {
            Self::InputValidation(_) => Reason::InputValidation,
            Self::RegistryUnavailable(_) => Reason::RegistryUnavailable,
            Self::AuthenticationFailure(_) => Reason::AuthenticationFailure,
            Self::NotEligible(_) => Reason::NotEligible,
            Self::EmptyEligibilitySet => Reason::EmptyEligibilitySet,
            Self::StateInconsistency(_) => Reason::StateInconsistency,
            Self::DuplicateVote(_) => Reason::DuplicateVote,
            Self::UnsupportedLedgerContract(_) => Reason::UnsupportedLedgerContract,
            Self::Chain(_) => Reason::ChainError,
            Self::Configuration(_) => Reason::Configuration,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::InputValidation(_) => Status::BadRequest,
            Self::AuthenticationFailure(_) => Status::Unauthorized,
            Self::NotEligible(_) => Status::Forbidden,
            Self::EmptyEligibilitySet | Self::DuplicateVote(_) => Status::Conflict,
            Self::StateInconsistency(Inconsistency::NoActiveElection) => Status::BadRequest,
            Self::StateInconsistency(_) => Status::Conflict,
            Self::RegistryUnavailable(_) | Self::Chain(_) => Status::BadGateway,
            Self::UnsupportedLedgerContract(_) | Self::Configuration(_) => {
                Status::InternalServerError
            }
        }
    }

    /// The message shown to callers. Upstream failures only expose a truncated diagnostic.
    pub fn public_message(&self) -> String {
        let message = self.to_string();
        match self {
            Self::RegistryUnavailable(_) | Self::Chain(_) => truncate(&message, DIAGNOSTIC_LIMIT),
            _ => message,
        }
    }
}

/// Stable reason codes, serialised by name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    InputValidation,
    RegistryUnavailable,
    AuthenticationFailure,
    NotEligible,
    EmptyEligibilitySet,
    StateInconsistency,
    DuplicateVote,
    UnsupportedLedgerContract,
    ChainError,
    Configuration,
    NotFound,
    Internal,
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The JSON body of every rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: Reason,
    pub message: String,
}

impl From<&Error> for Rejection {
    fn from(err: &Error) -> Self {
        Self {
            reason: err.reason(),
            message: err.public_message(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{self}");
        } else {
            debug!("Rejected with {}: {self}", self.reason());
        }
        Custom(status, Json(Rejection::from(&self))).respond_to(req)
    }
}

/// Cut a message down to at most `limit` characters, marking the cut.
fn truncate(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(limit).collect();
    cut.push('…');
    cut
}
