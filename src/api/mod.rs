use rocket::{
    catch, catchers,
    http::Status,
    request::{FromRequest, Outcome},
    serde::json::Json,
    Catcher, Request, Route,
};

use crate::audit::SharedAudit;
use crate::config::Config;
use crate::eligibility::AccumulatorPolicy;
use crate::error::{Error, Reason, Rejection};
use crate::ledger::SharedLedger;
use crate::orchestrator::VoteOrchestrator;
use crate::reconciler::RootReconciler;
use crate::registry::SharedRegistry;

mod admin;
mod merkle;
mod vote;

/// Header carrying the key for `/admin` endpoints.
pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(merkle::routes());
    routes.extend(vote::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![
        bad_request,
        unauthorized,
        not_found,
        unprocessable,
        internal_error
    ]
}

/// The collaborators every endpoint works through, borrowed from managed state.
pub struct Relayer<'r> {
    registry: &'r SharedRegistry,
    ledger: &'r SharedLedger,
    policy: &'r AccumulatorPolicy,
    audit: &'r SharedAudit,
}

impl<'r> Relayer<'r> {
    pub fn reconciler(&self) -> RootReconciler<'r> {
        RootReconciler::new(&**self.registry, &**self.ledger, self.policy)
    }

    pub fn orchestrator(&self) -> VoteOrchestrator<'r> {
        VoteOrchestrator::new(
            &**self.registry,
            &**self.ledger,
            self.policy,
            &**self.audit,
        )
    }
}

fn managed<'r, T: Send + Sync + 'static>(req: &'r Request<'_>) -> Result<&'r T, Error> {
    req.rocket().state::<T>().ok_or_else(|| {
        Error::Configuration(format!("{} is not managed", std::any::type_name::<T>()))
    })
}

fn relayer<'r>(req: &'r Request<'_>) -> Result<Relayer<'r>, Error> {
    Ok(Relayer {
        registry: managed(req)?,
        ledger: managed(req)?,
        policy: managed(req)?,
        audit: managed(req)?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Relayer<'r> {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match relayer(req) {
            Ok(relayer) => Outcome::Success(relayer),
            Err(e) => {
                error!("{e}");
                Outcome::Failure((Status::InternalServerError, e))
            }
        }
    }
}

/// Proof that the request carried the admin key.
pub struct AdminKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match managed::<Config>(req) {
            Ok(config) => config,
            Err(e) => return Outcome::Failure((Status::InternalServerError, e)),
        };
        match req.headers().get_one(ADMIN_KEY_HEADER) {
            Some(key) if config.is_admin_key(key) => Outcome::Success(AdminKey),
            _ => Outcome::Failure((
                Status::Unauthorized,
                Error::AuthenticationFailure(format!(
                    "a valid {ADMIN_KEY_HEADER} header is required"
                )),
            )),
        }
    }
}

fn rejection(reason: Reason, message: &str) -> Json<Rejection> {
    Json(Rejection {
        reason,
        message: message.to_string(),
    })
}

#[catch(400)]
fn bad_request() -> Json<Rejection> {
    rejection(Reason::InputValidation, "The request was malformed")
}

#[catch(401)]
fn unauthorized() -> Json<Rejection> {
    rejection(
        Reason::AuthenticationFailure,
        "A valid X-Admin-Key header is required",
    )
}

#[catch(404)]
fn not_found(req: &Request) -> Json<Rejection> {
    rejection(
        Reason::NotFound,
        &format!("No endpoint matches {} {}", req.method(), req.uri()),
    )
}

#[catch(422)]
fn unprocessable() -> Json<Rejection> {
    rejection(
        Reason::InputValidation,
        "The request body is missing required fields or has the wrong types",
    )
}

#[catch(500)]
fn internal_error() -> Json<Rejection> {
    rejection(Reason::Internal, "The relayer failed to handle the request")
}
