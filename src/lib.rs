#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Provider, Build, Rocket};

use crate::audit::SharedAudit;
use crate::config::{AuditFairing, Config, ConfigFairing, LedgerFairing, RegistryFairing};
use crate::ledger::SharedLedger;
use crate::logging::LoggerFairing;
use crate::registry::SharedRegistry;

pub mod api;
pub mod audit;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;

#[cfg(test)]
mod testing;

/// The relayer, configured from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(RegistryFairing)
        .attach(LedgerFairing)
        .attach(AuditFairing)
        .attach(LoggerFairing)
}

/// The relayer over the given collaborators, bypassing the connecting fairings.
pub fn rocket_for<T: Provider>(
    provider: T,
    config: Config,
    registry: SharedRegistry,
    ledger: SharedLedger,
    audit: SharedAudit,
) -> Rocket<Build> {
    let policy = config.accumulator_policy();
    rocket::custom(provider)
        .mount("/", api::routes())
        .register("/", api::catchers())
        .manage(config)
        .manage(policy)
        .manage(registry)
        .manage(ledger)
        .manage(audit)
        .attach(LoggerFairing)
}
