use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio, Build, Rocket,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::audit::{JsonFileAuditLog, SharedAudit};
use crate::eligibility::AccumulatorPolicy;
use crate::ledger::{contract::LedgerSettings, ContractLedger, SharedLedger};
use crate::registry::{HttpRegistry, SharedRegistry};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default)]
    accumulator_cache_secs: u64,
    // secrets
    admin_key: String,
}

impl Config {
    pub fn new(admin_key: impl Into<String>, accumulator_cache_secs: u64) -> Self {
        Self {
            accumulator_cache_secs,
            admin_key: admin_key.into(),
        }
    }

    /// Whether `candidate` is the admin key. Constant time in the key's contents.
    pub fn is_admin_key(&self, candidate: &str) -> bool {
        !self.admin_key.is_empty()
            && bool::from(self.admin_key.as_bytes().ct_eq(candidate.as_bytes()))
    }

    /// Rebuild on every use unless a cache lifetime is configured.
    pub fn accumulator_policy(&self) -> AccumulatorPolicy {
        AccumulatorPolicy::with_ttl(Duration::from_secs(self.accumulator_cache_secs))
    }
}

/// A fairing that loads the application config and puts it, and the
/// accumulator policy it selects, in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.admin_key.is_empty() {
            error!("`admin_key` must not be empty");
            return Err(rocket);
        }
        let policy = config.accumulator_policy();
        match policy {
            AccumulatorPolicy::Rebuild => info!("Accumulator is rebuilt on every use"),
            AccumulatorPolicy::Cached(_) => info!(
                "Accumulator is cached for {}s between rebuilds",
                config.accumulator_cache_secs
            ),
        }

        // Manage the state.
        rocket = rocket.manage(config).manage(policy);
        Ok(rocket)
    }
}

fn default_registry_timeout() -> u64 {
    10
}

/// Configuration for the identity registry.
#[derive(Deserialize)]
struct RegistryConfig {
    registry_url: String,
    #[serde(default = "default_registry_timeout")]
    registry_timeout_secs: u64,
}

/// A fairing that loads the registry config and places a registry client
/// into managed state.
pub struct RegistryFairing;

#[rocket::async_trait]
impl Fairing for RegistryFairing {
    fn info(&self) -> Info {
        Info {
            name: "Identity registry",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<RegistryConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load registry config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let timeout = Duration::from_secs(config.registry_timeout_secs);
        let registry = match HttpRegistry::new(&config.registry_url, timeout) {
            Ok(registry) => registry,
            Err(e) => {
                error!("{e}");
                return Err(rocket);
            }
        };
        info!(
            "Using identity registry at {} (timeout {}s)",
            config.registry_url, config.registry_timeout_secs
        );

        let registry: SharedRegistry = Arc::new(registry);
        rocket = rocket.manage(registry);
        Ok(rocket)
    }
}

fn default_ledger_timeout() -> u64 {
    60
}

fn default_confirmations() -> usize {
    1
}

/// Configuration for the ledger connection.
#[derive(Deserialize)]
struct LedgerConfig {
    // non-secrets
    ledger_rpc_url: String,
    ledger_contract: String,
    ledger_chain_id: u64,
    #[serde(default = "default_ledger_timeout")]
    ledger_timeout_secs: u64,
    #[serde(default = "default_confirmations")]
    ledger_confirmations: usize,
    #[serde(default)]
    ledger_abi_path: Option<PathBuf>,
    // secrets
    relayer_private_key: String,
}

/// A fairing that loads the ledger config, connects to the node, probes the
/// ballot contract's capabilities, and places the ledger into managed state.
/// Ignition fails if the contract cannot be driven.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<LedgerConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load ledger config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let contract = match Address::from_str(&config.ledger_contract) {
            Ok(address) => address,
            Err(e) => {
                error!("Invalid `ledger_contract` {:?}: {e}", config.ledger_contract);
                return Err(rocket);
            }
        };
        let abi_json = match &config.ledger_abi_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(json) => Some(json),
                Err(e) => {
                    error!("Failed to read ABI from {}: {e}", path.display());
                    return Err(rocket);
                }
            },
            None => None,
        };

        info!("Loaded ledger config, connecting...");
        let settings = LedgerSettings {
            rpc_url: config.ledger_rpc_url,
            contract,
            chain_id: config.ledger_chain_id,
            private_key: config.relayer_private_key,
            timeout: Duration::from_secs(config.ledger_timeout_secs),
            confirmations: config.ledger_confirmations,
            abi_json,
        };
        let ledger = match ContractLedger::connect(settings).await {
            Ok(ledger) => ledger,
            Err(e) => {
                error!("Failed to connect to ledger: {e}");
                return Err(rocket);
            }
        };
        info!("...ledger connection online!");

        // Manage the state.
        let ledger: SharedLedger = Arc::new(ledger);
        rocket = rocket.manage(ledger);
        Ok(rocket)
    }
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("participation.jsonl")
}

#[derive(Deserialize)]
struct AuditConfig {
    #[serde(default = "default_audit_path")]
    audit_log_path: PathBuf,
}

/// A fairing that places the participation audit log into managed state.
pub struct AuditFairing;

#[rocket::async_trait]
impl Fairing for AuditFairing {
    fn info(&self) -> Info {
        Info {
            name: "Audit log",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<AuditConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load audit config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!(
            "Recording participation to {}",
            config.audit_log_path.display()
        );

        let audit: SharedAudit = Arc::new(JsonFileAuditLog::new(config.audit_log_path));
        rocket = rocket.manage(audit);
        Ok(rocket)
    }
}
