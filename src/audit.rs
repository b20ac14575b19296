//! Participation audit trail.
//!
//! Written only after a vote is confirmed, and only for audit: nothing in the
//! vote path reads it back, and a failed write never fails the vote.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::serde::json::serde_json;
use rocket::tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use serde::{Deserialize, Serialize};

use crate::model::{election::TxRef, identity::IdentityKey};

pub type SharedAudit = Arc<dyn AuditLog>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationRecord {
    pub identity_key: IdentityKey,
    pub tx_ref: TxRef,
    pub timestamp: DateTime<Utc>,
}

impl ParticipationRecord {
    pub fn now(identity_key: IdentityKey, tx_ref: TxRef) -> Self {
        Self {
            identity_key,
            tx_ref,
            timestamp: Utc::now(),
        }
    }
}

#[rocket::async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &ParticipationRecord) -> io::Result<()>;
}

/// Appends one JSON object per line.
pub struct JsonFileAuditLog {
    path: PathBuf,
    // Keeps concurrent appends from interleaving.
    lock: Mutex<()>,
}

impl JsonFileAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[rocket::async_trait]
impl AuditLog for JsonFileAuditLog {
    async fn record(&self, entry: &ParticipationRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
