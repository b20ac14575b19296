//! Builds the accumulator from the registry's current eligibility set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rocket::tokio::sync::RwLock;

use crate::error::Result;
use crate::model::accumulator::Accumulator;
use crate::registry::Registry;

/// How fresh the accumulator must be.
///
/// `Rebuild` fetches and rebuilds on every call, so membership and root
/// always reflect the registry at that instant. `Cached` reuses a tree for up
/// to its TTL; callers that change the registry must `invalidate` it.
pub enum AccumulatorPolicy {
    Rebuild,
    Cached(AccumulatorCache),
}

impl AccumulatorPolicy {
    /// A TTL of zero means no caching.
    pub fn with_ttl(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Rebuild
        } else {
            Self::Cached(AccumulatorCache::new(ttl))
        }
    }

    /// The accumulator over the current eligibility set.
    pub async fn current(&self, registry: &dyn Registry) -> Result<Arc<Accumulator>> {
        match self {
            Self::Rebuild => build(registry).await,
            Self::Cached(cache) => cache.get_or_build(registry).await,
        }
    }

    /// Drop any cached tree so the next call sees the registry as it is now.
    pub async fn invalidate(&self) {
        if let Self::Cached(cache) = self {
            cache.invalidate().await;
        }
    }
}

async fn build(registry: &dyn Registry) -> Result<Arc<Accumulator>> {
    let leaves = registry.leaves().await?;
    let accumulator = Accumulator::build(leaves)?;
    debug!(
        "Built accumulator over {} leaves, root {}",
        accumulator.len(),
        accumulator.root().short()
    );
    Ok(Arc::new(accumulator))
}

pub struct AccumulatorCache {
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<Accumulator>)>>,
}

impl AccumulatorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    async fn get_or_build(&self, registry: &dyn Registry) -> Result<Arc<Accumulator>> {
        if let Some((built_at, accumulator)) = &*self.slot.read().await {
            if built_at.elapsed() < self.ttl {
                return Ok(accumulator.clone());
            }
        }

        let mut slot = self.slot.write().await;
        // Another request may have rebuilt it while we waited for the lock.
        if let Some((built_at, accumulator)) = &*slot {
            if built_at.elapsed() < self.ttl {
                return Ok(accumulator.clone());
            }
        }
        let accumulator = build(registry).await?;
        *slot = Some((Instant::now(), accumulator.clone()));
        Ok(accumulator)
    }

    async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}
