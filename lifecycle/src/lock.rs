//! Critical section guarding every session read-modify-write
//!
//! Press ingestion, SMS transitions and both timer fires enter the section
//! keyed by the session's button id before touching the store, and hold it
//! until their write has landed. With [`LockScope::Global`] the key is
//! ignored and all mutations share one domain; with [`LockScope::PerButton`]
//! unrelated buttons proceed in parallel while each button stays strictly
//! serialized in arrival order (tokio mutexes are FIFO).
//!
//! There is no acquisition timeout. A stalled store call stalls every
//! operation waiting on the same domain.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Keyed lock entries are pruned once the map grows past this
const PRUNE_THRESHOLD: usize = 1024;

/// Width of the mutual-exclusion domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// One domain for the whole engine
    Global,
    /// One domain per button id
    #[default]
    PerButton,
}

impl FromStr for LockScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per_button" | "per-button" | "button" => Ok(Self::PerButton),
            other => Err(format!("unknown lock scope: {other}")),
        }
    }
}

/// Held for the duration of one logical operation; dropping it releases
/// the section.
pub struct SectionGuard {
    _guard: OwnedMutexGuard<()>,
}

/// The engine-wide serialization domain
pub struct CriticalSection {
    scope: LockScope,
    global: Arc<AsyncMutex<()>>,
    keyed: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CriticalSection {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            global: Arc::new(AsyncMutex::new(())),
            keyed: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Wait until the domain for `key` is free and take it.
    pub async fn enter(&self, key: &str) -> SectionGuard {
        let mutex = match self.scope {
            LockScope::Global => self.global.clone(),
            LockScope::PerButton => self.keyed_mutex(key),
        };
        let guard = mutex.lock_owned().await;
        trace!(key, scope = ?self.scope, "Entered critical section");
        SectionGuard { _guard: guard }
    }

    fn keyed_mutex(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut keyed = self
            .keyed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if keyed.len() > PRUNE_THRESHOLD {
            // Only this map holds idle entries; anything else is in use
            keyed.retain(|_, m| Arc::strong_count(m) > 1);
        }

        keyed
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn keyed_len(&self) -> usize {
        self.keyed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new(LockScope::default())
    }
}
