//! Conflict probing.
//!
//! Whether a chord can be installed is decided by the platform. The bridge
//! only sees this boolean contract: `Ok(true)` means the chord is free,
//! `Ok(false)` means something else owns it and `Err` is a transient failure
//! worth retrying.

use super::combo::Combo;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Decides whether a combo is available for registration.
#[async_trait]
pub trait ConflictOracle: Send + Sync + Debug {
    /// Try to claim the combo
    async fn probe(&self, combo: &Combo) -> Result<bool>;

    /// Give a previously claimed combo back
    async fn release(&self, _combo: &Combo) {}
}

/// An oracle that accepts every combo.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllOracle;

#[async_trait]
impl ConflictOracle for AcceptAllOracle {
    async fn probe(&self, _combo: &Combo) -> Result<bool> {
        Ok(true)
    }
}

/// In-memory oracle with scripted conflicts and failures.
///
/// Combos it hands out stay claimed until released, so two registrations
/// cannot hold the same chord.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    /// Owned by some other application
    foreign: DashSet<String>,
    /// Claimed through this oracle
    claimed: DashSet<String>,
    /// Remaining transient failures per combo
    failures: DashMap<String, usize>,
    probes: AtomicUsize,
}

impl ScriptedOracle {
    /// An oracle with nothing taken
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark combos as owned by another application
    pub fn with_taken<'a>(self, combos: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        for combo in combos {
            self.foreign.insert(Combo::parse(combo)?.canonical());
        }
        Ok(self)
    }

    /// Make the next `times` probes of a combo fail transiently
    pub fn fail_next(&self, combo: &Combo, times: usize) {
        self.failures.insert(combo.canonical(), times);
    }

    /// Whether the combo is currently claimed through this oracle
    pub fn is_claimed(&self, combo: &Combo) -> bool {
        self.claimed.contains(&combo.canonical())
    }

    /// Number of probes made so far
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ConflictOracle for ScriptedOracle {
    async fn probe(&self, combo: &Combo) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let key = combo.canonical();

        if let Some(mut remaining) = self.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::internal(format!("probe of {} failed", combo)));
            }
        }

        if self.foreign.contains(&key) {
            return Ok(false);
        }
        Ok(self.claimed.insert(key))
    }

    async fn release(&self, combo: &Combo) {
        self.claimed.remove(&combo.canonical());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_conflicts() {
        let oracle = ScriptedOracle::new().with_taken(["ctrl+shift+s"]).unwrap();
        let taken = Combo::parse("ctrl+shift+s").unwrap();
        let free = Combo::parse("ctrl+alt+s").unwrap();

        assert!(!oracle.probe(&taken).await.unwrap());
        assert!(oracle.probe(&free).await.unwrap());
        assert!(oracle.is_claimed(&free));
        assert!(!oracle.probe(&free).await.unwrap());

        oracle.release(&free).await;
        assert!(oracle.probe(&free).await.unwrap());
        assert_eq!(oracle.probe_count(), 4);
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let oracle = ScriptedOracle::new();
        let combo = Combo::parse("ctrl+shift+o").unwrap();
        oracle.fail_next(&combo, 2);

        assert!(oracle.probe(&combo).await.is_err());
        assert!(oracle.probe(&combo).await.is_err());
        assert!(oracle.probe(&combo).await.unwrap());
    }
}
