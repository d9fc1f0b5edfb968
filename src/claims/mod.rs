//! In-memory claim registry: advisory task leases with staleness.
//!
//! Single authoritative process, no persistence. Claim-or-refresh is a
//! read-modify-write against a shared map, so every operation goes through
//! one mutex. Runners re-claim on startup; that is safe precisely because
//! `claimed_at` is fresh then.

use crate::constants::CLAIM_STALE_MS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// A lease held by one runner over one task.
#[derive(Debug, Clone)]
struct Claim {
    runner_id: String,
    claimed_at: DateTime<Utc>,
    /// Monotonic companion of `claimed_at`; staleness never trusts wall
    /// clocks.
    claimed_instant: Instant,
}

/// Wire-facing view of a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimStatus {
    pub runner_id: String,
    pub claimed_at: DateTime<Utc>,
    pub is_stale: bool,
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// Lease granted: new, refreshed by the same runner, or taken over
    /// from a stale holder.
    Granted {
        claimed_at: DateTime<Utc>,
        refreshed: bool,
        evicted_stale: bool,
    },
    /// Another runner holds a fresh lease.
    Conflict {
        claimed_by: String,
        claimed_at: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct ClaimRegistry {
    claims: Arc<Mutex<HashMap<(String, String), Claim>>>,
    stale_after: Duration,
}

impl Default for ClaimRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::with_staleness(Duration::from_millis(CLAIM_STALE_MS))
    }

    /// Staleness window override, used by tests.
    pub fn with_staleness(stale_after: Duration) -> Self {
        Self {
            claims: Arc::new(Mutex::new(HashMap::new())),
            stale_after,
        }
    }

    /// Claim or refresh a task for a runner.
    pub async fn claim(&self, project: &str, task_id: &str, runner_id: &str) -> ClaimOutcome {
        let mut claims = self.claims.lock().await;
        let key = (project.to_string(), task_id.to_string());
        let now = Utc::now();

        match claims.get(&key) {
            None => {
                claims.insert(key, Claim::new(runner_id, now));
                debug!("Claim granted: {}/{} -> {}", project, task_id, runner_id);
                ClaimOutcome::Granted {
                    claimed_at: now,
                    refreshed: false,
                    evicted_stale: false,
                }
            }
            Some(existing) if existing.runner_id == runner_id => {
                claims.insert(key, Claim::new(runner_id, now));
                ClaimOutcome::Granted {
                    claimed_at: now,
                    refreshed: true,
                    evicted_stale: false,
                }
            }
            Some(existing) if existing.claimed_instant.elapsed() > self.stale_after => {
                debug!(
                    "Stale claim on {}/{} by {} overridden by {}",
                    project, task_id, existing.runner_id, runner_id
                );
                claims.insert(key, Claim::new(runner_id, now));
                ClaimOutcome::Granted {
                    claimed_at: now,
                    refreshed: false,
                    evicted_stale: true,
                }
            }
            Some(existing) => ClaimOutcome::Conflict {
                claimed_by: existing.runner_id.clone(),
                claimed_at: existing.claimed_at,
            },
        }
    }

    /// Delete a claim if present; returns whether one existed. Idempotent.
    pub async fn release(&self, project: &str, task_id: &str) -> bool {
        let mut claims = self.claims.lock().await;
        claims
            .remove(&(project.to_string(), task_id.to_string()))
            .is_some()
    }

    /// Current claim with staleness derived from now.
    pub async fn status(&self, project: &str, task_id: &str) -> Option<ClaimStatus> {
        let claims = self.claims.lock().await;
        claims
            .get(&(project.to_string(), task_id.to_string()))
            .map(|c| ClaimStatus {
                runner_id: c.runner_id.clone(),
                claimed_at: c.claimed_at,
                is_stale: c.claimed_instant.elapsed() > self.stale_after,
            })
    }

    pub async fn count(&self) -> usize {
        self.claims.lock().await.len()
    }

    /// Drops every claim. Part of explicit lifecycle management; the
    /// registry otherwise holds no resources.
    pub async fn shutdown(&self) {
        self.claims.lock().await.clear();
    }
}

impl Claim {
    fn new(runner_id: &str, claimed_at: DateTime<Utc>) -> Self {
        Self {
            runner_id: runner_id.to_string(),
            claimed_at,
            claimed_instant: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_then_conflict_then_stale_override() {
        let registry = ClaimRegistry::with_staleness(Duration::from_millis(50));

        let r1 = registry.claim("demo", "t1", "runner-1").await;
        assert!(matches!(r1, ClaimOutcome::Granted { refreshed: false, .. }));

        // Second runner conflicts while the lease is fresh.
        match registry.claim("demo", "t1", "runner-2").await {
            ClaimOutcome::Conflict { claimed_by, .. } => assert_eq!(claimed_by, "runner-1"),
            other => panic!("expected conflict, got {other:?}"),
        }
        let status = registry.status("demo", "t1").await.unwrap();
        assert!(!status.is_stale);

        // After the staleness window the same attempt evicts runner-1.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.status("demo", "t1").await.unwrap().is_stale);
        match registry.claim("demo", "t1", "runner-2").await {
            ClaimOutcome::Granted { evicted_stale, .. } => assert!(evicted_stale),
            other => panic!("expected stale takeover, got {other:?}"),
        }
        assert_eq!(
            registry.status("demo", "t1").await.unwrap().runner_id,
            "runner-2"
        );
    }

    #[tokio::test]
    async fn same_runner_refreshes() {
        let registry = ClaimRegistry::with_staleness(Duration::from_millis(50));
        registry.claim("demo", "t1", "runner-1").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Refresh restarts the staleness clock.
        match registry.claim("demo", "t1", "runner-1").await {
            ClaimOutcome::Granted { refreshed, .. } => assert!(refreshed),
            other => panic!("expected refresh, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!registry.status("demo", "t1").await.unwrap().is_stale);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let registry = ClaimRegistry::new();
        registry.claim("demo", "t1", "runner-1").await;
        assert!(registry.release("demo", "t1").await);
        assert!(!registry.release("demo", "t1").await);
        assert!(registry.status("demo", "t1").await.is_none());
    }

    #[tokio::test]
    async fn claims_are_scoped_per_project() {
        let registry = ClaimRegistry::new();
        registry.claim("alpha", "t1", "runner-1").await;
        match registry.claim("beta", "t1", "runner-2").await {
            ClaimOutcome::Granted { .. } => {}
            other => panic!("expected independent grant, got {other:?}"),
        }
        assert_eq!(registry.count().await, 2);
        registry.shutdown().await;
        assert_eq!(registry.count().await, 0);
    }
}
