// libs/appointment-cell/src/services/locks.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::models::OrganizationScope;

/// One async mutex per organization. Holding the guard serializes
/// conflict-check + write for that organization within this process only;
/// separate API instances still race unless the database enforces exclusion.
#[derive(Default)]
pub struct OrganizationLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrganizationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, scope: &OrganizationScope) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Holders and waiters keep a clone, so a count of one means idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(scope.id()).or_default())
        };

        debug!("Acquiring scheduling lock for organization {}", scope);
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_organization_serialized() {
        let locks = Arc::new(OrganizationLocks::new());
        let org = OrganizationScope::new(Uuid::new_v4());

        let guard = locks.acquire(&org).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(&org).await; })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_other_organizations_independent() {
        let locks = OrganizationLocks::new();
        let _held = locks.acquire(&OrganizationScope::new(Uuid::new_v4())).await;

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire(&OrganizationScope::new(Uuid::new_v4())),
        ).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_idle_organizations_are_released() {
        let locks = OrganizationLocks::new();
        let held_org = OrganizationScope::new(Uuid::new_v4());
        let held = locks.acquire(&held_org).await;

        for _ in 0..5 {
            drop(locks.acquire(&OrganizationScope::new(Uuid::new_v4())).await);
        }
        assert_eq!(locks.tracked().await, 2);

        drop(held);
        drop(locks.acquire(&held_org).await);
        assert_eq!(locks.tracked().await, 1);
    }
}
