//! Named, lease-based locks
//!
//! The only cross-process coordination primitive of the replay engine.
//! Acquisition is try-once: a contended lock is reported as `None` and the
//! caller skips its round. Leases expire on their own so a crashed holder
//! cannot wedge an ordering unit.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Proof of holding a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    /// Distinguishes successive holders of the same name
    pub token: Uuid,
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// Take `name` for `lease` if nobody holds it
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockHandle>>;

    /// Push the expiry of a held lock to `lease` from now
    ///
    /// Returns false if the handle no longer owns the lock.
    async fn extend(&self, handle: &LockHandle, lease: Duration) -> Result<bool>;

    async fn release(&self, handle: LockHandle) -> Result<()>;
}

struct Lease {
    token: Uuid,
    expires_at: Instant,
}

/// Lock service shared by every job of one process
#[derive(Default)]
pub struct MemoryLockService {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently held by anyone
    pub fn is_held(&self, name: &str) -> bool {
        self.leases
            .lock()
            .map(|leases| {
                leases
                    .get(name)
                    .map(|lease| lease.expires_at > Instant::now())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn leases(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Lease>>> {
        self.leases
            .lock()
            .map_err(|_| Error::Lock("Lock table poisoned".to_string()))
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockHandle>> {
        let mut leases = self.leases()?;
        let now = Instant::now();

        if let Some(current) = leases.get(name) {
            if current.expires_at > now {
                return Ok(None);
            }
            tracing::debug!(lock = name, "Taking over expired lease");
        }

        let token = Uuid::new_v4();
        leases.insert(
            name.to_string(),
            Lease {
                token,
                expires_at: now + lease,
            },
        );

        Ok(Some(LockHandle {
            name: name.to_string(),
            token,
        }))
    }

    async fn extend(&self, handle: &LockHandle, lease: Duration) -> Result<bool> {
        let mut leases = self.leases()?;
        match leases.get_mut(&handle.name) {
            Some(current) if current.token == handle.token => {
                current.expires_at = Instant::now() + lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        let mut leases = self.leases()?;
        // A lease taken over after expiry belongs to someone else now
        if leases.get(&handle.name).map(|l| l.token) == Some(handle.token) {
            leases.remove(&handle.name);
        }
        Ok(())
    }
}
