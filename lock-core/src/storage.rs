// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Vault persistence and unlock counting
//
// Both are collaborators behind traits so that a deployment can back them
// with a database; the in-memory versions serve single-process use and
// tests. `UnlockCounter::increment_if_below_limit` must be atomic so that
// concurrent unseals of the same vault never push the count past its limit,
// and `retire` must be atomic with respect to it so that an unseal racing a
// rebind cannot consume an unlock the successor never sees.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::error::{LockError, LockResult};
use crate::identity::VaultId;
use crate::vault::Vault;

/// Keyed storage for vault records
pub trait VaultStore: Send + Sync {
    fn get(&self, id: &VaultId) -> LockResult<Option<Vault>>;

    /// Insert or replace the record under `vault.id`
    fn put(&self, vault: Vault) -> LockResult<()>;

    /// Insert only if no record exists under `vault.id`. Returns `false`
    /// and leaves the store untouched otherwise.
    fn insert_new(&self, vault: Vault) -> LockResult<bool>;

    fn remove(&self, id: &VaultId) -> LockResult<Option<Vault>>;

    /// Apply `change` to the stored record as one atomic step. If `change`
    /// fails the record is left untouched.
    fn update(
        &self,
        id: &VaultId,
        change: &mut dyn FnMut(&mut Vault) -> LockResult<()>,
    ) -> LockResult<Vault>;
}

/// Per-vault unlock counter
pub trait UnlockCounter: Send + Sync {
    fn get_unlock_count(&self, id: &VaultId) -> LockResult<u32>;

    /// Atomically increment unless `limit` is already reached. Returns the
    /// new count, or `None` when the limit blocked the increment.
    fn increment_if_below_limit(&self, id: &VaultId, limit: Option<u32>) -> LockResult<Option<u32>>;

    fn set_unlock_count(&self, id: &VaultId, count: u32) -> LockResult<()>;

    /// Freeze the counter of a superseded vault and return its final count.
    /// Every later `increment_if_below_limit` on `id` returns `None`.
    fn retire(&self, id: &VaultId) -> LockResult<u32>;
}

/// In-memory vault store
#[derive(Debug, Default)]
pub struct MemoryVaultStore {
    vaults: RwLock<HashMap<VaultId, Vault>>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vaults.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.read().is_empty()
    }
}

impl VaultStore for MemoryVaultStore {
    fn get(&self, id: &VaultId) -> LockResult<Option<Vault>> {
        Ok(self.vaults.read().get(id).cloned())
    }

    fn put(&self, vault: Vault) -> LockResult<()> {
        self.vaults.write().insert(vault.id, vault);
        Ok(())
    }

    fn insert_new(&self, vault: Vault) -> LockResult<bool> {
        match self.vaults.write().entry(vault.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(vault);
                Ok(true)
            }
        }
    }

    fn remove(&self, id: &VaultId) -> LockResult<Option<Vault>> {
        Ok(self.vaults.write().remove(id))
    }

    fn update(
        &self,
        id: &VaultId,
        change: &mut dyn FnMut(&mut Vault) -> LockResult<()>,
    ) -> LockResult<Vault> {
        let mut vaults = self.vaults.write();
        let stored = vaults.get_mut(id).ok_or(LockError::VaultNotFound)?;
        let mut working = stored.clone();
        change(&mut working)?;
        if working.id != *id {
            return Err(LockError::Storage("update must not change the vault id".into()));
        }
        *stored = working.clone();
        Ok(working)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CounterSlot {
    count: u32,
    retired: bool,
}

/// In-memory unlock counter
#[derive(Debug, Default)]
pub struct MemoryUnlockCounter {
    counts: Mutex<HashMap<VaultId, CounterSlot>>,
}

impl MemoryUnlockCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UnlockCounter for MemoryUnlockCounter {
    fn get_unlock_count(&self, id: &VaultId) -> LockResult<u32> {
        Ok(self.counts.lock().get(id).map_or(0, |slot| slot.count))
    }

    fn increment_if_below_limit(&self, id: &VaultId, limit: Option<u32>) -> LockResult<Option<u32>> {
        let mut counts = self.counts.lock();
        let slot = counts.entry(*id).or_default();
        if slot.retired || limit.is_some_and(|limit| slot.count >= limit) {
            return Ok(None);
        }
        slot.count = slot
            .count
            .checked_add(1)
            .ok_or_else(|| LockError::Storage("unlock counter overflow".into()))?;
        Ok(Some(slot.count))
    }

    fn set_unlock_count(&self, id: &VaultId, count: u32) -> LockResult<()> {
        let mut counts = self.counts.lock();
        let slot = counts.entry(*id).or_default();
        if slot.retired {
            return Err(LockError::Storage("counter of a superseded vault is frozen".into()));
        }
        slot.count = count;
        Ok(())
    }

    fn retire(&self, id: &VaultId) -> LockResult<u32> {
        let mut counts = self.counts.lock();
        let slot = counts.entry(*id).or_default();
        slot.retired = true;
        Ok(slot.count)
    }
}
