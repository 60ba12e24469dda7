// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Block-height time-locks
//
// A vault's time-lock is an absolute block height. It is enforced off-chain
// by the Proof-of-Access validator against the caller-supplied chain tip.

use serde::{Deserialize, Serialize};

use crate::error::AccessError;

/// Time-lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeLockState {
    /// Chain tip is below the unlock height, access denied
    Locked,
    /// Unlock height reached, access permitted
    Unlocked,
}

/// Absolute block-height lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeightLock {
    pub unlock_height: u32,
}

impl BlockHeightLock {
    pub fn new(unlock_height: u32) -> Self {
        Self { unlock_height }
    }

    pub fn state(&self, current_height: u32) -> TimeLockState {
        if current_height >= self.unlock_height {
            TimeLockState::Unlocked
        } else {
            TimeLockState::Locked
        }
    }

    /// Blocks still to be mined before the lock opens
    pub fn blocks_remaining(&self, current_height: u32) -> u32 {
        self.unlock_height.saturating_sub(current_height)
    }

    pub fn check(&self, current_height: u32) -> Result<(), AccessError> {
        match self.state(current_height) {
            TimeLockState::Unlocked => Ok(()),
            TimeLockState::Locked => Err(AccessError::VaultTimeLocked {
                unlock_height: self.unlock_height,
                current_height,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_unlock_height() {
        let lock = BlockHeightLock::new(850_000);
        assert_eq!(lock.state(849_999), TimeLockState::Locked);
        assert_eq!(lock.state(850_000), TimeLockState::Unlocked);
        assert_eq!(lock.state(900_000), TimeLockState::Unlocked);
    }

    #[test]
    fn test_blocks_remaining() {
        let lock = BlockHeightLock::new(100);
        assert_eq!(lock.blocks_remaining(90), 10);
        assert_eq!(lock.blocks_remaining(150), 0);
    }

    #[test]
    fn test_check_reports_heights() {
        let lock = BlockHeightLock::new(850_000);
        assert_eq!(
            lock.check(849_999),
            Err(AccessError::VaultTimeLocked { unlock_height: 850_000, current_height: 849_999 })
        );
        assert!(lock.check(850_000).is_ok());
    }
}
