//! Process-wide master seed cache.
//!
//! One seed per wallet, derived once from the wallet signature and shared
//! by every room session. The hex form is the only key material the host
//! may persist; everything derived from it stays in memory.

use std::collections::HashMap;

use parking_lot::Mutex;

use vc_crypto::derive::MasterSeed;

use crate::error::SessionError;

#[derive(Default)]
pub struct SeedCache {
    seeds: Mutex<HashMap<String, MasterSeed>>,
}

impl SeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed for `address`, deriving and caching it from the signature on
    /// first use. Re-signing with the same wallet yields the same seed, so
    /// the cache is a pure shortcut past the wallet prompt.
    pub fn get_or_derive(
        &self,
        address: &str,
        signature: &[u8],
    ) -> Result<MasterSeed, SessionError> {
        let key = address.to_lowercase();
        let mut seeds = self.seeds.lock();
        if let Some(seed) = seeds.get(&key) {
            return Ok(seed.clone());
        }
        let seed = MasterSeed::from_wallet_signature(signature)
            .map_err(|e| SessionError::FatalInit(e.to_string()))?;
        seeds.insert(key, seed.clone());
        Ok(seed)
    }

    /// Restore a previously persisted seed.
    pub fn restore_hex(&self, address: &str, seed_hex: &str) -> Result<(), SessionError> {
        let seed = MasterSeed::from_hex(seed_hex)
            .map_err(|e| SessionError::FatalInit(e.to_string()))?;
        self.seeds.lock().insert(address.to_lowercase(), seed);
        Ok(())
    }

    /// Hex export for persistence, if the seed is cached.
    pub fn export_hex(&self, address: &str) -> Option<String> {
        self.seeds.lock().get(&address.to_lowercase()).map(|seed| seed.to_hex())
    }

    /// Drop the seed for an address (wallet switch).
    pub fn forget(&self, address: &str) {
        self.seeds.lock().remove(&address.to_lowercase());
    }
}
