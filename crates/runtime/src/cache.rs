//! Process-wide cache of compiled units.
//!
//! Keys are content-addressed: the artifact name, the detected unit name and a
//! SHA-256 digest of the normalized source. Re-registering changed source under
//! the same name therefore misses the cache; `invalidate` drops stale entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};

/// Cache key for one compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub artifact: String,
    pub unit_name: String,
    pub digest: [u8; 32],
}

impl CacheKey {
    pub fn new(artifact: impl Into<String>, unit_name: impl Into<String>, normalized: &str) -> Self {
        Self {
            artifact: artifact.into(),
            unit_name: unit_name.into(),
            digest: Sha256::digest(normalized.as_bytes()).into(),
        }
    }

    fn names(&self, name: &str) -> bool {
        self.artifact == name || self.unit_name == name
    }
}

/// Shared compiled-unit cache.
///
/// Reads are concurrent. Two callers racing on the same missing key may both
/// compile; the later insert wins and each caller uses its own result.
#[derive(Debug)]
pub struct CompiledUnitCache<U> {
    units: RwLock<HashMap<CacheKey, U>>,
    compiles: AtomicU64,
}

impl<U: Clone> CompiledUnitCache<U> {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            compiles: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<U> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: CacheKey, unit: U) {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, unit);
    }

    /// Return the cached unit or compile, count and cache it.
    ///
    /// The compiler runs without holding the lock; failures are not cached.
    pub fn get_or_compile<E, F>(&self, key: CacheKey, compile: F) -> Result<U, E>
    where
        F: FnOnce() -> Result<U, E>,
    {
        if let Some(unit) = self.get(&key) {
            return Ok(unit);
        }

        self.compiles.fetch_add(1, Ordering::Relaxed);
        let unit = compile()?;
        self.insert(key, unit.clone());
        Ok(unit)
    }

    /// Drop every unit cached under `name` (artifact or unit name).
    /// Returns how many entries were removed.
    pub fn invalidate(&self, name: &str) -> usize {
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        let before = units.len();
        units.retain(|key, _| !key.names(name));
        before - units.len()
    }

    pub fn clear(&self) {
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of compilations attempted through `get_or_compile`.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<U: Clone> Default for CompiledUnitCache<U> {
    fn default() -> Self {
        Self::new()
    }
}
