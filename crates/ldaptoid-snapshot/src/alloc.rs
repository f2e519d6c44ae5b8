//! Deterministic POSIX id allocation.
//!
//! Ids are derived by hashing `salt:attempt:key` with FNV-1a 64 and folding
//! to the positive 31-bit range, so the same key gets the same id on every
//! host without coordination. Collisions retry with a bumped attempt
//! counter a bounded number of times, then fall back to a sequential
//! counter above everything seen so far.

use metrics::counter;
use std::collections::HashMap;

/// Lowest id the hash path may produce; also the base of the sequential
/// fallback range. Ids at or below this are reserved for system accounts.
pub const DEFAULT_ID_FLOOR: u32 = 10_000;

/// Hash attempts before the sequential fallback kicks in.
pub const DEFAULT_RETRY_LIMIT: u32 = 4;

const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Outcome of one allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub id: u32,
    /// False when the hash path was exhausted and the sequential counter
    /// supplied the id.
    pub hashed: bool,
    /// Hash attempts that lost to an existing id before this one stuck.
    pub collisions: u32,
    /// False when the key already had an id from a previous call/import.
    pub fresh: bool,
}

/// One id number space. UID and GID spaces are separate instances with
/// distinct salts so user and group hashes never shadow each other.
#[derive(Debug)]
pub struct IdAllocator {
    salt: String,
    floor: u32,
    ceiling: Option<u32>,
    retry_limit: u32,
    assigned: HashMap<String, u32>,
    taken: HashMap<u32, String>,
    highest_seen: u32,
}

impl IdAllocator {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            floor: DEFAULT_ID_FLOOR,
            ceiling: None,
            retry_limit: DEFAULT_RETRY_LIMIT,
            assigned: HashMap::new(),
            taken: HashMap::new(),
            highest_seen: 0,
        }
    }

    pub fn with_range(mut self, floor: u32, ceiling: Option<u32>) -> Self {
        self.floor = floor;
        self.ceiling = ceiling;
        self
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.assigned.get(key).copied()
    }

    /// Returns the id for `key`, assigning one if this is the first time
    /// the key is seen.
    pub fn allocate(&mut self, key: &str) -> Allocation {
        if let Some(&id) = self.assigned.get(key) {
            return Allocation {
                id,
                hashed: true,
                collisions: 0,
                fresh: false,
            };
        }

        for attempt in 0..=self.retry_limit {
            let hash = fnv1a64(format!("{}:{attempt}:{key}", self.salt).as_bytes());
            let id = (hash & 0x7FFF_FFFF) as u32;
            if id <= self.floor || self.ceiling.is_some_and(|ceiling| id > ceiling) {
                continue;
            }
            if self.taken.contains_key(&id) {
                continue;
            }
            if attempt > 0 {
                counter!("ldaptoid_id_collisions_total", "space" => self.salt.clone())
                    .increment(attempt as u64);
            }
            self.commit(key, id);
            return Allocation {
                id,
                hashed: true,
                collisions: attempt,
                fresh: true,
            };
        }

        counter!("ldaptoid_id_fallbacks_total", "space" => self.salt.clone()).increment(1);
        let mut id = (self.floor + 1).max(self.highest_seen.saturating_add(1));
        while self.taken.contains_key(&id) {
            id += 1;
        }
        self.commit(key, id);
        Allocation {
            id,
            hashed: false,
            collisions: self.retry_limit + 1,
            fresh: true,
        }
    }

    fn commit(&mut self, key: &str, id: u32) {
        self.assigned.insert(key.to_string(), id);
        self.taken.insert(id, key.to_string());
        self.highest_seen = self.highest_seen.max(id);
    }

    /// All known `(key, id)` pairs, for persistence.
    pub fn export(&self) -> Vec<(String, u32)> {
        let mut entries: Vec<_> = self
            .assigned
            .iter()
            .map(|(key, &id)| (key.clone(), id))
            .collect();
        entries.sort();
        entries
    }

    /// Seeds mappings from persistence. Existing keys and already-taken ids
    /// are never overwritten; the sequential cursor advances past the
    /// largest imported id.
    pub fn import<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, u32)>,
    {
        for (key, id) in entries {
            if self.assigned.contains_key(&key) || self.taken.contains_key(&id) {
                continue;
            }
            self.commit(&key, id);
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
