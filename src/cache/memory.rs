//! In-process [`KeyValueStore`] used for single-node deployments and tests.
//!
//! Expiry is evaluated lazily on access against the tokio clock, so paused
//! test time drives TTLs deterministically.

use std::{collections::HashSet, num::NonZeroUsize, sync::Mutex, time::Duration};

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;

use super::lock::mutex_lock;
use super::store::{KeyValueStore, KvError};

const SOURCE: &str = "cache::memory";

#[derive(Debug)]
enum Slot {
    Value(String),
    Members(HashSet<String>),
}

#[derive(Debug)]
struct MemoryEntry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn persistent(slot: Slot) -> Self {
        Self {
            slot,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Entries = LruCache<String, MemoryEntry>;

/// Bounded LRU map of string values and string sets.
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::backend(format!(
        "WRONGTYPE operation against `{key}` holding the wrong kind of value"
    ))
}

fn purge_expired(entries: &mut Entries, key: &str, now: Instant) {
    if entries.peek(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.pop(key);
    }
}

fn incr_locked(entries: &mut Entries, key: &str, delta: i64) -> Result<i64, KvError> {
    purge_expired(entries, key, Instant::now());
    match entries.get_mut(key) {
        Some(MemoryEntry {
            slot: Slot::Value(raw),
            ..
        }) => {
            let current: i64 = raw.parse().map_err(|_| KvError::NotAnInteger {
                key: key.to_string(),
            })?;
            let next = current
                .checked_add(delta)
                .ok_or_else(|| KvError::backend(format!("increment overflows `{key}`")))?;
            *raw = next.to_string();
            Ok(next)
        }
        Some(_) => Err(wrong_type(key)),
        None => {
            entries.put(
                key.to_string(),
                MemoryEntry::persistent(Slot::Value(delta.to_string())),
            );
            Ok(delta)
        }
    }
}

fn set_add_locked(entries: &mut Entries, key: &str, member: &str) -> Result<(), KvError> {
    purge_expired(entries, key, Instant::now());
    match entries.get_mut(key) {
        Some(MemoryEntry {
            slot: Slot::Members(members),
            ..
        }) => {
            members.insert(member.to_string());
            Ok(())
        }
        Some(_) => Err(wrong_type(key)),
        None => {
            let members = HashSet::from([member.to_string()]);
            entries.put(key.to_string(), MemoryEntry::persistent(Slot::Members(members)));
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        purge_expired(&mut entries, key, Instant::now());
        match entries.get(key) {
            Some(MemoryEntry {
                slot: Slot::Value(raw),
                ..
            }) => Ok(Some(raw.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_ex");
        entries.put(
            key.to_string(),
            MemoryEntry {
                slot: Slot::Value(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete");
        purge_expired(&mut entries, key, Instant::now());
        Ok(entries.pop(key).is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "incr_by");
        incr_locked(&mut entries, key, delta)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get_del");
        purge_expired(&mut entries, key, Instant::now());
        match entries.peek(key) {
            Some(MemoryEntry {
                slot: Slot::Members(_),
                ..
            }) => Err(wrong_type(key)),
            _ => Ok(entries.pop(key).and_then(|entry| match entry.slot {
                Slot::Value(raw) => Some(raw),
                Slot::Members(_) => None,
            })),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let entries = mutex_lock(&self.entries, SOURCE, "scan_keys");
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_add");
        set_add_locked(&mut entries, key, member)
    }

    async fn set_pop(&self, key: &str, count: usize) -> Result<Vec<String>, KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_pop");
        purge_expired(&mut entries, key, Instant::now());
        let (taken, drained) = match entries.get_mut(key) {
            Some(MemoryEntry {
                slot: Slot::Members(members),
                ..
            }) => {
                let taken: Vec<String> = members.iter().take(count).cloned().collect();
                for member in &taken {
                    members.remove(member);
                }
                (taken, members.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
            None => return Ok(Vec::new()),
        };
        if drained {
            entries.pop(key);
        }
        Ok(taken)
    }

    async fn incr_and_index(
        &self,
        counter_key: &str,
        delta: i64,
        index_key: &str,
        member: &str,
    ) -> Result<i64, KvError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "incr_and_index");
        // Validate the index type first so a failure leaves the counter untouched.
        if let Some(entry) = entries.peek(index_key)
            && !entry.is_expired(Instant::now())
            && matches!(entry.slot, Slot::Value(_))
        {
            return Err(wrong_type(index_key));
        }
        let value = incr_locked(&mut entries, counter_key, delta)?;
        set_add_locked(&mut entries, index_key, member)?;
        Ok(value)
    }
}

/// Redis-style glob matching limited to `*` and `?`.
fn glob_matches(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();
    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some('?') => {
                p += 1;
                c += 1;
            }
            Some(ch) if *ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    c = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}
