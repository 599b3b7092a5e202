//! Cache store with TTL, LRU eviction and single-flight fetches

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::flight::{self, Flight, FlightError, Outcome};

type NegativeClassifier<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

/// A stored value with its freshness metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    /// Stored as a confirmed-empty result
    pub negative: bool,
}

impl<V> CacheEntry<V> {
    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that attached to an already running fetch
    pub coalesced: u64,
    /// Entries dropped for capacity
    pub evictions: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
    pub entries: usize,
    pub in_flight: usize,
}

struct Slot<V> {
    entry: CacheEntry<V>,
    tick: u64,
}

/// Entries plus a recency index ordered by last access
struct Entries<V> {
    map: HashMap<String, Slot<V>>,
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl<V> Entries<V> {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.map.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.map.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .map
            .values()
            .filter(|slot| slot.entry.is_expired(now))
            .map(|slot| slot.entry.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.map.remove(&key);
        Some(key)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct Inner<V, E> {
    capacity: usize,
    negative_ttl: Duration,
    negative: Option<NegativeClassifier<V>>,
    entries: Mutex<Entries<V>>,
    flights: Mutex<HashMap<String, Flight<V, E>>>,
    next_flight: AtomicU64,
    counters: Counters,
}

/// Process-local response cache.
///
/// Cloning is cheap and every clone shares the same storage. `E` is the
/// error type of the fetches run through [`CacheStore::get_or_fetch`].
///
/// Lock order is flights before entries wherever both are held.
pub struct CacheStore<V, E> {
    inner: Arc<Inner<V, E>>,
}

impl<V, E> Clone for CacheStore<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, E> CacheStore<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a store that caps the lifetime of values for which
    /// `is_negative` returns true at the configured negative TTL
    pub fn with_negative_classifier<F>(config: &CacheConfig, is_negative: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        Self::build(config, Some(Box::new(is_negative)))
    }

    fn build(config: &CacheConfig, negative: Option<NegativeClassifier<V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: config.capacity.max(1),
                negative_ttl: config.negative_ttl(),
                negative,
                entries: Mutex::new(Entries {
                    map: HashMap::new(),
                    recency: BTreeMap::new(),
                    tick: 0,
                }),
                flights: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Return a live value and mark it as recently used
    pub fn get(&self, key: &str) -> Option<V> {
        let found = self.inner.lookup(key);
        let counter = if found.is_some() {
            &self.inner.counters.hits
        } else {
            &self.inner.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Inspect an entry without touching recency or counters
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner
            .entries
            .lock()
            .map
            .get(key)
            .map(|slot| slot.entry.clone())
    }

    /// Store a value. A zero TTL stores nothing and drops any existing entry.
    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        self.inner.store(key, value, ttl);
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Fetches already running for matching keys still deliver their result
    /// to their waiters but no longer populate the cache.
    pub fn invalidate(&self, prefix: &str) -> usize {
        // Both locks held so no flight can store between marking and clearing
        let mut flights = self.inner.flights.lock();
        for (_, flight) in flights.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
            flight.populate = false;
        }

        let mut entries = self.inner.entries.lock();
        let keys: Vec<String> = entries
            .map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        drop(entries);
        drop(flights);

        let removed = keys.len();
        debug!(prefix, removed, "Cache invalidated");
        removed
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.invalidate("");
    }

    /// Return the cached value, or run `fetch` once for all concurrent
    /// callers of the same key.
    ///
    /// The fetch runs as its own task: a caller that stops waiting does not
    /// cancel it, and its outcome still reaches everyone else. Only
    /// successful values are stored.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, FlightError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            trace!(key, "Cache hit");
            return Ok(value);
        }

        let (rx, leader) = {
            let mut flights = self.inner.flights.lock();
            if let Some(flight) = flights.get(key) {
                self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key, flight = flight.id, "Joining in-flight fetch");
                (flight.rx.clone(), None)
            } else if let Some(value) = self.inner.lookup(key) {
                // Populated by a flight that finished since our miss
                return Ok(value);
            } else {
                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                flights.insert(
                    key.to_string(),
                    Flight {
                        id,
                        rx: rx.clone(),
                        populate: true,
                    },
                );
                debug!(key, flight = id, "Cache miss, starting fetch");

                let guard = FlightGuard {
                    inner: Arc::clone(&self.inner),
                    key: key.to_string(),
                    id,
                };
                (rx, Some((tx, guard)))
            }
        };

        // `fetch` runs without the flights lock so it may use the store itself
        if let Some((tx, guard)) = leader {
            let fut = fetch();
            tokio::spawn(async move {
                let outcome = fut.await.map_err(FlightError::Upstream);
                guard.complete(&outcome, ttl);
                let _ = tx.send(Some(outcome));
            });
        }

        flight::wait(rx).await
    }

    /// Remove all expired entries
    pub fn purge_expired(&self) -> usize {
        let purged = self.inner.entries.lock().purge_expired(Instant::now());
        if purged > 0 {
            self.inner
                .counters
                .expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            debug!(purged, "Expired cache entries purged");
        }
        purged
    }

    /// Purge expired entries every `interval` in the background.
    ///
    /// The task ends by itself once every handle to the store is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner<V, E>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                CacheStore { inner }.purge_expired();
            }
            debug!("Cache sweeper stopped");
        })
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.entries.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            entries: self.len(),
            in_flight: self.inner.flights.lock().len(),
        }
    }
}

impl<V: Clone, E> Inner<V, E> {
    fn lookup(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = entries.map.get(key)?.entry.is_expired(Instant::now());
        if expired {
            entries.remove(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        entries.touch(key);
        entries.map.get(key).map(|slot| slot.entry.value.clone())
    }

    fn store(&self, key: &str, value: V, ttl: Duration) {
        let mut entries = self.entries.lock();
        if ttl.is_zero() {
            entries.remove(key);
            return;
        }

        let negative = self.negative.as_ref().is_some_and(|f| f(&value));
        let ttl = if negative {
            ttl.min(self.negative_ttl)
        } else {
            ttl
        };

        entries.remove(key);
        entries.tick += 1;
        let tick = entries.tick;
        entries.recency.insert(tick, key.to_string());
        entries.map.insert(
            key.to_string(),
            Slot {
                entry: CacheEntry {
                    key: key.to_string(),
                    value,
                    created_at: Instant::now(),
                    ttl,
                    negative,
                },
                tick,
            },
        );

        if entries.map.len() > self.capacity {
            let purged = entries.purge_expired(Instant::now());
            self.counters
                .expirations
                .fetch_add(purged as u64, Ordering::Relaxed);
            while entries.map.len() > self.capacity {
                match entries.evict_lru() {
                    Some(victim) => {
                        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                        trace!(key = %victim, "Evicted least recently used entry");
                    }
                    None => break,
                }
            }
        }
    }
}

/// Owned by the fetch task; removes its registry token however the task ends
struct FlightGuard<V, E> {
    inner: Arc<Inner<V, E>>,
    key: String,
    id: u64,
}

impl<V: Clone, E> FlightGuard<V, E> {
    fn complete(&self, outcome: &Outcome<V, E>, ttl: Duration) {
        let mut flights = self.inner.flights.lock();
        let ours = flights
            .get(&self.key)
            .filter(|flight| flight.id == self.id)
            .map(|flight| flight.populate);
        let populate = match ours {
            Some(populate) => {
                flights.remove(&self.key);
                populate
            }
            None => false,
        };
        if let (true, Ok(value)) = (populate, outcome) {
            self.inner.store(&self.key, value.clone(), ttl);
        }
    }
}

impl<V, E> Drop for FlightGuard<V, E> {
    fn drop(&mut self) {
        let mut flights = self.inner.flights.lock();
        if flights.get(&self.key).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.key);
        }
    }
}
