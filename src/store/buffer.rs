//! Write-behind buffer: writes land first in a durable local buffer `B`,
//! then a background drainer moves them to the primary store `P`.
//!
//! Grounded on two teacher idioms: `CasBackend`'s (`storage::cas_client`)
//! `LbaIndex` persisted alongside a live connection and re-synced with
//! `save_index` after every mutation (the "durable local state, lazily
//! synced to the real backend" shape), and `cas::server::handle_client`'s
//! background-thread-per-worker pattern for the drainer itself.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;
use crate::store::{CancelToken, ListControl, Namespaced, PutOptions, Store, StoreError, StoreResult};

/// Health signal surfaced through the RPC service's `status` metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum Health {
    Healthy,
    Degraded {
        consecutive_failures: u32,
        last_error: String,
    },
}

struct Backoff {
    base: Duration,
    factor: u32,
    cap: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2,
            cap: Duration::from_secs(30),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(self.factor.saturating_pow(attempt.min(16)));
        scaled.min(self.cap)
    }
}

struct Shared {
    queue: Mutex<VecDeque<Vec<u8>>>,
    condvar: Condvar,
    /// Keys currently being migrated by the drainer; `delete` waits its turn
    /// on a key in this set so the reader never observes the key missing
    /// from both tiers mid-migration and never races the drainer's delete.
    in_flight: Mutex<HashSet<Vec<u8>>>,
    in_flight_condvar: Condvar,
    health: Mutex<Health>,
    consecutive_failures: AtomicU32,
    shutdown: CancelToken,
}

/// A primary store `P` fronted by a durable local buffer `B`.
pub struct WriteBehindStore<B, P> {
    buffer: Arc<B>,
    primary: Arc<P>,
    shared: Arc<Shared>,
    drainer: Mutex<Option<JoinHandle<()>>>,
}

impl<B, P> WriteBehindStore<B, P>
where
    B: Store + 'static,
    P: Store + 'static,
{
    /// Construct the wrapper and start the background drainer. On startup,
    /// any keys already present in `buffer` (from a prior crash) are
    /// enqueued for migration.
    pub fn new(buffer: B, primary: P) -> StoreResult<Self> {
        let buffer = Arc::new(buffer);
        let primary = Arc::new(primary);

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            in_flight: Mutex::new(HashSet::new()),
            in_flight_condvar: Condvar::new(),
            health: Mutex::new(Health::Healthy),
            consecutive_failures: AtomicU32::new(0),
            shutdown: CancelToken::new(),
        });

        // Crash recovery: anything already buffered needs to drain.
        {
            let cancel = CancelToken::new();
            let mut pending = Vec::new();
            buffer.list(&[], &cancel, &mut |k| {
                pending.push(k.to_vec());
                ListControl::Continue
            })?;
            let mut queue = shared.queue.lock().unwrap();
            for key in pending {
                queue.push_back(key);
            }
        }

        let drainer = {
            let buffer = Arc::clone(&buffer);
            let primary = Arc::clone(&primary);
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || drain_loop(buffer, primary, shared))
        };

        Ok(Self {
            buffer,
            primary,
            shared,
            drainer: Mutex::new(Some(drainer)),
        })
    }

    /// Current drainer health, surfaced via the RPC `status` method.
    pub fn health(&self) -> Health {
        self.shared.health.lock().unwrap().clone()
    }

    /// Number of keys still waiting to migrate to the primary.
    pub fn pending_len(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    fn wait_until_not_in_flight(&self, key: &[u8]) {
        let mut in_flight = self.shared.in_flight.lock().unwrap();
        while in_flight.contains(key) {
            in_flight = self.shared.in_flight_condvar.wait(in_flight).unwrap();
        }
    }
}

impl<B, P> Store for WriteBehindStore<B, P>
where
    B: Store + 'static,
    P: Store + 'static,
{
    fn get(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        match self.buffer.get(key) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::KeyNotFound => self.primary.get(key),
            Err(e) => Err(e),
        }
    }

    fn put(&self, opts: PutOptions) -> StoreResult<()> {
        let key = opts.key.clone();
        self.buffer.put(opts)?;
        self.shared.queue.lock().unwrap().push_back(key);
        self.shared.condvar.notify_one();
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.wait_until_not_in_flight(key);

        let from_buffer = self.buffer.delete(key);
        let from_primary = self.primary.delete(key);

        match (from_buffer, from_primary) {
            (Ok(()), _) | (_, Ok(())) => Ok(()),
            (Err(b), Err(p)) if b.kind() == ErrorKind::KeyNotFound && p.kind() == ErrorKind::KeyNotFound => {
                Err(StoreError::NotFound)
            }
            (Err(b), Err(_)) => Err(b),
        }
    }

    fn len(&self) -> StoreResult<u64> {
        let mut keys = HashSet::new();
        let cancel = CancelToken::new();
        self.buffer.list(&[], &cancel, &mut |k| {
            keys.insert(k.to_vec());
            ListControl::Continue
        })?;
        self.primary.list(&[], &cancel, &mut |k| {
            keys.insert(k.to_vec());
            ListControl::Continue
        })?;
        Ok(keys.len() as u64)
    }

    fn list(
        &self,
        start: &[u8],
        cancel: &CancelToken,
        f: &mut dyn FnMut(&[u8]) -> ListControl,
    ) -> StoreResult<()> {
        use std::collections::BTreeSet;

        let mut merged: BTreeSet<Vec<u8>> = BTreeSet::new();
        self.buffer.list(start, cancel, &mut |k| {
            merged.insert(k.to_vec());
            ListControl::Continue
        })?;
        self.primary.list(start, cancel, &mut |k| {
            merged.insert(k.to_vec());
            ListControl::Continue
        })?;

        for key in merged {
            cancel.check()?;
            if f(&key) == ListControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.shared.shutdown.cancel();
        self.shared.condvar.notify_all();
        if let Some(handle) = self.drainer.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.buffer.close()?;
        self.primary.close()
    }
}

// A sub-namespace gets its own buffer/primary pair (and its own drainer
// thread) rather than sharing the parent's drain queue, keeping each
// namespace's write-behind behavior independent.
impl<B, P> Namespaced for WriteBehindStore<B, P>
where
    B: Store + Namespaced + 'static,
    P: Store + Namespaced + 'static,
{
    fn sub(&self, name: &str) -> StoreResult<Arc<dyn Store>> {
        let buffer_sub = self.buffer.sub(name)?;
        let primary_sub = self.primary.sub(name)?;
        let wb = WriteBehindStore::new(buffer_sub, primary_sub)?;
        Ok(Arc::new(wb) as Arc<dyn Store>)
    }
}

fn drain_loop<B: Store, P: Store>(buffer: Arc<B>, primary: Arc<P>, shared: Arc<Shared>) {
    let backoff = Backoff::new();
    let mut attempt: u32 = 0;

    loop {
        let key = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.shutdown.is_canceled() && queue.is_empty() {
                    return;
                }
                if let Some(key) = queue.pop_front() {
                    break key;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        };

        shared.in_flight.lock().unwrap().insert(key.clone());

        let outcome = migrate_one(buffer.as_ref(), primary.as_ref(), &key);

        shared.in_flight.lock().unwrap().remove(&key);
        shared.in_flight_condvar.notify_all();

        match outcome {
            Ok(()) => {
                attempt = 0;
                shared.consecutive_failures.store(0, Ordering::SeqCst);
                *shared.health.lock().unwrap() = Health::Healthy;
            }
            Err(e) if e.kind() == ErrorKind::KeyNotFound => {
                // The key was deleted out from under the drainer; nothing
                // left to migrate.
                attempt = 0;
            }
            Err(e) => {
                let failures = shared.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                *shared.health.lock().unwrap() = Health::Degraded {
                    consecutive_failures: failures,
                    last_error: e.to_string(),
                };
                log::warn!("write-behind drain of key failed (attempt {attempt}): {e}");

                // Re-enqueue for a later retry and back off before the next pop.
                shared.queue.lock().unwrap().push_back(key);
                let delay = backoff.delay(attempt);
                attempt += 1;

                let deadline = Instant::now() + delay;
                let mut guard = shared.queue.lock().unwrap();
                while Instant::now() < deadline && !shared.shutdown.is_canceled() {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let (g, _) = shared.condvar.wait_timeout(guard, remaining).unwrap();
                    guard = g;
                }
            }
        }
    }
}

fn migrate_one<B: Store, P: Store>(buffer: &B, primary: &P, key: &[u8]) -> StoreResult<()> {
    let data = match buffer.get(key) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::KeyNotFound => return Err(e),
        Err(e) => return Err(e),
    };

    primary.put(PutOptions::new(key.to_vec(), data))?;

    // Idempotent for identical bytes; a key collision with different bytes
    // in the primary is treated as logically impossible since migration is
    // content-preserving (spec.md section 4.5) -- the primary already won,
    // drop the buffer copy either way.
    match buffer.delete(key) {
        Ok(()) | Err(StoreError::NotFound) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn wait_for_quiescence<B, P>(store: &WriteBehindStore<B, P>)
    where
        B: Store + 'static,
        P: Store + 'static,
    {
        for _ in 0..200 {
            if store.pending_len() == 0 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("write-behind buffer did not drain in time");
    }

    #[test]
    fn put_is_immediately_readable_and_drains_to_primary() {
        let store = WriteBehindStore::new(MemoryStore::new(), MemoryStore::new()).unwrap();

        for i in 0..1000u32 {
            store
                .put(PutOptions::new(
                    format!("k{i}").into_bytes(),
                    vec![0xABu8; 1024],
                ))
                .unwrap();
            assert_eq!(store.get(format!("k{i}").as_bytes()).unwrap(), vec![0xABu8; 1024]);
        }

        wait_for_quiescence(&store);

        assert_eq!(store.buffer.len().unwrap(), 0);
        assert_eq!(store.primary.len().unwrap(), 1000);
        for i in 0..1000u32 {
            assert_eq!(
                store.get(format!("k{i}").as_bytes()).unwrap(),
                vec![0xABu8; 1024]
            );
        }
    }

    #[test]
    fn delete_removes_from_both_tiers() {
        let store = WriteBehindStore::new(MemoryStore::new(), MemoryStore::new()).unwrap();
        store
            .put(PutOptions::new(b"k".to_vec(), b"v".to_vec()))
            .unwrap();
        wait_for_quiescence(&store);

        store.delete(b"k").unwrap();
        assert!(store.get(b"k").is_err());
        assert!(store.buffer.get(b"k").is_err());
        assert!(store.primary.get(b"k").is_err());
    }

    #[test]
    fn list_is_the_union_with_no_duplicates() {
        let store = WriteBehindStore::new(MemoryStore::new(), MemoryStore::new()).unwrap();
        store.put(PutOptions::new(b"a".to_vec(), b"1".to_vec())).unwrap();
        wait_for_quiescence(&store);
        store.put(PutOptions::new(b"b".to_vec(), b"2".to_vec())).unwrap();

        let cancel = CancelToken::new();
        let mut seen = Vec::new();
        store
            .list(&[], &cancel, &mut |k| {
                seen.push(k.to_vec());
                ListControl::Continue
            })
            .unwrap();

        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn crash_recovery_drains_preexisting_buffer_contents() {
        let buffer = MemoryStore::new();
        buffer
            .put(PutOptions::new(b"orphaned".to_vec(), b"v".to_vec()))
            .unwrap();

        let store = WriteBehindStore::new(buffer, MemoryStore::new()).unwrap();
        wait_for_quiescence(&store);
        assert_eq!(store.primary.get(b"orphaned").unwrap(), b"v");
    }
}
