//! In-process store
//!
//! A [`MemoryStore`] is one "cluster" shared by any number of
//! [`MemoryConnection`] handles. Faults can be injected per key to exercise
//! retry and dead-letter paths, and every attempt is counted.

use crate::error::{StoreError, StoreResult};
use crate::journal::Key;
use crate::store::{Connector, StoreConnection, StoreOutcome, StoredObject};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type ObjectKey = (String, Key);

#[derive(Debug, Default)]
struct Faults {
    fetch_always: HashSet<Key>,
    store_always: HashSet<Key>,
    fetch_transient: HashMap<Key, u32>,
    store_transient: HashMap<Key, u32>,
    fetch_panic: HashSet<Key>,
    fetch_gates: HashMap<Key, Receiver<()>>,
}

#[derive(Debug, Default)]
struct Attempts {
    fetch: HashMap<Key, u32>,
    store: HashMap<Key, u32>,
}

#[derive(Debug)]
struct Inner {
    name: String,
    objects: RwLock<HashMap<ObjectKey, Vec<StoredObject>>>,
    faults: Mutex<Faults>,
    attempts: Mutex<Attempts>,
    connected: AtomicBool,
    connections_opened: AtomicU64,
}

/// Shared in-memory cluster
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                objects: RwLock::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                attempts: Mutex::new(Attempts::default()),
                connected: AtomicBool::new(true),
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Open a new handle to this store
    pub fn connection(&self) -> MemoryConnection {
        self.inner.connections_opened.fetch_add(1, Ordering::Relaxed);
        MemoryConnection {
            store: self.clone(),
        }
    }

    /// Store a single value, replacing whatever was there
    pub fn insert(&self, bucket: &str, key: impl Into<Key>, value: impl Into<Vec<u8>>) {
        let object = StoredObject::new(bucket, key, value);
        self.insert_siblings(vec![object]);
    }

    /// Store several versions under one key; the first one decides the key
    pub fn insert_siblings(&self, siblings: Vec<StoredObject>) {
        if let Some(first) = siblings.first() {
            let id = (first.bucket.clone(), first.key.clone());
            self.inner.objects.write().insert(id, siblings);
        }
    }

    /// First stored version of a key
    pub fn get(&self, bucket: &str, key: impl Into<Key>) -> Option<StoredObject> {
        let id = (bucket.to_string(), key.into());
        self.inner
            .objects
            .read()
            .get(&id)
            .and_then(|versions| versions.first().cloned())
    }

    pub fn contains(&self, bucket: &str, key: impl Into<Key>) -> bool {
        self.get(bucket, key).is_some()
    }

    /// Number of keys stored in `bucket`
    pub fn len(&self, bucket: &str) -> usize {
        self.inner
            .objects
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.objects.read().is_empty()
    }

    /// Every fetch of `key` fails with a transport error
    pub fn fail_fetch(&self, key: impl Into<Key>) {
        self.inner.faults.lock().fetch_always.insert(key.into());
    }

    /// Every store of `key` fails with a transport error
    pub fn fail_store(&self, key: impl Into<Key>) {
        self.inner.faults.lock().store_always.insert(key.into());
    }

    /// The next `times` fetches of `key` fail
    pub fn fail_fetch_times(&self, key: impl Into<Key>, times: u32) {
        self.inner.faults.lock().fetch_transient.insert(key.into(), times);
    }

    /// The next `times` stores of `key` fail
    pub fn fail_store_times(&self, key: impl Into<Key>, times: u32) {
        self.inner.faults.lock().store_transient.insert(key.into(), times);
    }

    /// Fetching `key` panics inside the connection
    pub fn panic_on_fetch(&self, key: impl Into<Key>) {
        self.inner.faults.lock().fetch_panic.insert(key.into());
    }

    /// Fetches of `key` block until the returned gate is opened or dropped
    pub fn hold_fetch(&self, key: impl Into<Key>) -> FetchGate {
        let (open, gate) = bounded(0);
        self.inner.faults.lock().fetch_gates.insert(key.into(), gate);
        FetchGate { open }
    }

    /// Toggle the liveness reported by every handle
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fetch_attempts(&self, key: impl Into<Key>) -> u32 {
        let key = key.into();
        self.inner.attempts.lock().fetch.get(&key).copied().unwrap_or(0)
    }

    pub fn store_attempts(&self, key: impl Into<Key>) -> u32 {
        let key = key.into();
        self.inner.attempts.lock().store.get(&key).copied().unwrap_or(0)
    }

    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    fn endpoint(&self) -> String {
        format!("memory://{}", self.inner.name)
    }

    fn check_connected(&self) -> StoreResult<()> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected {
                endpoint: self.endpoint(),
            })
        }
    }

    fn injected_failure(&self, key: &Key, always: bool, transient: Option<&mut u32>) -> StoreResult<()> {
        let injected = always
            || match transient {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            };
        if injected {
            return Err(StoreError::Transport {
                endpoint: self.endpoint(),
                reason: format!("injected failure for key '{}'", key),
            });
        }
        Ok(())
    }
}

impl Connector for MemoryStore {
    fn endpoint(&self) -> String {
        MemoryStore::endpoint(self)
    }

    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        Ok(Box::new(self.connection()))
    }
}

/// Releases fetches held by [`MemoryStore::hold_fetch`]
#[derive(Debug)]
pub struct FetchGate {
    open: Sender<()>,
}

impl FetchGate {
    pub fn open(self) {
        drop(self.open);
    }
}

/// Handle to a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    store: MemoryStore,
}

impl StoreConnection for MemoryConnection {
    fn endpoint(&self) -> String {
        self.store.endpoint()
    }

    fn connected(&mut self) -> bool {
        self.store.check_connected().is_ok()
    }

    fn fetch(&mut self, bucket: &str, key: &Key) -> StoreResult<Vec<StoredObject>> {
        *self
            .store
            .inner
            .attempts
            .lock()
            .fetch
            .entry(key.clone())
            .or_insert(0) += 1;

        self.store.check_connected()?;

        let gate = self.store.inner.faults.lock().fetch_gates.get(key).cloned();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        {
            let mut faults = self.store.inner.faults.lock();
            if faults.fetch_panic.contains(key) {
                drop(faults);
                panic!("injected panic fetching key '{}'", key);
            }
            let always = faults.fetch_always.contains(key);
            self.store
                .injected_failure(key, always, faults.fetch_transient.get_mut(key))?;
        }

        let id = (bucket.to_string(), key.clone());
        Ok(self
            .store
            .inner
            .objects
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn store_if_absent(&mut self, object: &StoredObject) -> StoreResult<StoreOutcome> {
        *self
            .store
            .inner
            .attempts
            .lock()
            .store
            .entry(object.key.clone())
            .or_insert(0) += 1;

        self.store.check_connected()?;

        {
            let mut faults = self.store.inner.faults.lock();
            let always = faults.store_always.contains(&object.key);
            self.store
                .injected_failure(&object.key, always, faults.store_transient.get_mut(&object.key))?;
        }

        let id = (object.bucket.clone(), object.key.clone());
        let mut objects = self.store.inner.objects.write();
        if objects.contains_key(&id) {
            return Ok(StoreOutcome::AlreadyExists);
        }
        objects.insert(id, vec![object.clone()]);
        Ok(StoreOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_fetch_waits_for_gate() {
        let store = MemoryStore::new("src");
        store.insert("b", "k", "v");
        let gate = store.hold_fetch("k");

        let mut conn = store.connection();
        let fetcher = std::thread::spawn(move || conn.fetch("b", &Key::from("k")).unwrap().len());
        while store.fetch_attempts("k") == 0 {
            std::thread::yield_now();
        }
        assert!(!fetcher.is_finished());

        gate.open();
        assert_eq!(fetcher.join().unwrap(), 1);

        // An opened gate no longer holds later fetches
        assert_eq!(store.connection().fetch("b", &Key::from("k")).unwrap().len(), 1);
    }

    #[test]
    fn test_store_if_absent_never_overwrites() {
        let store = MemoryStore::new("dest");
        store.insert("b", "k", "original");
        let mut conn = store.connection();

        let outcome = conn
            .store_if_absent(&StoredObject::new("b", "k", "replacement"))
            .unwrap();
        assert_eq!(outcome, StoreOutcome::AlreadyExists);
        assert_eq!(store.get("b", "k").unwrap().value, b"original");

        let outcome = conn
            .store_if_absent(&StoredObject::new("b", "new", "value"))
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Created);
        assert_eq!(store.len("b"), 2);
    }

    #[test]
    fn test_fetch_missing_is_empty() {
        let store = MemoryStore::new("src");
        let mut conn = store.connection();
        assert!(conn.fetch("b", &Key::from("nope")).unwrap().is_empty());
        assert_eq!(store.fetch_attempts("nope"), 1);
    }

    #[test]
    fn test_siblings_returned_in_order() {
        let store = MemoryStore::new("src");
        store.insert_siblings(vec![
            StoredObject::new("b", "k", "first"),
            StoredObject::new("b", "k", "second"),
        ]);
        let versions = store.connection().fetch("b", &Key::from("k")).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].value, b"first");
    }

    #[test]
    fn test_transient_faults_run_out() {
        let store = MemoryStore::new("src");
        store.insert("b", "k", "v");
        store.fail_fetch_times("k", 2);
        let mut conn = store.connection();

        assert!(conn.fetch("b", &Key::from("k")).is_err());
        assert!(conn.fetch("b", &Key::from("k")).is_err());
        assert_eq!(conn.fetch("b", &Key::from("k")).unwrap().len(), 1);
        assert_eq!(store.fetch_attempts("k"), 3);
    }

    #[test]
    fn test_disconnected_store() {
        let store = MemoryStore::new("src");
        let mut conn = store.connection();
        assert!(conn.connected());
        store.set_connected(false);
        assert!(!conn.connected());
        assert!(matches!(
            conn.fetch("b", &Key::from("k")),
            Err(StoreError::NotConnected { .. })
        ));
    }
}
