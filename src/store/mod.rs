//! Store connections
//!
//! The mirroring engine talks to both clusters through [`StoreConnection`].
//! Each worker owns one source and one destination connection for its whole
//! run, so implementations need `Send` but never `Sync`.
//!
//! A connection is responsible for its own reconnection. The worker's retry
//! loop only counts attempts; a failed call is an opportunity for the
//! connection to re-establish itself before the next one.
//!
//! # Implementations
//!
//! - [`HttpConnection`]: blocking HTTP client for the Riak-style object API
//! - [`MemoryConnection`]: in-process store with fault injection

pub mod http;
pub mod memory;

use crate::error::StoreResult;
use crate::journal::Key;

pub use http::{HttpConnection, HttpConnector};
pub use memory::{FetchGate, MemoryConnection, MemoryStore};

/// One version of an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: Key,
    pub value: Vec<u8>,
    pub content_type: Option<String>,
    /// Opaque causal context from the source
    pub vclock: Option<String>,
    /// User metadata (name without prefix, value)
    pub metadata: Vec<(String, String)>,
    /// Secondary index entries (index name, value)
    pub indexes: Vec<(String, String)>,
}

impl StoredObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<Key>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
            content_type: None,
            vclock: None,
            metadata: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Value size in bytes
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }
}

/// Result of a create-if-absent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The destination had no value; ours was written
    Created,
    /// The destination already held a value; nothing was written
    AlreadyExists,
}

/// A live handle to one cluster endpoint
pub trait StoreConnection: Send {
    /// Endpoint description for log lines
    fn endpoint(&self) -> String;

    /// Liveness check, run once at job start
    fn connected(&mut self) -> bool;

    /// Fetch every sibling stored under `key`. An empty list means nothing
    /// was found.
    fn fetch(&mut self, bucket: &str, key: &Key) -> StoreResult<Vec<StoredObject>>;

    /// Write `object` only if the key is absent at this endpoint
    fn store_if_absent(&mut self, object: &StoredObject) -> StoreResult<StoreOutcome>;
}

/// Opens new connections to one cluster
pub trait Connector: Send + Sync {
    fn endpoint(&self) -> String;

    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>>;
}

/// Source and destination connection owned by one worker
pub struct ConnectionPair {
    pub source: Box<dyn StoreConnection>,
    pub destination: Box<dyn StoreConnection>,
}

impl ConnectionPair {
    pub fn new(source: Box<dyn StoreConnection>, destination: Box<dyn StoreConnection>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Open `count` pairs from two connectors
    pub fn open_many(
        source: &dyn Connector,
        destination: &dyn Connector,
        count: usize,
    ) -> StoreResult<Vec<ConnectionPair>> {
        (0..count)
            .map(|_| Ok(ConnectionPair::new(source.connect()?, destination.connect()?)))
            .collect()
    }
}

impl std::fmt::Debug for ConnectionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPair")
            .field("source", &self.source.endpoint())
            .field("destination", &self.destination.endpoint())
            .finish()
    }
}
