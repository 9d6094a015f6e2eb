//! The DHT facade: one put/get contract over four backends.
//!
//! The file engine only ever talks to [`Dht`]. Behind it sit an
//! in-process map for tests ([`MemoryDht`]), the on-disk store of one
//! peer ([`LocalStore`]), a client that reaches a ring through any
//! single peer ([`NetClientDht`]), and the server-side adapter installed
//! as a ring node's listener ([`NetServerDht`]).
//!
//! For the networked pair, the caller-supplied id is mapped to a ring
//! key: used verbatim when it is exactly 16 bytes (callers storing by
//! descriptor locator know what they are doing), otherwise the first 16
//! bytes of its SHA-1; either way interpreted as a little-endian
//! unsigned integer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use data_encoding::BASE64;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::crypto;
use crate::error::{DfsError, DfsResult};
use crate::local_store::LocalStore;
use crate::ring::RingListener;
use crate::rpc::RpcClient;

pub use crate::local_store::DEFAULT_SUBKEY;

/// Uniform put/get over a hashtable that may live anywhere.
#[async_trait]
pub trait Dht: Send + Sync {
    /// Store bytes under (id, subkey), overwriting an existing value.
    async fn put(&self, id: &[u8], data: &[u8], subkey: &str) -> DfsResult<()>;

    /// Fetch the bytes under (id, subkey), or absence.
    async fn get(&self, id: &[u8], subkey: &str) -> DfsResult<Option<Vec<u8>>>;
}

/// Map a caller-supplied id to its ring key.
pub fn ring_key(id: &[u8]) -> u128 {
    let bytes: [u8; 16] = match id.try_into() {
        Ok(bytes) => bytes,
        Err(_) => crypto::sha1_16(id),
    };
    u128::from_le_bytes(bytes)
}

/// In-process hashtable, for tests and single-process use.
#[derive(Default)]
pub struct MemoryDht {
    table: Mutex<HashMap<(Vec<u8>, String), Vec<u8>>>,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dht for MemoryDht {
    async fn put(&self, id: &[u8], data: &[u8], subkey: &str) -> DfsResult<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.insert((id.to_vec(), subkey.to_string()), data.to_vec());
        Ok(())
    }

    async fn get(&self, id: &[u8], subkey: &str) -> DfsResult<Option<Vec<u8>>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table.get(&(id.to_vec(), subkey.to_string())).cloned())
    }
}

#[async_trait]
impl Dht for LocalStore {
    async fn put(&self, id: &[u8], data: &[u8], subkey: &str) -> DfsResult<()> {
        LocalStore::put(self, id, data, subkey)
    }

    async fn get(&self, id: &[u8], subkey: &str) -> DfsResult<Option<Vec<u8>>> {
        Ok(LocalStore::get(self, id, subkey))
    }
}

/// Client access to a ring DHT through one peer. The peer routes the
/// message to whichever node manages the hashed key.
pub struct NetClientDht {
    server: (String, u16),
    client: RpcClient,
}

impl NetClientDht {
    pub fn new(ip: &str, port: u16, timeout: Duration) -> Self {
        Self { server: (ip.to_string(), port), client: RpcClient::new(timeout) }
    }
}

#[async_trait]
impl Dht for NetClientDht {
    async fn put(&self, id: &[u8], data: &[u8], subkey: &str) -> DfsResult<()> {
        let key = ring_key(id);
        debug!(target: "ringfs::dht", "net-putting {} bytes at {} (subkey={})", data.len(), key, subkey);
        let args = vec![json!("PUT"), json!(subkey), json!(BASE64.encode(data))];
        let value = self
            .client
            .msg((&self.server.0, self.server.1), key, args)
            .await?;
        match value.as_u64() {
            Some(0) => Ok(()),
            _ => Err(DfsError::Io(format!("remote store rejected put for {}", key))),
        }
    }

    async fn get(&self, id: &[u8], subkey: &str) -> DfsResult<Option<Vec<u8>>> {
        let key = ring_key(id);
        debug!(target: "ringfs::dht", "net-getting {} (subkey={})", key, subkey);
        let args = vec![json!("GET"), json!(subkey)];
        let value = match self.client.msg((&self.server.0, self.server.1), key, args).await {
            Ok(value) => value,
            Err(e) => {
                // Transport failures read as absence; the engine turns a
                // missing required key into its own error.
                warn!(target: "ringfs::dht", "get for {} failed: {}", key, e);
                return Ok(None);
            }
        };
        match value {
            Value::Null => Ok(None),
            Value::String(encoded) => {
                let data = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| DfsError::Rpc(format!("bad payload for {}: {}", key, e)))?;
                Ok(Some(data))
            }
            other => Err(DfsError::Rpc(format!("unexpected reply for {}: {}", key, other))),
        }
    }
}

/// Server side of the networked DHT: installed as a ring node's
/// listener, it answers `msg(k, "GET"|"PUT", subkey[, data])` from its
/// own local store, keyed by the decimal form of the ring key.
pub struct NetServerDht {
    store: LocalStore,
}

impl NetServerDht {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RingListener for NetServerDht {
    async fn message(&self, to: u128, args: &[Value]) -> DfsResult<Value> {
        let op = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| DfsError::Rpc("missing operation".to_string()))?;
        let subkey = args
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| DfsError::Rpc("missing subkey".to_string()))?;
        let id = to.to_string();
        match op {
            "GET" => Ok(match self.store.get(id.as_bytes(), subkey) {
                Some(data) => Value::String(BASE64.encode(&data)),
                None => Value::Null,
            }),
            "PUT" => {
                let payload = args
                    .get(2)
                    .and_then(Value::as_str)
                    .ok_or_else(|| DfsError::Rpc("missing payload".to_string()))?;
                let data = BASE64
                    .decode(payload.as_bytes())
                    .map_err(|e| DfsError::Rpc(format!("bad payload: {}", e)))?;
                match self.store.put(id.as_bytes(), &data, subkey) {
                    Ok(()) => Ok(json!(0)),
                    Err(e) => {
                        warn!(target: "ringfs::dht", "put for {} failed: {}", id, e);
                        Ok(json!(1))
                    }
                }
            }
            other => Err(DfsError::Rpc(format!("no such method: {}", other))),
        }
    }
}
