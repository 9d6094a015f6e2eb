//! Shared context for the file engine.
//!
//! Files and directories do not reach for a process-wide DHT handle;
//! they receive an [`FsContext`] carrying the DHT, the engine
//! parameters, the key set, and the local identity. The context is
//! cheap to clone and safe to share across open files.

use std::sync::Arc;

use crate::config::{Config, FileConfig, KeySet};
use crate::dht::Dht;
use crate::uri::{Uri, UriDefaults};

#[derive(Clone)]
pub struct FsContext {
    /// Where blocks live: memory, local disk, or a ring of peers.
    pub dht: Arc<dyn Dht>,
    /// BLOCK_SIZE, DESC_PER_METAPART, MAX_BUFFER, and the verify flag.
    pub params: FileConfig,
    /// The named keys; `kd`, `kf`, and `kff` drive the engine.
    pub keys: KeySet,
    /// Default uid/nick for URIs that omit them.
    pub defaults: UriDefaults,
}

impl FsContext {
    pub fn new(dht: Arc<dyn Dht>, config: &Config, keys: KeySet) -> Self {
        Self {
            dht,
            params: config.file.clone(),
            keys,
            defaults: UriDefaults {
                uid: config.main.uid.clone(),
                nick: config.main.nick.clone(),
            },
        }
    }

    /// Parse a URI string against this context's identity and
    /// description key. Malformed input yields `None`.
    pub fn parse_uri(&self, input: &str) -> Option<Uri> {
        Uri::parse(input, &self.defaults, self.keys.kd.as_ref())
    }

    /// A readable URI under the local identity.
    pub fn uri_for_path(&self, path: &str) -> Uri {
        Uri::from_readable(&self.defaults.uid, &self.defaults.nick, path, self.keys.kd.as_ref())
    }
}
