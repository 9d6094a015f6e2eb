//! Configuration for the ring, DHT, and file engine.
//!
//! The on-disk format is TOML with one table per subsystem. Named keys
//! live in `[keys]` as base32 strings, optionally wrapped with a single
//! AES-ECB block under a password-derived key; [`Config::key`] and
//! [`Config::set_key`] handle both forms.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{DfsError, DfsResult};

/// The six named keys of a configuration, in their conventional order.
pub const KEY_NAMES: [&str; 6] = ["kd", "kf", "ks", "kss", "kff", "kgg"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity of the local user.
    #[serde(default)]
    pub main: MainConfig,
    /// Named symmetric keys, base32-encoded.
    #[serde(default)]
    pub keys: KeysConfig,
    /// Local DHT store settings.
    #[serde(default)]
    pub dht: DhtConfig,
    /// Ring overlay settings.
    #[serde(default)]
    pub ring: RingConfig,
    /// File engine parameters.
    #[serde(default)]
    pub file: FileConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainConfig {
    /// Owning user identifier embedded in readable URIs.
    #[serde(default)]
    pub uid: String,
    /// Display nickname; also the default DHT subkey for stored blobs.
    #[serde(default)]
    pub nick: String,
    /// Static URI of the user's root directory, if one has been created.
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    pub kd: Option<String>,
    pub kf: Option<String>,
    pub ks: Option<String>,
    pub kss: Option<String>,
    pub kff: Option<String>,
    pub kgg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Directory holding one file per stored (id, subkey) pair.
    pub datadir: PathBuf,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self { datadir: PathBuf::from("dhtdata") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Node identifier as a decimal string; random when absent.
    pub id: Option<String>,
    /// Known peers, each `ip:port`.
    #[serde(default)]
    pub known: Vec<String>,
    /// Address to listen on.
    pub ip: String,
    /// Port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    /// Whether this node should serve DHT storage to the ring.
    pub server: bool,
    /// Per-hop RPC timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            id: None,
            known: Vec::new(),
            ip: "127.0.0.1".to_string(),
            port: 4128,
            server: true,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Ciphertext size of every part and descriptor block.
    pub block: usize,
    /// Part references per descriptor block before chaining.
    pub desc_per_metapart: usize,
    /// Write buffer length that triggers an automatic flush.
    pub max_buffer: usize,
    /// Verify the descriptor's content hash on read.
    pub verify: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self { block: 1024, desc_per_metapart: 12, max_buffer: 4096, verify: false }
    }
}

/// The named keys of [`KEY_NAMES`], decoded. Only `kd`, `kf`, and `kff`
/// are consumed by the core; the rest ride along for compatibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeySet {
    pub kd: Option<[u8; 16]>,
    pub kf: Option<[u8; 16]>,
    pub ks: Option<[u8; 16]>,
    pub kss: Option<[u8; 16]>,
    pub kff: Option<[u8; 16]>,
    pub kgg: Option<[u8; 16]>,
}

impl Config {
    /// Load configuration from `path`, falling back to defaults when the
    /// file is absent.
    pub fn load_or_default(path: Option<&Path>) -> DfsResult<Self> {
        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let config: Config = toml::from_str(&text)
                    .map_err(|e| DfsError::Config(format!("{}: {}", path.display(), e)))?;
                tracing::info!(target: "ringfs::config", "loaded configuration from {}", path.display());
                return Ok(config);
            }
        }
        tracing::info!(target: "ringfs::config", "using default configuration");
        Ok(Config::default())
    }

    /// Save the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> DfsResult<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| DfsError::Config(format!("serialize: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The default configuration directory, `~/.ringfs`.
    pub fn default_dir() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(".ringfs"),
            None => PathBuf::from(".ringfs"),
        }
    }

    /// Fill in a missing uid or nick with random values. Returns true if
    /// anything changed, in which case the caller should persist.
    pub fn ensure_identity(&mut self) -> bool {
        let mut changed = false;
        if self.main.uid.is_empty() {
            self.main.uid = crypto::random_printable(16);
            changed = true;
        }
        if self.main.nick.is_empty() {
            self.main.nick = crypto::random_nick();
            changed = true;
        }
        changed
    }

    /// The configured node identifier, parsed from its decimal form.
    pub fn ring_id(&self) -> DfsResult<Option<u128>> {
        match &self.ring.id {
            None => Ok(None),
            Some(s) => s
                .parse::<u128>()
                .map(Some)
                .map_err(|_| DfsError::Config(format!("bad ring id: {}", s))),
        }
    }

    /// Known peers parsed into (ip, port) pairs.
    pub fn known_peers(&self) -> DfsResult<Vec<(String, u16)>> {
        let mut peers = Vec::with_capacity(self.ring.known.len());
        for entry in &self.ring.known {
            let (ip, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| DfsError::Config(format!("bad peer address: {}", entry)))?;
            let port = port
                .parse::<u16>()
                .map_err(|_| DfsError::Config(format!("bad peer port: {}", entry)))?;
            peers.push((ip.to_string(), port));
        }
        Ok(peers)
    }

    fn raw_key(&self, name: &str) -> DfsResult<Option<&String>> {
        match name {
            "kd" => Ok(self.keys.kd.as_ref()),
            "kf" => Ok(self.keys.kf.as_ref()),
            "ks" => Ok(self.keys.ks.as_ref()),
            "kss" => Ok(self.keys.kss.as_ref()),
            "kff" => Ok(self.keys.kff.as_ref()),
            "kgg" => Ok(self.keys.kgg.as_ref()),
            other => Err(DfsError::Config(format!("unknown key name: {}", other))),
        }
    }

    fn raw_key_mut(&mut self, name: &str) -> DfsResult<&mut Option<String>> {
        match name {
            "kd" => Ok(&mut self.keys.kd),
            "kf" => Ok(&mut self.keys.kf),
            "ks" => Ok(&mut self.keys.ks),
            "kss" => Ok(&mut self.keys.kss),
            "kff" => Ok(&mut self.keys.kff),
            "kgg" => Ok(&mut self.keys.kgg),
            other => Err(DfsError::Config(format!("unknown key name: {}", other))),
        }
    }

    /// Fetch a named key, base32-decoding it and unwrapping with the
    /// password-derived key when one is given.
    pub fn key(&self, name: &str, password_key: Option<&[u8; 16]>) -> DfsResult<Option<[u8; 16]>> {
        let encoded = match self.raw_key(name)? {
            Some(encoded) => encoded,
            None => return Ok(None),
        };
        let bytes = data_encoding::BASE32
            .decode(encoded.as_bytes())
            .map_err(|e| DfsError::Config(format!("key {} is not base32: {}", name, e)))?;
        let block: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DfsError::Config(format!("key {} is not 16 bytes", name)))?;
        Ok(Some(match password_key {
            Some(pk) => crypto::ecb_decrypt_block(pk, &block),
            None => block,
        }))
    }

    /// Store a named key, wrapping it with the password-derived key when
    /// one is given.
    pub fn set_key(
        &mut self,
        name: &str,
        key: &[u8; 16],
        password_key: Option<&[u8; 16]>,
    ) -> DfsResult<()> {
        let stored = match password_key {
            Some(pk) => crypto::ecb_encrypt_block(pk, key),
            None => *key,
        };
        *self.raw_key_mut(name)? = Some(data_encoding::BASE32.encode(&stored));
        Ok(())
    }

    /// Decode all six named keys into a [`KeySet`].
    pub fn key_set(&self, password_key: Option<&[u8; 16]>) -> DfsResult<KeySet> {
        Ok(KeySet {
            kd: self.key("kd", password_key)?,
            kf: self.key("kf", password_key)?,
            ks: self.key("ks", password_key)?,
            kss: self.key("kss", password_key)?,
            kff: self.key("kff", password_key)?,
            kgg: self.key("kgg", password_key)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_parameters() {
        let config = Config::default();
        assert_eq!(config.file.block, 1024);
        assert_eq!(config.file.desc_per_metapart, 12);
        assert_eq!(config.file.max_buffer, 4096);
        assert!(!config.file.verify);
    }

    #[test]
    fn key_round_trip_plain_and_wrapped() {
        let mut config = Config::default();
        let key = crypto::random_key();
        config.set_key("kf", &key, None).unwrap();
        assert_eq!(config.key("kf", None).unwrap(), Some(key));

        let password = crypto::password_to_key("hunter2");
        config.set_key("kff", &key, Some(&password)).unwrap();
        // Wrapped form must not expose the raw key.
        assert_ne!(config.key("kff", None).unwrap(), Some(key));
        assert_eq!(config.key("kff", Some(&password)).unwrap(), Some(key));
    }

    #[test]
    fn unknown_key_name_is_rejected() {
        let config = Config::default();
        assert!(config.key("kq", None).is_err());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = Config::default();
        config.ring.known = vec!["10.0.0.1:4128".to_string(), "10.0.0.2:9999".to_string()];
        config.ring.id = Some("123".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.known_peers().unwrap()[1], ("10.0.0.2".to_string(), 9999));
        assert_eq!(back.ring_id().unwrap(), Some(123));
    }

    #[test]
    fn ensure_identity_fills_missing_fields() {
        let mut config = Config::default();
        assert!(config.ensure_identity());
        assert_eq!(config.main.uid.len(), 16);
        assert_eq!(config.main.nick.len(), 6);
        assert!(!config.ensure_identity());
    }
}
