//! ringfs — a distributed file system over a ring-structured overlay.
//!
//! Peers form a successor ring; each peer persists one slice of a DHT;
//! files are stored as encrypted fixed-size parts referenced by chained
//! descriptor blocks, and directories are files listing name→URI
//! bindings. The library is usable on its own (the `ringfs` binary is a
//! thin daemon around [`ring::RingNode`] and [`dht::NetServerDht`]).

// ===== Storage =====
pub mod local_store; // One-file-per-blob persistent store of a single peer
pub mod dht;         // Uniform put/get facade: memory, local, remote, server

// ===== Ring overlay =====
pub mod ring;        // Membership, routing, and the peer RPC endpoint
pub mod rpc;         // Wire protocol: framed JSON requests over TCP

// ===== File engine =====
pub mod uri;         // Readable and static resource names, Hd derivation
pub mod descriptor;  // INI-like metadata block codec
pub mod file;        // Chunking, encryption, descriptor chaining
pub mod dir;         // Directories as name:uri listing files
pub mod context;     // Injected engine context (DHT handle, params, keys)

// ===== Ambient =====
pub mod config;      // TOML configuration and the named key set
pub mod crypto;      // SHA-1, AES-ECB/CBC wrappers, random material
pub mod error;       // Error taxonomy and result alias
pub mod logging;     // tracing setup

pub use config::{Config, KeySet};
pub use context::FsContext;
pub use dht::{Dht, MemoryDht, NetClientDht, NetServerDht};
pub use dir::Dir;
pub use error::{DfsError, DfsResult};
pub use file::{File, OpenMode};
pub use local_store::LocalStore;
pub use ring::{RingListener, RingNode, RingOptions};
pub use uri::Uri;
