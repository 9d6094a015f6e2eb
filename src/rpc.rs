//! Wire protocol between ring nodes.
//!
//! One request per connection: the caller opens a TCP stream, sends a
//! single newline-delimited JSON frame, and reads a single frame back.
//! Node identifiers travel as decimal strings; binary `msg` payloads are
//! base64 strings inside the JSON args. Every transport failure maps to
//! [`DfsError::Routing`] so the originator of a forwarded message sees a
//! routing error rather than a raw socket error.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::{DfsError, DfsResult};

/// Upper bound for one frame; a descriptor or part blob is ~1.4 KiB in
/// base64, so this leaves generous headroom for oversized block configs.
pub const MAX_FRAME: usize = 1 << 20;

/// A node's coordinates as they appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

impl PeerInfo {
    pub fn new(id: u128, ip: &str, port: u16) -> Self {
        Self { id: id.to_string(), ip: ip.to_string(), port }
    }

    pub fn id_value(&self) -> DfsResult<u128> {
        self.id
            .parse::<u128>()
            .map_err(|_| DfsError::Rpc(format!("bad peer id: {}", self.id)))
    }
}

/// The five methods of the ring RPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// `id_msg()` — ask a node for its identifier.
    Id,
    /// `who_msg(k)` — find the node managing key `k`.
    Who { key: String },
    /// `join_msg(ip, port, id)` — splice the caller in next to the callee.
    Join { ip: String, port: u16, id: String },
    /// `leave_msg(id, next)` — the caller is leaving; re-link to `next`.
    Leave { id: String, next_id: String, next_ip: String, next_port: u16 },
    /// `msg(to, *args)` — application-level message addressed to a key.
    Msg { to: String, args: Vec<Value> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(Value),
    Err(String),
}

fn routing<E: std::fmt::Display>(error: E) -> DfsError {
    DfsError::Routing(error.to_string())
}

/// Client side of the wire protocol. Cheap to clone; holds only the
/// per-hop timeout.
#[derive(Debug, Clone)]
pub struct RpcClient {
    timeout: Duration,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send one request and wait for the reply. The whole round-trip is
    /// bounded by the per-hop timeout.
    pub async fn call(&self, addr: (&str, u16), request: &Request) -> DfsResult<Value> {
        let payload = serde_json::to_string(request)?;
        let exchange = async {
            let stream = TcpStream::connect(addr).await.map_err(routing)?;
            let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME));
            framed.send(payload).await.map_err(routing)?;
            match framed.next().await {
                Some(Ok(line)) => {
                    let response: Response = serde_json::from_str(&line).map_err(routing)?;
                    match response {
                        Response::Ok(value) => Ok(value),
                        Response::Err(message) => Err(DfsError::Rpc(message)),
                    }
                }
                Some(Err(e)) => Err(routing(e)),
                None => Err(DfsError::Routing("connection closed before reply".to_string())),
            }
        };
        timeout(self.timeout, exchange)
            .await
            .map_err(|_| DfsError::Routing(format!("timeout contacting {}:{}", addr.0, addr.1)))?
    }

    pub async fn id_msg(&self, addr: (&str, u16)) -> DfsResult<u128> {
        let value = self.call(addr, &Request::Id).await?;
        let id: String = serde_json::from_value(value)?;
        id.parse::<u128>().map_err(|_| DfsError::Rpc(format!("bad id reply: {}", id)))
    }

    pub async fn who_msg(&self, addr: (&str, u16), key: u128) -> DfsResult<PeerInfo> {
        let value = self.call(addr, &Request::Who { key: key.to_string() }).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn join_msg(
        &self,
        addr: (&str, u16),
        ip: &str,
        port: u16,
        id: u128,
    ) -> DfsResult<PeerInfo> {
        let request = Request::Join { ip: ip.to_string(), port, id: id.to_string() };
        let value = self.call(addr, &request).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn leave_msg(&self, addr: (&str, u16), id: u128, next: &PeerInfo) -> DfsResult<()> {
        let request = Request::Leave {
            id: id.to_string(),
            next_id: next.id.clone(),
            next_ip: next.ip.clone(),
            next_port: next.port,
        };
        self.call(addr, &request).await?;
        Ok(())
    }

    pub async fn msg(&self, addr: (&str, u16), to: u128, args: Vec<Value>) -> DfsResult<Value> {
        self.call(addr, &Request::Msg { to: to.to_string(), args }).await
    }
}
