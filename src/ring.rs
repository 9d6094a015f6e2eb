//! Ring overlay node: membership, routing, and the peer RPC endpoint.
//!
//! Nodes form a successor ring over the 128-bit identifier space. A node
//! with successor `s` is authoritative for keys in `[id, s)` (wrapping);
//! with no successor it owns the whole space. Routing is successor-only:
//! a message for a key the node does not manage is forwarded to the
//! exact peer when its id is already in `contacted`, otherwise to the
//! successor, giving O(N) worst-case hops.
//!
//! Membership state lives behind a mutex whose critical sections never
//! perform outbound RPC: handlers snapshot the forwarding address,
//! release the lock, then call. Predecessor pointers are best-effort —
//! a joiner announces itself to its new successor (a `join_msg` whose
//! caller id falls outside the callee's segment), and a predecessor
//! that re-links after a leave probes its new successor the same way
//! after a one-second settling pause. A stale `prev` is tolerated; the
//! next `who_msg` routes around it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto;
use crate::error::{DfsError, DfsResult};
use crate::rpc::{PeerInfo, Request, Response, RpcClient, MAX_FRAME};

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Offline,
    Joining,
    Joined,
    Leaving,
}

/// Application hooks offered by a ring node. All four capabilities are
/// optional; implement only what the application needs.
#[async_trait]
pub trait RingListener: Send + Sync {
    /// A message addressed to a key this node manages.
    async fn message(&self, to: u128, args: &[Value]) -> DfsResult<Value> {
        let _ = (to, args);
        Ok(Value::Null)
    }

    /// This node is about to forward a message it does not manage. A
    /// non-`None` reply short-circuits the forwarding (caching overlays).
    async fn routing(&self, to: u128, args: &[Value]) -> Option<Value> {
        let _ = (to, args);
        None
    }

    /// The node finished joining the ring.
    async fn joined(&self) {}

    /// The node is leaving the ring.
    async fn left(&self) {}
}

/// Startup parameters for a node.
#[derive(Debug, Clone)]
pub struct RingOptions {
    /// Advertised and bound address.
    pub ip: String,
    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Node identifier; random when absent.
    pub id: Option<u128>,
    /// Peers that may already be in a ring.
    pub known: Vec<(String, u16)>,
    /// Per-hop RPC timeout.
    pub timeout: Duration,
}

impl RingOptions {
    pub fn from_config(config: &Config) -> DfsResult<Self> {
        Ok(Self {
            ip: config.ring.ip.clone(),
            port: config.ring.port,
            id: config.ring_id()?,
            known: config.known_peers()?,
            timeout: Duration::from_secs(config.ring.timeout_secs),
        })
    }
}

struct Membership {
    state: NodeState,
    next: Option<u128>,
    prev: Option<u128>,
    contacted: HashMap<u128, (String, u16)>,
}

/// One node of the ring. Created with [`RingNode::start`], which binds
/// the RPC endpoint, runs the join protocol, and spawns the accept loop.
pub struct RingNode {
    id: u128,
    ip: String,
    port: u16,
    known: Vec<(String, u16)>,
    client: RpcClient,
    listener: Option<Arc<dyn RingListener>>,
    membership: Mutex<Membership>,
    shutdown: watch::Sender<bool>,
}

fn manage_with(id: u128, next: Option<u128>, key: u128) -> bool {
    match next {
        None => true,
        Some(next) => {
            if id < next {
                key >= id && key < next
            } else {
                key < next || key >= id
            }
        }
    }
}

impl RingNode {
    /// Bind the RPC endpoint, spawn the server, and join the ring. On a
    /// join failure the server is torn down again and the error is
    /// returned.
    pub async fn start(
        options: RingOptions,
        listener: Option<Arc<dyn RingListener>>,
    ) -> DfsResult<Arc<Self>> {
        let tcp = TcpListener::bind((options.ip.as_str(), options.port)).await?;
        let port = tcp.local_addr()?.port();
        let id = match options.id {
            Some(id) => id,
            None => u128::from_le_bytes(crypto::random_key()),
        };
        let (shutdown, shutdown_rx) = watch::channel(false);
        let node = Arc::new(Self {
            id,
            ip: options.ip,
            port,
            known: options.known,
            client: RpcClient::new(options.timeout),
            listener,
            membership: Mutex::new(Membership {
                state: NodeState::Offline,
                next: None,
                prev: None,
                contacted: HashMap::new(),
            }),
            shutdown,
        });
        info!(target: "ringfs::ring", "ring server at {}:{}", node.ip, node.port);
        tokio::spawn(node.clone().serve(tcp, shutdown_rx));
        if let Err(e) = node.join_node().await {
            let _ = node.shutdown.send(true);
            return Err(e);
        }
        Ok(node)
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    /// The address peers use to reach this node.
    pub fn address(&self) -> (String, u16) {
        (self.ip.clone(), self.port)
    }

    pub fn state(&self) -> NodeState {
        self.membership().state
    }

    pub fn successor(&self) -> Option<u128> {
        self.membership().next
    }

    pub fn predecessor(&self) -> Option<u128> {
        self.membership().prev
    }

    /// True if this node is authoritative for `key`.
    pub fn manages(&self, key: u128) -> bool {
        let m = self.membership();
        manage_with(self.id, m.next, key)
    }

    fn membership(&self) -> MutexGuard<'_, Membership> {
        self.membership.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Forwarding target for a key this node does not manage: the exact
    // peer when known, otherwise the successor.
    fn forward_addr(&self, m: &Membership, key: u128) -> DfsResult<(String, u16)> {
        if let Some(addr) = m.contacted.get(&key) {
            return Ok(addr.clone());
        }
        let next = m
            .next
            .ok_or_else(|| DfsError::Routing(format!("{}: no successor to forward to", self.id)))?;
        m.contacted
            .get(&next)
            .cloned()
            .ok_or_else(|| DfsError::Routing(format!("{}: no address for successor {}", self.id, next)))
    }

    async fn join_node(&self) -> DfsResult<()> {
        self.membership().state = NodeState::Joining;
        info!(target: "ringfs::ring", "{}: starting the joining process", self.id);
        if self.known.is_empty() {
            info!(target: "ringfs::ring", "{}: empty ring", self.id);
            let mut m = self.membership();
            m.next = None;
            m.prev = None;
            m.state = NodeState::Joined;
        } else {
            // Ask any known peer who currently owns our identifier.
            let seed = self
                .known
                .choose(&mut rand::thread_rng())
                .unwrap_or(&self.known[0]);
            let owner = self.client.who_msg((&seed.0, seed.1), self.id).await?;
            let owner_id = owner.id_value()?;
            info!(
                target: "ringfs::ring",
                "{}: {} ({}:{}) manages my key", self.id, owner.id, owner.ip, owner.port
            );
            self.membership()
                .contacted
                .insert(owner_id, (owner.ip.clone(), owner.port));

            // Splice in after the owner; it answers with its old successor.
            let old_next = self
                .client
                .join_msg((&owner.ip, owner.port), &self.ip, self.port, self.id)
                .await?;
            let next_id = old_next.id_value()?;
            {
                let mut m = self.membership();
                m.contacted
                    .insert(next_id, (old_next.ip.clone(), old_next.port));
                m.prev = Some(owner_id);
                m.next = Some(next_id);
                m.state = NodeState::Joined;
            }
            info!(
                target: "ringfs::ring",
                "{}: next={} ({}:{})", self.id, old_next.id, old_next.ip, old_next.port
            );

            // Announce ourselves to the successor so it can update its
            // predecessor pointer. Failure leaves a stale prev there,
            // which routing tolerates.
            if let Err(e) = self
                .client
                .join_msg((&old_next.ip, old_next.port), &self.ip, self.port, self.id)
                .await
            {
                warn!(target: "ringfs::ring", "{}: predecessor announcement failed: {}", self.id, e);
            }
            info!(target: "ringfs::ring", "{}: I manage keys [{}, {})", self.id, self.id, next_id);
        }
        if let Some(listener) = &self.listener {
            listener.joined().await;
        }
        Ok(())
    }

    /// Leave the network: inform the predecessor, fire the `left`
    /// callback, and stop the server.
    pub async fn leave(&self) -> DfsResult<()> {
        let links = {
            let mut m = self.membership();
            let links = if m.state == NodeState::Joined {
                match (m.prev, m.next) {
                    (Some(prev), Some(next)) => {
                        let prev_addr = m.contacted.get(&prev).cloned();
                        let next_addr = m.contacted.get(&next).cloned();
                        prev_addr.zip(next_addr).map(|(pa, na)| (prev, pa, next, na))
                    }
                    _ => None,
                }
            } else {
                None
            };
            m.state = NodeState::Leaving;
            links
        };

        if let Some((_prev, prev_addr, next, next_addr)) = links {
            debug!(target: "ringfs::ring", "{}: leaving the network", self.id);
            let next_info = PeerInfo::new(next, &next_addr.0, next_addr.1);
            if let Err(e) = self
                .client
                .leave_msg((&prev_addr.0, prev_addr.1), self.id, &next_info)
                .await
            {
                warn!(target: "ringfs::ring", "{}: error informing predecessor: {}", self.id, e);
            }
            if let Some(listener) = &self.listener {
                listener.left().await;
            }
            info!(target: "ringfs::ring", "{}: left the network", self.id);
        } else {
            info!(target: "ringfs::ring", "{}: I was alone in the network", self.id);
        }

        {
            let mut m = self.membership();
            m.state = NodeState::Offline;
            m.next = None;
            m.prev = None;
        }
        let _ = self.shutdown.send(true);
        Ok(())
    }

    async fn serve(self: Arc<Self>, tcp: TcpListener, mut shutdown: watch::Receiver<bool>) {
        info!(target: "ringfs::ring", "{}: server ready", self.id);
        loop {
            tokio::select! {
                accepted = tcp.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_connection(stream).await {
                                debug!(target: "ringfs::ring", "connection from {}: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!(target: "ringfs::ring", "{}: accept failed: {}", self.id, e),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(target: "ringfs::ring", "{}: server finished", self.id);
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> DfsResult<()> {
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME));
        let line = match framed.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => return Err(DfsError::Rpc(e.to_string())),
            None => return Ok(()),
        };
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => match self.dispatch(request).await {
                Ok(value) => Response::Ok(value),
                Err(e) => Response::Err(e.to_string()),
            },
            Err(e) => Response::Err(format!("bad frame: {}", e)),
        };
        framed
            .send(serde_json::to_string(&response)?)
            .await
            .map_err(|e| DfsError::Rpc(e.to_string()))
    }

    async fn dispatch(self: Arc<Self>, request: Request) -> DfsResult<Value> {
        match request {
            Request::Id => Ok(Value::String(self.id.to_string())),
            Request::Who { key } => {
                let info = self.handle_who(parse_id(&key)?).await?;
                Ok(serde_json::to_value(info)?)
            }
            Request::Join { ip, port, id } => {
                let info = self.handle_join(ip, port, parse_id(&id)?)?;
                Ok(serde_json::to_value(info)?)
            }
            Request::Leave { id, next_id, next_ip, next_port } => {
                let probe = self.apply_leave(parse_id(&id)?, parse_id(&next_id)?, next_ip, next_port)?;
                if let Some(target) = probe {
                    let node = self.clone();
                    tokio::spawn(node.settle_probe(target));
                }
                Ok(Value::Bool(true))
            }
            Request::Msg { to, args } => self.handle_msg(parse_id(&to)?, args).await,
        }
    }

    async fn handle_who(&self, key: u128) -> DfsResult<PeerInfo> {
        debug!(target: "ringfs::ring", "{}: who message for {}", self.id, key);
        let forward = {
            let m = self.membership();
            if manage_with(self.id, m.next, key) {
                None
            } else {
                Some(self.forward_addr(&m, key)?)
            }
        };
        match forward {
            None => Ok(PeerInfo::new(self.id, &self.ip, self.port)),
            Some(addr) => self.client.who_msg((&addr.0, addr.1), key).await,
        }
    }

    fn handle_join(&self, ip: String, port: u16, joiner: u128) -> DfsResult<PeerInfo> {
        info!(
            target: "ringfs::ring",
            "{}: join message from {} ({}:{})", self.id, joiner, ip, port
        );
        let mut m = self.membership();
        m.contacted.insert(joiner, (ip, port));
        m.state = NodeState::Joined;
        if manage_with(self.id, m.next, joiner) {
            // The caller becomes our successor; answer with the old one
            // so it can link forward.
            let old = m.next;
            m.next = Some(joiner);
            match old {
                None => {
                    // We were alone; the pair ring closes both ways.
                    m.prev = Some(joiner);
                    Ok(PeerInfo::new(self.id, &self.ip, self.port))
                }
                Some(old) => {
                    let addr = m.contacted.get(&old).cloned().ok_or_else(|| {
                        DfsError::Routing(format!("{}: no address for old successor {}", self.id, old))
                    })?;
                    Ok(PeerInfo::new(old, &addr.0, addr.1))
                }
            }
        } else {
            // The caller's id lies outside our segment: this is a
            // predecessor announcement, not a splice.
            m.prev = Some(joiner);
            Ok(PeerInfo::new(self.id, &self.ip, self.port))
        }
    }

    // Returns the address of the new successor when it should be probed
    // after the settling pause.
    fn apply_leave(
        &self,
        leaver: u128,
        new_next: u128,
        ip: String,
        port: u16,
    ) -> DfsResult<Option<(String, u16)>> {
        info!(
            target: "ringfs::ring",
            "{}: leave message from {} (successor {})", self.id, leaver, new_next
        );
        let mut m = self.membership();
        m.contacted.remove(&leaver);
        if new_next == self.id {
            // The leaver's successor is this node: nobody else is left.
            m.next = None;
            m.prev = None;
            info!(target: "ringfs::ring", "{}: I am alone in the ring", self.id);
            return Ok(None);
        }
        m.contacted.insert(new_next, (ip.clone(), port));
        m.next = Some(new_next);
        if m.prev == Some(leaver) {
            m.prev = None;
        }
        Ok(Some((ip, port)))
    }

    async fn settle_probe(self: Arc<Self>, target: (String, u16)) {
        // Give the leaver a moment to finish before contacting the new
        // successor with a predecessor announcement.
        tokio::time::sleep(Duration::from_secs(1)).await;
        debug!(
            target: "ringfs::ring",
            "{}: announcing to new successor {}:{}", self.id, target.0, target.1
        );
        if let Err(e) = self
            .client
            .join_msg((&target.0, target.1), &self.ip, self.port, self.id)
            .await
        {
            warn!(target: "ringfs::ring", "{}: settle probe failed: {}", self.id, e);
        }
    }

    async fn handle_msg(&self, to: u128, args: Vec<Value>) -> DfsResult<Value> {
        debug!(target: "ringfs::ring", "{}: new application message for {}", self.id, to);
        if self.manages(to) {
            match &self.listener {
                None => Ok(Value::Null),
                Some(listener) => listener.message(to, &args).await,
            }
        } else {
            // Offer the listener a chance to short-circuit the routing.
            if let Some(listener) = &self.listener {
                if let Some(value) = listener.routing(to, &args).await {
                    return Ok(value);
                }
            }
            let addr = {
                let m = self.membership();
                self.forward_addr(&m, to)?
            };
            match self.client.msg((&addr.0, addr.1), to, args).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    warn!(
                        target: "ringfs::ring",
                        "{}: error routing message to {}: {}", self.id, to, e
                    );
                    Err(e)
                }
            }
        }
    }
}

fn parse_id(s: &str) -> DfsResult<u128> {
    s.parse::<u128>()
        .map_err(|_| DfsError::Rpc(format!("bad identifier: {}", s)))
}
