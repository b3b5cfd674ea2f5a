use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::broadcast::BroadcastManager;
use super::error::{NetworkError, NetworkResult, ProtocolError};
use super::frame::{MAX_REQUEST_FRAME_BYTES, read_frame, write_frame};
use super::packet::{BlockRange, ManagerSummary, Packet, PacketName, PacketType, Payload};
use super::peer::{Peer, PeerTimeouts};
use crate::blockchain::{Block, Blockchain, ChainError, check_child, validate_blocks};

/// Most blocks returned for one DOWNLOADBLOCK request.
pub const MAX_BLOCKS_PER_DOWNLOAD: u64 = 16;

/// Most blocks fetched by one sync, whatever height a peer claims.
pub const MAX_BLOCKS_PER_SYNC: u64 = 1 << 20;

const INBOUND_READ_TIMEOUT: Duration = Duration::from_secs(30);
const INBOUND_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a `NetworkManager`.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub timeouts: PeerTimeouts,
    pub broadcast_ttl: Option<Duration>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeouts: PeerTimeouts::default(),
            broadcast_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

/// Owns the peer set and drives join, sync and broadcast for the local chain.
#[derive(Debug)]
pub struct NetworkManager {
    identity: Peer,
    chain: Arc<Blockchain>,
    peers: RwLock<Vec<Peer>>,
    broadcasts: BroadcastManager,
    timeouts: PeerTimeouts,
}

impl NetworkManager {
    pub fn new(identity: Peer, chain: Arc<Blockchain>, settings: NetworkSettings) -> Self {
        Self {
            identity,
            chain,
            peers: RwLock::new(Vec::new()),
            broadcasts: BroadcastManager::new(settings.broadcast_ttl),
            timeouts: settings.timeouts,
        }
    }

    /// Local identity, with popularity set to the current peer count.
    pub fn me(&self) -> Peer {
        Peer {
            popularity: self.peer_count(),
            ..self.identity.clone()
        }
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn broadcasts(&self) -> &BroadcastManager {
        &self.broadcasts
    }

    pub fn summary(&self) -> Result<ManagerSummary, ChainError> {
        Ok(ManagerSummary {
            me: self.me(),
            last_block_index: self.chain.get_latest_block()?.index,
        })
    }

    /* ---------- Peer set ---------- */

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().expect("peers lock poisoned").clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().expect("peers lock poisoned").len()
    }

    #[cfg(test)]
    pub fn has_peer(&self, peer: &Peer) -> bool {
        self.peers
            .read()
            .expect("peers lock poisoned")
            .contains(peer)
    }

    /// Insert `peer`, or replace the stored entry with the same identity.
    /// Returns whether the peer is new.
    pub fn add_peer(&self, peer: Peer) -> bool {
        if peer == self.identity {
            return false;
        }
        let mut peers = self.peers.write().expect("peers lock poisoned");
        match peers.iter_mut().find(|p| **p == peer) {
            Some(existing) => {
                *existing = peer;
                false
            }
            None => {
                debug!("P2P - added {peer}");
                peers.push(peer);
                true
            }
        }
    }

    pub fn remove_peer(&self, peer: &Peer) -> bool {
        let mut peers = self.peers.write().expect("peers lock poisoned");
        let before = peers.len();
        peers.retain(|p| p != peer);
        before != peers.len()
    }

    /// Replace `old` with `new`. Returns false if `old` is not in the set.
    pub fn update_peer(&self, old: &Peer, new: Peer) -> bool {
        let mut peers = self.peers.write().expect("peers lock poisoned");
        let Some(position) = peers.iter().position(|p| p == old) else {
            return false;
        };
        if peers.iter().any(|p| *p == new) {
            // Already known under its real identity; drop the stale entry.
            peers.remove(position);
        } else {
            peers[position] = new;
        }
        true
    }

    /* ---------- Server side ---------- */

    /// Accept connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("P2P - listening on {addr} as {}", self.identity.id),
            Err(err) => warn!("P2P - listener has no local address: {err}"),
        }

        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = manager.handle_connection(stream).await {
                            debug!("P2P - connection from {remote} failed: {err}");
                        }
                    });
                }
                Err(err) => warn!("P2P - failed to accept connection: {err}"),
            }
        }
    }

    /// Read one request frame, answer with one response frame, close.
    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) -> NetworkResult<()> {
        let remote = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());

        let request = timeout(
            INBOUND_READ_TIMEOUT,
            read_frame(&mut stream, MAX_REQUEST_FRAME_BYTES),
        )
        .await
        .map_err(|_| NetworkError::Timeout {
            operation: "read",
            address: remote.clone(),
        })??;

        let reply = match Packet::from_bytes(&request) {
            Ok(packet) => {
                debug!("P2P - received {packet} from {remote}");
                self.handle_packet(packet)
            }
            Err(err) => {
                warn!("P2P - unknown packet from {remote}: {err}");
                None
            }
        };

        let bytes = match reply.map(|packet| packet.to_bytes()) {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                warn!("P2P - failed to encode reply for {remote}: {err}");
                Vec::new()
            }
            None => Vec::new(),
        };

        timeout(INBOUND_WRITE_TIMEOUT, write_frame(&mut stream, &bytes))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "write",
                address: remote,
            })??;
        Ok(())
    }

    /// Dispatch an inbound packet. `None` means an empty response.
    /// Errors never escape: they are logged and answered with nothing.
    pub fn handle_packet(self: &Arc<Self>, packet: Packet) -> Option<Packet> {
        match packet.kind {
            PacketType::Broadcast => self.handle_broadcast(packet),
            PacketType::Single => {
                let name = packet.name();
                let sender = packet.sender.id.clone();
                match self.handle_single(packet) {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!("P2P - failed to handle {name} from {sender}: {err}");
                        None
                    }
                }
            }
        }
    }

    fn handle_single(&self, packet: Packet) -> NetworkResult<Option<Packet>> {
        let reply = match packet.payload {
            Payload::Join => {
                // A node without a chain cannot answer, so it does not
                // register the joiner either.
                let summary = self.summary()?;
                let sender = packet.sender;
                if self.add_peer(sender.clone()) {
                    info!("P2P - {sender} joined");
                }
                Payload::JoinAnswer(ManagerSummary {
                    me: self.me(),
                    ..summary
                })
            }
            Payload::GetLatestBlock => Payload::GetLatestBlockAnswer(self.chain.get_latest_block()?),
            Payload::DownloadBlock(range) => Payload::DownloadBlockAnswer(self.serve_download(range)?),
            other => {
                debug!("P2P - ignoring unsolicited {}", other.name());
                return Ok(None);
            }
        };
        Ok(Some(Packet::single(self.me(), reply)))
    }

    /// Blocks for an untrusted range request: bounds swapped, negative start
    /// clamped to 0, at most `MAX_BLOCKS_PER_DOWNLOAD` returned.
    fn serve_download(&self, range: BlockRange) -> Result<Vec<Block>, ChainError> {
        let Some((start, end)) = range.normalized() else {
            return Ok(Vec::new());
        };
        let end = end.min(start.saturating_add(MAX_BLOCKS_PER_DOWNLOAD - 1));
        self.chain.get_blocks(start, end)
    }

    fn handle_broadcast(self: &Arc<Self>, packet: Packet) -> Option<Packet> {
        let Some(index) = packet.index else {
            warn!("P2P - broadcast {} without dedup index", packet.name());
            return None;
        };
        // Read-locked fast path for floods, then the atomic claim.
        if self.broadcasts.has_seen(index) || !self.broadcasts.check_and_mark(index) {
            debug!("P2P - duplicate broadcast {index} ignored");
            return None;
        }

        let block_index = match &packet.payload {
            Payload::FoundBlock(block_index) => *block_index,
            other => {
                warn!("P2P - unsupported broadcast {}", other.name());
                return None;
            }
        };

        // Sync and forward off the connection task; the sender gets an
        // empty answer right away.
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.on_found_block(&packet.sender, block_index).await;
            manager.broadcast(packet);
        });
        None
    }

    async fn on_found_block(&self, sender: &Peer, block_index: u64) {
        if self.chain.has_block(block_index) {
            debug!("SYNC - already have announced block #{block_index}");
            return;
        }

        match self.sync_chain(sender, block_index).await {
            Ok(true) => {}
            Ok(false) => debug!("SYNC - nothing adopted from {}", sender.id),
            Err(err) => warn!("SYNC - sync with {} failed: {err}", sender.address()),
        }
    }

    /* ---------- Client side ---------- */

    /// One exchange with `peer`. Any failure evicts the peer.
    async fn send(&self, peer: &Peer, packet: &Packet) -> NetworkResult<Option<Packet>> {
        match peer.exchange(packet, &self.timeouts).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                if self.remove_peer(peer) {
                    warn!("P2P - evicted {peer}: {err}");
                }
                Err(err)
            }
        }
    }

    async fn request(&self, peer: &Peer, payload: Payload) -> NetworkResult<Packet> {
        let request = Packet::single(self.me(), payload);
        self.send(peer, &request)
            .await?
            .ok_or_else(|| NetworkError::EmptyResponse(peer.address()))
    }

    /// Introduce ourselves to `bootstrap` and learn its real identity.
    pub async fn join(&self, bootstrap: Peer) -> NetworkResult<ManagerSummary> {
        self.add_peer(bootstrap.clone());

        let reply = self.request(&bootstrap, Payload::Join).await?;
        let summary = match reply.payload {
            Payload::JoinAnswer(summary) => summary,
            other => return Err(unexpected(PacketName::JoinAnswer, &other)),
        };

        self.update_peer(&bootstrap, summary.me.clone());
        info!(
            "P2P - joined network via {} (remote head #{})",
            summary.me, summary.last_block_index
        );
        Ok(summary)
    }

    /// Join through `bootstrap`, then download, validate and adopt its full
    /// chain. Meant for an empty local chain at startup.
    pub async fn join_and_sync(&self, bootstrap: Peer) -> NetworkResult<()> {
        let summary = self.join(bootstrap).await?;
        let peer = summary.me;

        let latest = self.request_latest_block(&peer).await?;
        let blocks = self.download_blocks(&peer, 0, latest.index).await?;
        validate_blocks(&blocks)?;
        self.chain.replace_chain(blocks);
        info!("SYNC - initial chain from {} (head #{})", peer.id, latest.index);
        Ok(())
    }

    pub async fn request_latest_block(&self, peer: &Peer) -> NetworkResult<Block> {
        match self.request(peer, Payload::GetLatestBlock).await?.payload {
            Payload::GetLatestBlockAnswer(block) => Ok(block),
            other => Err(unexpected(PacketName::GetLatestBlockAnswer, &other)),
        }
    }

    /// Download blocks `start..=end` from `peer` in batches.
    ///
    /// The range is bounded by `MAX_BLOCKS_PER_SYNC` and must fit the signed
    /// wire range. Every batch must continue exactly at the next wanted index
    /// and link to the block before it, so a forged answer fails at its
    /// first batch instead of being buffered.
    pub async fn download_blocks(&self, peer: &Peer, start: u64, end: u64) -> NetworkResult<Vec<Block>> {
        if end < start || end > i64::MAX as u64 || end - start >= MAX_BLOCKS_PER_SYNC {
            return Err(ProtocolError::InvalidRange { start, end }.into());
        }
        let wanted = end - start + 1;
        let mut blocks: Vec<Block> =
            Vec::with_capacity(wanted.min(MAX_BLOCKS_PER_DOWNLOAD * 4) as usize);
        let mut next = start;

        while next <= end {
            let batch_end = end.min(next + (MAX_BLOCKS_PER_DOWNLOAD - 1));
            let range = BlockRange::new(next as i64, batch_end as i64);
            let batch = match self.request(peer, Payload::DownloadBlock(range)).await?.payload {
                Payload::DownloadBlockAnswer(batch) => batch,
                other => return Err(unexpected(PacketName::DownloadBlockAnswer, &other)),
            };
            if batch.is_empty() {
                return Err(NetworkError::EmptyResponse(peer.address()));
            }

            let requested = (batch_end - next + 1) as usize;
            for block in batch.into_iter().take(requested) {
                if block.index != next {
                    return Err(ProtocolError::OutOfOrderBlock {
                        expected: next,
                        found: block.index,
                    }
                    .into());
                }
                if let Some(parent) = blocks.last() {
                    check_child(parent, &block)?;
                }
                blocks.push(block);
                next += 1;
            }
        }

        debug!(
            "SYNC - downloaded {} block(s) [{start}, {end}] from {}",
            blocks.len(),
            peer.id
        );
        Ok(blocks)
    }

    /// Download `peer`'s whole chain, validate it and adopt it if longer.
    pub async fn sync_full_chain(&self, peer: &Peer) -> NetworkResult<bool> {
        let latest = self.request_latest_block(peer).await?;
        let blocks = self.download_blocks(peer, 0, latest.index).await?;
        let replaced = self.chain.replace_if_longer(blocks)?;
        if replaced {
            info!(
                "SYNC - adopted chain from {} (head #{})",
                peer.id, latest.index
            );
        }
        Ok(replaced)
    }

    /// Catch up to `target` using `peer`. Downloads only the missing suffix;
    /// if it does not attach to the local head, falls back to a full sync.
    pub async fn sync_chain(&self, peer: &Peer, target: u64) -> NetworkResult<bool> {
        let head = match self.chain.get_latest_block() {
            Ok(head) => head,
            Err(ChainError::Empty) => return self.sync_full_chain(peer).await,
            Err(err) => return Err(err.into()),
        };
        if head.index >= target {
            return Ok(false);
        }

        let suffix = self.download_blocks(peer, head.index + 1, target).await?;
        match self.chain.extend_verified(suffix) {
            Ok(appended) => {
                info!(
                    "SYNC - appended {appended} block(s) from {}, head is #{target}",
                    peer.id
                );
                Ok(true)
            }
            Err(err) => {
                warn!(
                    "SYNC - suffix from {} does not attach ({err}), trying full chain",
                    peer.id
                );
                self.sync_full_chain(peer).await
            }
        }
    }

    /// Send `packet` to every current peer without waiting for delivery.
    pub fn broadcast(self: &Arc<Self>, packet: Packet) {
        for peer in self.peers() {
            let manager = Arc::clone(self);
            let packet = packet.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.send(&peer, &packet).await {
                    debug!("P2P - broadcast to {} failed: {err}", peer.address());
                }
            });
        }
    }

    /// Flood a FOUNDBLOCK for `block_index`. Our own id is marked seen so
    /// the echo is ignored.
    pub fn announce_block(self: &Arc<Self>, block_index: u64) {
        let packet = Packet::broadcast(self.me(), Payload::FoundBlock(block_index));
        if let Some(index) = packet.index {
            self.broadcasts.mark_seen(index);
        }
        self.broadcast(packet);
        info!("P2P - broadcasted found block #{block_index}");
    }
}

fn unexpected(expected: PacketName, found: &Payload) -> NetworkError {
    ProtocolError::UnexpectedPacket {
        expected,
        found: found.name(),
    }
    .into()
}
