use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

use super::error::{NetworkError, NetworkResult};
use super::frame::{MAX_FRAME_BYTES, read_frame, write_frame};
use super::packet::Packet;

/// Id used for a bootstrap peer until its JOINANSWER reveals the real one.
pub const PLACEHOLDER_PEER_ID: &str = "0";

/// Deadlines for one outbound request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerTimeouts {
    pub connect: Duration,
    pub write: Duration,
    pub read: Duration,
}

impl Default for PeerTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            write: Duration::from_secs(10),
            read: Duration::from_secs(10),
        }
    }
}

/// A network participant. Two peers are the same iff id, host and port match;
/// `popularity` is advisory and ignored by equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub popularity: usize,
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(id: impl Into<String>, popularity: usize, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            popularity,
            host: host.into(),
            port,
        }
    }

    /// Local identity with a freshly generated id.
    pub fn local(host: impl Into<String>, port: u16) -> Self {
        Self::new(generate_peer_id(), 0, host, port)
    }

    /// Bootstrap peer whose id is not known yet.
    pub fn placeholder(host: impl Into<String>, port: u16) -> Self {
        Self::new(PLACEHOLDER_PEER_ID, 0, host, port)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send `request` over a fresh connection and wait for the single reply.
    /// An empty reply frame yields `None`.
    pub async fn exchange(
        &self,
        request: &Packet,
        timeouts: &PeerTimeouts,
    ) -> NetworkResult<Option<Packet>> {
        let address = self.address();
        let payload = request.to_bytes()?;

        let mut stream = timeout(timeouts.connect, TcpStream::connect(&address))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "connect",
                address: address.clone(),
            })??;

        timeout(timeouts.write, write_frame(&mut stream, &payload))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "write",
                address: address.clone(),
            })??;

        let reply = timeout(timeouts.read, read_frame(&mut stream, MAX_FRAME_BYTES))
            .await
            .map_err(|_| NetworkError::Timeout {
                operation: "read",
                address,
            })??;

        if reply.is_empty() {
            return Ok(None);
        }
        Ok(Some(Packet::from_bytes(&reply)?))
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.host == other.host && self.port == other.port
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Peer {} ({}:{}, popularity: {})",
            self.id, self.host, self.port, self.popularity
        )
    }
}

/// Random identity, not a credential.
pub fn generate_peer_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::{Peer, PeerTimeouts, generate_peer_id};
    use crate::network::error::NetworkError;
    use crate::network::packet::{Packet, Payload};

    #[test]
    fn equality_ignores_popularity() {
        let a = Peer::new("id", 0, "127.0.0.1", 9000);
        let b = Peer::new("id", 7, "127.0.0.1", 9000);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn equality_requires_id_host_and_port() {
        let a = Peer::new("id", 0, "127.0.0.1", 9000);
        assert_ne!(a, Peer::new("other", 0, "127.0.0.1", 9000));
        assert_ne!(a, Peer::new("id", 0, "localhost", 9000));
        assert_ne!(a, Peer::new("id", 0, "127.0.0.1", 9001));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(generate_peer_id(), generate_peer_id());
        assert_eq!(Peer::placeholder("h", 1).id, "0");
    }

    #[tokio::test]
    async fn exchange_with_closed_port_fails() {
        // Bind and drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let me = Peer::local("127.0.0.1", 1);
        let target = Peer::placeholder("127.0.0.1", port);
        let timeouts = PeerTimeouts {
            connect: Duration::from_secs(2),
            ..PeerTimeouts::default()
        };
        let err = target
            .exchange(&Packet::single(me, Payload::GetLatestBlock), &timeouts)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Io(_) | NetworkError::Timeout { .. }));
    }
}
