mod broadcast;
mod error;
mod frame;
mod manager;
mod packet;
mod peer;

pub use manager::{NetworkManager, NetworkSettings};
pub use peer::{Peer, PeerTimeouts};
