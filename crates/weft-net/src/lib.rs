//! Weft UDP socket-pair pool
//!
//! Hands out adjacent UDP port pairs (data on `n`, control on `n + 1`) to
//! protocol sessions. Pairs are reference counted and shared between sessions
//! whose remote endpoints do not collide in the control socket's demuxer.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::net::Ipv4Addr;
//! use weft_net::{Socket2Provider, UdpSocketPool};
//!
//! let pool = UdpSocketPool::new(Socket2Provider::<()>::default());
//! let pair = pool.get_udp_socket_pair(Ipv4Addr::LOCALHOST, 0, peer_ip, peer_port)?;
//! assert_eq!(pair.port_b(), pair.port_a() + 1);
//! pool.release_udp_socket_pair(pair)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod demux;
pub mod error;
pub mod socket;

mod pair;
mod pool;

pub use config::{PoolConfig, SocketOptions, HIGHEST_UDP_PORT, LOWEST_UDP_PORT};
pub use demux::{DemuxLookup, UdpDemuxer, WILDCARD};
pub use error::{DemuxError, DemuxResult, PoolError, PoolResult};
pub use pair::UdpSocketPair;
pub use pool::{PairRef, UdpSocketPool};
pub use socket::{PooledSocket, Socket2Provider, SocketProvider, UdpPairSocket};
