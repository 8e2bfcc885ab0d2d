//! Socket pool errors

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Errors returned by [`UdpSocketPool`](crate::UdpSocketPool)
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The only pair on the requested port already routes this source
    #[error("Socket pair on {addr}:{port} already routes traffic from {source_endpoint}")]
    SourceClaimed {
        /// Requested local address
        addr: Ipv4Addr,
        /// Requested local port
        port: u16,
        /// Remote endpoint that collided
        source_endpoint: SocketAddrV4,
    },

    /// The specific port pair requested could not be bound
    #[error("UDP port pair starting at {port} is not available on {addr}")]
    PortUnavailable {
        /// Requested local address
        addr: Ipv4Addr,
        /// Requested socket A port
        port: u16,
    },

    /// Every pair in the configured range is taken
    #[error("No free UDP port pair on {addr} in {lowest}..{highest}")]
    Exhausted {
        /// Requested local address
        addr: Ipv4Addr,
        /// First port tried
        lowest: u16,
        /// Scan bound
        highest: u16,
    },

    /// A socket could not be opened at all
    #[error("Failed to open UDP socket")]
    Open(#[source] io::Error),

    /// The pair handed back is not owned by this pool
    #[error("Socket pair is not registered with this pool")]
    NotPooled,
}

/// Result type for socket pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors returned by [`UdpDemuxer`](crate::UdpDemuxer)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DemuxError {
    /// A consumer for this source endpoint already exists
    #[error("Source endpoint {0} is already registered")]
    AlreadyRegistered(SocketAddrV4),
}

/// Result type for demuxer operations
pub type DemuxResult<T> = Result<T, DemuxError>;
