//! Source-endpoint demultiplexer
//!
//! Several remote peers can share one local UDP socket. The demuxer maps each
//! peer's `(address, port)` to the consumer that wants its datagrams. The
//! reserved entry `(0.0.0.0, 0)` claims every source at once.

use crate::error::{DemuxError, DemuxResult};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Endpoint that matches every source
pub const WILDCARD: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

/// Read-only view the socket pool uses to detect routing collisions
pub trait DemuxLookup: Send + Sync {
    /// Whether `(addr, port)` already has a consumer
    fn addr_in_map(&self, addr: Ipv4Addr, port: u16) -> bool;

    /// Whether the wildcard entry is registered
    fn has_wildcard(&self) -> bool {
        self.addr_in_map(*WILDCARD.ip(), WILDCARD.port())
    }
}

/// Table of source endpoint to consumer
pub struct UdpDemuxer<T> {
    routes: RwLock<FxHashMap<SocketAddrV4, T>>,
}

impl<T> UdpDemuxer<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(FxHashMap::default()),
        }
    }

    /// Route datagrams from `(addr, port)` to `consumer`
    pub fn register(&self, addr: Ipv4Addr, port: u16, consumer: T) -> DemuxResult<()> {
        let endpoint = SocketAddrV4::new(addr, port);
        let mut routes = self.routes.write();
        if routes.contains_key(&endpoint) {
            return Err(DemuxError::AlreadyRegistered(endpoint));
        }
        routes.insert(endpoint, consumer);
        log::trace!("demux registered {}", endpoint);
        Ok(())
    }

    /// Drop the route for `(addr, port)`, returning its consumer
    pub fn unregister(&self, addr: Ipv4Addr, port: u16) -> Option<T> {
        self.routes.write().remove(&SocketAddrV4::new(addr, port))
    }

    /// Number of registered routes, wildcard included
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no route is registered
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl<T: Clone> UdpDemuxer<T> {
    /// Consumer for a datagram from `(addr, port)`
    ///
    /// An exact match wins over the wildcard.
    pub fn get(&self, addr: Ipv4Addr, port: u16) -> Option<T> {
        let routes = self.routes.read();
        routes
            .get(&SocketAddrV4::new(addr, port))
            .or_else(|| routes.get(&WILDCARD))
            .cloned()
    }
}

impl<T> Default for UdpDemuxer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> DemuxLookup for UdpDemuxer<T> {
    fn addr_in_map(&self, addr: Ipv4Addr, port: u16) -> bool {
        self.routes
            .read()
            .contains_key(&SocketAddrV4::new(addr, port))
    }
}
