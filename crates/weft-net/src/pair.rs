//! Adjacent UDP socket pair

use crate::socket::PooledSocket;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Two sockets bound to the same address on ports `n` and `n + 1`
///
/// Socket A carries data, socket B carries control traffic and owns the
/// source demuxer. Pairs are created and reference counted by
/// [`UdpSocketPool`](crate::UdpSocketPool). The sockets close when the last
/// `Arc` to the pair drops.
pub struct UdpSocketPair<S> {
    socket_a: S,
    socket_b: S,
    /// Only changed while the pool mutex is held
    ref_count: AtomicUsize,
}

impl<S: PooledSocket> UdpSocketPair<S> {
    pub(crate) fn new(socket_a: S, socket_b: S) -> Self {
        Self {
            socket_a,
            socket_b,
            ref_count: AtomicUsize::new(0),
        }
    }

    /// Data socket
    pub fn socket_a(&self) -> &S {
        &self.socket_a
    }

    /// Control socket
    pub fn socket_b(&self) -> &S {
        &self.socket_b
    }

    /// Outstanding references held by pool callers
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Address both sockets are bound to
    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        self.socket_a.local_addr().map(|addr| *addr.ip())
    }

    /// Port of socket A
    pub fn port_a(&self) -> u16 {
        self.socket_a.local_port()
    }

    /// Port of socket B
    pub fn port_b(&self) -> u16 {
        self.socket_b.local_port()
    }

    /// Bound address of socket A
    pub fn addr_a(&self) -> Option<SocketAddrV4> {
        self.socket_a.local_addr()
    }

    /// Bound address of socket B
    pub fn addr_b(&self) -> Option<SocketAddrV4> {
        self.socket_b.local_addr()
    }

    /// Whether handing this pair to traffic from `src_addr:src_port` would
    /// not collide with a route socket B already has
    pub fn accepts_source(&self, src_addr: Ipv4Addr, src_port: u16) -> bool {
        match self.socket_b.demuxer() {
            None => true,
            Some(demux) => !demux.has_wildcard() && !demux.addr_in_map(src_addr, src_port),
        }
    }

    pub(crate) fn is_bound_to(&self, addr: Ipv4Addr, port: u16) -> bool {
        match self.socket_a.local_addr() {
            Some(local) => *local.ip() == addr && (port == 0 || local.port() == port),
            None => false,
        }
    }

    pub(crate) fn acquire(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference and return what is left
    pub(crate) fn release(&self) -> usize {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

impl<S: PooledSocket> fmt::Debug for UdpSocketPair<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpSocketPair")
            .field("socket_a", &self.socket_a.local_addr())
            .field("socket_b", &self.socket_b.local_addr())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
