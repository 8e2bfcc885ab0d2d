//! Reference-counted pool of UDP socket pairs
//!
//! Protocol sessions ask the pool for a pair bound to a local address. When
//! the caller names the remote endpoint it expects traffic from, an existing
//! pair is shared as long as its control socket does not already route that
//! endpoint. Otherwise the pool binds a fresh pair on the next free even/odd
//! port run. Every operation holds the pool mutex for its whole duration.

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::pair::UdpSocketPair;
use crate::socket::{PooledSocket, SocketProvider};
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

/// Shared handle to a pooled pair
pub type PairRef<P> = Arc<UdpSocketPair<<P as SocketProvider>::Socket>>;

/// Allocator of adjacent UDP port pairs
pub struct UdpSocketPool<P: SocketProvider> {
    provider: P,
    config: PoolConfig,
    pairs: Mutex<Vec<PairRef<P>>>,
}

impl<P: SocketProvider> UdpSocketPool<P> {
    /// Pool scanning the default port range
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, PoolConfig::default())
    }

    /// Pool scanning `config`'s port range
    pub fn with_config(provider: P, config: PoolConfig) -> Self {
        Self {
            provider,
            config,
            pairs: Mutex::new(Vec::new()),
        }
    }

    /// Get a pair on `addr` (and on `port`, unless it is 0)
    ///
    /// With a source endpoint, an existing pair whose socket B routes neither
    /// that endpoint nor the wildcard is shared and its reference count
    /// bumped. A fixed `port` whose pair already routes the source fails
    /// with [`PoolError::SourceClaimed`] instead of binding elsewhere.
    /// Without a source endpoint a new pair is always created.
    pub fn get_udp_socket_pair(
        &self,
        addr: Ipv4Addr,
        port: u16,
        src_addr: Ipv4Addr,
        src_port: u16,
    ) -> PoolResult<PairRef<P>> {
        let mut pairs = self.pairs.lock();

        if !src_addr.is_unspecified() || src_port != 0 {
            for pair in pairs.iter() {
                if !pair.is_bound_to(addr, port) {
                    continue;
                }
                if pair.accepts_source(src_addr, src_port) {
                    let count = pair.acquire();
                    log::debug!(
                        "reusing UDP pair {}/{} on {} for {}:{} (refs {})",
                        pair.port_a(),
                        pair.port_b(),
                        addr,
                        src_addr,
                        src_port,
                        count
                    );
                    return Ok(pair.clone());
                }
                if port != 0 {
                    return Err(PoolError::SourceClaimed {
                        addr,
                        port,
                        source_endpoint: SocketAddrV4::new(src_addr, src_port),
                    });
                }
            }
        }

        self.create_locked(&mut pairs, addr, port)
    }

    /// Bind a new pair on `addr`, at `port` if it is not 0
    pub fn create_udp_socket_pair(&self, addr: Ipv4Addr, port: u16) -> PoolResult<PairRef<P>> {
        let mut pairs = self.pairs.lock();
        self.create_locked(&mut pairs, addr, port)
    }

    fn create_locked(
        &self,
        pairs: &mut Vec<PairRef<P>>,
        addr: Ipv4Addr,
        port: u16,
    ) -> PoolResult<PairRef<P>> {
        let highest = u32::from(self.config.highest_port);
        let (mut cur, stop) = if port != 0 {
            (u32::from(port), u32::from(port))
        } else {
            (
                u32::from(self.config.lowest_port),
                highest.saturating_sub(1),
            )
        };

        while cur < highest {
            let mut socket_a = self.provider.open().map_err(PoolError::Open)?;
            let mut socket_b = self.provider.open_demuxed().map_err(PoolError::Open)?;
            self.provider.configure(&mut socket_a, &mut socket_b);

            // cur < highest <= u16::MAX, so both ports fit.
            let port_a = cur as u16;
            let port_b = (cur + 1) as u16;
            let bound = socket_a
                .bind(addr, port_a)
                .and_then(|()| socket_b.bind(addr, port_b));

            match bound {
                Ok(()) => {
                    let pair = Arc::new(UdpSocketPair::new(socket_a, socket_b));
                    pair.acquire();
                    pairs.push(pair.clone());
                    log::debug!(
                        "bound UDP pair {}/{} on {} ({} pairs pooled)",
                        port_a,
                        port_b,
                        addr,
                        pairs.len()
                    );
                    return Ok(pair);
                }
                Err(e) => {
                    log::trace!("UDP pair {}/{} on {} unavailable: {}", port_a, port_b, addr, e);
                    // Both sockets of the failed attempt close here.
                    drop((socket_a, socket_b));
                }
            }

            if port != 0 {
                return Err(PoolError::PortUnavailable { addr, port });
            }
            if cur >= stop {
                break;
            }
            cur += 2;
        }

        if port != 0 {
            return Err(PoolError::PortUnavailable { addr, port });
        }
        log::warn!(
            "no free UDP pair on {} in {}..{}",
            addr,
            self.config.lowest_port,
            self.config.highest_port
        );
        Err(PoolError::Exhausted {
            addr,
            lowest: self.config.lowest_port,
            highest: self.config.highest_port,
        })
    }

    /// Give back one reference to `pair`
    ///
    /// The last reference removes the pair from the pool and drops the
    /// pool's handle. Each reference is one `Arc` handed out by
    /// [`get_udp_socket_pair`](Self::get_udp_socket_pair) or
    /// [`create_udp_socket_pair`](Self::create_udp_socket_pair); a caller
    /// that cloned it must drop those clones too, or both sockets stay bound
    /// until the last clone goes.
    pub fn release_udp_socket_pair(&self, pair: PairRef<P>) -> PoolResult<()> {
        let mut pairs = self.pairs.lock();
        let index = pairs
            .iter()
            .position(|pooled| Arc::ptr_eq(pooled, &pair))
            .ok_or(PoolError::NotPooled)?;

        let remaining = pair.release();
        if remaining == 0 {
            let removed = pairs.swap_remove(index);
            log::debug!(
                "destroying UDP pair {}/{} ({} pairs pooled)",
                removed.port_a(),
                removed.port_b(),
                pairs.len()
            );
            drop(removed);
        }
        Ok(())
    }

    /// Number of pooled pairs
    pub fn len(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Whether the pool holds no pair
    pub fn is_empty(&self) -> bool {
        self.pairs.lock().is_empty()
    }

    /// Port range in use
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Provider opening the sockets
    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::{DemuxLookup, UdpDemuxer};
    use rustc_hash::FxHashSet;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const PEER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 5);

    /// Ports in use plus counters, shared by every mock socket
    #[derive(Default)]
    struct Net {
        bound: Mutex<FxHashSet<SocketAddrV4>>,
        live: AtomicUsize,
        binds: AtomicUsize,
        fail_open_b: AtomicBool,
    }

    impl Net {
        fn occupy(&self, port: u16) {
            self.bound.lock().insert(SocketAddrV4::new(LOCAL, port));
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn binds(&self) -> usize {
            self.binds.load(Ordering::SeqCst)
        }
    }

    struct MockSocket {
        net: Arc<Net>,
        local: Option<SocketAddrV4>,
        demux: Option<Arc<UdpDemuxer<u32>>>,
    }

    impl MockSocket {
        fn new(net: &Arc<Net>, demux: bool) -> Self {
            net.live.fetch_add(1, Ordering::SeqCst);
            Self {
                net: net.clone(),
                local: None,
                demux: demux.then(|| Arc::new(UdpDemuxer::new())),
            }
        }
    }

    impl PooledSocket for MockSocket {
        fn bind(&mut self, addr: Ipv4Addr, port: u16) -> io::Result<()> {
            self.net.binds.fetch_add(1, Ordering::SeqCst);
            let endpoint = SocketAddrV4::new(addr, port);
            if !self.net.bound.lock().insert(endpoint) {
                return Err(io::Error::from(io::ErrorKind::AddrInUse));
            }
            self.local = Some(endpoint);
            Ok(())
        }

        fn local_addr(&self) -> Option<SocketAddrV4> {
            self.local
        }

        fn demuxer(&self) -> Option<&dyn DemuxLookup> {
            self.demux.as_deref().map(|demux| demux as &dyn DemuxLookup)
        }
    }

    impl Drop for MockSocket {
        fn drop(&mut self) {
            if let Some(local) = self.local {
                self.net.bound.lock().remove(&local);
            }
            self.net.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct MockProvider {
        net: Arc<Net>,
    }

    impl SocketProvider for MockProvider {
        type Socket = MockSocket;

        fn open(&self) -> io::Result<MockSocket> {
            Ok(MockSocket::new(&self.net, false))
        }

        fn open_demuxed(&self) -> io::Result<MockSocket> {
            if self.net.fail_open_b.load(Ordering::SeqCst) {
                return Err(io::Error::from(io::ErrorKind::Other));
            }
            Ok(MockSocket::new(&self.net, true))
        }
    }

    fn pool_with(config: PoolConfig) -> (UdpSocketPool<MockProvider>, Arc<Net>) {
        let net = Arc::new(Net::default());
        let provider = MockProvider { net: net.clone() };
        (UdpSocketPool::with_config(provider, config), net)
    }

    fn pool() -> (UdpSocketPool<MockProvider>, Arc<Net>) {
        pool_with(PoolConfig::default())
    }

    fn claim(pair: &UdpSocketPair<MockSocket>, addr: Ipv4Addr, port: u16) {
        let demux = pair.socket_b().demux.as_ref().unwrap();
        demux.register(addr, port, 1).unwrap();
    }

    #[test]
    fn test_shared_pair_refcount() {
        let (pool, net) = pool();

        let first = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
        assert_eq!((first.port_a(), first.port_b()), (6970, 6971));
        assert_eq!(first.ref_count(), 1);

        let second = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.ref_count(), 2);
        assert_eq!(pool.len(), 1);

        pool.release_udp_socket_pair(first).unwrap();
        assert_eq!(second.ref_count(), 1);
        assert_eq!(pool.len(), 1);

        pool.release_udp_socket_pair(second).unwrap();
        assert!(pool.is_empty());
        assert_eq!(net.live(), 0);
        assert!(net.bound.lock().is_empty());
    }

    #[test]
    fn test_fixed_port_with_claimed_source_fails_fast() {
        let (pool, net) = pool();
        let pair = pool.get_udp_socket_pair(LOCAL, 6970, PEER, 5000).unwrap();
        claim(&pair, PEER, 5000);
        let binds = net.binds();

        let result = pool.get_udp_socket_pair(LOCAL, 6970, PEER, 5000);
        assert!(matches!(
            result,
            Err(PoolError::SourceClaimed { port: 6970, .. })
        ));
        assert_eq!(net.binds(), binds);
        assert_eq!(pair.ref_count(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_claimed_source_gets_new_pair() {
        let (pool, _net) = pool();
        let first = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
        claim(&first, PEER, 5000);

        let second = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.port_a(), 6972);

        // A different source still fits the first pair.
        let third = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5002).unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(first.ref_count(), 2);
    }

    #[test]
    fn test_wildcard_blocks_reuse() {
        let (pool, _net) = pool();
        let first = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
        claim(&first, Ipv4Addr::UNSPECIFIED, 0);

        assert!(!first.accepts_source(Ipv4Addr::new(172, 16, 0, 1), 1234));
        let second = pool
            .get_udp_socket_pair(LOCAL, 0, Ipv4Addr::new(172, 16, 0, 1), 1234)
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_different_address_is_not_shared() {
        let (pool, _net) = pool();
        let first = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
        let other = pool
            .get_udp_socket_pair(Ipv4Addr::new(10, 0, 0, 2), 0, PEER, 5000)
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.local_ip(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(other.port_a(), 6970);
    }

    #[test]
    fn test_without_source_always_creates() {
        let (pool, _net) = pool();
        let first = pool
            .get_udp_socket_pair(LOCAL, 0, Ipv4Addr::UNSPECIFIED, 0)
            .unwrap();
        let second = pool
            .get_udp_socket_pair(LOCAL, 0, Ipv4Addr::UNSPECIFIED, 0)
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.port_a(), 6970);
        assert_eq!(second.port_a(), 6972);
    }

    #[test]
    fn test_create_skips_taken_ports_by_two() {
        let (pool, net) = pool();
        net.occupy(6971);
        net.occupy(6972);

        let pair = pool.create_udp_socket_pair(LOCAL, 0).unwrap();
        assert_eq!((pair.port_a(), pair.port_b()), (6974, 6975));
        assert_eq!(pair.addr_b(), Some(SocketAddrV4::new(LOCAL, 6975)));
        // Failed attempts left nothing open.
        assert_eq!(net.live(), 2);
    }

    #[test]
    fn test_specific_port_tried_once() {
        let (pool, net) = pool();
        net.occupy(8001);

        let result = pool.create_udp_socket_pair(LOCAL, 8000);
        assert!(matches!(
            result,
            Err(PoolError::PortUnavailable { port: 8000, .. })
        ));
        assert_eq!(net.binds(), 2);
        assert_eq!(net.live(), 0);
        assert!(!net.bound.lock().contains(&SocketAddrV4::new(LOCAL, 8000)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_specific_port_binds_exact_pair() {
        let (pool, _net) = pool();
        let pair = pool.create_udp_socket_pair(LOCAL, 9000).unwrap();
        assert_eq!((pair.port_a(), pair.port_b()), (9000, 9001));
    }

    #[test]
    fn test_open_failure_leaks_nothing() {
        let (pool, net) = pool();
        net.fail_open_b.store(true, Ordering::SeqCst);

        let result = pool.create_udp_socket_pair(LOCAL, 0);
        assert!(matches!(result, Err(PoolError::Open(_))));
        assert_eq!(net.live(), 0);
        assert_eq!(net.binds(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_range_exhausted() {
        let (pool, net) = pool_with(PoolConfig::default().with_port_range(7000, 7004));
        net.occupy(7000);
        net.occupy(7003);

        let result = pool.create_udp_socket_pair(LOCAL, 0);
        assert!(matches!(
            result,
            Err(PoolError::Exhausted {
                lowest: 7000,
                highest: 7004,
                ..
            })
        ));
        // 7000/7001 and 7002/7003, nothing past the bound.
        assert_eq!(net.binds(), 3);
        assert_eq!(net.live(), 0);
    }

    #[test]
    fn test_last_release_closes_sockets() {
        let (pool, net) = pool();
        let pair = pool.create_udp_socket_pair(LOCAL, 0).unwrap();
        let extra = pair.clone();

        pool.release_udp_socket_pair(pair).unwrap();
        assert!(pool.is_empty());
        // A stray clone keeps the ports bound.
        assert_eq!(net.live(), 2);
        assert!(net.bound.lock().contains(&SocketAddrV4::new(LOCAL, 6970)));

        drop(extra);
        assert_eq!(net.live(), 0);
        assert!(net.bound.lock().is_empty());

        // The same pair of ports is free for the next caller.
        let again = pool.create_udp_socket_pair(LOCAL, 0).unwrap();
        assert_eq!(again.port_a(), 6970);
    }

    #[test]
    fn test_release_unknown_pair() {
        let (pool, _net) = pool();
        let (other_pool, _other_net) = pool_with(PoolConfig::default());
        let stranger = other_pool.create_udp_socket_pair(LOCAL, 0).unwrap();

        assert!(matches!(
            pool.release_udp_socket_pair(stranger.clone()),
            Err(PoolError::NotPooled)
        ));
        assert_eq!(stranger.ref_count(), 1);
    }
}
