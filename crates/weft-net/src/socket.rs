//! Sockets the pool hands out and the provider that opens them
//!
//! The pool never touches the OS directly. It asks a [`SocketProvider`] for
//! two unbound sockets, lets it apply options, and then binds them itself so
//! the port scan stays in one place.

use crate::config::SocketOptions;
use crate::demux::{DemuxLookup, UdpDemuxer};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

/// One half of a socket pair
pub trait PooledSocket: Send + Sync {
    /// Bind to `addr:port`
    fn bind(&mut self, addr: Ipv4Addr, port: u16) -> io::Result<()>;

    /// Bound address, None until [`bind`](Self::bind) succeeded
    fn local_addr(&self) -> Option<SocketAddrV4>;

    /// Bound port, 0 until bound
    fn local_port(&self) -> u16 {
        self.local_addr().map_or(0, |addr| addr.port())
    }

    /// Source routing table, if this socket demultiplexes its peers
    fn demuxer(&self) -> Option<&dyn DemuxLookup> {
        None
    }
}

/// Opens and configures the sockets of new pairs
pub trait SocketProvider: Send + Sync {
    /// Socket type of both halves
    type Socket: PooledSocket;

    /// Open socket A
    fn open(&self) -> io::Result<Self::Socket>;

    /// Open socket B, which routes by source endpoint
    fn open_demuxed(&self) -> io::Result<Self::Socket> {
        self.open()
    }

    /// Apply options to both halves before they are bound
    fn configure(&self, _socket_a: &mut Self::Socket, _socket_b: &mut Self::Socket) {}
}

/// IPv4 UDP socket backed by `socket2`
pub struct UdpPairSocket<T> {
    socket: Socket,
    local: Option<SocketAddrV4>,
    demux: Option<Arc<UdpDemuxer<T>>>,
}

impl<T> UdpPairSocket<T> {
    /// Open an unbound UDP socket
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        Ok(Self {
            socket,
            local: None,
            demux: None,
        })
    }

    /// Open an unbound UDP socket with an empty demuxer
    pub fn open_demuxed() -> io::Result<Self> {
        let mut socket = Self::open()?;
        socket.demux = Some(Arc::new(UdpDemuxer::new()));
        Ok(socket)
    }

    /// Underlying socket, for I/O
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Typed demuxer, for registering consumers
    pub fn demux(&self) -> Option<&Arc<UdpDemuxer<T>>> {
        self.demux.as_ref()
    }

    fn apply(&self, options: &SocketOptions) -> io::Result<()> {
        if let Some(bytes) = options.recv_buffer_size {
            self.socket.set_recv_buffer_size(bytes)?;
        }
        if options.nonblocking {
            self.socket.set_nonblocking(true)?;
        }
        Ok(())
    }
}

impl<T: Send + Sync + 'static> PooledSocket for UdpPairSocket<T> {
    fn bind(&mut self, addr: Ipv4Addr, port: u16) -> io::Result<()> {
        let requested = SocketAddrV4::new(addr, port);
        self.socket.bind(&SockAddr::from(requested))?;
        // Port 0 binds pick an ephemeral port; report what the OS chose.
        let bound = self
            .socket
            .local_addr()
            .ok()
            .and_then(|local| local.as_socket_ipv4())
            .unwrap_or(requested);
        self.local = Some(bound);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddrV4> {
        self.local
    }

    fn demuxer(&self) -> Option<&dyn DemuxLookup> {
        self.demux.as_deref().map(|demux| demux as &dyn DemuxLookup)
    }
}

/// Default provider: plain `socket2` UDP sockets with [`SocketOptions`]
pub struct Socket2Provider<T> {
    options: SocketOptions,
    _consumer: PhantomData<fn() -> T>,
}

impl<T> Socket2Provider<T> {
    /// Provider applying `options` to every socket
    pub fn new(options: SocketOptions) -> Self {
        Self {
            options,
            _consumer: PhantomData,
        }
    }

    /// Options applied on configure
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }
}

impl<T> Default for Socket2Provider<T> {
    fn default() -> Self {
        Self::new(SocketOptions::default())
    }
}

impl<T: Send + Sync + 'static> SocketProvider for Socket2Provider<T> {
    type Socket = UdpPairSocket<T>;

    fn open(&self) -> io::Result<Self::Socket> {
        UdpPairSocket::open()
    }

    fn open_demuxed(&self) -> io::Result<Self::Socket> {
        UdpPairSocket::open_demuxed()
    }

    fn configure(&self, socket_a: &mut Self::Socket, socket_b: &mut Self::Socket) {
        for socket in [&*socket_a, &*socket_b] {
            if let Err(e) = socket.apply(&self.options) {
                log::warn!("failed to apply {:?} to UDP socket: {}", self.options, e);
            }
        }
    }
}
