//! Socket pool configuration

/// First port tried when a caller does not ask for a specific one
pub const LOWEST_UDP_PORT: u16 = 6970;

/// Upper bound of the scan; socket A ports stay below it
pub const HIGHEST_UDP_PORT: u16 = 65535;

/// Port range for a [`UdpSocketPool`](crate::UdpSocketPool)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// First socket A port tried
    pub lowest_port: u16,
    /// Exclusive bound on socket A ports
    pub highest_port: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lowest_port: LOWEST_UDP_PORT,
            highest_port: HIGHEST_UDP_PORT,
        }
    }
}

impl PoolConfig {
    /// Scan `lowest..highest` for free pairs
    pub fn with_port_range(mut self, lowest_port: u16, highest_port: u16) -> Self {
        self.lowest_port = lowest_port;
        self.highest_port = highest_port;
        self
    }
}

/// Options applied to every socket the default provider opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketOptions {
    /// SO_RCVBUF in bytes (None = OS default)
    pub recv_buffer_size: Option<usize>,
    /// Put sockets in non-blocking mode
    pub nonblocking: bool,
}

impl SocketOptions {
    /// Set the receive buffer size
    pub fn with_recv_buffer_size(mut self, bytes: usize) -> Self {
        self.recv_buffer_size = Some(bytes);
        self
    }

    /// Set non-blocking mode
    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }
}
