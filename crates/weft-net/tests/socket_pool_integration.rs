//! Integration tests against real loopback sockets

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use weft_net::{PoolConfig, PoolError, Socket2Provider, SocketOptions, UdpSocketPool};
use weft_scheduler::{
    from_fn, logging, EventFlags, Reschedule, SchedulerConfig, TaskHandle, TaskThreadPool,
};

const LOCAL: Ipv4Addr = Ipv4Addr::LOCALHOST;
const PEER: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

// Each test scans its own range so parallel tests never compete for ports.
fn pool<T: Send + Sync + 'static>(lowest: u16) -> UdpSocketPool<Socket2Provider<T>> {
    UdpSocketPool::with_config(
        Socket2Provider::new(SocketOptions::default().with_recv_buffer_size(256 * 1024)),
        PoolConfig::default().with_port_range(lowest, lowest + 400),
    )
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_pair_ports_are_adjacent() {
    let pool = pool::<()>(41000);
    let pair = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();

    let a = pair.addr_a().unwrap();
    let b = pair.addr_b().unwrap();
    assert_eq!(*a.ip(), LOCAL);
    assert_eq!(*b.ip(), LOCAL);
    assert_eq!(b.port(), a.port() + 1);
    assert_eq!(a.port() % 2, 0);

    // The OS really holds both ports.
    assert!(UdpSocket::bind(a).is_err());
    assert!(UdpSocket::bind(b).is_err());

    pool.release_udp_socket_pair(pair).unwrap();
    assert!(pool.is_empty());
    assert!(UdpSocket::bind(a).is_ok());
}

#[test]
fn test_claimed_source_forces_new_pair() {
    let pool = pool::<u32>(42000);
    let first = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
    let demux = first.socket_b().demux().unwrap().clone();
    demux.register(PEER, 5000, 1).unwrap();

    let second = pool.get_udp_socket_pair(LOCAL, 0, PEER, 5000).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.port_a() > first.port_a());
    assert_eq!(pool.len(), 2);

    let fixed = pool.get_udp_socket_pair(LOCAL, first.port_a(), PEER, 5000);
    assert!(matches!(fixed, Err(PoolError::SourceClaimed { .. })));

    pool.release_udp_socket_pair(first).unwrap();
    pool.release_udp_socket_pair(second).unwrap();
    assert!(pool.is_empty());
}

#[test]
fn test_concurrent_get_and_release() {
    let pool = Arc::new(pool::<()>(43000));
    let workers: Vec<_> = (0..8u16)
        .map(|worker| {
            let pool = pool.clone();
            thread::spawn(move || {
                for i in 0..50u16 {
                    let pair = pool
                        .get_udp_socket_pair(LOCAL, 0, PEER, 10_000 + worker * 100 + i)
                        .unwrap();
                    assert!(pair.ref_count() >= 1);
                    assert_eq!(pair.port_b(), pair.port_a() + 1);
                    pool.release_udp_socket_pair(pair).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(pool.is_empty());
}

#[test]
fn test_datagram_routes_to_task() {
    logging::initialize();
    let scheduler = TaskThreadPool::with_config(SchedulerConfig::default().with_threads(2));
    scheduler.start().unwrap();

    let reads = Arc::new(AtomicUsize::new(0));
    let session = {
        let reads = reads.clone();
        scheduler.spawn(
            "rtcp-session",
            from_fn(move |cx| {
                if cx.events().contains(EventFlags::READ) {
                    reads.fetch_add(1, Ordering::SeqCst);
                }
                Reschedule::Idle
            }),
        )
    };

    let pool = pool::<TaskHandle>(44000);
    let pair = pool.get_udp_socket_pair(LOCAL, 0, PEER, 0).unwrap();
    let sender = UdpSocket::bind(SocketAddrV4::new(LOCAL, 0)).unwrap();
    let SocketAddr::V4(sender_addr) = sender.local_addr().unwrap() else {
        panic!("sender bound to a non-IPv4 address");
    };

    let demux = pair.socket_b().demux().unwrap().clone();
    demux
        .register(*sender_addr.ip(), sender_addr.port(), session.clone())
        .unwrap();
    assert!(!pair.accepts_source(*sender_addr.ip(), sender_addr.port()));

    let receiver = UdpSocket::from(pair.socket_b().socket().try_clone().unwrap());
    receiver
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    sender.send_to(b"rtcp", pair.addr_b().unwrap()).unwrap();

    let mut buf = [0u8; 64];
    let (len, from) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..len], b"rtcp");
    let SocketAddr::V4(from) = from else {
        panic!("unexpected source {}", from);
    };
    let consumer = demux.get(*from.ip(), from.port()).unwrap();
    assert_eq!(consumer, session);
    assert!(consumer.signal(EventFlags::READ));

    assert!(wait_until(Duration::from_secs(5), || reads.load(Ordering::SeqCst) == 1));

    drop(receiver);
    drop(demux);
    pool.release_udp_socket_pair(pair).unwrap();
    scheduler.remove_threads();
}
