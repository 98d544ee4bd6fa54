//! UDP transport.
//!
//! A thin layer over [`std::net::UdpSocket`]: endpoints send datagrams through a shared
//! socket, and [`serve`] runs a blocking receive loop, passing every datagram to a
//! [`Handler`].

use crate::{Endpoint, Result, sink::Sink, source::Source};
use core::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
};
use std::{net::UdpSocket, sync::Arc};

/// Largest datagram [`serve`] can receive.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// A peer reachable through a (shared) UDP socket.
///
/// Equality and hashing only consider the peer address.
#[derive(Debug, Clone)]
pub struct UdpEndpoint {
    sock: Arc<UdpSocket>,
    addr: SocketAddr,
}

impl UdpEndpoint {
    #[inline(always)]
    pub fn new(sock: Arc<UdpSocket>, addr: SocketAddr) -> Self {
        Self { sock, addr }
    }

    #[inline(always)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl PartialEq for UdpEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for UdpEndpoint {}

impl core::hash::Hash for UdpEndpoint {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl Endpoint for UdpEndpoint {
    fn send(&self, bytes: &[u8]) {
        match self.sock.send_to(bytes, self.addr) {
            Ok(n) if n == bytes.len() => {}
            Ok(n) => log::warn!("{}: truncated datagram ({n}/{} bytes)", self.addr, bytes.len()),
            Err(e) => log::warn!("{}: send failed: {e}", self.addr),
        }
    }
}

/// Anything that consumes datagrams.
pub trait Handler {
    /// Called on every received datagram. Returns whether it was accepted.
    fn handle(&self, bytes: &[u8], from: &UdpEndpoint) -> Result<bool>;
}

impl Handler for Source<UdpEndpoint> {
    #[inline(always)]
    fn handle(&self, bytes: &[u8], from: &UdpEndpoint) -> Result<bool> {
        self.handle_message(bytes, from)
    }
}

impl Handler for Sink<UdpEndpoint> {
    #[inline(always)]
    fn handle(&self, bytes: &[u8], from: &UdpEndpoint) -> Result<bool> {
        self.handle_message(bytes, from)
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    #[inline(always)]
    fn handle(&self, bytes: &[u8], from: &UdpEndpoint) -> Result<bool> {
        H::handle(self, bytes, from)
    }
}

/// A node that is both a source and a sink, sharing one socket.
impl<A: Handler, B: Handler> Handler for (A, B) {
    fn handle(&self, bytes: &[u8], from: &UdpEndpoint) -> Result<bool> {
        Ok(self.0.handle(bytes, from)? | self.1.handle(bytes, from)?)
    }
}

/// Returns `true` if the given I/O error kind represents a timeout.
#[inline(always)]
fn is_timeout(e: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    [WouldBlock, TimedOut].contains(&e)
}

/// Receives datagrams on `sock`, passing them to `handler`, until `running` is cleared.
///
/// `running` is checked whenever a receive times out, so `sock` should have a read
/// timeout set. Messages that fail to decode, or to be handled, are logged and skipped.
pub fn serve(
    sock: &Arc<UdpSocket>,
    handler: &impl Handler,
    running: &AtomicBool,
) -> std::io::Result<()> {
    let mut buf = vec![0; MAX_DATAGRAM_SIZE].into_boxed_slice();

    while running.load(Ordering::Relaxed) {
        let (n, addr) = match sock.recv_from(&mut buf) {
            Ok(res) => res,
            Err(e) if is_timeout(e.kind()) => continue,
            Err(e) => return Err(e),
        };

        let from = UdpEndpoint::new(Arc::clone(sock), addr);

        match handler.handle(&buf[..n], &from) {
            Ok(true) => {}
            Ok(false) => log::trace!("{addr}: ignored datagram ({n} bytes)"),
            Err(e) => log::debug!("{addr}: {e}"),
        }
    }

    Ok(())
}
