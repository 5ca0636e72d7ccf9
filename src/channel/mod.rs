mod client;
mod connected;
mod connected_core;
mod server;

use std::sync::Weak;

pub use client::ClientChannel;
pub use connected::ConnectedChannel;
pub use server::ServerChannel;

use crate::buffer::LinearBuffer;
use crate::reactor::Channel;

/// A reply capability handed to a connected channel's hooks alongside an
/// inbound message or a freshly completed connect, standing in for the way
/// the entry this hierarchy is modeled on lets hook methods call
/// `send_buffer` on `this` directly. Cheap to clone or hold onto past the
/// callback's return; `send_buffer` becomes a no-op once the channel is
/// released.
#[derive(Clone)]
pub struct ConnectedHandle(pub(crate) Weak<dyn Channel>);

impl ConnectedHandle {
    pub fn send_buffer(&self, bytes: &[u8]) -> bool {
        self.0.upgrade().is_some_and(|chan| chan.send_buffer(bytes))
    }
}

/// Non-blocking recv reads at most this many bytes per `on_recv` call,
/// matching the entry this is modeled on.
pub(crate) const RECV_CHUNK_SIZE: usize = 32 * 1024;

const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

pub(crate) struct ConnectedState {
    pub(crate) stream: mio::net::TcpStream,
    pub(crate) read_buf: LinearBuffer,
    pub(crate) write_buf: LinearBuffer,
}

impl ConnectedState {
    pub(crate) fn new(stream: mio::net::TcpStream) -> Self {
        Self {
            stream,
            read_buf: LinearBuffer::new(DEFAULT_BUFFER_CAPACITY),
            write_buf: LinearBuffer::new(DEFAULT_BUFFER_CAPACITY),
        }
    }
}

/// A pure function of the unread prefix of a channel's read buffer:
/// `consumed == 0` means "need more bytes"; `consumed > 0` means exactly one
/// message was produced and that many bytes should be discarded. Must not
/// have side effects beyond what it returns — the channel may call it
/// repeatedly against a prefix that hasn't grown.
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, data: &[u8]) -> (usize, Option<Vec<u8>>);
}

/// Application hooks for a channel that has completed its handshake (an
/// accepted server connection, or a client connection past its first
/// writable event).
pub trait ConnectedHooks: Decoder {
    fn on_message(&self, _channel: &ConnectedHandle, _msg: &[u8]) {}
    fn on_close(&self) {}
    fn on_error(&self, _errno: i32) {}
}

/// Application hooks for an outbound connection, adding the one-time
/// connect-completion callback.
pub trait ClientHooks: ConnectedHooks {
    fn on_connect(&self, _channel: &ConnectedHandle) {}
}

/// Application hooks for a listening socket. `on_accept` receives the
/// freshly `accept()`-ed stream and is responsible for constructing and
/// registering a [`ConnectedChannel`] for it — this channel only owns the
/// listener.
pub trait ServerHooks: Send + Sync + 'static {
    fn on_accept(
        &self,
        reactor: &std::sync::Arc<crate::reactor::Reactor>,
        stream: mio::net::TcpStream,
        peer_addr: std::net::SocketAddr,
    );
}
