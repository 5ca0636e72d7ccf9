use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Weak};

use mio::{Interest, Registry, Token};

use crate::reactor::{Channel, Reactor};

use super::connected_core::ConnectedCore;
use super::ConnectedHooks;

/// A connected TCP socket — either accepted by a [`super::ServerChannel`] or
/// a [`super::ClientChannel`] past its first writable event share this
/// behavior; this type is what a server's `on_accept` hook constructs.
pub struct ConnectedChannel<H: ConnectedHooks> {
    core: ConnectedCore<H>,
}

impl<H: ConnectedHooks> ConnectedChannel<H> {
    /// Wraps an already-connected, non-blocking stream and registers it
    /// with `reactor` for readability. Returns `None` if registration
    /// fails (e.g. the reactor is at capacity).
    pub fn new(reactor: &Arc<Reactor>, stream: mio::net::TcpStream, hooks: H) -> Option<Arc<Self>> {
        let chan = Arc::new(Self {
            core: ConnectedCore::new_established(Arc::downgrade(reactor), stream, hooks),
        });
        let weak: Weak<dyn Channel> = Arc::downgrade(&chan) as Weak<dyn Channel>;
        chan.core.bind_self(weak);
        let dyn_chan: Arc<dyn Channel> = chan.clone();
        if reactor.set(&dyn_chan, Interest::READABLE) {
            Some(chan)
        } else {
            None
        }
    }

    /// Enqueues `bytes` to be sent and arms write readiness. Returns
    /// `false` if the channel is released or the reactor refused the
    /// interest change (the enqueue is rolled back in that case).
    pub fn send_buffer(&self, bytes: &[u8]) -> bool {
        self.core.send_buffer(bytes)
    }

    pub fn is_released(&self) -> bool {
        self.core.is_released()
    }

    pub fn fd(&self) -> RawFd {
        self.core.fd()
    }

    pub fn released(&self) -> bool {
        self.core.is_released()
    }

    /// Marks the channel released. The reactor deregisters it and drops its
    /// socket the next time its shard's worker thread dispatches an event
    /// for it, matching `EpollChannel::release`.
    pub fn release(&self) {
        self.core.release();
    }

    pub fn hooks(&self) -> &H {
        &self.core.hooks
    }
}

impl<H: ConnectedHooks> Channel for ConnectedChannel<H> {
    fn fd(&self) -> RawFd {
        self.core.fd()
    }
    fn released(&self) -> bool {
        self.core.is_released()
    }
    fn register(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.core.register(registry, token, interests)
    }
    fn reregister(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.core.reregister(registry, token, interests)
    }
    fn deregister(&self, registry: &Registry) -> io::Result<()> {
        self.core.deregister(registry)
    }
    fn on_recv(&self) {
        self.core.on_recv();
    }
    fn on_send(&self) {
        self.core.on_send();
    }
    fn send_buffer(&self, bytes: &[u8]) -> bool {
        self.core.send_buffer(bytes)
    }
}
