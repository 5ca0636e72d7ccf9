use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mio::{Interest, Registry, Token};
use tracing::warn;

use crate::reactor::{Channel, Reactor};

use super::connected_core::ConnectedCore;
use super::ClientHooks;

/// An outbound TCP connection. `init` starts a non-blocking `connect()`;
/// the first writable event completes the handshake, fires `on_connect`,
/// and from then on this behaves exactly like a [`super::ConnectedChannel`].
pub struct ClientChannel<H: ClientHooks> {
    core: ConnectedCore<H>,
    host: String,
    port: u16,
    first_writable: AtomicBool,
}

impl<H: ClientHooks> ClientChannel<H> {
    pub fn new(reactor: &Arc<Reactor>, host: impl Into<String>, port: u16, hooks: H) -> Arc<Self> {
        let chan = Arc::new(Self {
            core: ConnectedCore::new_unconnected(Arc::downgrade(reactor), hooks),
            host: host.into(),
            port,
            first_writable: AtomicBool::new(true),
        });
        let weak: Weak<dyn Channel> = Arc::downgrade(&chan) as Weak<dyn Channel>;
        chan.core.bind_self(weak);
        chan
    }

    /// Resolves `host:port`, opens a non-blocking socket, and starts
    /// connecting. Returns `false` on a synchronous failure (resolution,
    /// socket creation, or initial registration) — on that path any
    /// partially created local socket is closed directly, unlike the
    /// entry this is modeled on, whose error path closed a field that was
    /// still unset at that point.
    pub fn init(self: &Arc<Self>) -> bool {
        let addr: SocketAddr = match format!("{}:{}", self.host, self.port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(host = %self.host, port = self.port, error = %e, "client channel: invalid address");
                return false;
            }
        };
        let stream = match mio::net::TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(host = %self.host, port = self.port, error = %e, "client channel: connect failed");
                return false;
            }
        };
        let fd = stream.as_raw_fd();
        {
            let mut guard = self.core.state.lock().unwrap();
            *guard = Some(super::ConnectedState::new(stream));
        }
        self.core.fd.store(fd, Ordering::Release);

        let dyn_chan: Arc<dyn Channel> = self.clone();
        let Some(reactor) = self.core.reactor.upgrade() else { return false };
        if reactor.set(&dyn_chan, Interest::READABLE | Interest::WRITABLE) {
            true
        } else {
            unsafe {
                libc::close(fd);
            }
            false
        }
    }

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

impl<H: ClientHooks> Channel for ClientChannel<H> {
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
        if self.first_writable.swap(false, Ordering::AcqRel) {
            self.core.established.store(true, Ordering::Release);
            self.core.hooks.on_connect(&self.core.handle());
            self.core.on_send();
        } else {
            self.core.on_send();
        }
    }
    fn send_buffer(&self, bytes: &[u8]) -> bool {
        self.core.send_buffer(bytes)
    }
}
