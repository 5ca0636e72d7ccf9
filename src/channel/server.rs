use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use mio::{Interest, Registry, Token};
use tracing::{info, warn};

use crate::reactor::{Channel, Reactor};

use super::ServerHooks;

/// A listening socket. On readability it accepts every pending connection
/// in a loop (stopping at `WouldBlock`) and hands each one to the hooks'
/// `on_accept`, which is responsible for constructing and registering a
/// [`super::ConnectedChannel`] for it.
pub struct ServerChannel<H: ServerHooks> {
    fd: AtomicI32,
    reactor: Weak<Reactor>,
    released: AtomicBool,
    listener: Mutex<Option<mio::net::TcpListener>>,
    hooks: H,
}

impl<H: ServerHooks> ServerChannel<H> {
    pub fn new(reactor: &Arc<Reactor>, hooks: H) -> Arc<Self> {
        Arc::new(Self {
            fd: AtomicI32::new(-1),
            reactor: Arc::downgrade(reactor),
            released: AtomicBool::new(false),
            listener: Mutex::new(None),
            hooks,
        })
    }

    /// Binds `host:port` (an empty `host` binds `INADDR_ANY`) and starts
    /// listening with a backlog of `backlog`. `SO_REUSEADDR` is always set,
    /// mirroring `EpollChannelServer::init`.
    pub fn init(self: &Arc<Self>, host: &str, port: u16, backlog: u32) -> bool {
        let bind_host = if host.is_empty() { "0.0.0.0" } else { host };
        let addr: SocketAddr = match format!("{bind_host}:{port}").parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(host = bind_host, port, error = %e, "server channel: invalid address");
                return false;
            }
        };
        let listener = match bind_reuseaddr(addr, backlog) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(host = bind_host, port, error = %e, "server channel: bind failed");
                return false;
            }
        };
        let fd = listener.as_raw_fd();
        *self.listener.lock().unwrap() = Some(listener);
        self.fd.store(fd, Ordering::Release);

        let Some(reactor) = self.reactor.upgrade() else { return false };
        let dyn_chan: Arc<dyn Channel> = self.clone();
        if reactor.set(&dyn_chan, Interest::READABLE) {
            info!(host = bind_host, port, "server channel: listening");
            true
        } else {
            *self.listener.lock().unwrap() = None;
            false
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire) as RawFd
    }

    pub fn released(&self) -> bool {
        self.is_released()
    }

    /// Marks the channel released. The reactor deregisters it and drops its
    /// listener the next time its shard's worker thread dispatches an event
    /// for it, matching `EpollChannel::release`.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

fn bind_reuseaddr(addr: SocketAddr, backlog: u32) -> io::Result<mio::net::TcpListener> {
    use socket2::{Domain, Socket, Type};
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    mio::net::TcpListener::from_std(socket.into())
}

impl<H: ServerHooks> Channel for ServerChannel<H> {
    fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire) as RawFd
    }
    fn released(&self) -> bool {
        self.is_released()
    }
    fn register(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        let mut guard = self.listener.lock().unwrap();
        let listener = guard.as_mut().expect("register called before a listener exists");
        registry.register(listener, token, interests)
    }
    fn reregister(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        let mut guard = self.listener.lock().unwrap();
        let listener = guard.as_mut().expect("reregister called before a listener exists");
        registry.reregister(listener, token, interests)
    }
    fn deregister(&self, registry: &Registry) -> io::Result<()> {
        let mut guard = self.listener.lock().unwrap();
        let Some(listener) = guard.as_mut() else { return Ok(()) };
        registry.deregister(listener)
    }
    fn on_recv(&self) {
        if self.is_released() {
            return;
        }
        let Some(reactor) = self.reactor.upgrade() else { return };
        loop {
            let accepted = {
                let guard = self.listener.lock().unwrap();
                let Some(listener) = guard.as_ref() else { return };
                listener.accept()
            };
            match accepted {
                Ok((stream, peer_addr)) => self.hooks.on_accept(&reactor, stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(fd = self.fd(), error = %e, "server channel: accept error");
                    break;
                }
            }
        }
    }
    fn on_send(&self) {}
}
