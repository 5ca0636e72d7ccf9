use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock, Weak};

use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::reactor::{Channel, Reactor};

use super::{ConnectedHooks, ConnectedState, RECV_CHUNK_SIZE};

/// Shared state and logic for any channel with a live, non-blocking TCP
/// socket: recv/send/decode-loop/send_buffer. [`super::ConnectedChannel`]
/// uses it directly; [`super::ClientChannel`] wraps it and adds the
/// connect-completion transition.
pub(crate) struct ConnectedCore<H: ConnectedHooks> {
    pub(crate) fd: AtomicI32,
    pub(crate) reactor: Weak<Reactor>,
    pub(crate) released: AtomicBool,
    pub(crate) established: AtomicBool,
    pub(crate) state: Mutex<Option<ConnectedState>>,
    pub(crate) hooks: H,
    /// Set once, right after the owning `Arc<dyn Channel>` is constructed,
    /// so `set_events` can hand the reactor a strong reference to dispatch
    /// through without the core needing to know its own wrapper type.
    self_ref: OnceLock<Weak<dyn Channel>>,
}

impl<H: ConnectedHooks> ConnectedCore<H> {
    pub(crate) fn new_established(reactor: Weak<Reactor>, stream: mio::net::TcpStream, hooks: H) -> Self {
        let fd = stream.as_raw_fd();
        Self {
            fd: AtomicI32::new(fd),
            reactor,
            released: AtomicBool::new(false),
            established: AtomicBool::new(true),
            state: Mutex::new(Some(ConnectedState::new(stream))),
            hooks,
            self_ref: OnceLock::new(),
        }
    }

    pub(crate) fn new_unconnected(reactor: Weak<Reactor>, hooks: H) -> Self {
        Self {
            fd: AtomicI32::new(-1),
            reactor,
            released: AtomicBool::new(false),
            established: AtomicBool::new(false),
            state: Mutex::new(None),
            hooks,
            self_ref: OnceLock::new(),
        }
    }

    /// Must be called once, immediately after the owning channel is wrapped
    /// in its `Arc`, before any reactor interest changes are attempted.
    pub(crate) fn bind_self(&self, weak: Weak<dyn Channel>) {
        let _ = self.self_ref.set(weak);
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire) as RawFd
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub(crate) fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    fn is_ok(&self) -> bool {
        !self.is_released() && self.is_established()
    }

    pub(crate) fn register(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().expect("register called before a stream exists");
        registry.register(&mut state.stream, token, interests)
    }

    pub(crate) fn reregister(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        let mut guard = self.state.lock().unwrap();
        let state = guard.as_mut().expect("reregister called before a stream exists");
        registry.reregister(&mut state.stream, token, interests)
    }

    pub(crate) fn deregister(&self, registry: &Registry) -> io::Result<()> {
        let mut guard = self.state.lock().unwrap();
        let Some(state) = guard.as_mut() else { return Ok(()) };
        registry.deregister(&mut state.stream)
    }

    fn set_events(&self, interests: Interest) -> bool {
        let Some(reactor) = self.reactor.upgrade() else { return false };
        let Some(self_weak) = self.self_ref.get() else { return false };
        let Some(self_arc) = self_weak.upgrade() else { return false };
        reactor.set(&self_arc, interests)
    }

    /// A reply capability for this channel, handed to hooks alongside an
    /// inbound message or connect completion.
    pub(crate) fn handle(&self) -> super::ConnectedHandle {
        super::ConnectedHandle(self.self_ref.get().cloned().expect("bind_self must run before use"))
    }

    /// Reads one non-blocking chunk, appends it to the read buffer, then
    /// drains as many complete messages as the decoder will yield. Holds
    /// the channel lock only around the buffer append and each decode
    /// attempt — never across the recv syscall itself or a callback.
    pub(crate) fn on_recv(&self) {
        if !self.is_ok() {
            return;
        }
        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        let read_result = {
            let mut guard = self.state.lock().unwrap();
            let Some(state) = guard.as_mut() else { return };
            state.stream.read(&mut chunk)
        };
        match read_result {
            Ok(0) => {
                self.hooks.on_close();
                self.released.store(true, Ordering::Release);
            }
            Ok(n) => {
                {
                    let mut guard = self.state.lock().unwrap();
                    if let Some(state) = guard.as_mut() {
                        state.read_buf.append(&chunk[..n]);
                    }
                }
                loop {
                    let outcome = {
                        let mut guard = self.state.lock().unwrap();
                        let Some(state) = guard.as_mut() else { break };
                        let (consumed, msg) = self.hooks.decode(state.read_buf.data());
                        if consumed == 0 {
                            None
                        } else {
                            state.read_buf.consume(consumed);
                            Some(msg)
                        }
                    };
                    match outcome {
                        Some(Some(msg)) => self.hooks.on_message(&self.handle(), &msg),
                        Some(None) | None => break,
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                let errno = e.raw_os_error().unwrap_or(-1);
                debug!(fd = self.fd(), errno, "connected channel: recv error");
                self.hooks.on_error(errno);
                self.released.store(true, Ordering::Release);
            }
        }
    }

    /// Holds the channel lock for the whole call, including the send
    /// syscall itself — send is non-blocking and short, unlike recv.
    pub(crate) fn on_send(&self) {
        if !self.is_ok() {
            return;
        }
        let mut guard = self.state.lock().unwrap();
        let Some(state) = guard.as_mut() else { return };
        if state.write_buf.used() == 0 {
            drop(guard);
            self.set_events(Interest::READABLE);
            return;
        }
        let mut pending = vec![0u8; state.write_buf.used()];
        state.write_buf.peek(&mut pending);
        match state.stream.write(&pending) {
            Ok(n) => {
                state.write_buf.consume(n);
                let drained = state.write_buf.used() == 0;
                drop(guard);
                if drained {
                    self.set_events(Interest::READABLE);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                drop(guard);
                self.hooks.on_close();
                self.released.store(true, Ordering::Release);
            }
            Err(e) => {
                drop(guard);
                let errno = e.raw_os_error().unwrap_or(-1);
                warn!(fd = self.fd(), errno, "connected channel: send error");
                self.hooks.on_error(errno);
                self.released.store(true, Ordering::Release);
            }
        }
    }

    /// Enqueues `bytes` for sending and re-arms write readiness. Rolls back
    /// the enqueue if re-arming fails.
    pub(crate) fn send_buffer(&self, bytes: &[u8]) -> bool {
        if !self.is_ok() {
            return false;
        }
        let mark = {
            let mut guard = self.state.lock().unwrap();
            let Some(state) = guard.as_mut() else { return false };
            let mark = state.write_buf.mark();
            state.write_buf.append(bytes);
            mark
        };
        if self.set_events(Interest::READABLE | Interest::WRITABLE) {
            true
        } else {
            let mut guard = self.state.lock().unwrap();
            if let Some(state) = guard.as_mut() {
                state.write_buf.truncate(mark);
            }
            false
        }
    }
}
