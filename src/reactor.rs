use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{error, warn};

use crate::error::ReactorError;
use crate::macros::safe_panic;

/// Every fd is pinned to `fd % shard_count` for its whole lifetime; that
/// shard's worker thread is the only one that ever touches its readiness
/// events, so a channel's `on_recv`/`on_send` are never called concurrently
/// with each other.
const SELF_PIPE_TOKEN: Token = Token(usize::MAX);

/// One socket registered with a [`Reactor`]. Implementors hold their own
/// `mio` registration source (a `TcpStream` or `TcpListener`) behind their
/// own locking and expose it to the reactor only through `register` /
/// `reregister` / `deregister`, so the reactor never needs to know a
/// channel's internal layout.
pub(crate) trait Channel: Send + Sync {
    fn fd(&self) -> RawFd;
    fn released(&self) -> bool;
    fn register(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()>;
    fn reregister(&self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()>;
    fn deregister(&self, registry: &Registry) -> io::Result<()>;
    fn on_recv(&self);
    fn on_send(&self);
    /// Enqueues `bytes` for sending. Listener channels have nothing to
    /// write to and keep the default.
    fn send_buffer(&self, _bytes: &[u8]) -> bool {
        false
    }
}

struct FdEntry {
    shard: usize,
    channel: Arc<dyn Channel>,
}

struct Shard {
    registry: Registry,
    pipe_read: RawFd,
    pipe_write: RawFd,
}

/// A sharded, multi-threaded, level-triggered reactor: `thread_count`
/// independent worker threads, each owning an independent readiness
/// instance, driving whatever channels hash to its shard.
pub struct Reactor {
    shards: Vec<Shard>,
    fd_map: Mutex<HashMap<RawFd, FdEntry>>,
    max_fd: usize,
    terminated: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

fn open_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

fn build_shard(index: usize) -> Result<(Poll, RawFd, RawFd, Registry), ReactorError> {
    let map_err = |source: io::Error| ReactorError::ShardInit { index, source };
    let poll = Poll::new().map_err(map_err)?;
    let (pipe_read, pipe_write) = open_pipe().map_err(|source| {
        ReactorError::ShardInit { index, source }
    })?;
    let registry = poll.registry().try_clone().map_err(map_err)?;
    if let Err(source) = registry.register(&mut SourceFd(&pipe_read), SELF_PIPE_TOKEN, Interest::READABLE) {
        unsafe {
            libc::close(pipe_read);
            libc::close(pipe_write);
        }
        return Err(ReactorError::ShardInit { index, source });
    }
    Ok((poll, pipe_read, pipe_write, registry))
}

impl Reactor {
    /// Builds `thread_count` shards and spawns their worker threads. SIGPIPE
    /// is ignored process-wide, matching the entry this is modeled on,
    /// since every send here already checks for errors rather than relying
    /// on the default terminate-on-SIGPIPE behavior.
    ///
    /// If any shard fails to initialize, every shard allocated so far is
    /// torn down (self-pipe closed) and construction fails as a whole.
    pub fn new(thread_count: usize, max_fd: usize) -> Result<Arc<Reactor>, ReactorError> {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }

        let mut shards = Vec::with_capacity(thread_count);
        let mut worker_polls = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            match build_shard(index) {
                Ok((poll, pipe_read, pipe_write, registry)) => {
                    shards.push(Shard { registry, pipe_read, pipe_write });
                    worker_polls.push((poll, pipe_read));
                }
                Err(e) => {
                    for s in &shards {
                        unsafe {
                            libc::close(s.pipe_read);
                            libc::close(s.pipe_write);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let reactor = Arc::new(Reactor {
            shards,
            fd_map: Mutex::new(HashMap::new()),
            max_fd,
            terminated: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(thread_count);
        for (index, (poll, pipe_read)) in worker_polls.into_iter().enumerate() {
            let reactor = reactor.clone();
            handles.push(thread::spawn(move || reactor.run_shard(index, poll, pipe_read)));
        }
        *reactor.threads.lock().unwrap() = handles;

        Ok(reactor)
    }

    /// Registers or re-registers `channel` for `interests` with its shard.
    /// The first call for a given fd adds it (failing if the reactor is
    /// already at `max_fd`); later calls modify the existing registration.
    pub(crate) fn set(&self, channel: &Arc<dyn Channel>, interests: Interest) -> bool {
        let fd = channel.fd();
        let shard_index = self.shard_for(fd);
        let shard = &self.shards[shard_index];
        let token = Token(fd as usize);
        let mut map = self.fd_map.lock().unwrap();
        let adding = !map.contains_key(&fd);
        if adding && map.len() >= self.max_fd {
            warn!(fd, "reactor: refusing to register fd, at capacity");
            return false;
        }
        let result = if adding {
            channel.register(&shard.registry, token, interests)
        } else {
            channel.reregister(&shard.registry, token, interests)
        };
        match result {
            Ok(()) => {
                if adding {
                    map.insert(fd, FdEntry { shard: shard_index, channel: channel.clone() });
                }
                true
            }
            Err(e) => {
                warn!(fd, error = %e, "reactor: failed to register fd");
                false
            }
        }
    }

    /// Deregisters `channel` and drops the reactor's strong reference to
    /// it. Returns whether it was registered at all.
    pub(crate) fn del(&self, channel: &Arc<dyn Channel>) -> bool {
        let fd = channel.fd();
        let shard = &self.shards[self.shard_for(fd)];
        if let Err(e) = channel.deregister(&shard.registry) {
            warn!(fd, error = %e, "reactor: failed to deregister fd");
        }
        self.fd_map.lock().unwrap().remove(&fd).is_some()
    }

    pub fn fd_count(&self) -> usize {
        self.fd_map.lock().unwrap().len()
    }

    fn shard_for(&self, fd: RawFd) -> usize {
        fd as usize % self.shards.len()
    }

    /// Closes both ends of every shard's self-pipe (waking every worker's
    /// blocked `poll`), joins the worker threads, then drops any channels
    /// still registered, closing their sockets.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        for shard in &self.shards {
            unsafe {
                libc::close(shard.pipe_read);
                libc::close(shard.pipe_write);
            }
        }
        let mut threads = self.threads.lock().unwrap();
        for t in threads.drain(..) {
            let _ = t.join();
        }
        self.fd_map.lock().unwrap().clear();
    }

    fn run_shard(self: Arc<Self>, index: usize, mut poll: Poll, pipe_read: RawFd) {
        let mut events = Events::with_capacity(self.max_fd.max(1));
        loop {
            match poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(shard = index, error = %e, "reactor: poll failed, shard exiting");
                    return;
                }
            }

            let mut exiting = false;
            for event in events.iter() {
                if event.token() == SELF_PIPE_TOKEN {
                    exiting = true;
                    break;
                }
                let fd = event.token().0 as RawFd;
                let channel = {
                    let map = self.fd_map.lock().unwrap();
                    map.get(&fd).map(|entry| entry.channel.clone())
                };
                let Some(channel) = channel else {
                    safe_panic!("reactor: readiness event for unregistered fd {fd}");
                    continue;
                };

                // mio's epoll backend already folds EPOLLERR/EPOLLHUP into
                // both is_readable() and is_writable(), so no separate
                // error/hup precedence handling is needed here.
                if event.is_readable() && !channel.released() {
                    channel.on_recv();
                }
                if event.is_writable() && !channel.released() {
                    channel.on_send();
                }
                if channel.released() {
                    self.del(&channel);
                }
            }
            if exiting {
                let _ = pipe_read;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_terminate_round_trip_with_no_channels() {
        let reactor = Reactor::new(2, 16).unwrap();
        assert_eq!(reactor.fd_count(), 0);
        reactor.terminate();
        // Idempotent.
        reactor.terminate();
    }
}
