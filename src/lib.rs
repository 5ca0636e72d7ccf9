//! A sharded, multi-threaded, level-triggered TCP reactor: independent
//! readiness instances pinned one fd at a time to a worker thread, a small
//! channel-hook hierarchy (connected / client / server) layered on top, a
//! growable ring and linear buffer pair for the socket-level read/write
//! queues, a counting semaphore, and a multi-worker delayed-callback timer.

mod buffer;
mod channel;
mod error;
mod macros;
mod reactor;
mod sync;
mod timer;

pub use buffer::{LinearBuffer, RingBuffer};
pub use channel::{
    ClientChannel, ClientHooks, ConnectedChannel, ConnectedHandle, ConnectedHooks, Decoder, ServerChannel, ServerHooks,
};
pub use error::{ReactorError, TimerError};
pub use reactor::Reactor;
pub use sync::Semaphore;
pub use timer::{Timer, TimerId, TimerState};
