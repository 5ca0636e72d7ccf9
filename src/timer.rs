use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::TimerError;

fn monotonic_origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

fn now_ms() -> i64 {
    monotonic_origin().elapsed().as_millis() as i64
}

/// Lifecycle of one scheduled entry. `Ready` is never stored; it is derived
/// by [`Timer::get_state`] for an entry still `Wait`ing whose activation
/// time has already passed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Wait = 0,
    Ready = 1,
    Process = 2,
    Finish = 3,
    Cancel = 4,
}

impl From<u8> for TimerState {
    fn from(v: u8) -> Self {
        match v {
            0 => TimerState::Wait,
            1 => TimerState::Ready,
            2 => TimerState::Process,
            3 => TimerState::Finish,
            4 => TimerState::Cancel,
            _ => unreachable!("timer state byte out of range"),
        }
    }
}

/// Entries are ordered first by activation time, then by an insertion
/// sequence number that breaks ties and keeps the map a true multimap.
type EntryKey = (i64, u64);

struct Entry {
    key: EntryKey,
    state: AtomicU8,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// An owning-shared handle to one scheduled entry. Carries the entry's sort
/// key directly, so canceling it is a direct `BTreeMap` removal — no
/// separate identity index is needed the way the source's
/// `unordered_map<shared_ptr<TimerInfo>, iterator>` provided one; Rust's
/// ownership already gives us the key for free.
#[derive(Clone)]
pub struct TimerId {
    entry: Arc<Entry>,
}

impl TimerId {
    pub fn state(&self) -> TimerState {
        let raw = self.entry.state.load(Ordering::Acquire);
        let state = TimerState::from(raw);
        if state == TimerState::Wait && self.entry.key.0 <= now_ms() {
            TimerState::Ready
        } else {
            state
        }
    }
}

struct Shared {
    list: Mutex<BTreeMap<EntryKey, Arc<Entry>>>,
    cv: Condvar,
    next_seq: AtomicU64,
    shutdown: std::sync::atomic::AtomicBool,
}

/// A pool of worker threads racing over one shared, time-ordered set of
/// delayed callbacks.
pub struct Timer {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                list: Mutex::new(BTreeMap::new()),
                cv: Condvar::new(),
                next_seq: AtomicU64::new(0),
                shutdown: std::sync::atomic::AtomicBool::new(false),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `thread_count` workers. Idempotent: a `Timer` already
    /// initialized ignores later calls.
    pub fn init(&self, thread_count: usize) {
        let mut threads = self.threads.lock().unwrap();
        if !threads.is_empty() {
            return;
        }
        for _ in 0..thread_count {
            let shared = self.shared.clone();
            threads.push(thread::spawn(move || Self::run(&shared)));
        }
    }

    /// Schedules `callback` to run after `delay_ms`, returning a handle that
    /// can later be used to cancel or inspect it.
    pub fn set(&self, delay_ms: u64, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let key = (now_ms() + delay_ms as i64, self.shared.next_seq.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            key,
            state: AtomicU8::new(TimerState::Wait as u8),
            callback: Mutex::new(Some(Box::new(callback))),
        });
        {
            let mut list = self.shared.list.lock().unwrap();
            list.insert(key, entry.clone());
        }
        self.shared.cv.notify_one();
        TimerId { entry }
    }

    /// Cancels a still-pending entry. Fails with `CannotCancel` if a worker
    /// has already started (or finished) running it, with `AlreadyCanceled`
    /// if it was already canceled, and with `NotFound` if a worker raced us
    /// to it between the state check below and taking the list lock (the
    /// same window the source's implementation leaves open).
    pub fn cancel(&self, id: &TimerId) -> Result<(), TimerError> {
        match TimerState::from(id.entry.state.load(Ordering::Acquire)) {
            TimerState::Process | TimerState::Finish => return Err(TimerError::CannotCancel),
            TimerState::Cancel => return Err(TimerError::AlreadyCanceled),
            TimerState::Wait | TimerState::Ready => {}
        }
        let mut list = self.shared.list.lock().unwrap();
        if list.remove(&id.entry.key).is_none() {
            return Err(TimerError::NotFound);
        }
        id.entry.state.store(TimerState::Cancel as u8, Ordering::Release);
        Ok(())
    }

    pub fn get_state(&self, id: &TimerId) -> TimerState {
        id.state()
    }

    pub fn size(&self) -> usize {
        self.shared.list.lock().unwrap().len()
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    fn run(shared: &Arc<Shared>) {
        loop {
            let mut list = shared.list.lock().unwrap();
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            match list.keys().next().copied() {
                Some(key) => {
                    let now = now_ms();
                    if key.0 <= now {
                        let (_, entry) = list.remove_entry(&key).unwrap();
                        drop(list);
                        entry.state.store(TimerState::Process as u8, Ordering::Release);
                        if let Some(cb) = entry.callback.lock().unwrap().take() {
                            cb();
                        }
                        entry.state.store(TimerState::Finish as u8, Ordering::Release);
                    } else {
                        let wait_for = Duration::from_millis((key.0 - now) as u64);
                        let _ = shared.cv.wait_timeout(list, wait_for).unwrap();
                    }
                }
                None => {
                    let _ = shared.cv.wait(list).unwrap();
                }
            }
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.cv.notify_all();
        let mut threads = self.threads.lock().unwrap();
        for t in threads.drain(..) {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    #[test]
    fn fires_in_delay_order() {
        let timer = Timer::new();
        timer.init(2);
        let (tx, rx) = mpsc::channel();
        let tx1 = tx.clone();
        timer.set(60, move || tx1.send(1).unwrap());
        let tx2 = tx.clone();
        timer.set(10, move || tx2.send(2).unwrap());
        timer.set(30, move || tx.send(3).unwrap());
        assert_eq!(rx.recv_timeout(StdDuration::from_secs(1)).unwrap(), 2);
        assert_eq!(rx.recv_timeout(StdDuration::from_secs(1)).unwrap(), 3);
        assert_eq!(rx.recv_timeout(StdDuration::from_secs(1)).unwrap(), 1);
    }

    #[test]
    fn get_state_reports_ready_before_a_worker_claims_it() {
        let timer = Timer::new();
        let id = timer.set(50, || {});
        assert_eq!(timer.get_state(&id), TimerState::Wait);
        thread::sleep(StdDuration::from_millis(70));
        assert_eq!(timer.get_state(&id), TimerState::Ready);
    }

    #[test]
    fn cancel_before_fire_prevents_the_callback() {
        let timer = Timer::new();
        timer.init(1);
        let (tx, rx) = mpsc::channel();
        let id = timer.set(200, move || tx.send(()).unwrap());
        assert!(timer.cancel(&id).is_ok());
        assert_eq!(timer.get_state(&id), TimerState::Cancel);
        assert!(rx.recv_timeout(StdDuration::from_millis(400)).is_err());
    }

    #[test]
    fn cancel_after_fire_reports_cannot_cancel() {
        let timer = Timer::new();
        timer.init(1);
        let (tx, rx) = mpsc::channel();
        let id = timer.set(5, move || tx.send(()).unwrap());
        rx.recv_timeout(StdDuration::from_millis(500)).unwrap();
        // worker sets Finish right after running the callback; give it a
        // moment in case of scheduling noise between the send and the store.
        thread::sleep(StdDuration::from_millis(10));
        assert_eq!(timer.cancel(&id), Err(TimerError::CannotCancel));
    }

    #[test]
    fn double_cancel_reports_already_canceled() {
        let timer = Timer::new();
        let id = timer.set(200, || {});
        timer.cancel(&id).unwrap();
        assert_eq!(timer.cancel(&id), Err(TimerError::AlreadyCanceled));
    }

    #[test]
    fn size_and_empty_track_pending_entries() {
        let timer = Timer::new();
        assert!(timer.empty());
        let id = timer.set(500, || {});
        assert_eq!(timer.size(), 1);
        timer.cancel(&id).unwrap();
        assert!(timer.empty());
    }
}
