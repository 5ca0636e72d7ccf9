use std::sync::{Condvar, Mutex};

/// A counting semaphore: `signal` increments the count and wakes one
/// waiter; `wait` blocks until the count is positive, then decrements it.
pub struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_a_signal_arrives() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        sem.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn signals_accumulate_for_later_waiters() {
        let sem = Semaphore::new(0);
        sem.signal();
        sem.signal();
        sem.wait();
        sem.wait();
    }
}
