use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use switchyard::{Timer, TimerState};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn entries_fire_in_activation_order_regardless_of_insertion_order() {
    init_tracing();
    let timer = Timer::new();
    timer.init(3);
    let (tx, rx) = mpsc::channel();

    let t1 = tx.clone();
    timer.set(80, move || t1.send("late").unwrap());
    let t2 = tx.clone();
    timer.set(10, move || t2.send("early").unwrap());
    timer.set(40, move || tx.send("middle").unwrap());

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "early");
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "middle");
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "late");
}

#[test]
fn a_cancel_racing_a_worker_either_wins_or_reports_cannot_cancel() {
    init_tracing();
    let timer = Timer::new();
    timer.init(1);
    let (tx, rx) = mpsc::channel();
    let id = timer.set(15, move || tx.send(()).unwrap());

    // Close enough to the deadline that the outcome is a genuine race
    // between this thread and the one worker.
    thread::sleep(Duration::from_millis(15));
    match timer.cancel(&id) {
        Ok(()) => {
            assert_eq!(timer.get_state(&id), TimerState::Cancel);
            assert!(rx.recv_timeout(Duration::from_millis(200)).is_err(), "callback ran after a successful cancel");
        }
        Err(_) => {
            rx.recv_timeout(Duration::from_secs(1)).expect("cancel lost the race but the callback never ran");
        }
    }
}
