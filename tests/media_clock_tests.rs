//! Scheduling behavior of the media clock against real time.

use mediaclock::clock::{ClockTime, ManualClock, MediaTime};
use mediaclock::error::{Error, Result};
use mediaclock::media_clock::{ClockConfig, MediaClock, UpdateThreshold};
use mediaclock::rational::Rational;
use mediaclock::timer::{Timer, TimerBackend};
use mediaclock::wake::WakeSignal;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn us(v: i64) -> MediaTime {
    MediaTime::from_micros(v)
}

fn running_clock(start: i64) -> MediaClock {
    let clock = MediaClock::new();
    clock.set_media_time(us(start)).unwrap();
    clock.set_active(true);
    clock
}

#[test]
fn test_request_fires_after_media_delay() {
    let clock = running_clock(1_000_000);
    let (tx, rx) = mpsc::channel();

    let started = Instant::now();
    clock
        .add_request(us(1_010_000), move |t| {
            let _ = tx.send((t, Instant::now()));
        })
        .unwrap();

    let (serviced, at) = rx.recv_timeout(WAIT).unwrap();
    let elapsed = at.duration_since(started);

    assert!(elapsed >= Duration::from_millis(9), "fired after {:?}", elapsed);
    assert!(serviced >= us(1_010_000 - 100), "serviced at {}", serviced);
    assert!(serviced < us(1_010_000 + 50_000), "serviced at {}", serviced);
    assert_eq!(clock.pending_requests(), 0);
}

#[test]
fn test_callbacks_in_media_order() {
    let clock = running_clock(0);
    let (tx, rx) = mpsc::channel();

    for t in [30_000, 10_000, 20_000] {
        let tx = tx.clone();
        clock
            .add_request(us(t), move |_| {
                let _ = tx.send(t);
            })
            .unwrap();
    }

    let order: Vec<i64> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(order, vec![10_000, 20_000, 30_000]);
}

#[test]
fn test_negative_scale_fires_descending() {
    let clock = running_clock(1_000_000);
    clock.set_scale(Rational::from_integer(-1));
    let (tx, rx) = mpsc::channel();

    for t in [990_000, 995_000, 980_000] {
        let tx = tx.clone();
        clock
            .add_request(us(t), move |_| {
                let _ = tx.send(t);
            })
            .unwrap();
    }

    let order: Vec<i64> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(order, vec![995_000, 990_000, 980_000]);
    assert!(clock.media_time() < us(1_000_000));
}

#[test]
fn test_flush_after_jump() {
    let clock = running_clock(10_000_000);
    let (tx, rx) = mpsc::channel();

    for t in [60_000_000, 61_000_000, 62_000_000] {
        let tx = tx.clone();
        clock
            .add_request(us(t), move |r| {
                let _ = tx.send((t, r));
            })
            .unwrap();
    }

    // Beyond the upper update threshold, below the discontinuity threshold
    clock.set_media_time(us(9_500_000)).unwrap();
    assert!(clock.media_time() < us(9_600_000));

    clock.flush();
    let got: Vec<_> = rx.try_iter().collect();
    assert_eq!(got.len(), 3);
    assert!(got.iter().all(|&(_, r)| r == MediaTime::UNKNOWN));
    assert_eq!(clock.pending_requests(), 0);

    // Nothing fires twice
    std::thread::sleep(Duration::from_millis(20));
    assert!(rx.try_recv().is_err());
    assert!(clock.is_active());
}

#[test]
fn test_backward_discontinuity_fires_pending() {
    let clock = running_clock(2_000_000);
    let (tx, rx) = mpsc::channel();

    for t in [5_000_000, 6_000_000] {
        let tx = tx.clone();
        clock
            .add_request(us(t), move |r| {
                let _ = tx.send(r);
            })
            .unwrap();
    }
    // Let the scheduler arm its timer
    std::thread::sleep(Duration::from_millis(50));

    clock.set_media_time(us(0)).unwrap();
    for _ in 0..2 {
        let serviced = rx.recv_timeout(WAIT).unwrap();
        assert!(serviced.is_known());
        assert!(serviced < us(500_000), "serviced at {}", serviced);
    }

    // Requests from the old timeline keep firing while the window is open
    let (tx, rx) = mpsc::channel();
    clock
        .add_request(us(2_500_000), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    let serviced = rx.recv_timeout(WAIT).unwrap();
    assert!(serviced < us(1_000_000), "serviced at {}", serviced);
}

#[test]
fn test_small_references_are_smoothed() {
    let source = Arc::new(ManualClock::starting_at(ClockTime::from_secs(1)));
    let clock = MediaClock::with_config(
        ClockConfig::default()
            .with_time_source(source.clone())
            .with_update_threshold(UpdateThreshold::new(us(8_000), us(50_000))),
    )
    .unwrap();
    clock.set_media_time(us(0)).unwrap();
    clock.set_active(true);

    // A single small difference is absorbed
    clock.set_media_time(us(-20_000)).unwrap();
    assert_eq!(clock.media_time(), us(0));

    // A persistent one is eventually corrected
    for _ in 0..64 {
        clock.set_media_time(us(-20_000)).unwrap();
    }
    assert!(clock.media_time() < us(0));

    // A large one snaps
    clock.set_media_time(us(500_000)).unwrap();
    assert_eq!(clock.media_time(), us(500_000));
}

#[test]
fn test_paused_clock_holds_requests() {
    let clock = running_clock(0);
    clock.set_scale(Rational::ZERO);
    let (tx, rx) = mpsc::channel();
    clock
        .add_request(us(1_000), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(clock.pending_requests(), 1);

    clock.set_scale(Rational::ONE);
    assert!(rx.recv_timeout(WAIT).unwrap() >= us(900));
}

#[test]
fn test_inactive_clock_holds_requests() {
    let clock = MediaClock::new();
    let (tx, rx) = mpsc::channel();
    clock
        .add_request(us(0), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    clock.set_active(true);
    assert!(rx.recv_timeout(WAIT).unwrap().is_known());
}

#[test]
fn test_panicking_callback_is_contained() {
    let clock = running_clock(0);
    clock.add_request(us(0), |_| panic!("callback failure")).unwrap();

    let (tx, rx) = mpsc::channel();
    clock
        .add_request(us(1_000), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();
    assert!(rx.recv_timeout(WAIT).unwrap().is_known());
}

#[test]
fn test_destroy_from_callback() {
    let clock = Arc::new(running_clock(0));
    let (tx, rx) = mpsc::channel();

    let tx_late = tx.clone();
    clock
        .add_request(us(60_000_000), move |r| {
            let _ = tx_late.send(("late", r));
        })
        .unwrap();
    let handle = Arc::clone(&clock);
    clock
        .add_request(us(0), move |r| {
            let _ = tx.send(("first", r));
            handle.destroy();
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap().0, "first");
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ("late", MediaTime::UNKNOWN));
    assert!(clock.is_destroyed());
    assert!(matches!(clock.add_request(us(1), |_| {}), Err(Error::Shutdown)));
}

#[test]
fn test_destroy_from_flush_while_worker_waits() {
    let clock = Arc::new(running_clock(0));
    let handle = Arc::clone(&clock);
    clock
        .add_request(us(3_600_000_000), move |r| {
            assert_eq!(r, MediaTime::UNKNOWN);
            // Give the worker time to block on the dispatch lock
            std::thread::sleep(Duration::from_millis(100));
            handle.destroy();
        })
        .unwrap();

    let waker = Arc::clone(&clock);
    let nudge = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        waker.set_scale(Rational::ONE);
    });

    let (tx, rx) = mpsc::channel();
    let flusher = Arc::clone(&clock);
    std::thread::spawn(move || {
        flusher.flush();
        let _ = tx.send(());
    });

    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok(), "flush did not return");
    nudge.join().unwrap();
    assert!(clock.is_destroyed());
    assert_eq!(clock.pending_requests(), 0);
    assert!(matches!(clock.add_request(us(1), |_| {}), Err(Error::Shutdown)));
}

#[test]
fn test_drop_flushes_pending() {
    let (tx, rx) = mpsc::channel();
    {
        let clock = running_clock(0);
        clock
            .add_request(us(60_000_000), move |r| {
                let _ = tx.send(r);
            })
            .unwrap();
    }
    assert_eq!(rx.try_recv().unwrap(), MediaTime::UNKNOWN);
}

/// Backend whose timers can never be created.
struct BrokenBackend;

impl TimerBackend for BrokenBackend {
    fn create(&self, _wake: Arc<WakeSignal>) -> Result<Box<dyn Timer>> {
        Err(Error::OutOfResources("no timers left".to_string()))
    }

    fn resolution_us(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "broken"
    }
}

#[test]
fn test_scheduling_creation_failure() {
    let clock =
        MediaClock::with_config(ClockConfig::default().with_timer_backend(Arc::new(BrokenBackend)))
            .unwrap();

    for _ in 0..2 {
        let err = clock.add_request(us(0), |_| {}).unwrap_err();
        assert!(matches!(err, Error::OutOfResources(_)));
        assert_eq!(clock.pending_requests(), 0);
    }

    // Time keeping is unaffected
    clock.set_media_time(us(123)).unwrap();
    assert_eq!(clock.media_time(), us(123));
}
