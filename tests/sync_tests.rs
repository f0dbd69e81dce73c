//! End-to-end synchronization: samples in, clock adjustments out.

use mediaclock::clock::{ClockTime, ManualClock, MediaTime};
use mediaclock::error::Error;
use mediaclock::format::Framerate;
use mediaclock::media_clock::{ClockConfig, MediaClock};
use mediaclock::rational::Rational;
use mediaclock::stats::StreamEvent;
use mediaclock::sync::{AdjusterConfig, ClockAdjuster, ClockController, LatencyTarget};
use std::sync::Arc;
use std::time::Duration;

const FRAME: i64 = 33_333;

fn us(v: i64) -> MediaTime {
    MediaTime::from_micros(v)
}

/// Two clocks sharing a manually stepped time source.
fn manual_clocks() -> (Arc<ManualClock>, Arc<MediaClock>, Arc<MediaClock>) {
    let source = Arc::new(ManualClock::starting_at(ClockTime::from_secs(100)));
    let make = |name: &str| {
        Arc::new(
            MediaClock::with_config(
                ClockConfig::default()
                    .with_name(name)
                    .with_time_source(source.clone()),
            )
            .unwrap(),
        )
    };
    let video = make("video");
    let audio = make("audio");
    (source, video, audio)
}

#[test]
fn test_restart_drives_all_clocks() {
    let (source, video, audio) = manual_clocks();
    let mut adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
    adjuster.attach(Arc::clone(&video));
    adjuster.attach(Arc::clone(&audio));

    let mut last = StreamEvent::None;
    for _ in 0..2 {
        source.advance(Duration::from_micros(FRAME as u64));
        let wall = video.wall_time();
        adjuster.process_sample(1, wall, wall + us(200_000));
        last = adjuster.process_sample(2, wall, wall + us(260_000));
    }
    assert_eq!(last, StreamEvent::FrameComplete);

    let adjustment = adjuster.last_adjustment().unwrap();
    assert!(adjustment.restarted);
    assert_eq!(adjustment.min_stream, 1);
    assert_eq!(adjustment.max_stream, 2);

    let expected = video.wall_time() + us(200_000 - 60_000);
    assert!(video.is_active() && audio.is_active());
    assert_eq!(video.media_time(), expected);
    assert_eq!(audio.media_time(), expected);

    // Clocks keep running with wall time
    source.advance(Duration::from_millis(10));
    assert_eq!(video.media_time(), expected + us(10_000));
}

#[test]
fn test_soft_correction_converges() {
    let (source, video, _audio) = manual_clocks();
    let latency = LatencyTarget::default().with_attack(us(10_000), us(100_000));
    let mut adjuster =
        ClockAdjuster::new(AdjusterConfig::default().with_latency(latency)).unwrap();
    adjuster.attach(Arc::clone(&video));

    for _ in 0..240 {
        source.advance(Duration::from_micros(FRAME as u64));
        let wall = video.wall_time();
        adjuster.process_sample(1, wall, wall + us(200_000));
        adjuster.process_sample(2, wall, wall + us(220_000));
    }

    // Latency target behind the most advanced stream
    let target = 220_000 - 60_000;
    assert_eq!(adjuster.target(), target);
    assert!((adjuster.offset() - target).abs() < 2_000, "offset {}", adjuster.offset());
}

#[test]
fn test_seek_restarts_and_flushes() {
    let (source, video, _audio) = manual_clocks();
    let mut adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
    adjuster.attach(Arc::clone(&video));

    let feed = |adjuster: &mut ClockAdjuster, offset: i64, frames: usize| {
        for _ in 0..frames {
            source.advance(Duration::from_micros(FRAME as u64));
            let wall = video.wall_time();
            adjuster.process_sample(1, wall, wall + us(offset));
            adjuster.process_sample(2, wall, wall + us(offset));
        }
    };
    feed(&mut adjuster, 100_000, 4);

    let (tx, rx) = std::sync::mpsc::channel();
    video
        .add_request(us(3_600_000_000_000), move |r| {
            let _ = tx.send(r);
        })
        .unwrap();

    adjuster.signal_discontinuity();
    assert!(adjuster.is_discontinuous());
    feed(&mut adjuster, 5_000_000, 2);

    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), MediaTime::UNKNOWN);
    assert_eq!(adjuster.offset(), 5_000_000 - 60_000);
    assert_eq!(video.media_time(), video.wall_time() + us(5_000_000 - 60_000));
}

#[test]
fn test_controller_end_to_end() {
    let (source, video, audio) = manual_clocks();
    let mut adjuster =
        ClockAdjuster::new(AdjusterConfig::default().with_name("av")).unwrap();
    adjuster.attach(Arc::clone(&video));
    adjuster.attach(Arc::clone(&audio));
    let controller = ClockController::spawn(adjuster).unwrap();

    controller.set_frame_rate(Framerate::FPS_25).unwrap();
    for _ in 0..2 {
        source.advance(Duration::from_millis(40));
        let wall = video.wall_time();
        controller.report_sample(1, wall, wall + us(150_000)).unwrap();
        controller.report_sample(2, wall, wall + us(90_000)).unwrap();
        controller.sync().unwrap();
    }

    let expected = video.wall_time() + us(90_000 - 60_000);
    assert!(video.is_active());
    assert_eq!(video.media_time(), expected);
    assert_eq!(audio.media_time(), expected);

    controller.set_scale(Rational::ZERO).unwrap();
    controller.sync().unwrap();
    assert!(video.is_paused() && audio.is_paused());
}

#[test]
fn test_controller_queue_full() {
    let clock = Arc::new(MediaClock::new());
    let mut adjuster = ClockAdjuster::new(AdjusterConfig::default()).unwrap();
    adjuster.attach(Arc::clone(&clock));
    let controller = ClockController::with_queue_capacity(adjuster, 1).unwrap();

    // The restart flushes this request on the adjustment thread, which then
    // blocks in the callback until released
    let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    clock
        .add_request(us(3_600_000_000_000), move |_| {
            let _ = gate_rx.recv();
        })
        .unwrap();

    let wall = clock.wall_time();
    controller.report_sample(1, wall, wall).unwrap();
    controller.sync().unwrap();
    controller.report_sample(2, wall, wall).unwrap();
    controller.sync().unwrap();
    let wall = wall + us(FRAME);
    controller.report_sample(1, wall, wall).unwrap();
    controller.sync().unwrap();
    controller.report_sample(2, wall, wall).unwrap();

    let mut full = false;
    for k in 0..3 {
        match controller.report_sample(3, wall, wall + us(k)) {
            Ok(()) => {}
            Err(Error::OutOfResources(_)) => {
                full = true;
                break;
            }
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }
    assert!(full);

    gate_tx.send(()).unwrap();
    controller.sync().unwrap();
    assert!(clock.is_active());
}
