//! Tests for the sink compositor

use super::*;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::region::Region;
use crate::sink::annotation::MATCHED;
use image::{Rgb, RgbImage};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Recorder {
    frames: Arc<Mutex<Vec<(f64, RgbImage)>>>,
    eos: Arc<Mutex<u32>>,
    fail_pushes: bool,
    withhold_ack: bool,
    // Keeps the EOS acknowledgement channel open without ever answering.
    held_ack: Arc<Mutex<Option<std_mpsc::Sender<()>>>>,
}

impl Recorder {
    fn times(&self) -> Vec<f64> {
        self.frames.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    fn eos_count(&self) -> u32 {
        *self.eos.lock().unwrap()
    }
}

impl VideoOutput for Recorder {
    fn push_frame(&mut self, image: &RgbImage, time: f64) -> Result<()> {
        if self.fail_pushes {
            return Err(Error::pipeline("disk full"));
        }
        self.frames.lock().unwrap().push((time, image.clone()));
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<std_mpsc::Receiver<()>> {
        *self.eos.lock().unwrap() += 1;
        let (tx, rx) = std_mpsc::channel();
        if self.withhold_ack {
            *self.held_ack.lock().unwrap() = Some(tx);
        } else {
            tx.send(()).unwrap();
        }
        Ok(rx)
    }
}

fn options() -> SinkOptions {
    SinkOptions {
        latency: Duration::from_millis(500),
        buffer_frames: 35,
        eos_timeout: Duration::from_millis(100),
        font_path: None,
    }
}

fn frame(time: f64) -> Frame {
    Frame::new(RgbImage::new(120, 100), time)
}

#[test]
fn test_frames_flow_in_order_and_flush_on_shutdown() {
    let recorder = Recorder::default();
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), options()).unwrap();
    let handle = sink.handle();
    for i in 0..=10 {
        handle.on_sample(&frame(100.0 + i as f64 * 0.1));
    }
    sink.shutdown().unwrap();

    let times = recorder.times();
    assert_eq!(times.len(), 11);
    assert!(times.windows(2).all(|w| w[0] < w[1]), "{times:?}");
    assert_eq!(recorder.eos_count(), 1);
}

#[test]
fn test_frames_held_back_by_latency() {
    let recorder = Recorder::default();
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), options()).unwrap();
    let handle = sink.handle();
    handle.on_sample(&frame(10.0));
    handle.on_sample(&frame(10.2));
    handle.on_sample(&frame(10.6));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while recorder.times().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.times(), vec![10.0]);

    sink.shutdown().unwrap();
    assert_eq!(recorder.times(), vec![10.0, 10.2, 10.6]);
}

#[test]
fn test_full_buffer_drops_oldest() {
    let recorder = Recorder::default();
    let opts = SinkOptions {
        latency: Duration::from_secs(100),
        buffer_frames: 3,
        ..options()
    };
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), opts).unwrap();
    for i in 0..5 {
        sink.handle().on_sample(&frame(i as f64 + 1.0));
    }
    sink.shutdown().unwrap();
    assert_eq!(recorder.times(), vec![3.0, 4.0, 5.0]);
}

#[test]
fn test_no_eos_without_frames() {
    let recorder = Recorder::default();
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), options()).unwrap();
    sink.shutdown().unwrap();
    assert_eq!(recorder.eos_count(), 0);
}

#[test]
fn test_missing_eos_ack_is_not_fatal() {
    let recorder = Recorder {
        withhold_ack: true,
        ..Recorder::default()
    };
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), options()).unwrap();
    sink.handle().on_sample(&frame(1.0));
    let started = std::time::Instant::now();
    sink.shutdown().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(recorder.eos_count(), 1);
}

#[test]
fn test_output_errors_reported_on_shutdown() {
    let recorder = Recorder {
        fail_pushes: true,
        ..Recorder::default()
    };
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), options()).unwrap();
    sink.handle().on_sample(&frame(1.0));
    let err = sink.shutdown().unwrap_err();
    assert!(err.to_string().contains("disk full"));
    // Nothing was pushed, so no EOS either.
    assert_eq!(recorder.eos_count(), 0);
}

#[test]
fn test_region_drawn_only_on_matching_frame() {
    let recorder = Recorder::default();
    let mut sink = SinkCompositor::start(Box::new(recorder.clone()), options()).unwrap();
    let handle = sink.handle();
    handle.draw_region(2.0, Region::new(60, 60, 30, 20), true, "");
    for t in [1.0, 2.0, 3.0] {
        handle.on_sample(&frame(t));
    }
    sink.shutdown().unwrap();

    let frames = recorder.frames.lock().unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(*frames[0].1.get_pixel(60, 60), Rgb([0, 0, 0]));
    assert_eq!(*frames[1].1.get_pixel(60, 60), MATCHED);
    assert_eq!(*frames[2].1.get_pixel(60, 60), Rgb([0, 0, 0]));
}

#[test]
fn test_png_sequence_output_writes_frames() {
    let dir = tempfile::tempdir().unwrap();
    let output = PngSequenceOutput::new(dir.path().join("video")).unwrap();
    let video_dir = output.dir().to_path_buf();
    let mut sink = SinkCompositor::start(Box::new(output), options()).unwrap();
    sink.handle().draw_text("hello", Some(Duration::from_secs(1)));
    sink.handle().on_sample(&frame(5.0));
    sink.handle().on_sample(&frame(5.1));
    sink.shutdown().unwrap();

    for name in ["frame-000000.png", "frame-000001.png"] {
        let image = image::open(video_dir.join(name)).unwrap();
        assert_eq!((image.width(), image.height()), (120, 100));
    }
    assert!(!video_dir.join("frame-000002.png").exists());
}

#[test]
fn test_configured_font_wins_over_system_font() {
    let mut config = crate::config::Config::default();
    assert_eq!(SinkOptions::from_config(&config).font_path, draw::system_font());

    config.sink.font_path = Some("/opt/fonts/Custom.ttf".into());
    assert_eq!(
        SinkOptions::from_config(&config).font_path,
        Some(std::path::PathBuf::from("/opt/fonts/Custom.ttf"))
    );
}
