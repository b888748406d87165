//! Tests for the frame source

use super::*;
use crate::error::{Error, Result};
use crate::frame::{Frame, now_secs};
use image::{Rgb, RgbImage};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Create(u64),
    Start(u64),
    Stop(u64),
    SendEos(u64),
}

/// Pipeline that does nothing by itself; tests drive it through its event handle.
#[derive(Clone, Default)]
struct Script {
    calls: Arc<Mutex<Vec<Call>>>,
    handles: Arc<Mutex<Vec<PipelineEvents>>>,
    eos_on_request: bool,
}

impl Script {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| f(c)).count()
    }

    fn handle(&self, generation: u64) -> PipelineEvents {
        self.handles.lock().unwrap()[generation as usize - 1].clone()
    }

    fn factory(&self) -> impl PipelineFactory + 'static {
        let script = self.clone();
        move |events: PipelineEvents| -> Result<Box<dyn CapturePipeline>> {
            let generation = events.generation();
            script.calls.lock().unwrap().push(Call::Create(generation));
            script.handles.lock().unwrap().push(events.clone());
            Ok(Box::new(ScriptedPipeline {
                script: script.clone(),
                events,
            }))
        }
    }
}

struct ScriptedPipeline {
    script: Script,
    events: PipelineEvents,
}

impl ScriptedPipeline {
    fn record(&self, call: Call) {
        self.script.calls.lock().unwrap().push(call);
    }
}

impl CapturePipeline for ScriptedPipeline {
    fn start(&mut self) -> Result<()> {
        self.record(Call::Start(self.events.generation()));
        Ok(())
    }

    fn stop(&mut self) {
        self.record(Call::Stop(self.events.generation()));
    }

    fn send_eos(&mut self) -> Result<()> {
        self.record(Call::SendEos(self.events.generation()));
        if self.script.eos_on_request {
            self.events.sample(Frame::new(RgbImage::new(2, 2), now_secs()));
            self.events.send(PipelineEvent::Eos);
        }
        Ok(())
    }
}

fn fast_options(restart_source: bool) -> SourceOptions {
    SourceOptions {
        restart_source,
        teardown_eos: false,
        underrun_timeout: Duration::from_millis(150),
        restart_delay: Duration::from_millis(50),
        teardown_eos_timeout: Duration::from_millis(500),
    }
}

fn wait_for(what: &str, f: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !f() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn frame_at(time: f64) -> Frame {
    Frame::new(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])), time)
}

#[test]
fn test_get_frame_without_video_is_no_video() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();

    let started = Instant::now();
    let err = source.get_frame(Duration::from_millis(100), None).unwrap_err();
    assert!(matches!(err, Error::NoVideo));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn test_get_frame_returns_promptly_when_fresh_frame_exists() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();
    let now = now_secs();
    script.handle(1).sample(frame_at(now));
    wait_for("first frame", || source.get_frame(Duration::from_millis(10), Some(now - 1.0)).is_ok());

    let started = Instant::now();
    let frame = source.get_frame(Duration::from_secs(10), None).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(frame.time, now);
}

#[test]
fn test_get_frame_waits_for_frame_newer_than_since() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();
    let now = now_secs();
    script.handle(1).sample(frame_at(now));
    wait_for("first frame", || source.get_frame(Duration::from_millis(10), Some(now - 1.0)).is_ok());

    let err = source.get_frame(Duration::from_millis(50), Some(now)).unwrap_err();
    assert!(matches!(err, Error::NoVideo));

    let events = script.handle(1);
    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        events.sample(frame_at(now + 0.04));
    });
    let frame = source.get_frame(Duration::from_secs(2), Some(now)).unwrap();
    assert_eq!(frame.time, now + 0.04);
    sender.join().unwrap();
}

#[test]
fn test_pipeline_error_is_raised_to_readers() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();
    script.handle(1).send(PipelineEvent::Error("decoder exploded".into()));

    wait_for("error to propagate", || {
        matches!(source.get_frame(Duration::from_millis(10), None), Err(Error::Pipeline { .. }))
    });
    let err = source.get_frame(Duration::from_millis(10), None).unwrap_err();
    assert!(err.to_string().contains("decoder exploded"));

    // The error restarts the pipeline; a new frame replaces the error.
    wait_for("restart", || script.count(|c| matches!(c, Call::Start(2))) == 1);
    script.handle(2).sample(frame_at(now_secs()));
    wait_for("recovery", || source.get_frame(Duration::from_millis(10), Some(0.0)).is_ok());
}

#[test]
fn test_repeated_underruns_cause_one_restart() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(true), None).unwrap();
    let events = script.handle(1);
    for _ in 0..5 {
        events.send(PipelineEvent::Underrun);
        std::thread::sleep(Duration::from_millis(10));
    }

    wait_for("restart", || script.count(|c| matches!(c, Call::Start(2))) == 1);
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(script.count(|c| matches!(c, Call::Create(_))), 2);
    assert_eq!(script.count(|c| matches!(c, Call::Stop(1))), 1);
    drop(source);
}

#[test]
fn test_running_cancels_pending_restart() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(true), None).unwrap();
    let events = script.handle(1);
    events.send(PipelineEvent::Underrun);
    events.send(PipelineEvent::Running);

    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(script.calls(), vec![Call::Create(1), Call::Start(1)]);
    drop(source);
}

#[test]
fn test_underrun_ignored_when_restart_disabled() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();
    script.handle(1).send(PipelineEvent::Underrun);

    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(script.count(|c| matches!(c, Call::Create(_))), 1);
    drop(source);
}

#[test]
fn test_eos_restarts_and_ignores_stale_pipeline() {
    let script = Script::default();
    let source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();
    let first = script.handle(1);
    first.send(PipelineEvent::Eos);

    wait_for("restart", || script.count(|c| matches!(c, Call::Start(2))) == 1);
    let stale = now_secs() + 100.0;
    first.sample(frame_at(stale));
    let fresh = now_secs();
    script.handle(2).sample(frame_at(fresh));

    wait_for("fresh frame", || source.get_frame(Duration::from_millis(10), Some(fresh - 1.0)).is_ok());
    let frame = source.get_frame(Duration::from_millis(10), Some(fresh - 1.0)).unwrap();
    assert_eq!(frame.time, fresh);
    drop(source);
}

#[test]
fn test_shutdown_stops_pipeline_without_eos_by_default() {
    let script = Script::default();
    let mut source = FrameSource::start(script.factory(), fast_options(false), None).unwrap();
    source.shutdown();
    assert_eq!(script.calls(), vec![Call::Create(1), Call::Start(1), Call::Stop(1)]);
    // Idempotent
    source.shutdown();
}

#[test]
fn test_teardown_eos_waits_for_pipeline() {
    let script = Script {
        eos_on_request: true,
        ..Script::default()
    };
    let options = SourceOptions {
        teardown_eos: true,
        ..fast_options(true)
    };
    let mut source = FrameSource::start(script.factory(), options, None).unwrap();
    let started = Instant::now();
    source.shutdown();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(
        script.calls(),
        vec![Call::Create(1), Call::Start(1), Call::SendEos(1), Call::Stop(1)]
    );
    // Teardown EOS does not trigger a restart.
    assert_eq!(script.count(|c| matches!(c, Call::Create(_))), 1);
}

#[test]
fn test_teardown_eos_gives_up_after_timeout() {
    let script = Script::default();
    let options = SourceOptions {
        teardown_eos: true,
        teardown_eos_timeout: Duration::from_millis(100),
        ..fast_options(false)
    };
    let mut source = FrameSource::start(script.factory(), options, None).unwrap();
    let started = Instant::now();
    source.shutdown();
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(script.count(|c| matches!(c, Call::Stop(1))), 1);
}

#[test]
fn test_factory_failure_fails_start() {
    let factory = |_events: PipelineEvents| -> Result<Box<dyn CapturePipeline>> {
        Err(Error::pipeline("no capture device"))
    };
    let err = FrameSource::start(factory, SourceOptions::default(), None).unwrap_err();
    assert!(matches!(err, Error::Pipeline { .. }));
}

#[test]
fn test_frame_player_feeds_source() {
    let images = vec![
        RgbImage::from_pixel(8, 6, Rgb([255, 0, 0])),
        RgbImage::from_pixel(8, 6, Rgb([0, 255, 0])),
    ];
    let factory = FramePlayer::factory(images, 50.0, true);
    let source = FrameSource::start(factory, fast_options(false), None).unwrap();

    let first = source.get_frame(Duration::from_secs(2), None).unwrap();
    let second = source.get_frame(Duration::from_secs(2), Some(first.time)).unwrap();
    assert!(second.time > first.time);
    assert_eq!((second.width(), second.height()), (8, 6));
    assert!(second.sample.unwrap() > first.sample.unwrap());
}

#[test]
fn test_frame_player_rejects_bad_frame_rate() {
    let (_, _, tx, _rx) = channels::create_source_channels();
    let events = PipelineEvents::new(1, tx);
    let err = FramePlayer::new(Arc::new(Vec::new()), 0.0, events).err().unwrap();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn test_frame_player_without_looping_ends_with_eos() {
    let (_, _, tx, mut rx) = channels::create_source_channels();
    let events = PipelineEvents::new(7, tx);
    let image = Arc::new(RgbImage::new(2, 2));
    let mut player = FramePlayer::new(Arc::new(vec![image]), 100.0, events).unwrap();
    player.start().unwrap();

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok((generation, event)) => {
                assert_eq!(generation, 7);
                let eos = matches!(event, PipelineEvent::Eos);
                seen.push(event);
                if eos {
                    break;
                }
            }
            Err(_) => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    player.stop();

    assert!(matches!(seen.first(), Some(PipelineEvent::Running)));
    assert!(matches!(seen.get(1), Some(PipelineEvent::Sample(_))));
    assert!(matches!(seen.last(), Some(PipelineEvent::Eos)));
}
