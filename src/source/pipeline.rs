//! Capture pipelines feeding the frame source

use image::RgbImage;
use std::sync::Arc;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::channels::EventSender;
use super::types::PipelineEvent;
use crate::error::{Error, Result};
use crate::frame::{Frame, now_secs};

/// Handle a pipeline uses to report to the capture loop.
///
/// Each pipeline instance gets its own handle; once the pipeline has been
/// replaced its events are ignored.
#[derive(Debug, Clone)]
pub struct PipelineEvents {
    generation: u64,
    tx: EventSender,
}

impl PipelineEvents {
    pub(crate) fn new(generation: u64, tx: EventSender) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the capture loop has gone away.
    pub fn send(&self, event: PipelineEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn sample(&self, frame: Frame) -> bool {
        self.send(PipelineEvent::Sample(frame))
    }
}

/// A running source of video samples, e.g. a capture card or a file decoder.
pub trait CapturePipeline: Send {
    fn start(&mut self) -> Result<()>;

    /// Stop immediately. Must be safe to call more than once.
    fn stop(&mut self);

    /// Ask the pipeline to finish: it should emit [`PipelineEvent::Eos`] once
    /// everything in flight has been delivered.
    fn send_eos(&mut self) -> Result<()>;
}

/// Builds a fresh pipeline for each (re)start.
pub trait PipelineFactory: Send {
    fn create(&mut self, events: PipelineEvents) -> Result<Box<dyn CapturePipeline>>;
}

impl<F> PipelineFactory for F
where
    F: FnMut(PipelineEvents) -> Result<Box<dyn CapturePipeline>> + Send,
{
    fn create(&mut self, events: PipelineEvents) -> Result<Box<dyn CapturePipeline>> {
        self(events)
    }
}

enum PlayerControl {
    Stop,
    Eos,
}

/// Plays still images at a fixed frame rate, timestamped with the wall clock.
///
/// Without looping it emits EOS after the last image.
pub struct FramePlayer {
    images: Arc<Vec<Arc<RgbImage>>>,
    interval: Duration,
    looping: bool,
    events: PipelineEvents,
    worker: Option<(std_mpsc::Sender<PlayerControl>, JoinHandle<()>)>,
}

impl FramePlayer {
    pub fn new(images: Arc<Vec<Arc<RgbImage>>>, fps: f64, events: PipelineEvents) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::configuration(format!("frame rate must be positive, got {fps}")));
        }
        Ok(Self {
            images,
            interval: Duration::from_secs_f64(1.0 / fps),
            looping: false,
            events,
            worker: None,
        })
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// A factory producing a new player over the same images on every restart.
    pub fn factory(images: Vec<RgbImage>, fps: f64, looping: bool) -> impl PipelineFactory {
        let images: Arc<Vec<Arc<RgbImage>>> = Arc::new(images.into_iter().map(Arc::new).collect());
        move |events: PipelineEvents| -> Result<Box<dyn CapturePipeline>> {
            let player = FramePlayer::new(Arc::clone(&images), fps, events)?.looping(looping);
            Ok(Box::new(player))
        }
    }

    fn play(
        images: Arc<Vec<Arc<RgbImage>>>,
        interval: Duration,
        looping: bool,
        events: PipelineEvents,
        control: std_mpsc::Receiver<PlayerControl>,
    ) {
        events.send(PipelineEvent::Running);
        let mut sequence = 0u64;
        loop {
            for image in images.iter() {
                let frame = Frame::from_shared(Arc::clone(image), now_secs(), Some(sequence));
                sequence += 1;
                if !events.sample(frame) {
                    return;
                }
                match control.recv_timeout(interval) {
                    Ok(PlayerControl::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                    Ok(PlayerControl::Eos) => {
                        events.send(PipelineEvent::Eos);
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            if !looping || images.is_empty() {
                events.send(PipelineEvent::Eos);
                return;
            }
        }
    }
}

impl CapturePipeline for FramePlayer {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (tx, rx) = std_mpsc::channel();
        let images = Arc::clone(&self.images);
        let events = self.events.clone();
        let (interval, looping) = (self.interval, self.looping);
        let handle = std::thread::Builder::new()
            .name(format!("frame-player-{}", self.events.generation()))
            .spawn(move || Self::play(images, interval, looping, events, rx))?;
        self.worker = Some((tx, handle));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((tx, handle)) = self.worker.take() {
            let _ = tx.send(PlayerControl::Stop);
            if handle.join().is_err() {
                log::error!("frame player thread panicked");
            }
        }
    }

    fn send_eos(&mut self) -> Result<()> {
        match &self.worker {
            Some((tx, _)) => {
                // The worker may already have finished and sent EOS itself.
                let _ = tx.send(PlayerControl::Eos);
                Ok(())
            }
            None => Err(Error::pipeline("frame player is not running")),
        }
    }
}

impl Drop for FramePlayer {
    fn drop(&mut self) {
        self.stop();
    }
}
