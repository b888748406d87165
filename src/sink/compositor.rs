//! Delays captured frames long enough for annotations to catch up, then
//! composites and forwards them to a [`VideoOutput`].

use log::{debug, error, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

use super::annotation::{Annotations, RegionAnnotation, TextAnnotation};
use super::draw::{Clock, Painter, system_font};
use super::output::VideoOutput;
use crate::config::{Config, secs};
use crate::error::{Error, Result};
use crate::frame::{Frame, now_secs};
use crate::region::Region;

#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Frames are held back this long behind the newest frame.
    pub latency: Duration,
    /// At most this many frames are held back; older ones are dropped.
    pub buffer_frames: usize,
    pub eos_timeout: Duration,
    pub font_path: Option<PathBuf>,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SinkOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            latency: secs(config.sink.latency_secs),
            buffer_frames: config.sink.buffer_frames.max(1),
            eos_timeout: secs(config.sink.eos_timeout_secs),
            font_path: config.sink.font_path.clone().or_else(system_font),
        }
    }
}

enum SinkMessage {
    Frame(Frame),
    Finish,
}

struct Shared {
    buffer: Mutex<VecDeque<Frame>>,
    annotations: Mutex<Annotations>,
    output_error: Mutex<Option<String>>,
    tx: mpsc::UnboundedSender<SinkMessage>,
    latency: f64,
    capacity: usize,
    clock: Clock,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap, cloneable access to a running compositor.
#[derive(Clone)]
pub struct SinkHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("buffered", &lock(&self.shared.buffer).len())
            .finish()
    }
}

impl SinkHandle {
    /// Queue a captured frame. Frames that have waited out the latency are
    /// handed to the compositor thread.
    pub fn on_sample(&self, frame: &Frame) {
        let now = frame.time;
        let mut buffer = lock(&self.shared.buffer);
        if buffer.len() >= self.shared.capacity {
            buffer.pop_front();
            debug!("Sink buffer full; dropping oldest frame");
        }
        buffer.push_back(frame.clone());

        while buffer.front().is_some_and(|f| f.time <= now - self.shared.latency) {
            if let Some(ready) = buffer.pop_front() {
                let _ = self.shared.tx.send(SinkMessage::Frame(ready));
            }
        }
    }

    /// Show `text` from now on, for `duration` or forever.
    pub fn draw_text(&self, text: &str, duration: Option<Duration>) {
        let start = now_secs();
        let annotation = TextAnnotation {
            time: start,
            text: format!("{} {text}", self.shared.clock.format(start)),
            duration: duration.map_or(f64::INFINITY, |d| d.as_secs_f64()),
        };
        lock(&self.shared.annotations).add_text(annotation);
    }

    /// Outline `region` on the frame captured at `time`.
    pub fn draw_region(&self, time: f64, region: Region, matched: bool, label: &str) {
        if time <= 0.0 {
            return;
        }
        lock(&self.shared.annotations).add_region(RegionAnnotation {
            time,
            region,
            label: label.to_string(),
            matched,
        });
    }
}

/// Owns the compositor thread. Dropping it flushes buffered frames and ends
/// the output stream.
pub struct SinkCompositor {
    handle: SinkHandle,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SinkCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkCompositor")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl SinkCompositor {
    pub fn start(output: Box<dyn VideoOutput>, options: SinkOptions) -> Result<Self> {
        let painter = Painter::new(options.font_path.as_deref(), Clock::default())?;
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            buffer: Mutex::new(VecDeque::with_capacity(options.buffer_frames)),
            annotations: Mutex::new(Annotations::default()),
            output_error: Mutex::new(None),
            tx,
            latency: options.latency.as_secs_f64(),
            capacity: options.buffer_frames.max(1),
            clock: painter.clock(),
        });

        let worker = Arc::clone(&shared);
        let eos_timeout = options.eos_timeout;
        let thread = std::thread::Builder::new()
            .name("sink-compositor".to_string())
            .spawn(move || composite_loop(rx, worker, output, painter, eos_timeout))?;

        Ok(Self {
            handle: SinkHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Flush every buffered frame, end the stream and stop the thread.
    ///
    /// Reports the first error the output produced, if any.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let shared = &self.handle.shared;
        let drained: Vec<Frame> = lock(&shared.buffer).drain(..).collect();
        for frame in drained {
            let _ = shared.tx.send(SinkMessage::Frame(frame));
        }
        let _ = shared.tx.send(SinkMessage::Finish);
        if thread.join().is_err() {
            return Err(Error::pipeline("sink compositor thread panicked"));
        }
        match lock(&shared.output_error).take() {
            Some(description) => Err(Error::pipeline(description)),
            None => Ok(()),
        }
    }
}

impl Drop for SinkCompositor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Sink teardown failed: {e}");
        }
    }
}

fn composite_loop(
    mut rx: mpsc::UnboundedReceiver<SinkMessage>,
    shared: Arc<Shared>,
    mut output: Box<dyn VideoOutput>,
    painter: Painter,
    eos_timeout: Duration,
) {
    let mut pushed = 0u64;
    while let Some(message) = rx.blocking_recv() {
        let frame = match message {
            SinkMessage::Frame(frame) => frame,
            SinkMessage::Finish => break,
        };
        let overlay = lock(&shared.annotations).take_overlay(frame.time);
        let mut image = frame.to_owned_image();
        painter.composite(&mut image, &overlay, now_secs());
        match output.push_frame(&image, frame.time) {
            Ok(()) => pushed += 1,
            Err(e) => {
                warn!("Failed to write frame at {:.3}: {e}", frame.time);
                lock(&shared.output_error).get_or_insert_with(|| e.to_string());
            }
        }
    }

    if pushed == 0 {
        debug!("Sink teardown: Not sending EOS, no samples sent");
        return;
    }
    debug!("teardown: Sending eos on sink pipeline");
    match output.end_of_stream() {
        Ok(ack) => {
            if ack.recv_timeout(eos_timeout).is_err() {
                debug!("Timeout waiting for sink EOS");
            }
        }
        Err(e) => debug!("Sending EOS to sink pipeline failed: {e}"),
    }
}
