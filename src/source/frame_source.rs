//! The capture thread and the latest-frame cell

use log::{debug, error, info, trace, warn};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::FrameProvider;
use super::channels::{EventReceiver, EventSender, create_source_channels};
use super::pipeline::{CapturePipeline, PipelineEvents, PipelineFactory};
use super::recovery::{Action, Recovery};
use super::types::{PipelineEvent, SourceCommand};
use crate::config::{Config, secs};
use crate::error::{Error, Result};
use crate::frame::{Frame, now_secs};
use crate::sink::SinkHandle;

/// Timestamps further than this from the source start time are suspicious.
const SUSPICIOUS_OFFSET_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Restart the pipeline when it stops delivering data.
    pub restart_source: bool,
    /// Push EOS through the pipeline before stopping it on teardown.
    pub teardown_eos: bool,
    pub underrun_timeout: Duration,
    pub restart_delay: Duration,
    pub teardown_eos_timeout: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SourceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            restart_source: config.global.restart_source,
            teardown_eos: config.global.source_teardown_eos,
            underrun_timeout: secs(config.source.underrun_timeout_secs),
            restart_delay: secs(config.source.restart_delay_secs),
            teardown_eos_timeout: secs(config.source.teardown_eos_timeout_secs),
        }
    }
}

enum Latest {
    Empty,
    Frame(Frame),
    Error(String),
}

/// The single shared cell between the capture thread and readers.
struct LatestFrame {
    cell: Mutex<Latest>,
    changed: Condvar,
}

impl LatestFrame {
    fn new() -> Self {
        Self {
            cell: Mutex::new(Latest::Empty),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Latest> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, latest: Latest) {
        *self.lock() = latest;
        self.changed.notify_all();
    }

    fn wait(&self, timeout: Duration, since: f64) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            match &*guard {
                Latest::Frame(frame) if frame.time > since => return Ok(frame.clone()),
                Latest::Error(description) => return Err(Error::pipeline(description.clone())),
                _ => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::NoVideo);
            }
            guard = self
                .changed
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Owns the capture thread. Frames are read with [`FrameSource::get_frame`].
pub struct FrameSource {
    latest: Arc<LatestFrame>,
    commands: mpsc::Sender<SourceCommand>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl FrameSource {
    /// Start the capture thread and the first pipeline.
    ///
    /// Fails if the first pipeline cannot be created or started; later
    /// failures are handled by restarting.
    pub fn start<F>(factory: F, options: SourceOptions, sink: Option<SinkHandle>) -> Result<Self>
    where
        F: PipelineFactory + 'static,
    {
        let latest = Arc::new(LatestFrame::new());
        let (cmd_tx, cmd_rx, event_tx, event_rx) = create_source_channels();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        let capture = CaptureLoop {
            factory: Box::new(factory),
            pipeline: None,
            generation: 0,
            event_tx,
            events: event_rx,
            commands: cmd_rx,
            recovery: Recovery::new(options.restart_source, options.underrun_timeout, options.restart_delay),
            latest: Arc::clone(&latest),
            sink,
            options,
            init_time: now_secs(),
        };

        let thread = std::thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(capture.run(ready_tx));
            })?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(Error::pipeline("capture thread exited during startup")));
        if let Err(e) = started {
            if thread.join().is_err() {
                error!("frame-source thread panicked during startup");
            }
            return Err(e);
        }

        Ok(Self {
            latest,
            commands: cmd_tx,
            thread: Some(thread),
        })
    }

    /// The latest frame captured after `since` (default: `timeout` ago).
    ///
    /// Blocks until such a frame arrives. Fails with [`Error::NoVideo`] when
    /// none does within `timeout`, or with [`Error::Pipeline`] if the most
    /// recent thing the pipeline produced was an error.
    pub fn get_frame(&self, timeout: Duration, since: Option<f64>) -> Result<Frame> {
        let since = since.unwrap_or_else(|| now_secs() - timeout.as_secs_f64());
        self.latest.wait(timeout, since)
    }

    /// Tear down the pipeline and wait for the capture thread to exit.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.commands.try_send(SourceCommand::Teardown).is_err() {
            debug!("teardown: capture loop already gone");
        }
        if thread.join().is_err() {
            error!("frame-source thread panicked");
        }
    }
}

impl FrameProvider for FrameSource {
    fn get_frame(&self, timeout: Duration, since: Option<f64>) -> Result<Frame> {
        FrameSource::get_frame(self, timeout, since)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct CaptureLoop {
    factory: Box<dyn PipelineFactory>,
    pipeline: Option<Box<dyn CapturePipeline>>,
    generation: u64,
    event_tx: EventSender,
    events: EventReceiver,
    commands: mpsc::Receiver<SourceCommand>,
    recovery: Recovery,
    latest: Arc<LatestFrame>,
    sink: Option<SinkHandle>,
    options: SourceOptions,
    init_time: f64,
}

async fn recovery_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl CaptureLoop {
    async fn run(mut self, ready: std_mpsc::SyncSender<Result<()>>) {
        let started = self.start_pipeline();
        let failed = started.is_err();
        let _ = ready.send(started);
        if failed {
            return;
        }
        info!("Frame source started");

        loop {
            let deadline = self.recovery.deadline();
            tokio::select! {
                event = self.events.recv() => match event {
                    Some((generation, event)) if generation == self.generation => self.handle_event(event),
                    Some((generation, event)) => {
                        trace!("Ignoring {event:?} from stale pipeline {generation}");
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(SourceCommand::Teardown) | None => break,
                },
                _ = recovery_timer(deadline) => {
                    let action = self.recovery.on_timer(Instant::now());
                    self.apply(action);
                }
            }
        }

        self.teardown().await;
        info!("Frame source stopped");
    }

    fn start_pipeline(&mut self) -> Result<()> {
        self.generation += 1;
        let events = PipelineEvents::new(self.generation, self.event_tx.clone());
        let mut pipeline = self.factory.create(events)?;
        if let Err(e) = pipeline.start() {
            pipeline.stop();
            return Err(e);
        }
        debug!("Started source pipeline {}", self.generation);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn stop_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
            debug!("Stopped source pipeline {}", self.generation);
        }
    }

    fn apply(&mut self, mut action: Option<Action>) {
        while let Some(next) = action.take() {
            match next {
                Action::StopPipeline => self.stop_pipeline(),
                Action::StartPipeline => {
                    info!("Restarting source pipeline");
                    if let Err(e) = self.start_pipeline() {
                        error!("Failed to restart source pipeline: {e}");
                        self.latest.publish(Latest::Error(e.to_string()));
                        action = self.recovery.on_error(Instant::now());
                    }
                }
            }
        }
    }

    fn publish(&self, frame: Frame) {
        if (frame.time - self.init_time).abs() > SUSPICIOUS_OFFSET_SECS {
            warn!(
                "Received frame with suspicious timestamp {:.3} (source started at {:.3}). \
                 Check the system clock and the capture device's clock source.",
                frame.time, self.init_time
            );
        }
        if let Some(sink) = &self.sink {
            sink.on_sample(&frame);
        }
        self.latest.publish(Latest::Frame(frame));
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        let now = Instant::now();
        let action = match event {
            PipelineEvent::Sample(frame) => {
                self.publish(frame);
                None
            }
            PipelineEvent::Eos => self.recovery.on_eos(now),
            PipelineEvent::Error(description) => {
                error!("Source pipeline error: {description}");
                self.latest.publish(Latest::Error(description));
                self.recovery.on_error(now)
            }
            PipelineEvent::Warning(description) => {
                warn!("Source pipeline warning: {description}");
                None
            }
            PipelineEvent::Underrun => self.recovery.on_underrun(now),
            PipelineEvent::Running => self.recovery.on_running(),
        };
        self.apply(action);
    }

    /// Collect samples until the current pipeline reports EOS.
    async fn wait_for_eos(&mut self) -> bool {
        let deadline = tokio::time::Instant::now() + self.options.teardown_eos_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some((generation, event))) if generation == self.generation => match event {
                    PipelineEvent::Eos => return true,
                    PipelineEvent::Sample(frame) => self.publish(frame),
                    other => trace!("teardown: ignoring {other:?}"),
                },
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return false,
            }
        }
    }

    async fn teardown(&mut self) {
        self.recovery.teardown();
        if self.options.teardown_eos
            && let Some(pipeline) = self.pipeline.as_mut()
        {
            debug!("teardown: Sending eos on source pipeline");
            match pipeline.send_eos() {
                Ok(()) => {
                    if !self.wait_for_eos().await {
                        warn!("Source pipeline did not teardown gracefully");
                    }
                }
                Err(e) => warn!("Source pipeline did not teardown gracefully: {e}"),
            }
        }
        self.stop_pipeline();
    }
}
