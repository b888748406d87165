//! Pipeline recovery state machine
//!
//! Pure logic: callers feed it pipeline events together with the current time
//! and carry out the [`Action`] it returns. There is a single timer slot; the
//! caller asks for [`Recovery::deadline`] and calls [`Recovery::on_timer`] once
//! it has passed.

use std::time::{Duration, Instant};

use super::types::PipelineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop and discard the current pipeline.
    StopPipeline,
    /// Build and start a new pipeline.
    StartPipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Underrun,
    Restart,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    kind: TimerKind,
    deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct Recovery {
    state: PipelineState,
    timer: Option<Timer>,
    restart_on_underrun: bool,
    underrun_timeout: Duration,
    restart_delay: Duration,
    tearing_down: bool,
    restarts: u64,
}

impl Recovery {
    pub fn new(restart_on_underrun: bool, underrun_timeout: Duration, restart_delay: Duration) -> Self {
        Self {
            state: PipelineState::Normal,
            timer: None,
            restart_on_underrun,
            underrun_timeout,
            restart_delay,
            tearing_down: false,
            restarts: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_tearing_down(&self) -> bool {
        self.tearing_down
    }

    /// Number of pipelines started after the first.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.deadline)
    }

    fn arm(&mut self, kind: TimerKind, now: Instant) {
        debug_assert!(self.timer.is_none(), "recovery timer already armed: {:?}", self.timer);
        let delay = match kind {
            TimerKind::Underrun => self.underrun_timeout,
            TimerKind::Restart => self.restart_delay,
        };
        self.timer = Some(Timer {
            kind,
            deadline: now + delay,
        });
    }

    /// Stop the pipeline now and start a fresh one after the restart delay.
    fn begin_restart(&mut self, now: Instant) -> Option<Action> {
        self.timer = None;
        self.state = PipelineState::Restarting;
        self.arm(TimerKind::Restart, now);
        Some(Action::StopPipeline)
    }

    pub fn on_eos(&mut self, now: Instant) -> Option<Action> {
        if self.tearing_down || self.state == PipelineState::Restarting {
            return None;
        }
        log::warn!("Got EOS from source pipeline");
        self.begin_restart(now)
    }

    pub fn on_error(&mut self, now: Instant) -> Option<Action> {
        if self.tearing_down || self.state == PipelineState::Restarting {
            return None;
        }
        self.begin_restart(now)
    }

    pub fn on_underrun(&mut self, now: Instant) -> Option<Action> {
        if !self.restart_on_underrun || self.tearing_down {
            return None;
        }
        if self.timer.is_some() {
            log::trace!("underrun: I already saw a recent underrun; ignoring");
            return None;
        }
        log::debug!("underrun: scheduling restart in {:?}", self.underrun_timeout);
        self.arm(TimerKind::Underrun, now);
        self.state = PipelineState::UnderrunPending;
        None
    }

    pub fn on_running(&mut self) -> Option<Action> {
        if self.state == PipelineState::UnderrunPending {
            log::debug!("running: cancelling underrun timer");
            self.timer = None;
            self.state = PipelineState::Normal;
        }
        None
    }

    /// Fire the timer if its deadline has passed.
    pub fn on_timer(&mut self, now: Instant) -> Option<Action> {
        let timer = self.timer?;
        if now < timer.deadline {
            return None;
        }
        self.timer = None;
        if self.tearing_down {
            return None;
        }
        match timer.kind {
            TimerKind::Underrun => {
                log::warn!(
                    "Attempting to recover from video loss: stopping source pipeline and waiting {:?}",
                    self.restart_delay
                );
                self.begin_restart(now)
            }
            TimerKind::Restart => {
                self.state = PipelineState::Normal;
                self.restarts += 1;
                Some(Action::StartPipeline)
            }
        }
    }

    /// Suppress every pending and future restart.
    pub fn teardown(&mut self) {
        self.tearing_down = true;
        self.timer = None;
    }
}
