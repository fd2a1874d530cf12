// SPDX-License-Identifier: MPL-2.0
//! Display-refresh aligned frame sampler.
//!
//! The sampler is a scheduling primitive only: it decides *when* to pull the
//! engine's last rendered frame, never copies pixels itself, and owns no
//! timer at all while nobody consumes its ticks.

use super::rates::SamplerRateHz;
use crate::media::Frame;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

#[derive(Debug)]
pub struct FrameSampler {
    rate: SamplerRateHz,
    interval: Option<Interval>,
    ticks: u64,
}

impl FrameSampler {
    #[must_use]
    pub fn new(rate: SamplerRateHz) -> Self {
        Self {
            rate,
            interval: None,
            ticks: 0,
        }
    }

    pub fn rate(&self) -> SamplerRateHz {
        self.rate
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Number of ticks delivered since the last activation.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Starts ticking. A no-op when already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let period = self.rate.period();
        let mut interval = time::interval_at(Instant::now() + period, period);
        // A late tick is not worth catching up on: the frame it would read is gone.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        self.ticks = 0;
        log::debug!("Frame sampler active at {} Hz", self.rate.value());
    }

    /// Drops the timer.
    pub fn deactivate(&mut self) {
        if self.interval.take().is_some() {
            log::debug!("Frame sampler stopped after {} ticks", self.ticks);
        }
    }

    /// Waits for the next tick. Never resolves while inactive, so it can sit
    /// in a `select!` unconditionally.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => {
                let at = interval.tick().await;
                self.ticks += 1;
                at
            }
            None => std::future::pending().await,
        }
    }

    /// Reads the frame for the current tick.
    ///
    /// Skips without touching the frame source when playback is not active.
    pub fn sample<F>(playback_active: bool, current_frame: F) -> Option<Frame>
    where
        F: FnOnce() -> Option<Frame>,
    {
        if !playback_active {
            return None;
        }
        current_frame()
    }
}
