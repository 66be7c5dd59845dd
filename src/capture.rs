//! This module contains the real-time delivery path

// The driver invokes us once per hardware block on its own thread, at its
// own cadence, so everything here must finish in bounded time: O(n) scans
// over the block, a lock-free ring push, and nothing that can touch the
// disk. A full ring drops the block instead of stalling the delivery
// thread.

use std::sync::Arc;
use std::time::Instant;

use rtrb::{Producer, PushError};
use tracing::{debug, warn};

use crate::{pulse::PulseState, ChannelId, SampleBlock};

/// Detects gaps in the hardware's wrapping 32-bit sample index.
#[derive(Debug, Default)]
pub struct ContinuityTracker {
    expected: Option<u32>,
}

impl ContinuityTracker {
    /// Feed the next block's starting index and length. Returns the gap
    /// size in samples when the index stream is discontinuous; the tracker
    /// resynchronizes itself either way.
    pub fn observe(&mut self, start: u32, len: u32) -> Option<u32> {
        let gap = match self.expected {
            Some(expected) if start != expected => Some(start.wrapping_sub(expected)),
            _ => None,
        };
        self.expected = Some(start.wrapping_add(len));
        gap
    }

    /// Forget the expected index, e.g. after a driver-side reset.
    pub fn reset(&mut self) {
        self.expected = None;
    }
}

/// Running min/max excursion of the I and Q rails. The sentinels flip on
/// the first observed sample; until then the ranges read as unset.
#[derive(Debug)]
pub struct ChannelStats {
    imin: i16,
    imax: i16,
    qmin: i16,
    qmax: i16,
}

impl Default for ChannelStats {
    fn default() -> Self {
        Self {
            imin: i16::MAX,
            imax: i16::MIN,
            qmin: i16::MAX,
            qmax: i16::MIN,
        }
    }
}

impl ChannelStats {
    pub fn update(&mut self, i: &[i16], q: &[i16]) {
        for &s in i {
            self.imin = self.imin.min(s);
            self.imax = self.imax.max(s);
        }
        for &s in q {
            self.qmin = self.qmin.min(s);
            self.qmax = self.qmax.max(s);
        }
    }

    /// None until at least one sample has been observed.
    pub fn i_range(&self) -> Option<(i16, i16)> {
        (self.imin <= self.imax).then(|| (self.imin, self.imax))
    }

    pub fn q_range(&self) -> Option<(i16, i16)> {
        (self.qmin <= self.qmax).then(|| (self.qmin, self.qmax))
    }
}

/// Per-channel capture accounting. Exclusively owned by that channel's
/// delivery thread while streaming and handed back to the supervisor once
/// the driver is quiescent, so nothing here needs a lock.
#[derive(Debug)]
pub struct RxContext {
    pub channel: ChannelId,
    pub earliest: Option<Instant>,
    pub latest: Option<Instant>,
    pub total_samples: u64,
    pub tracker: ContinuityTracker,
    pub stats: ChannelStats,
    /// PPS tick observed when the first block arrived
    pub pps_tick: Option<u32>,
    /// Discontinuities seen in the hardware sample index
    pub gap_events: u64,
    /// Samples the hardware produced but never delivered
    pub gap_samples: u64,
    /// Blocks dropped because the hand-off ring was full
    pub ring_drops: u64,
}

impl RxContext {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            earliest: None,
            latest: None,
            total_samples: 0,
            tracker: ContinuityTracker::default(),
            stats: ChannelStats::default(),
            pps_tick: None,
            gap_events: 0,
            gap_samples: 0,
            ring_drops: 0,
        }
    }
}

/// The driver-facing entry point for one channel: accounting, continuity,
/// stats, then hand-off to the writer's ring.
pub struct Dispatcher {
    ctx: RxContext,
    ring: Producer<SampleBlock>,
    pulse: Option<Arc<PulseState>>,
}

impl Dispatcher {
    pub fn new(
        channel: ChannelId,
        ring: Producer<SampleBlock>,
        pulse: Option<Arc<PulseState>>,
    ) -> Self {
        Self {
            ctx: RxContext::new(channel),
            ring,
            pulse,
        }
    }

    /// Invoked once per hardware block. Must not block.
    pub fn deliver(&mut self, block: SampleBlock, reset: bool) {
        let ctx = &mut self.ctx;
        ctx.latest = Some(block.arrived);
        if ctx.earliest.is_none() {
            ctx.earliest = Some(block.arrived);
            // First block: pin the PPS reference for end-of-run calibration
            if let Some(pulse) = &self.pulse {
                ctx.pps_tick = Some(pulse.latest_tick());
            }
        }

        let len = block.len() as u32;
        ctx.total_samples += u64::from(len);

        if reset {
            debug!("RX {} - driver reset, resyncing sample index", ctx.channel);
            ctx.tracker.reset();
        }
        if let Some(gap) = ctx.tracker.observe(block.first_sample_num, len) {
            ctx.gap_events += 1;
            ctx.gap_samples += u64::from(gap);
            warn!("RX {} - dropped {} samples", ctx.channel, gap);
        }

        ctx.stats.update(&block.i, &block.q);

        if let Err(PushError::Full(lost)) = self.ring.push(block) {
            ctx.ring_drops += 1;
            warn!(
                "RX {} - ring full, dropped a {}-sample block",
                ctx.channel,
                lost.len()
            );
        }
    }

    pub fn into_context(self) -> RxContext {
        self.ctx
    }
}
