//! Driver-facing configuration surface and sample sources

// The vendor SDK call sequence (device enumeration, dual-tuner mode
// selection, parameter pushes and read-back) lives behind `SampleSource`.
// This build ships the simulated front-end, which is also what the tests
// drive.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::{ChannelId, SampleBlock, MAX_BLOCK_SAMPLES};

/// Samples per delivery of the simulated front-end, matching the cadence
/// real hardware shows at usual decimations.
pub const DEFAULT_BLOCK_SAMPLES: usize = 1008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Sim,
    RspDuo,
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sim" => Ok(DeviceKind::Sim),
            "rspduo" => Ok(DeviceKind::RspDuo),
            _ => Err(format!("unknown device '{s}' (expected sim or rspduo)")),
        }
    }
}

/// IF gain: manual gain-reduction dB or hardware AGC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMode {
    Agc,
    ReductionDb(u32),
}

impl FromStr for GainMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("agc") {
            Ok(GainMode::Agc)
        } else {
            s.parse::<u32>()
                .map(GainMode::ReductionDb)
                .map_err(|_| format!("invalid gain '{s}' (dB value or AGC)"))
        }
    }
}

impl fmt::Display for GainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainMode::Agc => f.write_str("AGC"),
            GainMode::ReductionDb(db) => write!(f, "{db}dB"),
        }
    }
}

/// Per-tuner settings, applied by the backend.
#[derive(Debug, Clone)]
pub struct TunerConfig {
    pub center_freq_hz: f64,
    pub decimation: u32,
    pub if_frequency_khz: u32,
    pub if_bandwidth_khz: u32,
    pub gain: GainMode,
    pub lna_state: u32,
    pub dc_offset_comp: bool,
    pub iq_balance_comp: bool,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub serial: Option<String>,
    pub sample_rate_hz: f64,
    pub tuners: [TunerConfig; 2],
}

impl CaptureConfig {
    pub fn tuner(&self, channel: ChannelId) -> &TunerConfig {
        &self.tuners[channel.index()]
    }

    /// Output rate of one channel after decimation.
    pub fn effective_rate_hz(&self, channel: ChannelId) -> f64 {
        self.sample_rate_hz / f64::from(self.tuner(channel).decimation.max(1))
    }
}

/// One receiver channel at the driver's delivery interface. `run` blocks
/// on the driver's own cadence, invoking `deliver` once per hardware
/// block, and returns only after the stream is quiescent.
pub trait SampleSource: Send {
    fn run(
        &mut self,
        deliver: &mut dyn FnMut(SampleBlock, bool),
        stop: &AtomicBool,
    ) -> Result<()>;
}

/// Paced synthetic tuner: a fixed tone, a hardware-style wrapping sample
/// index, and optional injected index gaps for exercising the tracker.
pub struct SimSource {
    channel: ChannelId,
    sample_rate_hz: f64,
    block_samples: usize,
    tone_freq_hz: f64,
    /// Skip this many indices after delivering block `.0` (zero-based)
    inject_gap: Option<(u64, u32)>,
}

impl SimSource {
    pub fn new(channel: ChannelId, sample_rate_hz: f64, block_samples: usize) -> Self {
        debug_assert!(block_samples >= 1 && block_samples <= MAX_BLOCK_SAMPLES);
        Self {
            channel,
            sample_rate_hz,
            block_samples,
            tone_freq_hz: 1_000.0,
            inject_gap: None,
        }
    }

    pub fn with_gap(mut self, after_block: u64, gap: u32) -> Self {
        self.inject_gap = Some((after_block, gap));
        self
    }
}

impl SampleSource for SimSource {
    fn run(
        &mut self,
        deliver: &mut dyn FnMut(SampleBlock, bool),
        stop: &AtomicBool,
    ) -> Result<()> {
        debug!(
            "RX {} - simulated stream at {:.0} Hz, {}-sample blocks",
            self.channel, self.sample_rate_hz, self.block_samples
        );
        let block_period = self.block_samples as f64 / self.sample_rate_hz;
        let amplitude = f64::from(i16::MAX / 2);
        let start = Instant::now();
        let mut index = 0u32; // wrapping hardware sample index
        let mut clock = 0u64; // non-wrapping, for tone phase and pacing
        let mut blocks = 0u64;
        while !stop.load(Ordering::Acquire) {
            let mut i = Vec::with_capacity(self.block_samples);
            let mut q = Vec::with_capacity(self.block_samples);
            for k in 0..self.block_samples as u64 {
                let t = (clock + k) as f64 / self.sample_rate_hz;
                let phase = 2.0 * std::f64::consts::PI * self.tone_freq_hz * t;
                i.push((amplitude * phase.sin()) as i16);
                q.push((amplitude * phase.cos()) as i16);
            }
            deliver(SampleBlock::new(index, i, q, Instant::now()), false);

            index = index.wrapping_add(self.block_samples as u32);
            if let Some((after, gap)) = self.inject_gap {
                if blocks == after {
                    index = index.wrapping_add(gap);
                }
            }
            clock += self.block_samples as u64;
            blocks += 1;

            let due = Duration::from_secs_f64(blocks as f64 * block_period);
            if let Some(nap) = due.checked_sub(start.elapsed()) {
                thread::sleep(nap);
            }
        }
        Ok(())
    }
}

/// Resolve the configured backend into its two per-channel streams.
/// Failures here are fatal for the whole run.
pub fn open(kind: DeviceKind, config: &CaptureConfig) -> Result<[Box<dyn SampleSource>; 2]> {
    if let Some(serial) = &config.serial {
        info!("requested device serial {serial}");
    }
    for channel in ChannelId::BOTH {
        let t = config.tuner(channel);
        info!(
            "RX {} - LO={:.0} BW={} If={} Dec={} gain={} LNAstate={} DC={} IQ={}",
            channel,
            t.center_freq_hz,
            t.if_bandwidth_khz,
            t.if_frequency_khz,
            t.decimation,
            t.gain,
            t.lna_state,
            t.dc_offset_comp,
            t.iq_balance_comp
        );
    }
    match kind {
        DeviceKind::Sim => {
            info!(
                "using simulated front-end at {:.0} Hz",
                config.sample_rate_hz
            );
            Ok([
                Box::new(SimSource::new(
                    ChannelId::A,
                    config.effective_rate_hz(ChannelId::A),
                    DEFAULT_BLOCK_SAMPLES,
                )),
                Box::new(SimSource::new(
                    ChannelId::B,
                    config.effective_rate_hz(ChannelId::B),
                    DEFAULT_BLOCK_SAMPLES,
                )),
            ])
        }
        DeviceKind::RspDuo => {
            bail!("RSPduo capture requires the vendor SDK backend, which this build does not include")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn test_config() -> CaptureConfig {
        let tuner = TunerConfig {
            center_freq_hz: 100e6,
            decimation: 1,
            if_frequency_khz: 0,
            if_bandwidth_khz: 200,
            gain: GainMode::ReductionDb(40),
            lna_state: 0,
            dc_offset_comp: true,
            iq_balance_comp: true,
        };
        CaptureConfig {
            serial: None,
            sample_rate_hz: 2e6,
            tuners: [tuner.clone(), tuner],
        }
    }

    fn collect_blocks(mut src: SimSource, run_for: Duration) -> Vec<(u32, usize, bool)> {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            src.run(
                &mut |block, reset| seen.push((block.first_sample_num, block.len(), reset)),
                &stopped,
            )
            .unwrap();
            seen
        });
        thread::sleep(run_for);
        stop.store(true, Ordering::Release);
        handle.join().unwrap()
    }

    #[test]
    fn sim_source_delivers_contiguous_indices() {
        let src = SimSource::new(ChannelId::A, 100_000.0, 256);
        let seen = collect_blocks(src, Duration::from_millis(50));
        assert!(!seen.is_empty());
        for (k, (start, len, reset)) in seen.iter().enumerate() {
            assert_eq!(*len, 256);
            assert!(!reset);
            assert_eq!(*start, (k * 256) as u32);
        }
    }

    #[test]
    fn sim_source_injects_an_index_gap() {
        let src = SimSource::new(ChannelId::B, 1_000_000.0, 128).with_gap(2, 50);
        let seen = collect_blocks(src, Duration::from_millis(20));
        assert!(seen.len() > 4);
        assert_eq!(seen[2].0, 2 * 128);
        // blocks after the injection carry the skipped indices
        assert_eq!(seen[3].0, 3 * 128 + 50);
        assert_eq!(seen[4].0, 4 * 128 + 50);
    }

    #[test]
    fn rspduo_backend_needs_vendor_sdk() {
        let err = match open(DeviceKind::RspDuo, &test_config()) {
            Ok(_) => panic!("expected RSPduo backend to be unavailable"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("vendor SDK"));
    }

    #[test]
    fn decimation_scales_effective_rate() {
        let mut config = test_config();
        config.tuners[1].decimation = 4;
        assert_eq!(config.effective_rate_hz(ChannelId::A), 2e6);
        assert_eq!(config.effective_rate_hz(ChannelId::B), 500_000.0);
    }

    #[test]
    fn gain_mode_parses_agc_and_db() {
        assert_eq!("AGC".parse::<GainMode>(), Ok(GainMode::Agc));
        assert_eq!("37".parse::<GainMode>(), Ok(GainMode::ReductionDb(37)));
        assert!("loud".parse::<GainMode>().is_err());
    }
}
