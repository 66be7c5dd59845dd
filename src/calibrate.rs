//! Post-run rate calibration and output finalization

use std::fs;

use tracing::{info, warn};

use crate::{capture::RxContext, pulse::PulseState, ChannelId};

/// Literal replaced by the channel id when a sink is opened.
pub const CHANNEL_TOKEN: &str = "CHANNEL";
/// Literal replaced by the calibrated rate (kHz) after the run.
pub const SAMPLERATE_TOKEN: &str = "SAMPLERATE";

/// Everything derived at end of run for one channel. Read-only: built
/// from a quiesced context, mutates nothing.
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel: ChannelId,
    pub total_samples: u64,
    pub elapsed_secs: f64,
    pub actual_sample_rate: f64,
    pub rounded_rate_khz: u32,
    /// Elapsed seconds between the PPS edge pinned at first-sample time
    /// and the last edge of the run; absent without a pulse reference
    pub pulse_elapsed_secs: Option<f64>,
    pub pulses_seen: Option<u32>,
    pub i_range: Option<(i16, i16)>,
    pub q_range: Option<(i16, i16)>,
    pub gap_events: u64,
    pub gap_samples: u64,
    pub ring_drops: u64,
}

impl ChannelReport {
    pub fn new(ctx: &RxContext, pulse: Option<&PulseState>) -> Self {
        let elapsed_secs = match (ctx.earliest, ctx.latest) {
            (Some(earliest), Some(latest)) => latest.duration_since(earliest).as_secs_f64(),
            _ => 0.0,
        };
        let actual_sample_rate = if elapsed_secs > 0.0 {
            ctx.total_samples as f64 / elapsed_secs
        } else {
            0.0
        };
        let rounded_rate_khz = (actual_sample_rate / 1000.0).round() as u32;
        let (pulse_elapsed_secs, pulses_seen) = match (pulse, ctx.pps_tick) {
            (Some(pulse), Some(reference)) => (
                // Ticks are wrapping microseconds; the difference between
                // the final edge and the pinned reference is the
                // pulse-referenced span of the run.
                Some(f64::from(pulse.latest_tick().wrapping_sub(reference)) * 1e-6),
                Some(pulse.pulses()),
            ),
            _ => (None, None),
        };
        Self {
            channel: ctx.channel,
            total_samples: ctx.total_samples,
            elapsed_secs,
            actual_sample_rate,
            rounded_rate_khz,
            pulse_elapsed_secs,
            pulses_seen,
            i_range: ctx.stats.i_range(),
            q_range: ctx.stats.q_range(),
            gap_events: ctx.gap_events,
            gap_samples: ctx.gap_samples,
            ring_drops: ctx.ring_drops,
        }
    }

    pub fn log(&self) {
        info!(
            "RX {} - total_samples={} actual_sample_rate={:.0} rounded_sample_rate_kHz={}",
            self.channel, self.total_samples, self.actual_sample_rate, self.rounded_rate_khz
        );
        match (self.i_range, self.q_range) {
            (Some((imin, imax)), Some((qmin, qmax))) => info!(
                "RX {} - I_range=[{},{}] Q_range=[{},{}]",
                self.channel, imin, imax, qmin, qmax
            ),
            _ => info!("RX {} - no samples seen", self.channel),
        }
        if let (Some(elapsed), Some(pulses)) = (self.pulse_elapsed_secs, self.pulses_seen) {
            info!(
                "RX {} - pps_elapsed={:.6}s over {} pulses",
                self.channel, elapsed, pulses
            );
        }
        if self.gap_events > 0 {
            info!(
                "RX {} - {} gap events, {} samples never delivered",
                self.channel, self.gap_events, self.gap_samples
            );
        }
        if self.ring_drops > 0 {
            info!(
                "RX {} - {} blocks dropped on ring overflow",
                self.channel, self.ring_drops
            );
        }
    }
}

/// Substitute the channel tag into the output template. The rate token,
/// if any, stays in the name until the run ends.
pub fn channel_filename(template: &str, channel: ChannelId) -> String {
    template.replace(CHANNEL_TOKEN, &channel.to_string())
}

/// Substitute the calibrated rate into the channel's output name and
/// rename the file. No-op when the template carries no rate token; a
/// failed rename is logged and the file stays under its template name.
pub fn rename_output(template: &str, channel: ChannelId, rounded_khz: u32) {
    if !template.contains(SAMPLERATE_TOKEN) {
        return;
    }
    let old = channel_filename(template, channel);
    let new = old.replace(SAMPLERATE_TOKEN, &rounded_khz.to_string());
    match fs::rename(&old, &new) {
        Ok(()) => info!("RX {} - output renamed to {}", channel, new),
        Err(e) => warn!("rename({}, {}) failed: {}", old, new, e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn million_samples_over_ten_seconds_is_100khz() {
        let mut ctx = RxContext::new(ChannelId::A);
        let t0 = Instant::now();
        ctx.earliest = Some(t0);
        ctx.latest = Some(t0 + Duration::from_secs(10));
        ctx.total_samples = 1_000_000;
        let report = ChannelReport::new(&ctx, None);
        assert!((report.actual_sample_rate - 100_000.0).abs() < 1e-6);
        assert_eq!(report.rounded_rate_khz, 100);
        assert!((report.elapsed_secs - 10.0).abs() < 1e-9);
        assert_eq!(report.pulse_elapsed_secs, None);
    }

    #[test]
    fn empty_run_reports_zeroes_and_unset_ranges() {
        let ctx = RxContext::new(ChannelId::B);
        let report = ChannelReport::new(&ctx, None);
        assert_eq!(report.total_samples, 0);
        assert_eq!(report.elapsed_secs, 0.0);
        assert_eq!(report.actual_sample_rate, 0.0);
        assert_eq!(report.rounded_rate_khz, 0);
        assert_eq!(report.i_range, None);
        assert_eq!(report.q_range, None);
    }

    #[test]
    fn pulse_elapsed_spans_reference_to_final_edge() {
        let mut ctx = RxContext::new(ChannelId::A);
        ctx.pps_tick = Some(2_000_000);
        let pulse = PulseState::default();
        pulse.record_edge(5_000_000);
        let report = ChannelReport::new(&ctx, Some(&pulse));
        assert!((report.pulse_elapsed_secs.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(report.pulses_seen, Some(1));
    }

    #[test]
    fn pulse_elapsed_survives_tick_wrap() {
        let mut ctx = RxContext::new(ChannelId::B);
        ctx.pps_tick = Some(u32::MAX - 500_000);
        let pulse = PulseState::default();
        pulse.record_edge(500_000);
        let report = ChannelReport::new(&ctx, Some(&pulse));
        assert!((report.pulse_elapsed_secs.unwrap() - 1.000_001).abs() < 1e-9);
    }

    #[test]
    fn channel_token_substitution() {
        assert_eq!(
            channel_filename("cap_CHANNEL_SAMPLERATE.iq", ChannelId::A),
            "cap_A_SAMPLERATE.iq"
        );
        assert_eq!(channel_filename("plain.iq", ChannelId::B), "plain.iq");
    }

    #[test]
    fn rate_token_renames_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir
            .path()
            .join("cap_CHANNEL_SAMPLERATE.iq")
            .to_str()
            .unwrap()
            .to_string();
        let opened = channel_filename(&template, ChannelId::A);
        std::fs::write(&opened, b"iq").unwrap();

        rename_output(&template, ChannelId::A, 2000);

        let renamed = dir.path().join("cap_A_2000.iq");
        assert!(renamed.exists());
        assert!(!std::path::Path::new(&opened).exists());
    }
}
