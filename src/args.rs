//! Argument parsing for running from the command line

use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;

use crate::{
    device::{CaptureConfig, DeviceKind, GainMode, TunerConfig},
    run::RunOptions,
    ChannelId,
};

/// One value applied to both channels, or "A,B" for each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerChannel<T> {
    pub a: T,
    pub b: T,
}

impl<T: Copy> PerChannel<T> {
    pub fn get(&self, channel: ChannelId) -> T {
        match channel {
            ChannelId::A => self.a,
            ChannelId::B => self.b,
        }
    }
}

impl<T: FromStr + Copy> FromStr for PerChannel<T> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ',');
        let first = parts.next().unwrap_or_default().trim();
        let a: T = first
            .parse()
            .map_err(|_| format!("invalid value '{first}'"))?;
        match parts.next() {
            Some(second) => {
                let second = second.trim();
                let b: T = second
                    .parse()
                    .map_err(|_| format!("invalid value '{second}'"))?;
                Ok(Self { a, b })
            }
            None => Ok(Self { a, b: a }),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Capture backend ("sim" or "rspduo")
    #[clap(long, default_value = "sim", value_parser = parse_device)]
    pub device: DeviceKind,
    /// Device serial number (first available device when omitted)
    #[clap(short, long)]
    pub serial: Option<String>,
    /// Hardware sample rate in Hz
    #[clap(short = 'r', long, default_value_t = 2e6)]
    pub sample_rate: f64,
    /// Decimation factor, one value or "A,B"
    #[clap(short, long, default_value = "1", value_parser = per_channel_u32)]
    pub decimation: PerChannel<u32>,
    /// IF frequency in kHz, one value or "A,B"
    #[clap(short, long, default_value = "0", value_parser = per_channel_u32)]
    pub if_frequency: PerChannel<u32>,
    /// IF bandwidth in kHz, one value or "A,B"
    #[clap(short = 'b', long, default_value = "200", value_parser = per_channel_u32)]
    pub if_bandwidth: PerChannel<u32>,
    /// IF gain reduction in dB ("AGC" to enable AGC), one value or "A,B"
    #[clap(short, long, default_value = "40", value_parser = per_channel_gain)]
    pub gain: PerChannel<GainMode>,
    /// LNA state, one value or "A,B"
    #[clap(short, long, default_value = "0", value_parser = per_channel_u32)]
    pub lna_state: PerChannel<u32>,
    /// Disable post-tuner DC offset compensation
    #[clap(short = 'D', long)]
    pub no_dc_offset: bool,
    /// Disable post-tuner IQ imbalance compensation
    #[clap(short = 'I', long)]
    pub no_iq_balance: bool,
    /// Center frequency in Hz, one value or "A,B"
    #[clap(short = 'f', long, default_value = "100e6", value_parser = per_channel_f64)]
    pub frequency: PerChannel<f64>,
    /// Streaming time in seconds
    #[clap(short = 'x', long, default_value_t = 10)]
    pub duration: u64,
    /// Output template; CHANNEL is replaced by the channel id before
    /// opening, SAMPLERATE by the calibrated rate in kHz after the run
    #[clap(short, long)]
    pub output: Option<String>,
    /// Hand-off ring capacity in blocks
    #[clap(short, long, default_value_t = 256)]
    pub capacity: usize,
    /// GPIO pin carrying the PPS reference (pulse correlation off when omitted)
    #[clap(short, long)]
    pub pps_pin: Option<u8>,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    /// Validate and split into the device configuration and run options.
    pub fn into_run(self) -> Result<(DeviceKind, CaptureConfig, RunOptions)> {
        ensure!(self.sample_rate > 0.0, "sample rate must be positive");
        ensure!(self.duration > 0, "streaming time must be at least one second");
        ensure!(self.capacity > 0, "ring capacity must be at least one block");
        ensure!(
            self.decimation.a >= 1 && self.decimation.b >= 1,
            "decimation must be at least 1"
        );

        let tuner = |channel: ChannelId| TunerConfig {
            center_freq_hz: self.frequency.get(channel),
            decimation: self.decimation.get(channel),
            if_frequency_khz: self.if_frequency.get(channel),
            if_bandwidth_khz: self.if_bandwidth.get(channel),
            gain: self.gain.get(channel),
            lna_state: self.lna_state.get(channel),
            dc_offset_comp: !self.no_dc_offset,
            iq_balance_comp: !self.no_iq_balance,
        };
        let config = CaptureConfig {
            serial: self.serial.clone(),
            sample_rate_hz: self.sample_rate,
            tuners: [tuner(ChannelId::A), tuner(ChannelId::B)],
        };
        let options = RunOptions {
            duration: Duration::from_secs(self.duration),
            output: self.output,
            capacity: self.capacity,
            pps_pin: self.pps_pin,
        };
        Ok((self.device, config, options))
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn parse_device(s: &str) -> Result<DeviceKind, String> {
    s.parse()
}

fn per_channel_u32(s: &str) -> Result<PerChannel<u32>, String> {
    s.parse()
}

fn per_channel_f64(s: &str) -> Result<PerChannel<f64>, String> {
    s.parse()
}

fn per_channel_gain(s: &str) -> Result<PerChannel<GainMode>, String> {
    s.parse()
}
