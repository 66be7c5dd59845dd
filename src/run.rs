//! Run supervision: wire the per-channel delivery paths to their writers,
//! hold the run open for its duration, then quiesce and calibrate

use std::fs::File;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};

use crate::{
    calibrate::{self, ChannelReport},
    capture::Dispatcher,
    device::SampleSource,
    exfil,
    pulse::{EdgeSource, PulseState},
    ChannelId,
};

pub struct RunOptions {
    pub duration: Duration,
    /// Output template; no sinks are opened when absent
    pub output: Option<String>,
    /// Hand-off ring capacity, in blocks
    pub capacity: usize,
    pub pps_pin: Option<u8>,
}

/// Drive a full capture: open sinks, register the pulse handler, stream
/// for the configured duration (or until `early_stop` fires), drain, and
/// report. Returns one report per channel, A first.
pub fn run(
    sources: [Box<dyn SampleSource>; 2],
    mut edges: Option<Box<dyn EdgeSource>>,
    opts: &RunOptions,
    early_stop: &Receiver<()>,
) -> Result<Vec<ChannelReport>> {
    // All-or-nothing: both sinks must open before any streaming starts.
    let mut sinks: [Option<File>; 2] = [None, None];
    if let Some(template) = &opts.output {
        for channel in ChannelId::BOTH {
            let path = calibrate::channel_filename(template, channel);
            let file = File::create(&path)
                .with_context(|| format!("open({path}) for writing failed"))?;
            sinks[channel.index()] = Some(file);
        }
    }

    let pulse = match (&mut edges, opts.pps_pin) {
        (Some(source), Some(pin)) => {
            let state = Arc::new(PulseState::default());
            let handler_state = state.clone();
            source
                .register(pin, Box::new(move |tick| handler_state.record_edge(tick)))
                .context("registering PPS edge handler")?;
            Some(state)
        }
        _ => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let writer_stop = Arc::new(AtomicBool::new(false));

    let mut rx_handles = Vec::with_capacity(2);
    let mut writer_handles = Vec::with_capacity(2);
    for ((channel, mut source), sink) in ChannelId::BOTH.into_iter().zip(sources).zip(sinks) {
        let (producer, consumer) = rtrb::RingBuffer::new(opts.capacity);
        let mut dispatcher = Dispatcher::new(channel, producer, pulse.clone());
        let rx_stop = stop.clone();
        rx_handles.push(
            thread::Builder::new()
                .name(format!("rx-{channel}"))
                .spawn(move || {
                    let result =
                        source.run(&mut |block, reset| dispatcher.deliver(block, reset), &rx_stop);
                    if let Err(e) = result {
                        warn!("RX {} - delivery thread error: {}", channel, e);
                    }
                    dispatcher.into_context()
                })
                .context("spawning delivery thread")?,
        );

        let wstop = writer_stop.clone();
        writer_handles.push(
            thread::Builder::new()
                .name(format!("writer-{channel}"))
                .spawn(move || exfil::write_blocks(channel, sink, consumer, &wstop))
                .context("spawning writer thread")?,
        );
    }

    info!("streaming for {} seconds", opts.duration.as_secs_f64());
    match early_stop.recv_timeout(opts.duration) {
        Ok(()) => info!("stop requested, ending capture early"),
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
    }

    // Quiesce the delivery side first; a joined delivery thread is the
    // guarantee that no further blocks can arrive on that channel.
    stop.store(true, Ordering::Release);
    let mut contexts = Vec::with_capacity(2);
    for handle in rx_handles {
        contexts.push(
            handle
                .join()
                .map_err(|_| anyhow!("delivery thread panicked"))?,
        );
    }

    // Now the writers may drain to empty and close the sinks.
    writer_stop.store(true, Ordering::Release);
    for handle in writer_handles {
        handle
            .join()
            .map_err(|_| anyhow!("writer thread panicked"))?;
    }

    if let (Some(source), Some(pin)) = (&mut edges, opts.pps_pin) {
        source.unregister(pin);
    }

    let mut reports = Vec::with_capacity(2);
    for ctx in &contexts {
        let report = ChannelReport::new(ctx, pulse.as_deref());
        report.log();
        if let Some(template) = &opts.output {
            if ctx.total_samples > 0 {
                calibrate::rename_output(template, report.channel, report.rounded_rate_khz);
            }
        }
        reports.push(report);
    }
    Ok(reports)
}
