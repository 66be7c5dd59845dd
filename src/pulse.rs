//! PPS edge capture: the shared pulse reference and the GPIO-facing
//! interface

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;

/// Shared pulse reference: written only by the edge handler while the run
/// is live, read again only once capture has stopped. The Release stores
/// pair with the Acquire loads so the post-stop reader sees the final
/// edge, not a stale one.
#[derive(Debug, Default)]
pub struct PulseState {
    latest_tick: AtomicU32,
    pulse_count: AtomicU32,
}

impl PulseState {
    /// Record a rising edge at `tick` (microseconds, wrapping with u32).
    pub fn record_edge(&self, tick: u32) {
        self.latest_tick.store(tick, Ordering::Release);
        self.pulse_count.fetch_add(1, Ordering::Release);
    }

    pub fn latest_tick(&self) -> u32 {
        self.latest_tick.load(Ordering::Acquire)
    }

    pub fn pulses(&self) -> u32 {
        self.pulse_count.load(Ordering::Acquire)
    }
}

/// Rising-edge callback, invoked with the event's microsecond tick.
pub type EdgeHandler = Box<dyn FnMut(u32) + Send>;

/// GPIO collaborator. The handler runs on the implementation's own
/// context, concurrent with the RF delivery threads. Missed edges are
/// unrecoverable (only the latest is kept), so the handler path stays
/// short.
pub trait EdgeSource: Send {
    fn register(&mut self, pin: u8, handler: EdgeHandler) -> Result<()>;
    fn unregister(&mut self, pin: u8);
}

/// Software pulse generator standing in for a hardware PPS line.
pub struct SimPps {
    period: Duration,
    worker: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl SimPps {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            worker: None,
        }
    }

    /// One pulse per second, like the real reference.
    pub fn pps() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl EdgeSource for SimPps {
    fn register(&mut self, _pin: u8, mut handler: EdgeHandler) -> Result<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();
        let period = self.period;
        let worker = thread::Builder::new().name("sim-pps".into()).spawn(move || {
            let start = Instant::now();
            let mut edges = 0u32;
            while !stopped.load(Ordering::Acquire) {
                edges += 1;
                let due = start + period * edges;
                let now = Instant::now();
                if due > now {
                    thread::sleep(due - now);
                }
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                handler(start.elapsed().as_micros() as u32);
            }
        })?;
        self.worker = Some((stop, worker));
        Ok(())
    }

    fn unregister(&mut self, _pin: u8) {
        if let Some((stop, worker)) = self.worker.take() {
            stop.store(true, Ordering::Release);
            let _ = worker.join();
        }
    }
}
