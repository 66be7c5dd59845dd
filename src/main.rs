use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use duo_slurper::args::{convert_filter, Args};
use duo_slurper::device;
use duo_slurper::pulse::{EdgeSource, SimPps};
use duo_slurper::run;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let (kind, config, options) = args.into_run()?;
    info!(
        "capture starting at {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    let sources = device::open(kind, &config)?;
    // The simulated backend pairs with a simulated pulse line; a hardware
    // GPIO source would slot in here behind the same trait.
    let edges: Option<Box<dyn EdgeSource>> = options
        .pps_pin
        .map(|_| Box::new(SimPps::pps()) as Box<dyn EdgeSource>);

    let (ctrlc_tx, ctrlc_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.try_send(());
    })?;

    run::run(sources, edges, &options, &ctrlc_rx)?;
    Ok(())
}
