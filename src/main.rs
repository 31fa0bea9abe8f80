use crate::config::{PlayerOptions, command};
use crate::display::open_device;
use crate::media::default_engine;
use crate::pipeline::PlayerCore;
use anyhow::{Context, Result};
use clap::error::ErrorKind;
use log::{error, info};
use std::time::Duration;
use std::{panic, process, thread};

pub mod config;
pub mod display;
pub mod media;
pub mod pipeline;

fn main() {
    tracing_subscriber::fmt::init();

    let matches = match command().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(-1);
        }
    };
    let options = match PlayerOptions::from_matches(&matches) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(-1);
        }
    };

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    if let Err(e) = run(&options) {
        error!("{:#}", e);
        process::exit(-1);
    }

    info!("Playback finished, exiting in {}s", options.linger_secs);
    thread::sleep(Duration::from_secs(options.linger_secs));
    process::exit(0);
}

fn run(options: &PlayerOptions) -> Result<()> {
    let engine = default_engine()?;
    let wiring = options.device_config()?;
    let device = open_device(options.device, &wiring)
        .with_context(|| format!("failed to open {:?} panel", options.device))?;

    let mut player = PlayerCore::new();
    player.init(
        engine.as_ref(),
        device,
        &options.path,
        options.orientation,
        &options.area,
    )?;

    // first signal stops playback, a second one leaves right away
    let stop = player.stop_handle();
    ctrlc::set_handler(move || {
        if !stop.is_running() {
            process::exit(130);
        }
        stop.stop();
    })
    .context("failed to install signal handler")?;

    player.play()
}
