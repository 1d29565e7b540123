//! epdfb demo
//!
//! Opens an EPDC framebuffer (or the in-process simulator), clears the panel
//! with a full refresh, draws a black square and refreshes just that region.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epdfb::epdc::sim::SimulatedEpdc;
use epdfb::{
    Color, Config, Epdc, Framebuffer, Rect, TracedEpdc, UpdateRequest, Waveform,
};

const USAGE: &str = "usage: epdfb [--simulate] [--device PATH] [--config PATH]";

/// Command line arguments
#[derive(Debug, Default)]
struct Args {
    simulate: bool,
    device: Option<PathBuf>,
    config: Option<PathBuf>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--simulate" | "-s" => parsed.simulate = true,
                "--device" | "-d" => {
                    parsed.device = Some(args.next().context("--device needs a path")?.into());
                }
                "--config" | "-c" => {
                    parsed.config = Some(args.next().context("--config needs a path")?.into());
                }
                "--help" | "-h" => {
                    println!("{}", USAGE);
                    std::process::exit(0);
                }
                other => bail!("unknown argument {:?}\n{}", other, USAGE),
            }
        }
        Ok(parsed)
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(device) = &args.device {
        config.device.path = device.clone();
    }
    Ok(config)
}

fn open_and_run(args: &Args, config: &Config, stop: &AtomicBool) -> Result<()> {
    let options = config.framebuffer_options();
    let path = &config.device.path;

    match (args.simulate, config.trace.enabled) {
        (true, false) => {
            info!("Using simulated controller");
            let fb = Framebuffer::with_device(SimulatedEpdc::remarkable(), &options)?;
            run_scenario(fb, config, stop)
        }
        (true, true) => {
            info!("Using simulated controller with call tracing");
            let fb = Framebuffer::with_device(TracedEpdc::new(SimulatedEpdc::remarkable()), &options)?;
            run_scenario(fb, config, stop)
        }
        (false, false) => {
            let fb = Framebuffer::open(path, &options)
                .with_context(|| format!("Failed to open {:?}", path))?;
            run_scenario(fb, config, stop)
        }
        (false, true) => {
            let fb = Framebuffer::open_traced(path, &options)
                .with_context(|| format!("Failed to open {:?}", path))?;
            run_scenario(fb, config, stop)
        }
    }
}

fn run_scenario<D: Epdc>(mut fb: Framebuffer<D>, config: &Config, stop: &AtomicBool) -> Result<()> {
    let temperature = config.refresh.temperature;
    let policy = config.refresh.retry.policy();

    fb.fill(Color::White);
    let marker = fb.refresh_with_retry(
        &UpdateRequest::full(Waveform::Init).with_temperature(temperature),
        &policy,
    )?;
    info!("Full refresh submitted as marker {}", marker);
    fb.wait_for_marker(marker)?;

    if stop.load(Ordering::Relaxed) {
        warn!("Interrupted after clearing the panel");
        return Ok(fb.close()?);
    }

    let square = Rect::new(50, 50, 100, 100);
    let written = fb.draw_rect(square, Color::Black);
    let marker = fb.refresh_with_retry(
        &UpdateRequest::partial(square, Waveform::Gc16).with_temperature(temperature),
        &policy,
    )?;
    info!("Drew {} pixels, partial refresh submitted as marker {}", written, marker);

    let completion = fb.wait_for_marker(marker)?;
    if completion.collided() {
        warn!("Update {} collided (0x{:x})", marker, completion.collision);
    } else {
        info!("Update {} complete", marker);
    }

    fb.close()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "epdfb=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting epdfb demo");

    let args = Args::parse(std::env::args().skip(1))?;
    let config = load_config(&args)?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();
    let worker = tokio::task::spawn_blocking(move || open_and_run(&args, &config, &worker_stop));
    tokio::pin!(worker);

    // The blocking work cannot be cancelled mid-ioctl; Ctrl-C asks it to stop
    // between steps and then waits for it.
    let result = tokio::select! {
        result = &mut worker => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, stopping after the current step");
            stop.store(true, Ordering::Relaxed);
            worker.await
        }
    };

    match result.context("Demo task panicked")? {
        Ok(()) => {
            info!("Done");
            Ok(())
        }
        Err(e) => {
            error!("Demo failed: {:#}", e);
            Err(e)
        }
    }
}
