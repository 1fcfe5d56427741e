//! Local viewer: capture frames and print per-frame statistics.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use gencam::{BackendKind, Capture, Frame, Property};
use gencam_stream::encode_frame;

#[derive(Debug, Args)]
pub struct ViewArgs {
    /// Camera index.
    #[arg(short, long, default_value_t = 0)]
    camera: i32,
    /// Camera backend: any, aravis, ids or spinnaker.
    #[arg(short, long, default_value = "ids")]
    backend: String,
    /// Enable the external trigger on Line0.
    #[arg(short, long)]
    trigger: bool,
    /// Target frame rate.
    #[arg(short, long, default_value_t = 30.0)]
    framerate: f64,
    /// Enable automatic exposure.
    #[arg(short, long)]
    auto_exposure: bool,
    /// Exposure time in milliseconds. Ignored while auto-exposure is on.
    #[arg(short, long)]
    exposure: Option<f64>,
    /// Grab timeout in milliseconds.
    #[arg(long)]
    buffer_timeout_ms: Option<u64>,
    /// Stop after this many frames instead of running until Ctrl+C.
    #[arg(long)]
    frames: Option<u64>,
    /// Write each captured frame into this directory as JPEG.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn as_flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

pub fn run(args: ViewArgs) -> Result<()> {
    let mut camera = open_camera(&args)?;

    // Configuration refusals are tolerated; successes are reported the way
    // the operator expects to see them.
    camera.set_exception_mode(false);

    if camera
        .set(Property::AutoExposure, as_flag(args.auto_exposure))
        .unwrap_or(false)
    {
        println!(
            "{} automatic exposure",
            if args.auto_exposure { "Enabled" } else { "Disabled" }
        );
    }

    if let Some(exposure_ms) = args.exposure {
        if !args.auto_exposure
            && camera
                .set(Property::Exposure, 1_000.0 * exposure_ms)
                .unwrap_or(false)
        {
            println!("Set exposure to {exposure_ms} ms");
        }
    }

    if camera.set(Property::Fps, args.framerate).unwrap_or(false) {
        println!("Set target framerate to {}", args.framerate);
    }

    if camera
        .set(Property::Trigger, as_flag(args.trigger))
        .unwrap_or(false)
    {
        println!(
            "{} trigger on Line0",
            if args.trigger { "Enabled" } else { "Disabled" }
        );
    }

    camera.set_exception_mode(true);

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {} failed", dir.display()))?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("installing the signal handler failed")?;
    }

    let stats_to_tty = std::io::stdout().is_terminal();
    let mut frame = Frame::default();
    let mut total: u64 = 0;
    let mut interval_count: u64 = 0;
    let mut fps = 0.0;
    let mut tick = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        if args.frames.is_some_and(|limit| total >= limit) {
            break;
        }

        match camera.read(&mut frame) {
            Ok(true) if !frame.is_empty() => {}
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "frame read failed");
                continue;
            }
        }
        total += 1;

        if let Some(dir) = &args.output {
            let encoded = encode_frame(&frame, ".jpg")?;
            std::fs::write(dir.join(format!("frame-{total:06}.jpg")), encoded)?;
        }

        if stats_to_tty {
            interval_count += 1;
            // While triggered the device-reported rate is meaningless, so
            // count frames over wall time instead.
            if camera.get(Property::Trigger).unwrap_or(0.0) == 0.0 {
                fps = camera.get(Property::Fps).unwrap_or(0.0);
            } else if tick.elapsed().as_secs_f64() >= 1.0 {
                fps = interval_count as f64 / tick.elapsed().as_secs_f64();
                interval_count = 0;
                tick = Instant::now();
            }

            let exposure_ms = camera.get(Property::Exposure).unwrap_or(0.0) / 1_000.0;
            print!("\r[{total}]\t{exposure_ms:.3} ms\t{fps:.3} FPS\t\t");
            let _ = std::io::stdout().flush();
        }
    }

    if stats_to_tty {
        println!();
    }
    camera.release();
    Ok(())
}

fn open_camera(args: &ViewArgs) -> Result<Capture> {
    if args.backend.eq_ignore_ascii_case("any") {
        return Capture::open_any(true, args.buffer_timeout_ms)
            .context("no camera available on any backend");
    }

    let kind: BackendKind = args
        .backend
        .parse()
        .with_context(|| format!("unknown backend {:?}", args.backend))?;
    let mut camera = Capture::new(true, args.buffer_timeout_ms);
    camera
        .open(args.camera, kind)
        .with_context(|| format!("opening camera #{} on {kind} failed", args.camera))?;
    Ok(camera)
}
