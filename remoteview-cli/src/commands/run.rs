//! Run command - drive a capture session end to end

use anyhow::{Context, Result};
use clap::Args;
use remoteview_core::config::CaptureConfig;
use remoteview_core::error::CODE_FAIL;
use remoteview_core::sim::{SimConnection, SimOptions, SimPlatform};
use remoteview_core::CaptureEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Interval of the synthetic sample pump (about 30 fps)
const SAMPLE_INTERVAL: Duration = Duration::from_millis(33);

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Capture audio alongside video
    #[arg(short, long)]
    audio: bool,

    /// Attach the mixed-reality compositing effects
    #[arg(short, long)]
    mrc: bool,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Simulate a device failure after this many seconds
    #[arg(long)]
    fail_after: Option<u64>,

    /// Make the audio effect attachment fail
    #[arg(long)]
    fail_audio_effect: bool,

    /// Name of the connection the sink writes to
    #[arg(long, default_value = "remoteview-peer")]
    connection: String,

    /// Bytes per synthetic sample
    #[arg(long, default_value = "4096")]
    sample_size: usize,

    /// Print the final status as JSON
    #[arg(long)]
    json: bool,
}

/// Run a capture session
pub async fn run(args: RunArgs, config: CaptureConfig) -> Result<()> {
    if !args.json {
        println!("RemoteView - Starting Capture\n");
        println!("Configuration:");
        println!(
            "  Minimum:     {}x{} @ {} fps",
            config.min_width, config.min_height, config.frame_rate
        );
        println!("  Audio:       {}", args.audio);
        println!("  MRC:         {}", args.mrc);
        println!("  Effects:     {} on failure", config.effect_failure_policy);
        println!("  Connection:  {}", args.connection);
        println!();
    }

    let mut options = SimOptions::default().with_sample_pump(SAMPLE_INTERVAL, args.sample_size);
    if args.fail_audio_effect {
        options = options.with_failing_audio_effect();
    }
    let sim = SimPlatform::new(options);
    let engine = CaptureEngine::new(sim.platform(), config);

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let token = engine.add_closed(move |handle| {
        let _ = closed_tx.send(*handle);
    });

    engine
        .init_async(args.audio)
        .context("Failed to initialize capture")?
        .join()
        .await
        .context("Failed to initialize capture")?;

    let connection = Arc::new(SimConnection::new(args.connection.clone()));
    engine
        .start_async(args.mrc, connection)
        .context("Failed to start recording")?
        .join()
        .await
        .context("Failed to start recording")?;

    let status = engine.status();
    if !args.json {
        println!("Recording started!");
        println!("  Session:       {}", engine.handle());
        println!(
            "  Video effect:  {}",
            attached(args.mrc, status.video_effect_attached)
        );
        println!(
            "  Audio effect:  {}",
            attached(args.mrc && args.audio, status.audio_effect_attached)
        );
        println!();
        println!("Press Ctrl+C to stop...\n");
    }

    if let Some(seconds) = args.fail_after {
        let sim = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let notified = sim.fire_failed(CODE_FAIL, "simulated device loss");
            info!("Fired simulated capture failure ({} handler(s))", notified);
        });
    }

    let started = Instant::now();
    let deadline = async {
        if args.duration > 0 {
            tokio::time::sleep(Duration::from_secs(args.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    let reason = tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            "interrupted"
        }
        _ = deadline => "duration elapsed",
        Some(handle) = closed_rx.recv() => {
            warn!("Session {} lost its capture device", handle);
            "capture lost"
        }
    };
    let elapsed = started.elapsed();

    if !args.json {
        println!("Stopping capture ({})...", reason);
    }
    let stopped = match engine.stop_async() {
        Ok(operation) => operation.join().await,
        Err(e) => Err(e),
    };
    if let Err(e) = &stopped {
        warn!("Stop failed: {}", e);
    }
    engine.close().context("Failed to close capture")?;
    if let Err(e) = engine.remove_closed(token) {
        warn!("Failed to remove closed handler: {}", e);
    }

    let (samples, bytes) = sim
        .sinks()
        .iter()
        .fold((0, 0), |(samples, bytes), sink| {
            (samples + sink.samples_written(), bytes + sink.bytes_written())
        });
    let status = engine.status();

    if args.json {
        let report = serde_json::json!({
            "reason": reason,
            "elapsed_ms": elapsed.as_millis() as u64,
            "samples": samples,
            "bytes": bytes,
            "stopped_cleanly": stopped.is_ok(),
            "status": status,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("Capture stopped.");
        println!("  Duration:  {:.1}s", elapsed.as_secs_f64());
        println!("  Samples:   {}", samples);
        println!("  Bytes:     {}", bytes);
        println!("  Status:    {}", status);
    }

    Ok(())
}

fn attached(requested: bool, attached: bool) -> &'static str {
    match (requested, attached) {
        (false, _) => "off",
        (true, true) => "attached",
        (true, false) => "failed (continuing without)",
    }
}
