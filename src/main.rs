use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use indicatif::ProgressStyle;
use tracing::info_span;
use tracing::Span;
use tracing::{info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use handtrack_rust::config::Config;
use handtrack_rust::dataset::{Recorder, Replay};
use handtrack_rust::one_euro::LandmarkSmoother;
use handtrack_rust::sim::{Scene, SimulatedDetector};
use handtrack_rust::tracker::HybridTracker;
use handtrack_rust::visualization::Visualizer;

#[derive(Parser)]
pub struct Args {
    /// Number of synthetic frames to process.
    #[clap(long, default_value = "300")]
    pub frames: u64,

    #[clap(long, default_value = "640")]
    pub width: usize,

    #[clap(long, default_value = "480")]
    pub height: usize,

    #[clap(long, default_value = "42")]
    pub seed: u64,

    /// Detector jitter in pixels.
    #[clap(long, default_value = "1.0")]
    pub jitter: f64,

    /// Detector dropout probability per keyframe.
    #[clap(long, default_value = "0.05")]
    pub dropout: f64,

    #[clap(long, default_value = "0.9")]
    pub confidence: f64,

    /// Write the smoothed stream to this JSON Lines file.
    #[clap(long)]
    pub record: Option<PathBuf>,

    /// Re-smooth a recorded stream instead of running the tracker.
    #[clap(long)]
    pub replay: Option<PathBuf>,

    /// Save a rerun recording of the run.
    #[clap(long)]
    pub rerun_output: Option<PathBuf>,

    #[clap(flatten)]
    pub config: Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .init();

    if let Some(path) = &args.replay {
        return run_replay(path, &args);
    }
    run_live(&args)
}

fn run_live(args: &Args) -> Result<()> {
    let mut scene = Scene::new(args.width, args.height);
    let mut detector = SimulatedDetector::new(args.seed, args.jitter, args.dropout, args.confidence);
    let mut tracker = HybridTracker::new(args.config.tracker(), args.config.flow());
    let mut smoother = LandmarkSmoother::new(args.config.filter());
    let mut recorder = match &args.record {
        Some(path) => Some(Recorder::new(path)?),
        None => None,
    };
    let visualizer = match &args.rerun_output {
        Some(path) => Some(Visualizer::new(path)?),
        None => None,
    };

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(args.frames);
    let header_span_enter = header_span.enter();

    for frame in 0..args.frames {
        let image = scene.render();
        detector.set_truth(&scene.truth());
        let result = tracker.process_frame(&image, &mut detector);
        let smoothed = smoother.apply(result.points.as_ref(), scene.time());
        Span::current().pb_inc(1);

        if let Some(recorder) = &mut recorder {
            recorder.push(scene.time(), smoothed.as_ref())?;
        }
        if let Some(visualizer) = &visualizer {
            visualizer.advance(frame);
            visualizer.show_frame(&image)?;
            visualizer.show_points(smoothed.as_ref(), result.is_keyframe)?;
            visualizer.show_error(result.error)?;
        }
        scene.advance();
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    info!(
        "tracking metrics: {}",
        serde_json::to_string(tracker.metrics())?
    );
    info!(
        "detector share {:.1}%, flow share {:.1}%",
        100. * tracker.metrics().keyframe_ratio(),
        100. * tracker.metrics().flow_ratio()
    );
    Ok(())
}

/// Runs the smoothing stage over a recorded stream, without the tracker.
fn run_replay(path: &Path, args: &Args) -> Result<()> {
    let mut replay = Replay::open(path)?;
    let mut smoother = LandmarkSmoother::new(args.config.filter());
    let mut recorder = match &args.record {
        Some(out) => Some(Recorder::new(out)?),
        None => None,
    };

    let mut last_time: Option<f64> = None;
    let mut frames = 0u64;
    let mut tracked = 0u64;
    while let Some(sample) = replay.next()? {
        if let Some(last_time) = last_time {
            if sample.time < last_time {
                warn!("discard unordered sample");
                continue;
            }
        }
        last_time = Some(sample.time);

        let smoothed = smoother.apply(sample.points.as_ref(), sample.time);
        if smoothed.is_some() {
            tracked += 1;
        }
        if let Some(recorder) = &mut recorder {
            recorder.push(sample.time, smoothed.as_ref())?;
        }
        frames += 1;
    }
    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    info!("replayed {frames} samples, {tracked} with landmarks");
    Ok(())
}
