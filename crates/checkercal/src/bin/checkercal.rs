use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use checkercal::calib::{RectifyParams, UndistortMap};
use checkercal::core::synthetic::{orbit_poses, pattern_in_view, project_pattern, render_checkerboard};
use checkercal::core::{hstack, BrownConrady5, CameraIntrinsics, ImageSize, PinholeCamera};
use checkercal::{
    load_calibration, load_frame, prompt_pattern, save_calibration, save_frame, BatchSink,
    CalibrationResult, CalibrationRecord, Frame, ImageSequenceSource, PatternSpec, Session,
    SessionConfig, VecSource,
};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde::de::DeserializeOwned;

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

type CliResult<T> = Result<T, Box<dyn Error>>;

const PROMPT_ATTEMPTS: usize = 5;

/// Checkerboard camera calibration.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON log lines (only with the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Calibrate from still images of a checkerboard.
    Calibrate(CalibrateArgs),
    /// Rectify images with a saved calibration.
    Undistort(UndistortArgs),
    /// Calibrate a synthetic camera end to end and compare with the truth.
    Demo(DemoArgs),
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    /// Inner corners per board row. Prompted for when omitted.
    #[arg(long)]
    cols: Option<u32>,
    /// Inner corners per board column. Prompted for when omitted.
    #[arg(long)]
    rows: Option<u32>,
    /// JSON `SessionConfig`; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where to write the calibration record.
    #[arg(short, long, default_value = "calibration.json")]
    output: PathBuf,
    /// Also write original | rectified pairs of every input here.
    #[arg(long)]
    undistort_dir: Option<PathBuf>,
    /// Rectification field-of-view trade-off in [0, 1].
    #[arg(long)]
    alpha: Option<f64>,
    /// Solve after this many accepted views instead of using every image.
    #[arg(long)]
    target: Option<usize>,
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct UndistortArgs {
    /// Record written by `calibrate`.
    #[arg(long)]
    calibration: PathBuf,
    #[arg(long)]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 0.0)]
    alpha: f64,
    /// Write original | rectified pairs instead of the rectified image alone.
    #[arg(long)]
    side_by_side: bool,
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct DemoArgs {
    /// Number of synthetic views.
    #[arg(long, default_value_t = 12)]
    views: usize,
    /// Optionally save the recovered calibration.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        let _ = LogTracer::init();
        checkercal::core::init_tracing(json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = json;
        let _ = checkercal::core::init_with_level(checkercal::core::level_from_verbosity(verbose));
    }
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Calibrate(args) => calibrate(args),
        Commands::Undistort(args) => undistort(args),
        Commands::Demo(args) => demo(args),
    }
}

fn load_json_file<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn resolve_pattern(args: &CalibrateArgs, config: &SessionConfig) -> CliResult<PatternSpec> {
    match (args.cols, args.rows) {
        (Some(cols), Some(rows)) => Ok(PatternSpec::new(cols, rows)?),
        (None, None) if args.config.is_some() => Ok(config.pattern),
        (None, None) => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            Ok(prompt_from(&mut input)?)
        }
        _ => Err("--cols and --rows must be given together".into()),
    }
}

fn prompt_from(input: &mut dyn BufRead) -> CliResult<PatternSpec> {
    let mut stderr = io::stderr();
    let pattern = prompt_pattern(input, &mut stderr, PROMPT_ATTEMPTS)?;
    stderr.flush()?;
    Ok(pattern)
}

fn calibrate(args: CalibrateArgs) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => load_json_file::<SessionConfig>(path)?,
        None => SessionConfig::default(),
    };
    config.pattern = resolve_pattern(&args, &config)?;
    if let Some(alpha) = args.alpha {
        config.rectify.alpha = alpha;
    }
    if args.target.is_some() {
        config.target_count = args.target;
    }
    config.solve_on_exhaustion = true;
    let rectify = config.rectify.clone();

    info!(
        "calibrating {} pattern from {} images",
        config.pattern,
        args.images.len()
    );
    let mut source = ImageSequenceSource::new(args.images.clone());
    let mut sink = BatchSink::new();
    let mut session = Session::new(config);
    let outcome = session.run(&mut source, &mut sink)?;

    for path in source.skipped() {
        eprintln!("skipped unreadable image {}", path.display());
    }
    let Some(result) = outcome.result else {
        return Err(format!(
            "calibration failed: board found in {} of {} frames, at least 3 needed",
            outcome.captures, outcome.frames
        )
        .into());
    };

    print_result(&result);
    save_calibration(&result, &args.output)?;
    println!("saved {}", args.output.display());

    if let Some(dir) = &args.undistort_dir {
        let map = UndistortMap::new(&result, &rectify);
        let written = rectify_files(&map, &args.images, dir, true)?;
        println!("wrote {written} rectified images to {}", dir.display());
    }
    Ok(())
}

fn undistort(args: UndistortArgs) -> CliResult<()> {
    let record: CalibrationRecord = load_calibration(&args.calibration)?;
    let params = RectifyParams { alpha: args.alpha };
    let map = UndistortMap::from_camera(&record.camera(), record.image_size(), &params);
    let written = rectify_files(&map, &args.images, &args.out_dir, args.side_by_side)?;
    println!("wrote {written} rectified images to {}", args.out_dir.display());
    Ok(())
}

/// Rectify every readable image of the calibrated size into `dir`.
fn rectify_files(
    map: &UndistortMap,
    images: &[PathBuf],
    dir: &Path,
    side_by_side: bool,
) -> CliResult<usize> {
    fs::create_dir_all(dir)?;
    let mut written = 0;
    for (seq, path) in images.iter().enumerate() {
        let frame = match load_frame(path, seq as u64) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let rectified = match map.apply(&frame) {
            Ok(r) => r,
            Err(err) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let out = if side_by_side {
            hstack(&frame, &rectified)?
        } else {
            rectified
        };
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
        save_frame(&out, &dir.join(format!("{stem}_undistorted.png")))?;
        written += 1;
    }
    Ok(written)
}

fn print_result(result: &CalibrationResult) {
    let k = &result.intrinsics;
    let d = &result.distortion;
    println!(
        "views {} | rms {:.4} px | converged {}",
        result.poses.len(),
        result.rms_error,
        result.converged
    );
    println!("fx {:.3}  fy {:.3}  cx {:.3}  cy {:.3}", k.fx, k.fy, k.cx, k.cy);
    println!(
        "k1 {:.5}  k2 {:.5}  p1 {:.5}  p2 {:.5}  k3 {:.5}",
        d.k1, d.k2, d.p1, d.p2, d.k3
    );
}

fn demo_camera() -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(420.0, 418.0, 321.0, 238.0),
        BrownConrady5 {
            k1: -0.12,
            k2: 0.03,
            p1: 0.0005,
            p2: -0.0003,
            k3: 0.0,
        },
    )
}

fn demo(args: DemoArgs) -> CliResult<()> {
    let pattern = PatternSpec::default();
    let size = ImageSize::new(640, 480);
    let truth = demo_camera();

    let mut frames: Vec<Frame> = Vec::with_capacity(args.views);
    for (i, pose) in orbit_poses(&pattern, args.views, 12.0).iter().enumerate() {
        let in_view = project_pattern(&pattern, &truth, pose)
            .is_some_and(|pts| pattern_in_view(&pts, size, 4.0));
        if !in_view {
            warn!("synthetic view {i} leaves the image, dropped");
            continue;
        }
        frames.push(render_checkerboard(&pattern, &truth, pose, size, 4, i as u64)?);
    }
    info!("rendered {} synthetic views", frames.len());

    let mut config = SessionConfig::new(pattern);
    config.solve_on_exhaustion = true;
    let mut session = Session::new(config);
    let outcome = session.run(&mut VecSource::new(frames), &mut BatchSink::new())?;
    let Some(result) = outcome.result else {
        return Err(format!(
            "demo calibration failed: board found in {} of {} views",
            outcome.captures, outcome.frames
        )
        .into());
    };

    print_result(&result);
    let (t, k) = (&truth.intrinsics, &result.intrinsics);
    println!(
        "truth fx {:.3}  fy {:.3}  cx {:.3}  cy {:.3}  k1 {:.5}  k2 {:.5}",
        t.fx, t.fy, t.cx, t.cy, truth.distortion.k1, truth.distortion.k2
    );
    println!(
        "error fx {:+.3}  fy {:+.3}  cx {:+.3}  cy {:+.3}",
        k.fx - t.fx,
        k.fy - t.fy,
        k.cx - t.cx,
        k.cy - t.cy
    );
    if let Some(path) = &args.output {
        save_calibration(&result, path)?;
        println!("saved {}", path.display());
    }
    Ok(())
}
