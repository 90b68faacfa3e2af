use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use ptz_autotrack::calibration::fit::{fit_dead_reckoning, fit_feedback};
use ptz_autotrack::config::PtzConfig;
use ptz_autotrack::detection::BBox;
use ptz_autotrack::io::frames::read_color;
use ptz_autotrack::io::load_samples_csv;
use ptz_autotrack::mapping::{MappingModel, load_params, save_params};
use ptz_autotrack::matching::{LocateView, MatchConfig, OrbViewLocator};

#[derive(Parser)]
#[command(name = "ptz-autotrack")]
#[command(about = "Calibration and mapping tools for a PTZ camera slaved to a wide-angle camera")]
#[command(version)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate a PTZ still inside a wide-angle still.
    Locate(LocateArgs),

    /// Fit mapping parameters from a CSV of calibration samples.
    Fit(FitArgs),

    /// Map a wide-frame pixel or box to pan/tilt/zoom.
    Map(MapArgs),
}

#[derive(Debug, Args)]
struct LocateArgs {
    #[arg(long)]
    wide: PathBuf,

    #[arg(long)]
    ptz: PathBuf,

    /// Use the matcher tuned for dead-reckoning cameras.
    #[arg(long)]
    dead_reckoning: bool,
}

#[derive(Debug, Args)]
struct FitArgs {
    /// CSV with `pan,tilt,zoom,wide_x,wide_y,confidence` rows.
    #[arg(long)]
    samples: PathBuf,

    /// Where to write the mapping JSON.
    #[arg(long)]
    out: PathBuf,

    /// Samples hold dead-reckoned offsets instead of reported positions.
    #[arg(long)]
    dead_reckoning: bool,
}

#[derive(Debug, Args)]
struct MapArgs {
    /// Mapping JSON; defaults to `mapping_path` from the config, then to the
    /// built-in defaults.
    #[arg(long)]
    mapping: Option<PathBuf>,

    #[arg(long, default_value = "1920")]
    width: u32,

    #[arg(long, default_value = "1080")]
    height: u32,

    /// Pixel as `x,y`.
    #[arg(long, value_delimiter = ',', conflicts_with = "bbox")]
    pixel: Option<Vec<f64>>,

    /// Box as `x1,y1,x2,y2`.
    #[arg(long, value_delimiter = ',')]
    bbox: Option<Vec<f64>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PtzConfig::load(path)?,
        None => PtzConfig::default(),
    };

    match cli.command {
        Commands::Locate(args) => run_locate(&config, &args),
        Commands::Fit(args) => run_fit(&args),
        Commands::Map(args) => run_map(&config, &args),
    }
}

fn run_locate(config: &PtzConfig, args: &LocateArgs) -> Result<()> {
    let match_config = match (&config.matching, args.dead_reckoning) {
        (Some(matching), _) => matching.clone(),
        (None, true) => MatchConfig::dead_reckoning(),
        (None, false) => MatchConfig::position_feedback(),
    };
    let wide = read_color(&args.wide)?;
    let ptz = read_color(&args.ptz)?;

    let mut locator = OrbViewLocator::new(match_config)?;
    match locator.locate(&wide, &ptz)? {
        Some(found) => {
            let [x1, y1, x2, y2] = found.bounds;
            println!(
                "center=({:.4}, {:.4}) bounds=({:.4}, {:.4})-({:.4}, {:.4}) scale={:.2} inliers={} confidence={:.3}",
                found.center_x,
                found.center_y,
                x1,
                y1,
                x2,
                y2,
                found.scale,
                found.inliers,
                found.confidence
            );
            Ok(())
        }
        None => bail!("PTZ view not found in the wide image"),
    }
}

fn run_fit(args: &FitArgs) -> Result<()> {
    let samples = load_samples_csv(&args.samples)?;
    info!("Loaded {} samples from {:?}", samples.len(), args.samples);

    let params = if args.dead_reckoning {
        let fit = fit_dead_reckoning(&samples)?;
        println!(
            "pan_to_pixel_x={:.4} tilt_to_pixel_y={:.4} center=({:.4}, {:.4})",
            fit.pan_to_pixel_x, fit.tilt_to_pixel_y, fit.center_x, fit.center_y
        );
        fit.mapping_params()
    } else {
        fit_feedback(&samples)?
    };

    save_params(&args.out, &params)?;
    println!(
        "pan_scale={:.4} tilt_scale={:.4} center=({:.4}, {:.4}) -> {:?}",
        params.pan_scale, params.tilt_scale, params.pan_center_x, params.tilt_center_y, args.out
    );
    Ok(())
}

fn run_map(config: &PtzConfig, args: &MapArgs) -> Result<()> {
    let mut model = MappingModel::default();
    if let Some(path) = args.mapping.as_ref().or(config.mapping_path.as_ref()) {
        let params = load_params(path)?
            .with_context(|| format!("No mapping file at {:?}", path))?;
        model.apply(params);
    }
    model.set_frame_size(args.width, args.height);

    if let Some(b) = &args.bbox {
        let [x1, y1, x2, y2] = b[..] else {
            bail!("--bbox takes four values, got {}", b.len());
        };
        let bbox = BBox::new(x1, y1, x2, y2);
        let (cx, cy) = bbox.center();
        let (pan, tilt) = model.pixel_to_actuator(cx, cy);
        let zoom = model.bbox_to_zoom(&bbox, config.tracking.target_fill);
        println!("pan={pan:.4} tilt={tilt:.4} zoom={zoom:.4}");
    } else if let Some(p) = &args.pixel {
        let [x, y] = p[..] else {
            bail!("--pixel takes two values, got {}", p.len());
        };
        let (pan, tilt) = model.pixel_to_actuator(x, y);
        println!("pan={pan:.4} tilt={tilt:.4}");
    } else {
        bail!("Pass --pixel x,y or --bbox x1,y1,x2,y2");
    }
    Ok(())
}
