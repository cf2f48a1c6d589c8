//! markercal CLI: calibrate from chessboard images, detect markers, inspect
//! stored calibrations.

use clap::{Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};
use markercal::calib::StoreError;
use markercal::{
    AppConfig, CalibrationSession, CalibrationStore, ConfigError, JsonPreferences, MarkerTracker,
    SessionError, SessionStep, Throttle, TrackerError,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("not enough samples: {found} of {required} images contained the pattern")]
    NotEnoughSamples { found: usize, required: usize },
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "markercal")]
#[command(about = "Chessboard camera calibration and ArUco marker pose estimation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log verbosity.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Emit logs as JSON lines through `tracing`.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate the camera from chessboard images and store the result.
    Calibrate {
        /// JSON configuration; defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Preference file the calibration is written to.
        #[arg(long)]
        prefs: PathBuf,
        /// Frames, in capture order.
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Detect markers in an image and estimate their poses.
    Detect {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        prefs: PathBuf,
        image: PathBuf,
        /// Write the frame with overlays here.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the stored calibration.
    Show {
        #[arg(long)]
        prefs: PathBuf,
        /// Preference scope; the configured default when omitted.
        #[arg(long)]
        scope: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    if cli.json_logs {
        markercal::core::init_tracing(true);
        return;
    }
    let _ = env_logger::Builder::new()
        .filter_level(cli.log_level.into())
        .parse_default_env()
        .try_init();
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Calibrate {
            config,
            prefs,
            images,
        } => run_calibrate(config.as_deref(), &prefs, &images),
        Commands::Detect {
            config,
            prefs,
            image,
            output,
        } => run_detect(config.as_deref(), &prefs, &image, output.as_deref()),
        Commands::Show { prefs, scope } => run_show(&prefs, scope),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    Ok(match path {
        Some(p) => AppConfig::load_json(p)?,
        None => AppConfig::default(),
    })
}

fn open_store(prefs: &Path, scope: String) -> CalibrationStore<JsonPreferences> {
    CalibrationStore::with_scope(JsonPreferences::new(prefs), scope)
}

fn load_rgb(path: &Path) -> CliResult<image::RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| CliError::Image {
            path: path.to_path_buf(),
            source,
        })
}

// ── calibrate ──────────────────────────────────────────────────────────

fn run_calibrate(config: Option<&Path>, prefs: &Path, images: &[PathBuf]) -> CliResult<()> {
    let config = load_config(config)?;
    let store = open_store(prefs, config.calibration_scope.clone());
    let mut session = CalibrationSession::new(&config)?
        .with_throttle(Throttle::disabled())
        .with_store(store);

    for path in images {
        let mut frame = load_rgb(path)?;
        match session.process(&mut frame, Duration::ZERO)? {
            SessionStep::NotFound(progress) => {
                eprintln!("{}: no pattern ({progress})", path.display())
            }
            SessionStep::Captured(progress) => eprintln!("{}: {progress}", path.display()),
            SessionStep::Calibrated(calibration) => {
                eprintln!(
                    "{}: calibrated, rms {:.4} px",
                    path.display(),
                    calibration.rms_error
                );
                println!("{}", serde_json::to_string_pretty(&calibration)?);
                info!("calibration written to {}", prefs.display());
                return Ok(());
            }
            SessionStep::Skipped | SessionStep::Done => {}
        }
    }

    let progress = session.progress();
    Err(CliError::NotEnoughSamples {
        found: progress.samples,
        required: progress.required,
    })
}

// ── detect ─────────────────────────────────────────────────────────────

fn run_detect(
    config: Option<&Path>,
    prefs: &Path,
    image: &Path,
    output: Option<&Path>,
) -> CliResult<()> {
    let config = load_config(config)?;
    let store = open_store(prefs, config.calibration_scope.clone());
    let mut tracker = MarkerTracker::from_store(&store, &config)?;

    let mut frame = load_rgb(image)?;
    let report = tracker.process(&mut frame);
    if let Some(path) = output {
        frame.save(path).map_err(|source| CliError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── show ───────────────────────────────────────────────────────────────

fn run_show(prefs: &Path, scope: Option<String>) -> CliResult<()> {
    let scope = scope.unwrap_or_else(|| AppConfig::default().calibration_scope);
    match open_store(prefs, scope).load()? {
        Some(intrinsics) => println!("{}", serde_json::to_string_pretty(&intrinsics)?),
        None => println!("not calibrated"),
    }
    Ok(())
}
