use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smart_dark::boxes::BoxFormat;
use smart_dark::detector::{DetectorQueue, ReplayDetector};
use smart_dark::resources::ResourceTable;
use smart_dark::scene::{
    default_highlight_mappings, default_highlight_tolerance_sq, remap_highlights, VectorScene,
};
use smart_dark::{default_output_path, save_image, DarkModeEngine, ProcessOptions, ProcessResult};

#[derive(Parser)]
#[command(
    name = "smartdark",
    about = "Selectively invert document content for dark mode",
    version,
    after_help = "Photographs and detected regions keep their colors; text and line art are inverted.\n\
                  Set RUST_LOG to override the log filter."
)]
struct Cli {
    /// JSON file with processing options (missing fields use defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Invert standalone image files, skipping photographs
    Image {
        /// Input image file or directory
        input: PathBuf,

        /// Output file or directory (default: {name}_dark.{ext})
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip photograph detection, invert unconditionally
        #[arg(short, long)]
        force: bool,
    },

    /// Invert a rendered page outside its detected regions
    Page {
        /// Rendered page raster
        input: PathBuf,

        /// JSON array with the raw detector output for this page
        #[arg(short, long)]
        detections: PathBuf,

        /// Layout of the raw detector output
        #[arg(long, value_enum, default_value_t = RawFormat::Normalized)]
        format: RawFormat,

        /// Output file (default: {name}_dark.{ext})
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the detection report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Recolor a vector scene and its embedded images
    Scene {
        /// Scene JSON file
        input: PathBuf,

        /// Output scene file (default: {name}_dark.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also remap yellow, green and cyan highlights to blue
        #[arg(long)]
        highlights: bool,

        /// Saturation at or above which a paint counts as colored
        #[arg(long)]
        sat_threshold: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RawFormat {
    /// Normalized [y1, x1, y2, x2] tuples
    Normalized,
    /// Single box in the 596x842 reference frame
    Legacy,
}

impl From<RawFormat> for BoxFormat {
    fn from(f: RawFormat) -> Self {
        match f {
            RawFormat::Normalized => BoxFormat::NormalizedCorners,
            RawFormat::Legacy => BoxFormat::legacy(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut opts = match &cli.config {
        Some(path) => match ProcessOptions::from_json_file(path) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("Error: Cannot load config {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => ProcessOptions::default(),
    };

    let code = match cli.command {
        Command::Image {
            input,
            output,
            force,
        } => {
            opts.force |= force;
            run_image(&DarkModeEngine::new(opts), &input, output, cli.quiet)
        }
        Command::Page {
            input,
            detections,
            format,
            output,
            report,
        } => run_page(
            &DarkModeEngine::new(opts),
            &input,
            &detections,
            format.into(),
            output,
            report,
        ),
        Command::Scene {
            input,
            output,
            highlights,
            sat_threshold,
        } => {
            if let Some(t) = sat_threshold {
                if !(0.0..=1.0).contains(&t) {
                    eprintln!("Error: Saturation threshold must be between 0.0 and 1.0");
                    process::exit(1);
                }
                opts.sat_threshold = t;
            }
            run_scene(&DarkModeEngine::new(opts), &input, output, highlights)
        }
    };

    process::exit(code);
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run_image(engine: &DarkModeEngine, input: &Path, output: Option<PathBuf>, quiet: bool) -> i32 {
    if !input.exists() {
        eprintln!("Error: Input path does not exist: {}", input.display());
        return 1;
    }

    if !quiet && engine.options().force {
        eprintln!("WARNING: Force mode - inverting ALL images without photograph detection!");
        eprintln!();
    }

    let results = if input.is_dir() {
        let Some(output_dir) = output else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: smartdark image <input_dir> -o <output_dir>");
            return 1;
        };
        engine.process_directory(input, &output_dir)
    } else {
        let output_path = output.unwrap_or_else(|| default_output_path(input));
        vec![engine.process_file(input, &output_path)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for r in &results {
        print_result(r, quiet);
        if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !quiet {
        eprintln!();
        eprint!("[Summary] Inverted: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    i32::from(fail_count > 0)
}

fn print_result(result: &ProcessResult, quiet: bool) {
    if quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.skipped {
        eprintln!("[SKIP] {filename}: {}", result.message);
    } else if result.success {
        eprintln!("[OK] {filename}: {}", result.message);
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }
}

fn run_page(
    engine: &DarkModeEngine,
    input: &Path,
    detections: &Path,
    format: BoxFormat,
    output: Option<PathBuf>,
    report: Option<PathBuf>,
) -> i32 {
    let raw: Vec<f64> = match std::fs::read_to_string(detections)
        .map_err(smart_dark::Error::from)
        .and_then(|text| serde_json::from_str(&text).map_err(smart_dark::Error::from))
    {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: Cannot read detections {}: {e}", detections.display());
            return 1;
        }
    };

    let page = match image::open(input) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            eprintln!("Error: Cannot load page {}: {e}", input.display());
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal: Failed to start runtime: {e}");
            return 1;
        }
    };

    let result = runtime.block_on(async {
        let queue = DetectorQueue::spawn(ReplayDetector::new(raw), format);
        engine.process_page(&queue, page).await
    });
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[FAIL] {}: {e}", input.display());
            return 1;
        }
    };

    if let Some(report_path) = report {
        let written = serde_json::to_string_pretty(&result.report)
            .map_err(smart_dark::Error::from)
            .and_then(|json| std::fs::write(&report_path, json).map_err(smart_dark::Error::from));
        if let Err(e) = written {
            eprintln!("Error: Cannot write report {}: {e}", report_path.display());
            return 1;
        }
    }

    let output_path = output.unwrap_or_else(|| default_output_path(input));
    if let Err(e) = save_image(&result.image, &output_path) {
        eprintln!("[FAIL] {}: {e}", output_path.display());
        return 1;
    }

    tracing::info!(
        output = %output_path.display(),
        regions = result.boxes.len(),
        detected = result.report.ok,
        "page written"
    );
    0
}

fn run_scene(
    engine: &DarkModeEngine,
    input: &Path,
    output: Option<PathBuf>,
    highlights: bool,
) -> i32 {
    let mut scene = match load_scene(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: Cannot load scene {}: {e}", input.display());
            return 1;
        }
    };

    let base_dir = input.parent().unwrap_or(Path::new("."));
    let mut generated = ResourceTable::new();
    let summary = engine.process_scene(&mut scene, base_dir, &mut generated);

    let remapped = if highlights {
        remap_highlights(
            &mut scene,
            &default_highlight_mappings(),
            default_highlight_tolerance_sq(),
        )
    } else {
        0
    };

    let output_path = output.unwrap_or_else(|| default_output_path(input));
    let written = serde_json::to_string_pretty(&scene)
        .map_err(smart_dark::Error::from)
        .and_then(|json| std::fs::write(&output_path, json).map_err(smart_dark::Error::from));
    if let Err(e) = written {
        eprintln!("[FAIL] {}: {e}", output_path.display());
        // The scene will not reference the inverted copies.
        generated.teardown();
        return 1;
    }

    tracing::info!(
        output = %output_path.display(),
        fills = summary.recolor.fills,
        strokes = summary.recolor.strokes,
        gradient_stops = summary.recolor.gradient_stops,
        images_inverted = summary.images_inverted,
        photographs = summary.photographs,
        flat_fallbacks = summary.flat_fallbacks,
        unreadable = summary.unreadable,
        highlights = remapped,
        "scene written"
    );
    0
}

fn load_scene(path: &Path) -> smart_dark::Result<VectorScene> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
