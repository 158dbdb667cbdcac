use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use qrmark::attack::{central_crop, crop_attack};
use qrmark::codec::{EcClass, Redundancy};
use qrmark::io::{default_output_path, is_supported_image, load_rgb, save_image};
use qrmark::{
    make_screenshot, BorderSizes, DctEngine, Keys, MatchQuality, Recovery, RecoveryConfig,
    ScaleRange, SearchBudget, Shape, WatermarkManifest, Watermarker,
};

#[derive(Parser)]
#[command(
    name = "qrmark",
    about = "Embed QR-coded invisible watermarks and recover them from cropped or screenshotted images",
    version,
    after_help = "Keep the watermarked original: recovering from a crop or screenshot needs it as the reference.\n\
                  Save watermarked images as PNG; lossy formats weaken the watermark."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a text watermark
    Embed(EmbedArgs),
    /// Extract a watermark, recovering geometry when a reference is given
    Extract(ExtractArgs),
    /// Frame an image with synthetic screenshot chrome
    Screenshot(ScreenshotArgs),
    /// Apply a central crop and optional rescale
    Attack(AttackArgs),
}

#[derive(Args)]
struct EmbedArgs {
    /// Input image
    input: PathBuf,

    /// Watermark text
    #[arg(short, long)]
    text: String,

    /// Output image (default: {name}_wm.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Store the text as plain bits without error correction
    #[arg(long)]
    plain: bool,

    /// QR error-correction class
    #[arg(long, value_enum, default_value = "h")]
    ec: EcArg,

    /// Key seeding the carrier layout
    #[arg(long, default_value = "1")]
    image_key: u64,

    /// Key seeding the bit order
    #[arg(long, default_value = "1")]
    payload_key: u64,

    /// Manifest path (default: output path with .json extension)
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[derive(Args)]
struct ExtractArgs {
    /// Image to extract from
    input: PathBuf,

    /// Manifest written at embed time
    #[arg(long)]
    manifest: PathBuf,

    /// Watermarked original; enables crop and screenshot recovery
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Smallest scale factor to search
    #[arg(long, default_value = "0.5")]
    scale_min: f32,

    /// Largest scale factor to search
    #[arg(long, default_value = "2.0")]
    scale_max: f32,

    /// Number of candidate scales
    #[arg(long, default_value = "200", conflicts_with = "exhaustive")]
    search: usize,

    /// Try every distinguishable scale
    #[arg(long)]
    exhaustive: bool,

    /// Write the recovered image and grid here
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ScreenshotArgs {
    /// Input image
    input: PathBuf,

    /// Output image (default: {name}_screenshot.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Border size; the bottom band is twice as tall
    #[arg(long, default_value = "50")]
    border: u32,
}

#[derive(Args)]
struct AttackArgs {
    /// Input image
    input: PathBuf,

    /// Fraction of each side kept by the central crop (0.0-1.0)
    #[arg(long)]
    crop: f32,

    /// Rescale factor applied after cropping
    #[arg(long)]
    scale: Option<f32>,

    /// Output image (default: {name}_attacked.png)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EcArg {
    L,
    M,
    Q,
    H,
}

impl From<EcArg> for EcClass {
    fn from(arg: EcArg) -> Self {
        match arg {
            EcArg::L => Self::Low,
            EcArg::M => Self::Medium,
            EcArg::Q => Self::Quartile,
            EcArg::H => Self::High,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let outcome = match &cli.command {
        Command::Embed(args) => embed(args, cli.quiet),
        Command::Extract(args) => extract(args, cli.quiet),
        Command::Screenshot(args) => screenshot(args, cli.quiet),
        Command::Attack(args) => attack(args, cli.quiet),
    };

    if let Err(message) = outcome {
        eprintln!("[FAIL] {message}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "qrmark=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn check_input(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Input path does not exist: {}", path.display()));
    }
    if !is_supported_image(path) {
        return Err(format!("Unsupported image format: {}", path.display()));
    }
    Ok(())
}

fn png_output(input: &Path, output: Option<&PathBuf>, suffix: &str) -> PathBuf {
    output
        .cloned()
        .unwrap_or_else(|| default_output_path(input, suffix).with_extension("png"))
}

fn embed(args: &EmbedArgs, quiet: bool) -> Result<(), String> {
    check_input(&args.input)?;
    let img = load_rgb(&args.input).map_err(|e| format!("Failed to load: {e}"))?;

    let redundancy = if args.plain {
        Redundancy::None
    } else {
        Redundancy::ErrorCorrecting(args.ec.into())
    };
    let keys = Keys::new(args.image_key, args.payload_key);
    let engine = DctEngine::new();
    let (marked, manifest) = Watermarker::new(&engine, keys)
        .embed(&img, &args.text, redundancy)
        .map_err(|e| format!("Failed to embed: {e}"))?;

    let output = png_output(&args.input, args.output.as_ref(), "wm");
    save_image(&marked, &output).map_err(|e| format!("Failed to save: {e}"))?;
    let manifest_path = args
        .manifest
        .clone()
        .unwrap_or_else(|| output.with_extension("json"));
    manifest
        .save(&manifest_path)
        .map_err(|e| format!("Failed to write manifest: {e}"))?;

    if !quiet {
        eprintln!("[OK] {}", output.display());
        eprintln!("  -> manifest: {}", manifest_path.display());
        eprintln!("  -> bits: {}", manifest.bit_count);
        if let Some(version) = manifest.qr_version {
            eprintln!("  -> QR version: {version}");
        }
    }
    Ok(())
}

fn extract(args: &ExtractArgs, quiet: bool) -> Result<(), String> {
    check_input(&args.input)?;
    let manifest = WatermarkManifest::load(&args.manifest)
        .map_err(|e| format!("Failed to read manifest: {e}"))?;
    let attacked = load_rgb(&args.input).map_err(|e| format!("Failed to load: {e}"))?;

    let scale_range =
        ScaleRange::new(args.scale_min, args.scale_max).map_err(|e| format!("Error: {e}"))?;
    let config = RecoveryConfig {
        keys: manifest.keys,
        scale_range,
        search_budget: if args.exhaustive {
            SearchBudget::Exhaustive
        } else {
            SearchBudget::Limited(args.search)
        },
        debug_dir: args.debug_dir.clone(),
    };
    let engine = DctEngine::new();
    let recovery = Recovery::new(&engine, config);

    let payload = if let Some(reference_path) = &args.reference {
        let reference =
            load_rgb(reference_path).map_err(|e| format!("Failed to load reference: {e}"))?;
        let result = recovery
            .recover_and_decode(&reference, &attacked, manifest.bit_count, &manifest.layout)
            .map_err(|e| format!("Recovery failed: {e}"))?;
        if !quiet {
            let quality = result.geometry.quality();
            eprintln!(
                "{} attack, region {}, scale {:.4}",
                result.kind, result.geometry.region, result.geometry.scale
            );
            eprintln!("Match score: {:.4} ({quality})", result.geometry.score);
            if quality == MatchQuality::Unreliable {
                eprintln!("WARNING: match score is low, the payload may be wrong");
            }
        }
        result.payload
    } else {
        recovery
            .extract_direct(&attacked, manifest.bit_count, &manifest.layout)
            .map_err(|e| format!("Extraction failed: {e}"))?
    };

    let Some(text) = payload else {
        return Err("No readable QR code in the extracted bits".to_string());
    };
    println!("{text}");

    if !quiet {
        if let Some(expected) = &manifest.text {
            if *expected == text {
                eprintln!("[OK] Payload matches the manifest");
            } else {
                eprintln!("[WARN] Payload differs from the manifest (expected {expected:?})");
            }
        }
    }
    Ok(())
}

fn screenshot(args: &ScreenshotArgs, quiet: bool) -> Result<(), String> {
    check_input(&args.input)?;
    let img = load_rgb(&args.input).map_err(|e| format!("Failed to load: {e}"))?;
    let (canvas, region) = make_screenshot(&img, BorderSizes::uniform(args.border))
        .map_err(|e| format!("Failed to frame: {e}"))?;
    let output = png_output(&args.input, args.output.as_ref(), "screenshot");
    save_image(&canvas, &output).map_err(|e| format!("Failed to save: {e}"))?;
    if !quiet {
        eprintln!("[OK] {} (image at {region})", output.display());
    }
    Ok(())
}

fn attack(args: &AttackArgs, quiet: bool) -> Result<(), String> {
    check_input(&args.input)?;
    if !(args.crop > 0.0 && args.crop <= 1.0) {
        return Err("Crop fraction must be in (0.0, 1.0]".to_string());
    }
    let img = load_rgb(&args.input).map_err(|e| format!("Failed to load: {e}"))?;
    let region = central_crop(Shape::of(&img), args.crop);
    let attacked =
        crop_attack(&img, region, args.scale).map_err(|e| format!("Attack failed: {e}"))?;
    let output = png_output(&args.input, args.output.as_ref(), "attacked");
    save_image(&attacked, &output).map_err(|e| format!("Failed to save: {e}"))?;
    if !quiet {
        eprintln!(
            "[OK] {} (crop {region}, {}x{})",
            output.display(),
            attacked.width(),
            attacked.height()
        );
    }
    Ok(())
}
