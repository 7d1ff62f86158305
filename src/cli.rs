// ============================================================================
// gpuconv CLI — batch filtering via command-line arguments
// ============================================================================
//
// Usage examples:
//   gpuconv -i photo.png -f gaussian -k 31 -o blurred.png
//   gpuconv -i "shots/*.jpg" -f sobel -k 9 --output-dir edges/
//   gpuconv -i plate.png -f ups -k 3 --overlay frame.png --json
//   gpuconv -i a.png b.png -f mean -k 5 --backend cpu
//
// Every input goes through the same Engine, so device programs are compiled
// once per process.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::config::{BackendChoice, EngineConfig};
use crate::io;
use crate::ops::pipeline::{Engine, FilterReport};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// gpuconv image filter.
#[derive(Parser, Debug)]
#[command(
    name = "gpuconv",
    version,
    about = "GPU convolution filters: sobel, gaussian, emboss, mean, ups",
    long_about = "Apply a convolution-style filter to image files on the GPU (or the\n\
                  CPU reference backend) and write the result as PNG.\n\n\
                  Example:\n  \
                  gpuconv -i photo.png -f gaussian -k 31 -o blurred.png\n  \
                  gpuconv -i \"*.jpg\" -f sobel -k 9 --output-dir edges/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Filter: sobel, gaussian, emboss, mean or ups (case-insensitive).
    #[arg(short, long, value_name = "FILTER")]
    pub filter: String,

    /// Odd kernel side, >= 3 and no larger than the image's smaller side.
    #[arg(short = 'k', long, value_name = "N")]
    pub kernel_size: u32,

    /// Output PNG path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Backend override: auto, gpu, cpu.
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Settings file (defaults to the platform config path).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// RGBA artwork composited over `ups` results.
    #[arg(long, value_name = "FILE")]
    pub overlay: Option<PathBuf>,

    /// Overlay opacity in [0, 1].
    #[arg(long, value_name = "0-1")]
    pub overlay_opacity: Option<f32>,

    /// Reject kernel sizes that are not one of the filter's presets.
    #[arg(long)]
    pub presets_only: bool,

    /// Print one JSON metadata line per processed file.
    #[arg(long)]
    pub json: bool,

    /// Echo every log record and per-file timing to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply_to(&self, cfg: &mut EngineConfig) -> Result<(), String> {
        if let Some(b) = &self.backend {
            cfg.backend =
                BackendChoice::parse(b).ok_or_else(|| format!("unknown backend '{b}' (auto, gpu, cpu)"))?;
        }
        if let Some(path) = &self.overlay {
            cfg.overlay_path = Some(path.clone());
        }
        if let Some(op) = self.overlay_opacity {
            cfg.overlay_opacity = op.clamp(0.0, 1.0);
        }
        if self.presets_only {
            cfg.allow_custom_sizes = false;
        }
        Ok(())
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs, mut cfg: EngineConfig) -> ExitCode {
    if let Err(e) = args.apply_to(&mut cfg) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let engine = match Engine::from_config(&cfg) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if args.verbose {
        println!("backend: {}", engine.backend_name());
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if (multi || args.verbose) && !args.json {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();
        let output_path = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            &args.filter,
        );

        match run_one(&engine, input_path, &output_path, &args) {
            Ok(report) => {
                if args.json {
                    match serde_json::to_string(&report.metadata()) {
                        Ok(line) => println!("{line}"),
                        Err(e) => log::warn!("could not serialise metadata: {e}"),
                    }
                } else if args.verbose || multi {
                    println!(
                        "  → {} (device {:.3}ms, total {:.0}ms)",
                        output_path.display(),
                        report.elapsed_ms,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}: {}", input_path.display(), e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing
// ============================================================================

fn run_one(
    engine: &Engine,
    input: &Path,
    output: &Path,
    args: &CliArgs,
) -> Result<FilterReport, String> {
    let report = engine
        .process_file(input, &args.filter, args.kernel_size)
        .map_err(|e| e.to_string())?;
    io::save_png(&report.image, output).map_err(|e| format!("save failed: {e}"))?;
    Ok(report)
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, single-file input)
/// 2. `--output-dir` joined with `<stem>_<filter>.png`
/// 3. `<stem>_<filter>.png` next to the input
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>, filter: &str) -> PathBuf {
    if let Some(out) = output {
        return out.to_path_buf();
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = format!("{}_{}.png", stem, filter.trim().to_lowercase());

    match output_dir {
        Some(dir) => dir.join(name),
        None => input.parent().unwrap_or(Path::new(".")).join(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["gpuconv", "-i", "a.png", "-f", "Sobel", "-k", "3"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn output_path_derives_from_stem_and_filter() {
        let p = build_output_path(Path::new("shots/cat.jpg"), None, None, "Sobel");
        assert_eq!(p, PathBuf::from("shots/cat_sobel.png"));
        let p = build_output_path(Path::new("shots/cat.jpg"), None, Some(Path::new("out")), "mean");
        assert_eq!(p, PathBuf::from("out/cat_mean.png"));
        let p = build_output_path(Path::new("cat.jpg"), Some(Path::new("x.png")), Some(Path::new("out")), "mean");
        assert_eq!(p, PathBuf::from("x.png"));
    }

    #[test]
    fn overrides_fold_into_config() {
        let mut cfg = EngineConfig::default();
        args(&["--backend", "cpu", "--presets-only", "--overlay-opacity", "2"])
            .apply_to(&mut cfg)
            .unwrap();
        assert_eq!(cfg.backend, BackendChoice::Cpu);
        assert!(!cfg.allow_custom_sizes);
        assert_eq!(cfg.overlay_opacity, 1.0);
    }

    #[test]
    fn bad_overrides_are_reported() {
        let mut cfg = EngineConfig::default();
        assert!(args(&["--backend", "tpu"]).apply_to(&mut cfg).is_err());
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn block_shape_flag_does_not_exist() {
        let argv = ["gpuconv", "-i", "a.png", "-f", "mean", "-k", "5", "--workgroup", "8x4"];
        assert!(CliArgs::try_parse_from(argv).is_err());
    }
}
