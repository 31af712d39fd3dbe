// ============================================================================
// PixelPortal CLI: headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   pixelportal --input sprite.png --script outline.rhai --output result.png
//   pixelportal -i *.png --script recolor.rhai --output-dir out/ --format png
//   pixelportal -i level.ppx --output flat.png
//   pixelportal --new --width 32 --height 32 --script tile.rhai -o tile.ppx
//
// All processing runs synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::components::tools::DrawingContext;
use crate::document::Document;
use crate::io::{ExportFormat, PROJECT_EXTENSION, export_image, export_output_region, open_document, save_project};
use crate::ops::scripting::run_script;
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PixelPortal headless pixel-art processor.
#[derive(Parser, Debug)]
#[command(
    name = "pixelportal",
    about = "PixelPortal headless batch processor",
    long_about = "Run Rhai scripts on images and PixelPortal projects without opening\n\
                  an editor. Reads PNG, BMP and PPX project files.\n\n\
                  Example:\n  \
                  pixelportal --input sprite.png --script outline.rhai --output out.png\n  \
                  pixelportal --new --width 16 --height 16 --script tile.rhai -o tile.ppx"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "tiles/*.ppx").
    /// PPX projects retain all layers; images load as one layer.
    #[arg(short, long, num_args = 1.., required_unless_present = "new")]
    pub input: Vec<String>,

    /// Start from a blank canvas instead of input files.
    #[arg(long, conflicts_with = "input")]
    pub new: bool,

    /// Width of the blank canvas for --new (defaults to the settings file).
    #[arg(long, requires = "new")]
    pub width: Option<u32>,

    /// Height of the blank canvas for --new (defaults to the settings file).
    #[arg(long, requires = "new")]
    pub height: Option<u32>,

    /// Rhai script to run on each document. The whole run is one undo step.
    #[arg(short, long, value_name = "SCRIPT.rhai")]
    pub script: Option<PathBuf>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, bmp or ppx. Inferred from --output when omitted.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Export only the document's output region instead of the full canvas.
    #[arg(long)]
    pub region: bool,

    /// Print script console output and timing; also echo the log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Target of a processed document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Image(ExportFormat),
    Project,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Image(ExportFormat::Png) => "png",
            OutputFormat::Image(ExportFormat::Bmp) => "bmp",
            OutputFormat::Project => PROJECT_EXTENSION,
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "png" => Some(OutputFormat::Image(ExportFormat::Png)),
            "bmp" => Some(OutputFormat::Image(ExportFormat::Bmp)),
            "ppx" => Some(OutputFormat::Project),
            _ => None,
        }
    }
}

enum Source {
    File(PathBuf),
    Blank { width: u32, height: u32 },
}

impl Source {
    fn describe(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Blank { width, height } => format!("new {width}x{height} canvas"),
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let settings = EditorSettings::load();

    let sources: Vec<Source> = if args.new {
        vec![Source::Blank {
            width: args.width.unwrap_or(settings.default_width),
            height: args.height.unwrap_or(settings.default_height),
        }]
    } else {
        resolve_inputs(&args.input).into_iter().map(Source::File).collect()
    };
    if sources.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if sources.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            sources.len()
        );
        return ExitCode::FAILURE;
    }

    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let script_source = match &args.script {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(src) => Some(src),
            Err(e) => {
                eprintln!("error: could not read script '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = sources.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, source) in sources.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, source.describe());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(source, args.output.as_deref(), args.output_dir.as_deref(), format)
        else {
            eprintln!("  error: cannot determine output path for {}.", source.describe());
            any_failure = true;
            continue;
        };

        match run_one(source, &output_path, script_source.as_deref(), format, &settings, &args) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::warn!("{}: {e}", source.describe());
                eprintln!("  error: {e}");
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-document pipeline
// ============================================================================

fn run_one(
    source: &Source,
    output: &Path,
    script: Option<&str>,
    format: OutputFormat,
    settings: &EditorSettings,
    args: &CliArgs,
) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let mut doc = match source {
        Source::File(path) => open_document(path).map_err(|e| format!("load failed: {e}"))?,
        Source::Blank { width, height } => {
            Document::new_untitled(1, *width, *height).map_err(|e| format!("cannot create canvas: {e}"))?
        }
    }
    .with_settings(settings);

    // -- Step 2: Script (optional) ----------------------------------------
    if let Some(src) = script {
        let brush: DrawingContext = settings.drawing_context();
        let outcome = run_script(&mut doc, src, &brush).map_err(|e| format!("script error: {e}"))?;
        if args.verbose {
            for line in &outcome.console_output {
                println!("  [script] {}", line);
            }
            println!("  script: {}ms", outcome.elapsed_ms);
        }
    }

    // -- Step 3: Save ----------------------------------------------------
    match format {
        OutputFormat::Project => save_project(&doc, output).map_err(|e| format!("save failed: {e}"))?,
        OutputFormat::Image(image_format) => {
            let result = if args.region {
                export_output_region(&doc, output, image_format)
            } else {
                export_image(&doc, output, image_format)
            };
            result.map_err(|e| format!("export failed: {e}"))?;
        }
    }
    Ok(())
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

/// Choose the format from `--format` or the output extension. Defaults to
/// PNG when neither is given; an unknown `--format` is an error.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<OutputFormat, String> {
    if let Some(f) = format_arg {
        return OutputFormat::parse(f).ok_or_else(|| format!("unsupported format '{f}' (use png, bmp or ppx)"));
    }
    let inferred = output
        .and_then(|out| out.extension())
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::parse);
    Ok(inferred.unwrap_or(OutputFormat::Image(ExportFormat::Png)))
}

/// Compute the output path for one document.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    source: &Source,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: OutputFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let input = match source {
        Source::File(path) => path.as_path(),
        Source::Blank { .. } => Path::new("untitled"),
    };
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format(Some("PPX"), None), Ok(OutputFormat::Project));
        assert_eq!(
            parse_format(None, Some(Path::new("a/b.bmp"))),
            Ok(OutputFormat::Image(ExportFormat::Bmp))
        );
        assert_eq!(parse_format(None, None), Ok(OutputFormat::Image(ExportFormat::Png)));
        assert!(parse_format(Some("jpeg"), None).is_err());
    }

    #[test]
    fn test_output_path_avoids_overwriting_input() {
        let src = Source::File(PathBuf::from("art/sprite.png"));
        let png = OutputFormat::Image(ExportFormat::Png);
        assert_eq!(build_output_path(&src, None, None, png), Some(PathBuf::from("art/sprite_out.png")));
        assert_eq!(
            build_output_path(&src, None, Some(Path::new("out")), OutputFormat::Project),
            Some(PathBuf::from("out/sprite.ppx"))
        );
        let blank = Source::Blank { width: 4, height: 4 };
        assert_eq!(
            build_output_path(&blank, None, Some(Path::new("out")), png),
            Some(PathBuf::from("out/untitled.png"))
        );
    }

    #[test]
    fn test_clap_requires_input_or_new() {
        assert!(CliArgs::try_parse_from(["pixelportal"]).is_err());
        assert!(CliArgs::try_parse_from(["pixelportal", "--new", "--width", "8"]).is_ok());
        assert!(CliArgs::try_parse_from(["pixelportal", "-i", "a.png", "--width", "8"]).is_err());
    }

    #[test]
    fn test_run_one_new_canvas_with_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = "set_color(10, 20, 30); fill_rect(0, 0, 2, 2);";
        let out = dir.path().join("tile.png");
        let args = CliArgs::try_parse_from(["pixelportal", "--new"]).unwrap();
        let source = Source::Blank { width: 4, height: 3 };
        run_one(
            &source,
            &out,
            Some(script),
            OutputFormat::Image(ExportFormat::Png),
            &EditorSettings::default(),
            &args,
        )
        .unwrap();

        let img = image::open(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(*img.get_pixel(1, 1), Rgba([10, 20, 30, 255]));
        assert_eq!(img.get_pixel(3, 2).0[3], 0);
    }

    #[test]
    fn test_run_one_reports_script_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs::try_parse_from(["pixelportal", "--new"]).unwrap();
        let err = run_one(
            &Source::Blank { width: 2, height: 2 },
            &dir.path().join("x.ppx"),
            Some("undefined_call();"),
            OutputFormat::Project,
            &EditorSettings::default(),
            &args,
        )
        .unwrap_err();
        assert!(err.starts_with("script error"));
        assert!(!dir.path().join("x.ppx").exists());
    }
}
