//! Command-line front end.
//!
//! Usage:
//!   synthscan --image photo.jpg            # One image, general profile
//!   synthscan --dir shots/ --json          # Every image in a directory, JSON
//!   synthscan --face --interactive         # Prompt for face images until `exit`

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use synthscan::loader::resolve_face_path;
use synthscan::{
    logging, Analyzer, BatchReport, BatchSummary, ClassificationResult, DetectorConfig,
    DlibLandmarkProvider, Profile, TimedLandmarkProvider,
};

#[derive(Parser, Debug)]
#[command(name = "synthscan")]
#[command(author, version, about = "Detect AI-generated images and faces", long_about = None)]
struct Args {
    /// Analyze a single image
    #[arg(long, conflicts_with = "dir")]
    image: Option<PathBuf>,

    /// Analyze every image in a directory (default: current directory)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Use the face profile (needs the face detector and landmark models)
    #[arg(long)]
    face: bool,

    /// Read one file name per line until `exit`
    #[arg(short, long, conflicts_with_all = ["image", "dir"])]
    interactive: bool,

    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Detector configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "synthscan.json")]
    config: PathBuf,

    /// Face detector model path (overrides the config)
    #[arg(long)]
    detector: Option<PathBuf>,

    /// Landmark model path (overrides the config)
    #[arg(long)]
    landmarks: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct ImageOutput<'a> {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prediction: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> ImageOutput<'a> {
    fn from_outcome(path: &Path, outcome: &'a synthscan::Result<ClassificationResult>) -> Self {
        let image = path.display().to_string();
        match outcome {
            Ok(result) => Self {
                image,
                prediction: Some(result.label()),
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                image,
                prediction: None,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    images: Vec<ImageOutput<'a>>,
    summary: BatchSummary,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = DetectorConfig::load(&args.config)?;
    let level = if args.verbose { "debug" } else { config.log.level.as_str() };
    logging::init(config.log.json, level);

    if let Some(path) = &args.detector {
        config.landmarks.detector_model = path.clone();
    }
    if let Some(path) = &args.landmarks {
        config.landmarks.landmark_model = path.clone();
    }

    let profile = if args.face { Profile::Face } else { Profile::General };
    let mut analyzer = Analyzer::new(config.clone())?;
    if args.face {
        let provider = DlibLandmarkProvider::from_config(&config.landmarks)?;
        analyzer = analyzer.with_landmarks(TimedLandmarkProvider::new(
            Arc::new(provider),
            config.landmarks.timeout(),
        ));
    }

    if args.interactive {
        return interactive(&analyzer, profile, args.json);
    }

    if let Some(image) = &args.image {
        let path = image_path(image.to_string_lossy().as_ref(), profile);
        return analyze_one(&analyzer, &path, profile, args.json);
    }

    let dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => {
            if !args.json {
                println!("No path provided. Analyzing images in the current directory.");
            }
            PathBuf::from(".")
        }
    };
    let report = analyzer.analyze_dir(&dir, profile)?;
    print_report(&report, args.json)
}

fn image_path(input: &str, profile: Profile) -> PathBuf {
    match profile {
        Profile::Face => resolve_face_path(input),
        Profile::General => PathBuf::from(input.trim()),
    }
}

/// Per-image failures are reported and do not change the exit code.
fn analyze_one(
    analyzer: &Analyzer,
    path: &Path,
    profile: Profile,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = match analyzer.analyze(path, profile) {
        Err(e) if e.is_fatal() => return Err(e.into()),
        outcome => outcome,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ImageOutput::from_outcome(path, &outcome))?);
    } else {
        match &outcome {
            Ok(result) => print!("{}", format_result(result)),
            Err(e) => println!("Error: {}", e),
        }
    }
    Ok(())
}

fn interactive(
    analyzer: &Analyzer,
    profile: Profile,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter the name of the image file (or 'exit' to quit): ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") {
            println!("Exiting program. Goodbye!");
            break;
        }
        if input.is_empty() {
            continue;
        }
        analyze_one(analyzer, &image_path(input, profile), profile, json)?;
    }
    Ok(())
}

fn format_result(result: &ClassificationResult) -> String {
    let mut s = String::new();
    s.push_str(&format!(
        "Prediction: {} (Confidence: {:.2})\n",
        result.label(),
        result.confidence
    ));
    s.push_str(&format!("Composite score: {:.4}\n", result.composite));
    s.push_str("Feature scores:\n");
    for (name, score) in result.scores.iter() {
        s.push_str(&format!("  - {}: {:.4}\n", name, score.value));
    }
    for name in &result.advisories {
        s.push_str(&format!("Note: {} score exceeds the human reference level.\n", name));
    }
    s
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_report(report: &BatchReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let output = BatchOutput {
            images: report
                .entries
                .iter()
                .map(|e| ImageOutput::from_outcome(&e.path, &e.outcome))
                .collect(),
            summary: report.summary(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for entry in &report.entries {
        println!("\nAnalyzing: {}", file_name(&entry.path));
        match &entry.outcome {
            Ok(result) => print!("{}", format_result(result)),
            Err(e) => println!("Error: {}", e),
        }
    }

    println!("\n===== SUMMARY =====");
    for (path, result) in report.successes() {
        println!(
            "{}: {} (Confidence: {:.2})",
            file_name(path),
            result.label(),
            result.confidence
        );
    }
    let summary = report.summary();
    println!(
        "{} analyzed, {} failed, {} AI-generated, {} human-generated",
        summary.analyzed, summary.failed, summary.ai_generated, summary.human_generated
    );
    Ok(())
}
