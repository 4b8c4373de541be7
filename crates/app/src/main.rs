use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use swing_analyzer_core::{
    evaluation, AnalyzerError, AppConfig, Evaluation, ExerciseDefinition, ExerciseRegistry,
    PlaybackOutcome, Recording, ReplayEngine, ReplaySummary, DEFAULT_FRAME_TOLERANCE,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> swing_analyzer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Exercises => list_exercises(),
        Commands::Analyze {
            recording,
            exercise,
            json,
            annotations,
            tolerance,
            export_csv,
        } => {
            let options = AnalyzeOptions {
                json,
                annotations,
                tolerance,
                export_csv,
            };
            run_analyze(&config, &recording, exercise.as_deref(), &options)
        }
        Commands::Annotate {
            recording,
            exercise,
            output,
        } => run_annotate(&config, &recording, exercise.as_deref(), output.as_deref()),
        Commands::Play {
            recording,
            exercise,
            speed,
            looped,
        } => run_play(&config, &recording, exercise.as_deref(), speed, looped).await,
        Commands::Seek {
            recording,
            exercise,
            time,
            rebuild,
        } => run_seek(&config, &recording, exercise.as_deref(), time, rebuild),
    }
}

fn list_exercises() -> swing_analyzer_core::Result<()> {
    let registry = ExerciseRegistry::global();
    for id in registry.ids() {
        let definition = registry.get(id)?;
        let positions: Vec<&str> = definition.positions.iter().map(|p| p.name.as_str()).collect();
        println!("{id:<18} {:<18} {}", definition.display_name, positions.join(" → "));
    }
    Ok(())
}

struct AnalyzeOptions {
    json: bool,
    annotations: Option<PathBuf>,
    tolerance: usize,
    export_csv: Option<PathBuf>,
}

fn run_analyze(
    config: &AppConfig,
    path: &Path,
    exercise: Option<&str>,
    options: &AnalyzeOptions,
) -> swing_analyzer_core::Result<()> {
    let mut engine = open_engine(config, path, exercise)?;
    tracing::info!(?path, exercise = %engine.analyzer().exercise(), "analysing recording");
    let summary = engine.process_all();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if let Some(annotations) = &options.annotations {
        let annotations = evaluation::load_annotations(annotations)?;
        let scored = engine.evaluate(&annotations, options.tolerance);
        if options.json {
            println!("{}", serde_json::to_string_pretty(&scored)?);
        } else {
            print_evaluation(&scored);
        }
    }

    if let Some(csv) = &options.export_csv {
        let file = std::io::BufWriter::new(std::fs::File::create(csv)?);
        let rows = engine.write_csv(file)?;
        tracing::info!(path = ?csv, rows, "exported per-frame analysis");
    }
    Ok(())
}

fn run_annotate(
    config: &AppConfig,
    path: &Path,
    exercise: Option<&str>,
    output: Option<&Path>,
) -> swing_analyzer_core::Result<()> {
    let mut engine = open_engine(config, path, exercise)?;
    let template = serde_json::to_string_pretty(&engine.candidate_annotations())?;
    match output {
        Some(output) => {
            std::fs::write(output, template)?;
            tracing::info!(path = ?output, "wrote annotation template");
        }
        None => println!("{template}"),
    }
    Ok(())
}

async fn run_play(
    config: &AppConfig,
    path: &Path,
    exercise: Option<&str>,
    speed: Option<f64>,
    looped: bool,
) -> swing_analyzer_core::Result<()> {
    let mut engine = open_engine(config, path, exercise)?;
    let mut replay = config.replay.clone();
    if let Some(speed) = speed {
        replay.speed = speed;
    }
    replay.looped |= looped;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut last_position: Option<String> = None;
    let outcome = engine
        .play(&replay, &cancel, |step| {
            if step.position.is_some() && step.position != last_position {
                tracing::info!(
                    frame = step.index,
                    time = step.video_time,
                    position = step.position.as_deref(),
                    "position"
                );
                last_position = step.position.clone();
            }
            if step.rep_completed() {
                tracing::info!(frame = step.index, reps = step.rep_count, "rep");
            }
        })
        .await?;

    match outcome {
        PlaybackOutcome::Finished => tracing::info!(reps = engine.rep_count(), "playback finished"),
        PlaybackOutcome::Cancelled => tracing::info!("playback stopped"),
    }
    Ok(())
}

fn run_seek(
    config: &AppConfig,
    path: &Path,
    exercise: Option<&str>,
    time: f64,
    rebuild: bool,
) -> swing_analyzer_core::Result<()> {
    let mut engine = open_engine(config, path, exercise)?;
    let index = engine
        .seek(time)
        .ok_or_else(|| AnalyzerError::msg("recording has no frames"))?;

    if rebuild {
        let step = engine.rewind_to(index)?;
        println!("{}", serde_json::to_string_pretty(&step)?);
    } else {
        let preview = engine.preview(index)?;
        println!("{}", serde_json::to_string_pretty(&preview)?);
    }
    Ok(())
}

fn open_engine(
    config: &AppConfig,
    path: &Path,
    exercise: Option<&str>,
) -> swing_analyzer_core::Result<ReplayEngine> {
    let recording = Recording::load(path)?;
    ReplayEngine::new(recording, resolve_exercise(config, exercise)?)
}

fn resolve_exercise(
    config: &AppConfig,
    exercise: Option<&str>,
) -> swing_analyzer_core::Result<Arc<ExerciseDefinition>> {
    let registry = ExerciseRegistry::global();
    match exercise {
        Some(name) => registry
            .find_by_name(name)
            .ok_or_else(|| AnalyzerError::UnknownExercise(name.to_string())),
        None => registry.get(config.pipeline.default_exercise),
    }
}

fn print_summary(summary: &ReplaySummary) {
    println!(
        "reps: {}  (frames: {}, empty: {}, skipped: {})",
        summary.rep_count, summary.frames_processed, summary.frames_empty, summary.frames_skipped
    );
    for (number, cycle) in summary.cycles.iter().enumerate() {
        println!("cycle {}", number + 1);
        for candidate in cycle.values() {
            let video_time = candidate
                .video_time
                .map(|t| format!("{t:.2}s"))
                .unwrap_or_else(|| format!("{:.0}ms", candidate.timestamp));
            println!(
                "  {:<10} at {:>8}  score {:.2}",
                candidate.position, video_time, candidate.score
            );
        }
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    println!(
        "checkpoints against annotations (tolerance ±{} frames)",
        evaluation.tolerance
    );
    for metrics in &evaluation.positions {
        println!(
            "  {:<10} precision {:>6.1}%  recall {:>6.1}%  f1 {:>6.1}%",
            metrics.position,
            metrics.precision * 100.0,
            metrics.recall * 100.0,
            metrics.f1 * 100.0
        );
        for mismatch in metrics.mismatches.iter().take(5) {
            println!("    {mismatch:?}");
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Rep counting and form checkpoints from recorded pose tracks", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the registered exercises.
    Exercises,
    /// Replay a recording as fast as possible and report reps and checkpoints.
    Analyze {
        /// Path to a `.posetrack.json` recording.
        recording: PathBuf,
        /// Exercise identifier or display name.
        #[arg(short, long)]
        exercise: Option<String>,
        /// Print the full summary as JSON.
        #[arg(long)]
        json: bool,
        /// Ground-truth annotations to score the detected checkpoints against.
        #[arg(long)]
        annotations: Option<PathBuf>,
        /// Frames a checkpoint may be off by and still match an annotation.
        #[arg(long, default_value_t = DEFAULT_FRAME_TOLERANCE)]
        tolerance: usize,
        /// Write one CSV row per frame to this file.
        #[arg(long)]
        export_csv: Option<PathBuf>,
    },
    /// Write an annotation template from the detected checkpoints.
    Annotate {
        recording: PathBuf,
        #[arg(short, long)]
        exercise: Option<String>,
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay a recording in real time.
    Play {
        recording: PathBuf,
        #[arg(short, long)]
        exercise: Option<String>,
        /// Playback speed multiplier.
        #[arg(short, long)]
        speed: Option<f64>,
        /// Start over at the end of the recording.
        #[arg(long = "loop")]
        looped: bool,
    },
    /// Show the frame nearest a point in time.
    Seek {
        recording: PathBuf,
        #[arg(short, long)]
        exercise: Option<String>,
        /// Seconds into the video.
        #[arg(short, long)]
        time: f64,
        /// Replay up to the frame so phase and reps reflect the full history.
        #[arg(long)]
        rebuild: bool,
    },
}
