// Endless Player CLI entry point.
//
// Learns a chain from a performance file and either renders a stretch of the
// endless stream to MIDI or plays it live against the wall clock, logging
// each note. The pipeline: quantize -> learn -> schedule batches -> output.
//
// Usage:
//   endless-player learn <performance.json> [--model out.json] [--matrix N]
//   endless-player render <input.json> --out out.mid [--seconds N] [OPTIONS]
//   endless-player play <input.json> [--seconds N] [OPTIONS]
//
// `<input.json>` is either a performance file or a model saved by `learn`.
// Logging goes through `env_logger`; set RUST_LOG=debug to see every batch.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use endless_player::Result;
use endless_player::config::{PlaybackConfig, SeedPolicy};
use endless_player::learner::{LearnedModel, learn, load_or_learn};
use endless_player::midi::write_midi;
use endless_player::output::LogOutput;
use endless_player::player::{render, start_playback};
use endless_player::quantize::{DEFAULT_TRACK, quantize_file};
use endless_prng::ChainRng;

#[derive(Parser)]
#[command(name = "endless-player", version, about = "Endless Markov-chain phrase player")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Quantize a performance and learn a model from it.
    Learn {
        input: PathBuf,
        /// Write the learned model here as JSON.
        #[arg(long)]
        model: Option<PathBuf>,
        /// Print the first N columns of the transition matrix.
        #[arg(long, default_value_t = 0)]
        matrix: usize,
        /// Track to read notes from.
        #[arg(long, default_value_t = DEFAULT_TRACK)]
        track: usize,
    },
    /// Render the stream offline to a MIDI file.
    Render {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 60.0)]
        seconds: f64,
        #[command(flatten)]
        playback: PlaybackArgs,
    },
    /// Play the stream live, logging notes, until Enter is pressed.
    Play {
        input: PathBuf,
        /// Stop by itself after this many seconds.
        #[arg(long)]
        seconds: Option<f64>,
        #[command(flatten)]
        playback: PlaybackArgs,
    },
}

#[derive(Args)]
struct PlaybackArgs {
    /// PRNG seed; a time-based seed is used (and printed) when omitted.
    #[arg(long)]
    seed: Option<u64>,
    /// Playback config JSON. Replaces the model-derived defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    tempo: Option<f64>,
    #[arg(long)]
    lead_time_ms: Option<u64>,
    /// Start every batch from a fresh phrase-initial symbol.
    #[arg(long)]
    restart_each_batch: bool,
    #[arg(long, default_value_t = DEFAULT_TRACK)]
    track: usize,
}

impl PlaybackArgs {
    fn config_for(&self, model: &LearnedModel) -> Result<PlaybackConfig> {
        let mut config = match &self.config {
            Some(path) => PlaybackConfig::load(path)?,
            None => PlaybackConfig::for_model(model),
        };
        if let Some(n) = self.batch_size {
            config.batch_size = n;
        }
        if let Some(t) = self.tempo {
            config.tempo_bpm = t;
        }
        if let Some(ms) = self.lead_time_ms {
            config.lead_time_ms = ms;
        }
        if self.restart_each_batch {
            config.seed_policy = SeedPolicy::RestartEachBatch;
        }
        config.validate()?;
        Ok(config)
    }

    fn rng(&self) -> ChainRng {
        let (rng, seed) = match self.seed {
            Some(s) => (ChainRng::new(s), s),
            None => ChainRng::from_time(),
        };
        println!("Seed: {seed}");
        rng
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    println!("=== Endless Player ===");
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Learn {
            input,
            model,
            matrix,
            track,
        } => run_learn(&input, model.as_deref(), matrix, track),
        Command::Render {
            input,
            out,
            seconds,
            playback,
        } => run_render(&input, &out, seconds, &playback),
        Command::Play {
            input,
            seconds,
            playback,
        } => run_play(&input, seconds, &playback),
    }
}

fn run_learn(input: &Path, model_path: Option<&Path>, matrix: usize, track: usize) -> Result<()> {
    println!("[1/2] Quantizing {}...", input.display());
    let quantized = quantize_file(input, track)?;
    println!(
        "  {} phrases of {} steps at {} BPM",
        quantized.phrases.len(),
        quantized.phrase_length,
        quantized.tempo_bpm
    );

    println!("[2/2] Learning...");
    let model = learn(&quantized);
    println!(
        "  {} states, {} transitions, {} initial seeds",
        model.table.len(),
        model.table.transition_count(),
        model.initial_seeds.len()
    );
    if matrix > 0 {
        println!();
        print!("{}", model.table.render_matrix(matrix));
    }

    if let Some(path) = model_path {
        model.save(path)?;
        println!("  Model written to {}", path.display());
    }
    Ok(())
}

fn load(input: &Path, playback: &PlaybackArgs) -> Result<(Arc<LearnedModel>, PlaybackConfig)> {
    println!("Loading {}...", input.display());
    let model = load_or_learn(input, playback.track)?;
    let config = playback.config_for(&model)?;
    println!(
        "  {} states; batches of {} steps at {} BPM ({:.1} ms/step), lead {} ms",
        model.table.len(),
        config.batch_size,
        config.tempo_bpm,
        config.step_interval_ms(),
        config.lead_time_ms
    );
    Ok((Arc::new(model), config))
}

fn run_render(input: &Path, out: &Path, seconds: f64, playback: &PlaybackArgs) -> Result<()> {
    let (model, config) = load(input, playback)?;
    let tempo = config.tempo_bpm;
    let duration_ms = (seconds.max(0.0) * 1000.0) as u64;

    println!("Rendering {seconds} s...");
    let (report, events) = render(model, config, playback.rng(), duration_ms)?;
    write_midi(&events, tempo, out)?;
    println!(
        "  {} batches, {} notes -> {}",
        report.batches,
        report.notes_scheduled,
        out.display()
    );
    Ok(())
}

fn run_play(input: &Path, seconds: Option<f64>, playback: &PlaybackArgs) -> Result<()> {
    let (model, config) = load(input, playback)?;
    let limit_ms = seconds.map(|s| (s.max(0.0) * 1000.0) as u64);
    let handle = start_playback(model, config, playback.rng(), LogOutput, limit_ms)?;

    let report = match limit_ms {
        Some(ms) => {
            println!("Playing for {} s...", ms / 1000);
            handle.wait()?
        }
        None => {
            println!("Playing. Press Enter to stop.");
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            println!("Shutting down...");
            handle.stop()?
        }
    };
    println!(
        "  {} batches, {} notes scheduled, stopped at {} ms",
        report.batches, report.notes_scheduled, report.end_time
    );
    Ok(())
}
