use std::path::{Path, PathBuf};

use beatmap_synth_core::{
    analyze, decode, export, generate_from_analysis, pipeline::segment_song, rng::song_rng,
    BeatMapError, DifficultySelection, DirectoryModelStore, DirectorySink, GenerationRequest,
    ModelKind, OutputSink, SongMetadata, SynthConfig,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> beatmap_synth_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => run_generate(args),
        Commands::Analyze {
            input,
            config,
            segments,
            k,
        } => run_analyze(&input, config.as_deref(), segments, k),
    }
}

fn load_config(path: Option<&Path>) -> beatmap_synth_core::Result<SynthConfig> {
    match path {
        Some(path) => SynthConfig::load(path),
        None => Ok(SynthConfig::default()),
    }
}

fn song_name_for(input: &Path, name: Option<String>) -> String {
    name.unwrap_or_else(|| {
        input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "song".into())
    })
}

fn run_generate(args: GenerateArgs) -> beatmap_synth_core::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(version) = args.version {
        config.walk.model_version = version;
    }
    if let Some(intensity) = args.lights_intensity {
        config.lighting.lights_intensity = intensity;
    }

    let song_name = song_name_for(&args.input, args.song_name);
    tracing::info!(input = ?args.input, song = %song_name, model = %args.model, "starting generation");

    let track = decode(&args.input)?;
    let analysis = analyze(&track, &config)?;

    let mut request = GenerationRequest::new(song_name.as_str(), args.difficulty, args.model);
    request.k = args.k;
    let models = DirectoryModelStore::new(&args.models_dir);
    let mut beatmap = generate_from_analysis(&analysis, &request, &models, &config)?;

    for failure in &beatmap.failures {
        tracing::error!(difficulty = %failure.difficulty, reason = %failure.reason, "difficulty not generated");
    }
    if beatmap.tracks.is_empty() {
        return Err(BeatMapError::msg("no difficulty could be generated"));
    }

    let mut sink = DirectorySink::new(args.out_dir.join(&song_name))?;
    let metadata = SongMetadata {
        environment: args.environment,
        ..SongMetadata::default()
    };
    export(&mut beatmap, &metadata, &mut sink)?;

    if let Err(err) = sink.write_audio(&args.input) {
        tracing::warn!(%err, "song audio not copied, convert the input to ogg for a playable folder");
    }
    if let Some(cover) = args.cover {
        sink.write_cover(&cover)?;
    }

    tracing::info!(out = %sink.root().display(), tracks = beatmap.tracks.len(), "beatmap written");
    Ok(())
}

fn run_analyze(
    input: &Path,
    config: Option<&Path>,
    with_segments: bool,
    k: Option<usize>,
) -> beatmap_synth_core::Result<()> {
    tracing::info!(?input, "analysing track");
    let config = load_config(config)?;
    let track = decode(input)?;
    let analysis = analyze(&track, &config)?;

    let segments = if with_segments {
        let mut rng = song_rng(&song_name_for(input, None));
        Some(segment_song(&analysis, &config, k, &mut rng)?)
    } else {
        None
    };

    let report = json!({
        "bpm": analysis.bpm(),
        "duration": analysis.duration,
        "beat_times": analysis.grid.beat_times(),
        "segments": segments,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Generates rhythm-game beatmaps from music", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Audio file to map: wav, ogg/egg, mp3 or flac. Only ogg input is
    /// copied into the level folder as `song.egg`.
    input: PathBuf,
    /// Name used for the output folder and as the random seed. Defaults to
    /// the input file name.
    #[arg(long)]
    song_name: Option<String>,
    /// easy, normal, hard, expert, expertplus or all.
    #[arg(short, long, default_value = "all")]
    difficulty: DifficultySelection,
    /// random, HMM, segmented_HMM or rate_modulated_segmented_HMM.
    #[arg(short, long, default_value = "rate_modulated_segmented_HMM")]
    model: ModelKind,
    /// Fixed number of song segments. Estimated when omitted.
    #[arg(short, long)]
    k: Option<usize>,
    /// Markov model version to load.
    #[arg(long)]
    version: Option<u32>,
    /// Directory holding `HMM_<difficulty>_v<version>.json` files.
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,
    /// Directory the song folder is created in.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "DefaultEnvironment")]
    environment: String,
    /// 0 to 10, higher swaps light colours more often.
    #[arg(long)]
    lights_intensity: Option<f64>,
    /// Cover image copied as `cover.jpg`.
    #[arg(long)]
    cover: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate level files for a song.
    Generate(GenerateArgs),
    /// Print the tempo, beat times and optionally the segmentation as JSON.
    Analyze {
        /// Audio file to analyse.
        input: PathBuf,
        /// JSON configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also segment the track.
        #[arg(long)]
        segments: bool,
        /// Fixed number of segments.
        #[arg(short, long)]
        k: Option<usize>,
    },
}
