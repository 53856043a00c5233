use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};

use overture::audio;
use overture::edl::EdlAction;
use overture::library;
use overture::util;

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about overture and its dependencies.")]
    Info,

    #[clap(
        arg_required_else_help = true,
        after_help = "Fingerprint the episodes found under one or more library paths. The fingerprint data is written to disk alongside each episode and is reused by the 'scan' command, so precomputing it saves a ton of time on repeated scans."
    )]
    Analyze {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Episode files or library directories to fingerprint."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_ANALYSIS_DURATION,
            value_parser = clap::value_parser!(f64),
            help = "Amount of audio to fingerprint from the start of each episode, in seconds. Intros are always searched for inside this window, so it must be longer than the longest expected intro end."
        )]
        analysis_duration: f64,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Enable multi-threaded decoding in FFmpeg."
        )]
        threaded_decoding: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Re-fingerprint all episodes and ignore any existing fingerprint data on disk."
        )]
        force: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Detect intro sequences across the seasons found under one or more library paths. Episodes are grouped into seasons by directory structure, fingerprints are compared pairwise within each season, and each detected intro end is snapped to the nearest silence. Results can be persisted, printed as JSON, and written out as EDL files."
    )]
    Scan {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Episode files or library directories to scan."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_MAX_POINT_DIFFERENCES,
            value_parser = clap::value_parser!(u32),
            help = "Maximum number of bits two fingerprint points may differ in while still matching. The range is 0 (exact match) to 32 (no match)."
        )]
        max_point_differences: u32,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_INVERTED_INDEX_SHIFT,
            value_parser = clap::value_parser!(u32),
            help = "Neighborhood radius used when probing fingerprint values for candidate stream alignments."
        )]
        inverted_index_shift: u32,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_MAX_TIME_SKIP,
            value_parser = clap::value_parser!(f64),
            help = "Largest gap between matching timestamps, in seconds, that still counts as one contiguous region."
        )]
        max_time_skip: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_MIN_INTRO_DURATION,
            value_parser = clap::value_parser!(f64),
            help = "Minimum intro duration, in seconds. Shorter shared regions are ignored. Setting a value close to the actual intro length helps reduce false positives."
        )]
        min_intro_duration: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_MAX_INTRO_DURATION,
            value_parser = clap::value_parser!(f64),
            help = "Maximum intro duration, in seconds. Longer matches are usually shared scenes rather than the opening, so the pairwise search keeps looking past them."
        )]
        max_intro_duration: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_SILENCE_MIN_DURATION,
            value_parser = clap::value_parser!(f64),
            help = "Minimum duration of a silent region, in seconds, for it to claim the intro end boundary."
        )]
        silence_min_duration: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_SILENCE_NOISE_FLOOR_DB,
            value_parser = clap::value_parser!(f64),
            help = "Noise floor for silence detection, in dBFS. Audio below this level is considered silent."
        )]
        silence_noise_floor: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_ANALYSIS_DURATION,
            value_parser = clap::value_parser!(f64),
            help = "Amount of audio to fingerprint from the start of each episode, in seconds."
        )]
        analysis_duration: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_MAX_PARALLELISM,
            value_parser = clap::value_parser!(usize),
            help = "Number of seasons to analyze in parallel."
        )]
        max_parallelism: usize,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Analyze season 0 (specials). Specials rarely share an intro, so they are skipped by default."
        )]
        analyze_season_zero: bool,

        #[clap(
            long,
            value_enum,
            default_value_t = EdlAction::None,
            help = "When set to anything other than 'none', write an EDL file with this action alongside each episode that has a detected intro."
        )]
        edl_action: EdlAction,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Rewrite EDL files that already exist on disk."
        )]
        regenerate_edl: bool,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Path of the intro data file. Existing data is loaded before the scan and results are persisted back as each season completes."
        )]
        data: Option<PathBuf>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Enable multi-threaded decoding in FFmpeg."
        )]
        threaded_decoding: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Re-fingerprint all episodes and ignore any existing fingerprint data on disk."
        )]
        force: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Print the detected intros as JSON to stdout."
        )]
        json: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not display results of the scan in stdout."
        )]
        no_display: bool,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "By default, video files are validated using FFmpeg, which is extremely accurate. Setting this flag will switch to just checking file headers."
    )]
    file_headers_only: bool,
}

impl Cli {
    fn validate(&self) {
        let mut cmd = Cli::command();
        match self.command {
            Commands::Info => (),
            Commands::Analyze {
                analysis_duration, ..
            } => {
                if analysis_duration <= 0.0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "analysis_duration must be a positive number",
                    )
                    .exit();
                }
            }
            Commands::Scan {
                max_point_differences,
                max_time_skip,
                min_intro_duration,
                max_intro_duration,
                silence_min_duration,
                analysis_duration,
                max_parallelism,
                ..
            } => {
                if max_point_differences > 32 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "max_point_differences cannot be larger than 32",
                    )
                    .exit();
                }
                if max_time_skip <= 0.0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "max_time_skip must be a positive number",
                    )
                    .exit();
                }
                if min_intro_duration <= 0.0 || max_intro_duration <= min_intro_duration {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "intro durations must satisfy 0 < min_intro_duration < max_intro_duration",
                    )
                    .exit();
                }
                if silence_min_duration <= 0.0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "silence_min_duration must be a positive number",
                    )
                    .exit();
                }
                if analysis_duration <= 0.0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "analysis_duration must be a positive number",
                    )
                    .exit();
                }
                if max_parallelism == 0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "max_parallelism must be at least 1",
                    )
                    .exit();
                }
            }
        }
    }

    fn scan_library(&self, paths: &[PathBuf]) -> Vec<library::Season> {
        match library::scan(paths, !self.file_headers_only) {
            Err(e) => {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::InvalidValue, e.to_string()).exit();
            }
            Ok(v) => v,
        }
    }
}

fn display_intros(seasons: &[library::Season], store: &audio::IntroStore) {
    for season in seasons {
        println!("\n{} - Season {}\n", season.series, season.number);
        for episode in &season.episodes {
            match store.get(&episode.id) {
                Some(intro) if intro.is_valid() => println!(
                    "* {} - {}-{}",
                    episode.name,
                    util::format_time(intro.start),
                    util::format_time(intro.end)
                ),
                _ => println!("* {} - N/A", episode.name),
            }
        }
    }
}

fn main() -> overture::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init().unwrap();

    let args = Cli::parse();
    args.validate();

    match args.command {
        Commands::Analyze {
            ref paths,
            analysis_duration,
            threaded_decoding,
            force,
        } => {
            let seasons = args.scan_library(paths);
            let episodes: Vec<_> = seasons.into_iter().flat_map(|s| s.episodes).collect();
            let total = episodes.len();

            let analyzer = audio::Analyzer::default()
                .with_analysis_duration(analysis_duration)
                .with_threaded_decoding(threaded_decoding)
                .with_force(force);
            let count = analyzer.run(&episodes, true)?;

            println!("Fingerprinted {} of {} episodes.", count, total);
        }
        Commands::Scan {
            ref paths,
            max_point_differences,
            inverted_index_shift,
            max_time_skip,
            min_intro_duration,
            max_intro_duration,
            silence_min_duration,
            silence_noise_floor,
            analysis_duration,
            max_parallelism,
            analyze_season_zero,
            edl_action,
            regenerate_edl,
            ref data,
            threaded_decoding,
            force,
            json,
            no_display,
        } => {
            let seasons = args.scan_library(paths);

            let params = audio::AnalysisParams::default()
                .with_max_point_differences(max_point_differences)
                .with_inverted_index_shift(inverted_index_shift)
                .with_max_time_skip(max_time_skip)
                .with_min_intro_duration(min_intro_duration)
                .with_max_intro_duration(max_intro_duration)
                .with_silence_min_duration(silence_min_duration);

            let backend = audio::Analyzer::default()
                .with_analysis_duration(analysis_duration)
                .with_silence_noise_floor_db(silence_noise_floor)
                .with_threaded_decoding(threaded_decoding)
                .with_force(force);

            let analyzer = audio::SeasonAnalyzer::new(backend)
                .with_params(params)
                .with_analyze_season_zero(analyze_season_zero)
                .with_max_parallelism(max_parallelism)
                .with_edl_action(edl_action)
                .with_regenerate_edl(regenerate_edl);

            let store = Mutex::new(match data {
                Some(path) if path.exists() => audio::IntroStore::from_path(path)?,
                _ => audio::IntroStore::new(),
            });

            let cancel = AtomicBool::new(false);
            let progress = |pct: f64| tracing::info!("analysis progress: {:.1}%", pct);
            let processed =
                analyzer.run(&seasons, &store, data.as_deref(), Some(&progress), &cancel)?;
            tracing::info!(processed, "scan complete");

            let store = store.into_inner().unwrap();
            if !no_display {
                display_intros(&seasons, &store);
            }
            if json {
                serde_json::to_writer_pretty(std::io::stdout(), store.intros())?;
                println!();
            }
        }
        Commands::Info => {
            println!("FFmpeg version: {}", util::ffmpeg_version_string());
        }
    }

    Ok(())
}
