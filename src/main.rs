use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ndarray::{ArrayD, Axis};
use std::path::PathBuf;
use tc_formation::{
    config::{LoadOptions, LoaderConfig, TargetConfig},
    data_io::{load_labels, resolve_paths, NetCDFOpener},
    math::normalize::ChannelNormalizer,
    pipeline::{Batch, GroundTruth, TemporalSampleLoader},
};

fn main() {
    let matches = build_cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .init();

    let result = match matches.subcommand() {
        Some(("paths", sub_matches)) => run_paths(sub_matches),
        Some(("scan", sub_matches)) => run_scan(sub_matches),
        Some(("inspect", sub_matches)) => run_inspect(sub_matches),
        Some(("stats", sub_matches)) => run_stats(sub_matches),
        _ => {
            eprintln!("Please specify a subcommand. Use --help for more information.");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn parse_hours(list: &str) -> Result<Vec<u32>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .with_context(|| format!("invalid hour offset '{}'", s))
        })
        .collect()
}

fn loader_from(matches: &ArgMatches) -> Result<TemporalSampleLoader<NetCDFOpener>> {
    let config_path = matches
        .get_one::<PathBuf>("config")
        .context("missing --config")?;
    let config = LoaderConfig::from_json_file(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    Ok(TemporalSampleLoader::new(config, NetCDFOpener)?)
}

fn labels_path(matches: &ArgMatches) -> Result<&PathBuf> {
    matches.get_one::<PathBuf>("labels").context("missing --labels")
}

fn load_options(matches: &ArgMatches) -> LoadOptions {
    let leadtimes: Option<Vec<u32>> = matches
        .get_many::<u32>("leadtime")
        .map(|values| values.copied().collect());
    // Only `scan` iterates epochs, so only it defines `--no-cache`.
    let no_cache = matches!(matches.try_get_one::<bool>("no-cache"), Ok(Some(true)));
    LoadOptions {
        batch_size: matches.get_one::<usize>("batch-size").copied().unwrap_or(32),
        shuffle: matches.get_flag("shuffle"),
        leadtimes,
        negative_ratio: matches.get_one::<f64>("negative-ratio").copied(),
        other_tc_ratio: matches.get_one::<f64>("other-tc-ratio").copied(),
        cache: !no_cache,
    }
}

fn run_paths(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<PathBuf>("file").context("missing FILE")?;
    let hours = parse_hours(
        matches
            .get_one::<String>("previous-hours")
            .map(String::as_str)
            .unwrap_or(""),
    )?;

    let paths = resolve_paths(file, &hours)?;
    for path in &paths {
        let status = if path.is_file() { "ok" } else { "MISSING" };
        println!("{:8} {}", status, path.display());
    }
    if tc_formation::data_io::all_exist(&paths) {
        println!("All {} time steps present", paths.len());
    }
    Ok(())
}

/// Number of samples in a batch whose target marks a genesis event
fn count_positives(batch: &Batch, target: &TargetConfig) -> usize {
    batch
        .targets
        .axis_iter(Axis(0))
        .filter(|t| match target {
            TargetConfig::Grid(grid) => {
                let fg = grid.channels() - 1;
                t.index_axis(Axis(t.ndim() - 1), fg).iter().any(|&v| v > 0.0)
            }
            TargetConfig::Location => t.iter().next().is_some_and(|&v| v > 0.5),
        })
        .count()
}

fn run_scan(matches: &ArgMatches) -> Result<()> {
    let loader = loader_from(matches)?;
    let options = load_options(matches);
    let limit = matches.get_one::<usize>("max-batches").copied().unwrap_or(usize::MAX);
    let epochs = matches.get_one::<usize>("epochs").copied().unwrap_or(1);

    let mut dataset = loader.dataset(labels_path(matches)?, &options)?;
    let mut total_samples = 0;
    let mut total_positives = 0;

    for epoch in 0..epochs {
        let replayed = dataset.is_cached();
        let mut stream = dataset.epoch()?;
        for (i, batch) in stream.by_ref().take(limit).enumerate() {
            let batch = batch.with_context(|| format!("loading batch {} of epoch {}", i, epoch))?;
            let positives = count_positives(&batch, &loader.config().target);
            println!(
                "epoch {} batch {:4}: features {:?} targets {:?} positives {}",
                epoch,
                i,
                batch.features.shape(),
                batch.targets.shape(),
                positives
            );
            total_samples += batch.len();
            total_positives += positives;
        }
        if replayed {
            log::info!("Epoch {} replayed from cache", epoch);
        }
    }

    let report = dataset.report();
    println!("\n=== Load Report ===");
    println!("Labels loaded:          {}", report.labels_loaded);
    println!("Dropped (missing file): {}", report.dropped_missing_files);
    println!("Rows after balancing:   {}", report.balanced_rows);
    println!(
        "Samples scanned:        {} ({} positive)",
        total_samples, total_positives
    );
    Ok(())
}

fn channel_summary(features: &ArrayD<f32>, names: &[String]) {
    let axis = Axis(features.ndim() - 1);
    for (c, lane) in features.axis_iter(axis).enumerate() {
        let (min, max, sum) = lane.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v as f64),
        );
        let name = names.get(c).map(String::as_str).unwrap_or("?");
        println!(
            "  [{:2}] {:16} min {:12.4} max {:12.4} mean {:12.4}",
            c,
            name,
            min,
            max,
            sum / lane.len().max(1) as f64
        );
    }
}

fn run_inspect(matches: &ArgMatches) -> Result<()> {
    let loader = loader_from(matches)?;
    let index = *matches.get_one::<usize>("row").context("missing --row")?;
    let table = load_labels(labels_path(matches)?, None)?;
    let Some(row) = table.rows.get(index) else {
        bail!("row {} out of range, table has {} rows", index, table.len());
    };

    println!("Row {}: {} ({})", index, row.path.display(), row.date);
    println!(
        "  TC: {}  centers: {:?}  first observed: {:?}",
        row.tc, row.centers, row.first_observed
    );

    let sample = loader.load_single(row)?;
    println!("Features: {:?}", sample.features.shape());
    println!("Target:   {:?}", sample.target.shape());

    let names = loader.config().subset.channel_names();
    channel_summary(&sample.features.clone().into_dyn(), &names);

    match &sample.target {
        GroundTruth::Grid(grid) => {
            let fg = grid.shape()[2] - 1;
            let foreground = grid.index_axis(Axis(2), fg);
            let influenced = foreground.iter().filter(|&&v| v > 0.0).count();
            println!("Influenced pixels: {}", influenced);
        }
        GroundTruth::Location(location) => println!("Location target: {}", location),
    }
    Ok(())
}

fn run_stats(matches: &ArgMatches) -> Result<()> {
    let loader = loader_from(matches)?;
    let options = load_options(matches);
    let mut normalizer = ChannelNormalizer::new(loader.config().data_shape[2]);

    for batch in loader.load(labels_path(matches)?, &options)? {
        normalizer.update(&batch?.features)?;
    }

    log::info!("Adapted normalization over {} values per channel", normalizer.count());
    println!("{}", serde_json::to_string_pretty(&normalizer)?);
    Ok(())
}

fn config_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Loader configuration (JSON)")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("labels")
                .short('l')
                .long("labels")
                .value_name("CSV")
                .help("Genesis label table")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
}

fn load_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("batch-size")
                .short('b')
                .long("batch-size")
                .value_name("N")
                .help("Samples per batch")
                .default_value("32")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("shuffle")
                .long("shuffle")
                .help("Shuffle samples through a bounded buffer")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("leadtime")
                .long("leadtime")
                .value_name("HOURS")
                .help("Keep positives at this leadtime (repeatable)")
                .action(ArgAction::Append)
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("negative-ratio")
                .long("negative-ratio")
                .value_name("RATIO")
                .help("Negatives sampled per positive")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("other-tc-ratio")
                .long("other-tc-ratio")
                .value_name("RATIO")
                .help("Other-TC negatives sampled per positive")
                .value_parser(value_parser!(f64)),
        )
}

fn build_cli() -> Command {
    Command::new("tc_formation")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multi-timestep sample loading for tropical cyclone genesis prediction")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("paths")
                .about("Resolve the time step files of one observation")
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .help("Base observation file, e.g. fnl_20200101_00_00.nc")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("previous-hours")
                        .long("previous-hours")
                        .value_name("HOURS")
                        .help("Comma-separated lookback offsets")
                        .default_value("6,12,18"),
                ),
        )
        .subcommand(
            load_args(config_args(
                Command::new("scan").about("Run the pipeline and report batch shapes"),
            ))
            .arg(
                Arg::new("max-batches")
                    .long("max-batches")
                    .value_name("N")
                    .help("Stop each epoch after N batches")
                    .value_parser(value_parser!(usize)),
            )
            .arg(
                Arg::new("epochs")
                    .short('e')
                    .long("epochs")
                    .value_name("N")
                    .help("Passes over the dataset")
                    .default_value("1")
                    .value_parser(value_parser!(usize)),
            )
            .arg(
                Arg::new("no-cache")
                    .long("no-cache")
                    .help("Reload every file on each epoch")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(
            config_args(Command::new("inspect").about("Load one label row and summarize it")).arg(
                Arg::new("row")
                    .short('r')
                    .long("row")
                    .value_name("INDEX")
                    .help("Row index in the grouped label table")
                    .required(true)
                    .value_parser(value_parser!(usize)),
            ),
        )
        .subcommand(load_args(config_args(
            Command::new("stats").about("Compute per-channel normalization statistics"),
        )))
}
