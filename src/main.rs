use std::{collections::BTreeMap, fs, path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geo_types::Point;
use geojson::{feature::Id, Feature, FeatureCollection, GeoJson, Geometry, Value};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;
use tracing::{info, warn};

use streetsampler::{
    datasets::{self, TableSet},
    logging::{LogFormat, LoggingConfig},
    provider::{StreetViewClient, Throttled},
    sampling::{GeoWeightedSampler, PlaceResolver},
    AcquisitionLoop, ArchiveReader, ArchiveWriter, ImageDirWriter, ImageSize, OutputFormat,
    RecordSink, RunConfig,
};

#[derive(Parser)]
#[command(name = "streetsampler", version, about = "Collect land-area weighted street-level imagery datasets")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Compact log lines
    #[arg(long, global = true)]
    compact: bool,

    /// Log filter directive (e.g. `streetsampler=debug,reqwest=warn`); overrides -v and RUST_LOG
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect a dataset into an archive
    Collect {
        /// JSON run configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of records to collect
        #[arg(short = 'n', long)]
        size: Option<usize>,

        /// Archive to append to, or image directory for png/jpg output
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: archive, png or jpg
        #[arg(long, value_parser = parse_output_format)]
        format: Option<OutputFormat>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Build the lookup tables from raw land-area and world-cities CSV files
    BuildTables {
        #[arg(long)]
        land_area: PathBuf,

        #[arg(long)]
        world_cities: PathBuf,

        /// Land-area column to use
        #[arg(long, default_value = "2021")]
        year: String,

        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },
    /// Summarize an archive
    Inspect {
        archive: PathBuf,

        /// Also write the imagery points as GeoJSON
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
}

fn parse_output_format(value: &str) -> std::result::Result<OutputFormat, String> {
    serde_json::from_value(json!(value.to_lowercase()))
        .map_err(|_| format!("unknown output format `{value}`; expected archive, png or jpg"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.compact {
        LogFormat::Compact
    } else {
        LogFormat::Full
    };
    LoggingConfig::default()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .with_filter(cli.log_filter)
        .init()?;

    match cli.command {
        Command::Collect {
            config,
            size,
            output,
            format,
            seed,
            api_key,
        } => {
            let mut config = match config {
                Some(path) => RunConfig::from_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => RunConfig::default(),
            };
            if let Some(size) = size {
                config.dataset_size = size;
            }
            if let Some(output) = output {
                config.output = output;
            }
            if let Some(format) = format {
                config.output_format = format;
            }
            if seed.is_some() {
                config.seed = seed;
            }
            config.validate()?;
            collect(&config, api_key)
        }
        Command::BuildTables {
            land_area,
            world_cities,
            year,
            out_dir,
        } => build_tables(land_area, world_cities, &year, out_dir),
        Command::Inspect { archive, geojson } => inspect(archive, geojson),
    }
}

fn collect(config: &RunConfig, api_key: String) -> Result<()> {
    let tables = TableSet::load(&config.tables).context("Failed to load lookup tables")?;
    let missing = tables.missing_countries();
    if !missing.is_empty() {
        warn!(
            count = missing.len(),
            "Weighted countries without cities will always be retried: {}",
            missing.join(", ")
        );
    }

    let sampler = GeoWeightedSampler::new(&tables.weights)?;
    let resolver = PlaceResolver::new(&tables.cities, &tables.coordinates);
    let provider = Throttled::new(
        StreetViewClient::new(api_key, config.http.timeout())?,
        config.http.min_request_interval(),
    );
    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut sink: Box<dyn RecordSink> = match config.output_format.image_format() {
        Some(format) => Box::new(ImageDirWriter::new(&config.output, format)?),
        None => Box::new(ArchiveWriter::new(&config.output)),
    };

    let progress = ProgressBar::new(config.dataset_size as u64);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")?.progress_chars("=> "),
    );
    progress.set_message("Creating dataset");

    let start = Instant::now();
    let summary = AcquisitionLoop::new(
        &sampler,
        resolver,
        &provider,
        config.image.views,
        config.image.random_heading,
        ImageSize {
            width: config.image.width,
            height: config.image.height,
        },
        config.search_radius_m,
        rng,
    )
    .with_retry_policy(config.retry.policy())
    .run(config.dataset_size, &mut sink, |_, _| progress.inc(1))?;
    progress.finish();

    println!(
        "Collected {} records in {} attempts into {} ({:.1} seconds).",
        summary.records,
        summary.attempts,
        config.output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn build_tables(land_area: PathBuf, world_cities: PathBuf, year: &str, out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let weights = datasets::build_country_weights(&land_area, year)
        .with_context(|| format!("Failed to build country weights from {}", land_area.display()))?;
    weights.write(&out_dir.join("country_weights.csv"))?;
    info!(countries = weights.len(), "Wrote country weights.");

    let (cities, coordinates) = datasets::load_or_build_city_tables(&out_dir, &world_cities)
        .with_context(|| format!("Failed to build city tables from {}", world_cities.display()))?;

    let tables = TableSet {
        weights,
        cities,
        coordinates,
    };
    let missing = tables.missing_countries();
    println!(
        "Built tables for {} countries and {} cities in {}.",
        tables.weights.len(),
        tables.coordinates.len(),
        out_dir.display()
    );
    if !missing.is_empty() {
        println!("{} weighted countries have no cities: {}", missing.len(), missing.join(", "));
    }
    Ok(())
}

fn inspect(path: PathBuf, geojson: Option<PathBuf>) -> Result<()> {
    let mut reader = ArchiveReader::open(&path)
        .with_context(|| format!("Failed to open archive {}", path.display()))?;

    let mut per_country: BTreeMap<String, usize> = BTreeMap::new();
    let mut features = Vec::new();
    for entry in reader.entries() {
        let attributes = reader.attributes(&entry)?;
        *per_country.entry(attributes.country.clone()).or_default() += 1;

        let properties = json!({
            "country": attributes.country,
            "city": attributes.city,
            "headings": attributes.headings,
            "offset_m": attributes.offset_m,
        });
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::from(&Point::new(
                attributes.lon,
                attributes.lat,
            )))),
            id: Some(Id::String(entry)),
            properties: properties.as_object().cloned(),
            foreign_members: None,
        });
    }

    println!("{}: {} entries", path.display(), features.len());
    for (country, count) in &per_country {
        println!("  {country}: {count}");
    }

    if let Some(geojson_path) = geojson {
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };
        fs::write(&geojson_path, GeoJson::from(collection).to_string())?;
        println!("Wrote imagery points to {}.", geojson_path.display());
    }
    Ok(())
}
