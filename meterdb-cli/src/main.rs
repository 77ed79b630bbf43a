//! CLI for the meterdb metering time-series store.
//!
//! Provides commands for creating, inspecting, feeding and querying a
//! meterdb database. Results are printed to stdout as JSON lines (or CSV for
//! `get`); logs go to stderr and are controlled by `RUST_LOG`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use meterdb::{
    FacetColumn, NewSeries, SeriesFilter, SeriesId, SeriesInfo, Store, StoreConfig, TimeRange,
    TsType, UpsertOutcome, Values,
};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// meterdb: metering time-series store CLI.
#[derive(Parser)]
#[command(name = "meterdb", version, about)]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Commands,
}

/// Which database to open.
#[derive(Args)]
struct Target {
    /// Path to the SQLite database file.
    #[arg(long, global = true, conflicts_with = "config")]
    db: Option<PathBuf>,

    /// Path to a JSON store configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and bring its schema up to date.
    Init,

    /// Register a new series.
    Create {
        /// Series name.
        #[arg(long)]
        name: String,

        /// Sampling period (e.g., "30s", "10m", "1h", "1d").
        #[arg(long)]
        period: String,

        /// Series type: point, mean, stdev or count.
        #[arg(long, default_value = "point")]
        ts_type: String,

        /// Unit of measurement.
        #[arg(long, default_value = "")]
        unit: String,

        /// Reference instant, nanoseconds since the Unix epoch.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        epoch: i64,

        /// Retrieval cap.
        #[arg(long, default_value_t = meterdb::series::DEFAULT_GET_LIMIT)]
        get_limit: u32,

        /// Free-text description.
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Drop a series and all of its points.
    Drop {
        /// Series id.
        id: SeriesId,
    },

    /// List series, optionally filtered.
    List(ListArgs),

    /// Show one series.
    Describe {
        /// Series id.
        id: SeriesId,
    },

    /// Record a single value.
    #[command(allow_negative_numbers = true)]
    Add {
        /// Series id.
        id: SeriesId,

        /// Timestamp, nanoseconds since the Unix epoch.
        timestamp: i64,

        /// Value.
        value: f64,
    },

    /// Record a JSON batch of `[timestamp, value]` pairs or objects.
    Ingest {
        /// Series id.
        id: SeriesId,

        /// Batch file, or "-" for stdin.
        #[arg(default_value = "-")]
        file: PathBuf,
    },

    /// Read values for one series, or a crosstab for several.
    #[command(allow_negative_numbers = true)]
    Get {
        /// Series ids, in column order.
        #[arg(required = true)]
        ids: Vec<SeriesId>,

        /// Inclusive lower bound, nanoseconds since the Unix epoch.
        #[arg(long)]
        from: Option<i64>,

        /// Exclusive upper bound, nanoseconds since the Unix epoch.
        #[arg(long)]
        to: Option<i64>,

        /// Output format.
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Count series per distinct period, unit or type.
    Facets {
        /// Column to summarise: period, units or ts_type.
        column: FacetColumn,
    },
}

/// Filters accepted by `meterdb list`.
#[derive(Args)]
struct ListArgs {
    /// Exact series id.
    #[arg(long)]
    id: Option<SeriesId>,

    /// Exact period (e.g., "10m").
    #[arg(long)]
    period: Option<String>,

    /// Smallest period to include (e.g., "5m").
    #[arg(long, requires = "period_max")]
    period_min: Option<String>,

    /// Period upper bound, exclusive (e.g., "1h").
    #[arg(long, requires = "period_min")]
    period_max: Option<String>,

    /// Acceptable series types; repeatable.
    #[arg(long = "ts-type")]
    ts_types: Vec<TsType>,

    /// Case-insensitive name substring.
    #[arg(long)]
    name: Option<String>,

    /// Acceptable units; repeatable.
    #[arg(long = "unit")]
    units: Vec<String>,
}

/// Output format for `get`.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// One JSON object per line.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = open_store(&cli.target).and_then(|store| run(&store, cli.command));

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Opens the store named by `--config` or `--db` (default `meterdb.sqlite`).
fn open_store(target: &Target) -> Result<Store, Box<dyn std::error::Error>> {
    let config = match (&target.config, &target.db) {
        (Some(path), _) => StoreConfig::from_file(path)?,
        (None, Some(db)) => StoreConfig::new(db),
        (None, None) => StoreConfig::default(),
    };
    debug!(path = %config.path.display(), "opening store");
    Ok(Store::open(config)?)
}

fn run(store: &Store, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = std::io::stdout().lock();
    match command {
        Commands::Init => cmd_init(store, &mut out),
        Commands::Create {
            name,
            period,
            ts_type,
            unit,
            epoch,
            get_limit,
            description,
        } => {
            let new = NewSeries::new(name, parse_duration(&period)?)
                .ts_type(ts_type)
                .unit(unit)
                .epoch(epoch)
                .get_limit(get_limit)
                .description(description);
            let id = store.try_create_series(&new)?;
            print_line(&mut out, &json!({ "id": id }))
        }
        Commands::Drop { id } => {
            store.drop_series(id)?;
            print_line(&mut out, &json!({ "dropped": id }))
        }
        Commands::List(args) => cmd_list(store, &args, &mut out),
        Commands::Describe { id } => {
            let info = store
                .describe_series(id)?
                .ok_or_else(|| format!("Series {id} not found"))?;
            print_line(&mut out, &series_json(&info))
        }
        Commands::Add {
            id,
            timestamp,
            value,
        } => {
            let outcome = match store.try_add_value(id, timestamp, value)? {
                UpsertOutcome::Inserted => "inserted",
                UpsertOutcome::Replaced => "replaced",
            };
            print_line(
                &mut out,
                &json!({ "id": id, "timestamp": timestamp, "outcome": outcome }),
            )
        }
        Commands::Ingest { id, file } => {
            let body = read_batch(&file)?;
            let report = store.ingest_json(id, &body)?;
            print_line(&mut out, &serde_json::to_value(&report)?)
        }
        Commands::Get {
            ids,
            from,
            to,
            format,
        } => cmd_get(store, &ids, TimeRange::new(from, to), &format, &mut out),
        Commands::Facets { column } => {
            for facet in store.facet_summary(column)? {
                print_line(
                    &mut out,
                    &json!({ "value": facet.value.to_string(), "count": facet.count }),
                )?;
            }
            Ok(())
        }
    }
}

/// Implements `meterdb init`.
fn cmd_init(
    store: &Store,
    out: &mut impl std::io::Write,
) -> Result<(), Box<dyn std::error::Error>> {
    print_line(
        out,
        &json!({
            "path": store.config().path,
            "schema_version": store.schema_version()?,
        }),
    )
}

/// Implements `meterdb list`.
fn cmd_list(
    store: &Store,
    args: &ListArgs,
    out: &mut impl std::io::Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter = SeriesFilter::all();
    if let Some(id) = args.id {
        filter = filter.id(id);
    }
    if let Some(period) = &args.period {
        filter = filter.period(parse_duration(period)?);
    }
    if let (Some(min), Some(max)) = (&args.period_min, &args.period_max) {
        filter = filter.period_range(parse_duration(min)?..parse_duration(max)?);
    }
    if !args.ts_types.is_empty() {
        filter = filter.ts_types(args.ts_types.iter().copied());
    }
    if let Some(name) = &args.name {
        filter = filter.name(name.as_str());
    }
    if !args.units.is_empty() {
        filter = filter.units(args.units.iter().map(String::as_str));
    }

    for info in store.list_series(&filter)?.values() {
        print_line(out, &series_json(info))?;
    }
    Ok(())
}

/// Implements `meterdb get`.
fn cmd_get(
    store: &Store,
    ids: &[SeriesId],
    range: TimeRange,
    format: &OutputFormat,
    out: &mut impl std::io::Write,
) -> Result<(), Box<dyn std::error::Error>> {
    match store.get_values(ids, range)? {
        Values::Series(points) => {
            if let OutputFormat::Csv = format {
                writeln!(out, "timestamp_ns,value")?;
            }
            for point in points {
                let point = point?;
                match format {
                    OutputFormat::Csv => writeln!(out, "{},{}", point.timestamp, point.value)?,
                    OutputFormat::Json => print_line(out, &serde_json::to_value(point)?)?,
                }
            }
        }
        Values::Crosstab(table) => {
            if let OutputFormat::Csv = format {
                let names: Vec<_> = table.columns().iter().map(|c| c.name.as_str()).collect();
                writeln!(out, "timestamp_ns,{}", names.join(","))?;
            } else {
                print_line(out, &json!({ "columns": table.columns() }))?;
            }
            for row in table {
                let row = row?;
                match format {
                    OutputFormat::Csv => {
                        let cells: Vec<String> = row
                            .values
                            .iter()
                            .map(|v| v.map(|v| v.to_string()).unwrap_or_default())
                            .collect();
                        writeln!(out, "{},{}", row.timestamp, cells.join(","))?;
                    }
                    OutputFormat::Json => print_line(out, &serde_json::to_value(&row)?)?,
                }
            }
        }
    }
    Ok(())
}

/// Reads a batch body from a file, or from stdin for "-".
fn read_batch(file: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let text = if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        text
    } else {
        std::fs::read_to_string(file)?
    };
    Ok(serde_json::from_str(&text)?)
}

/// Series metadata with a readable period.
fn series_json(info: &SeriesInfo) -> serde_json::Value {
    json!({
        "id": info.id,
        "name": info.name,
        "description": info.description,
        "unit": info.unit,
        "period": format_duration(info.period),
        "epoch": info.epoch,
        "ts_type": info.ts_type,
        "get_limit": info.get_limit,
    })
}

fn print_line(
    out: &mut impl std::io::Write,
    value: &serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Parses a human-readable duration string (e.g., "30s", "10m", "1h", "7d").
fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let unit_start = s.char_indices().last().map_or(0, |(i, _)| i);
    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str.parse()?;

    let secs = match unit {
        "s" => Some(num),
        "m" => num.checked_mul(60),
        "h" => num.checked_mul(3600),
        "d" => num.checked_mul(86400),
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    }
    .ok_or_else(|| format!("Duration '{s}' is too large"))?;

    Ok(Duration::from_secs(secs))
}

/// Formats a duration in the largest whole unit.
fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() != 0 {
        return format!("{duration:?}");
    }
    let secs = duration.as_secs();
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}
