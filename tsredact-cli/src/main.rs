use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tsredact_common::Config;
use tsredact_core::{
    format_date, parse_timestamp, redact_example, DayRange, JsonFileStore, Study, Unit,
};

fn parse_unit(s: &str) -> Result<Unit, String> { // validate unit at CLI parse time
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_distance(s: &str) -> Result<f64, String> {
    match s {
        "inf" | "infinity" | "none" => Ok(f64::INFINITY),
        _ => s.parse().map_err(|_| format!("not a number: {s}")),
    }
}

#[derive(Parser)]
#[command(name = "tsredact", version, about = "Timestamp redaction study data, kept locally")]
struct Cli {
    /// key-value store file (overrides the config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Opt in: assign a participant id and opt-in date if missing
    Init,
    /// Delete all study data
    Clear,
    /// Delete all study data and opt in again
    Reset,
    /// Show the store, lifecycle state and redaction settings
    Status,
    /// Count one redaction choice for today
    Record {
        url: String,
        element: String,
        #[arg(value_parser = parse_unit)]
        unit: Unit,
        /// distance to the neighbouring timestamp; omit or "none" if there is none
        #[arg(long, value_parser = parse_distance)]
        distance: Option<f64>,
    },
    /// Count one page view for today
    View { url: String },
    /// Print the accumulated data for days [first, until) as JSON
    Report {
        #[arg(long)] first_day: Option<i64>,
        /// exclusive upper bound; all later days when omitted
        #[arg(long)] until_day: Option<i64>,
        /// write to this file instead of stdout
        #[arg(long)] output: Option<PathBuf>,
        #[arg(long)] compact: bool,
    },
    /// Send the report (the study has ended, always fails)
    Submit,
    /// Ask for remote data deletion (the study has ended, always fails)
    RequestDeletion,
    /// Truncate a timestamp (YYYY-MM-DDTHH:MM:SS) to the most significant unit
    Redact {
        timestamp: Option<String>,
        #[arg(long, value_parser = parse_unit)]
        unit: Option<Unit>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("falling back to default config: {e}");
        Config::default()
    });
    let store_path = cli.store.clone().unwrap_or_else(|| config.storage_path());
    let study = Study::new(JsonFileStore::new(store_path));

    match cli.command {
        Commands::Init => run_init(&study).await?,
        Commands::Clear => {
            study.clear_session().await?;
            println!("Study data cleared");
        }
        Commands::Reset => {
            study.reset_session().await?;
            run_init(&study).await?
        }
        Commands::Status => run_status(&study, &config).await?,
        Commands::Record { url, element, unit, distance } => {
            study
                .record_choice(&url, &element, unit, distance.unwrap_or(f64::INFINITY))
                .await?
        }
        Commands::View { url } => {
            let n = study.record_view(&url).await?;
            println!("{:<16} {}", "Views today:", n);
        }
        Commands::Report { first_day, until_day, output, compact } => {
            run_report(&study, &config, first_day, until_day, output, compact).await?
        }
        Commands::Submit => study.submit_report()?,
        Commands::RequestDeletion => study.request_deletion()?,
        Commands::Redact { timestamp, unit } => run_redact(&config, timestamp, unit)?,
    }
    Ok(())
}

async fn run_init(study: &Study<JsonFileStore>) -> anyhow::Result<()> {
    let session = study.init_session().await?;
    println!("{:<16} {}", "Participant:", session.participant_id);
    println!("{:<16} {}", "Opt-in date:", format_date(session.opt_in_date));
    Ok(())
}

async fn run_status(study: &Study<JsonFileStore>, config: &Config) -> anyhow::Result<()> {
    println!("{:<16} {}", "Store:", study.store().path().display());
    println!("{:<16} {:?}", "State:", study.state().await?);
    if let Some(session) = study.session().await? {
        println!("{:<16} {}", "Participant:", session.participant_id);
        println!("{:<16} {}", "Opt-in date:", format_date(session.opt_in_date));
        println!("{:<16} {}", "Day:", study.current_day().await?);
    }
    println!("{:<16} {}", "Prior data:", study.has_participation_data().await?);
    println!(
        "{:<16} {} ({})",
        "Redaction:",
        if config.redaction.enabled { "on" } else { "off" },
        config.redaction.most_significant_unit
    );
    Ok(())
}

async fn run_report(
    study: &Study<JsonFileStore>,
    config: &Config,
    first_day: Option<i64>,
    until_day: Option<i64>,
    output: Option<PathBuf>,
    compact: bool,
) -> anyhow::Result<()> {
    let first = first_day.unwrap_or(config.report.first_day);
    let until = until_day.or(config.report.until_day);
    if let Some(until) = until {
        if until < first { anyhow::bail!("--until-day {until} is before --first-day {first}"); }
    }
    let report = study.build_report(DayRange::new(first, until)).await?;
    let body = report.to_json(config.report.pretty && !compact)?;
    match output {
        Some(path) => {
            std::fs::write(&path, body)?;
            println!("Report written to {}", path.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn run_redact(config: &Config, timestamp: Option<String>, unit: Option<Unit>) -> anyhow::Result<()> {
    let unit = match unit {
        Some(u) => u,
        None => config.redaction.most_significant_unit.parse::<Unit>()?,
    };
    if !config.redaction.enabled {
        log::info!("redaction disabled in config, printing input unchanged");
    }
    let out = match timestamp {
        Some(ts) if !config.redaction.enabled => ts,
        Some(ts) => unit
            .truncate(parse_timestamp(&ts)?)
            .format(tsredact_core::unit::TIMESTAMP_FORMAT)
            .to_string(),
        None => redact_example(unit),
    };
    println!("{out}");
    Ok(())
}
