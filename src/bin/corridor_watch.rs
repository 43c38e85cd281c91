//! corridor_watch - right-of-way encroachment detection from before/after imagery

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use corridor_watch::classify::{train_baseline, BASELINE_SEED};
use corridor_watch::dispatch::{LogNotifier, Notifier, TicketSink, ALERT_SUBJECT};
use corridor_watch::storage::NewWorkOrder;
use corridor_watch::{
    now_s, CandidateExtractor, CoreError, Corridor, DifferenceExtractor, EncroachmentType,
    EngineConfig, GeoContext, GeoPoint, GeoReference, ImagePair, JsonReportWriter, Pipeline,
    RunReport, RunRequest, SqliteWorkOrderStore, ThreatLevel, TicketId, WorkOrderStatus,
    WorkOrderStore,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Config file (.json or .toml). Defaults to $CORRIDOR_WATCH_CONFIG.
    #[arg(long, global = true, env = "CORRIDOR_WATCH_CONFIG")]
    config: Option<PathBuf>,
    /// UI mode for stderr progress.
    #[arg(long, global = true, value_enum, default_value = "auto", value_name = "MODE")]
    ui: ui::UiMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the baseline false-positive classifier and save the artifact.
    TrainModel {
        /// Output path. Defaults to classifier.model_path.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = BASELINE_SEED)]
        seed: u64,
    },
    /// Extract candidate changes only and print them as JSON.
    Detect(ImageArgs),
    /// Full run: extract, classify, score, dispatch, report.
    Run(RunArgs),
    /// Print a deterministic summary of a saved report.
    Summarize {
        #[arg(long)]
        report: PathBuf,
        /// Write <report>_summary.txt instead of printing.
        #[arg(long)]
        write: bool,
    },
    /// Send a manual alert through the configured channels.
    Alert {
        #[arg(long)]
        message: String,
    },
    /// Manage work orders.
    #[command(subcommand)]
    Ticket(TicketCommand),
}

#[derive(Args, Debug)]
struct ImageArgs {
    /// Path to the BEFORE image.
    #[arg(long)]
    before: PathBuf,
    /// Path to the AFTER image.
    #[arg(long)]
    after: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    images: ImageArgs,
    /// structure|excavation|road|equipment|vehicle|water|vegetation|unknown
    #[arg(long = "type", default_value = "unknown")]
    encroachment_type: String,
    /// Site latitude, used when no georeference is given.
    #[arg(long, requires = "longitude")]
    latitude: Option<f64>,
    #[arg(long, requires = "latitude")]
    longitude: Option<f64>,
    /// Pixel georeference: ORIGIN_LON,ORIGIN_LAT,LON_PER_PX,LAT_PER_PX
    #[arg(long, value_name = "GEOREF")]
    georef: Option<String>,
    /// Corridor geometry (GeoJSON).
    #[arg(long)]
    corridor: Option<PathBuf>,
    /// Surveyed scene distance to the corridor, in meters.
    #[arg(long)]
    site_distance_m: Option<f64>,
    /// Run timestamp (unix seconds). Defaults to now; fix it for reproducible runs.
    #[arg(long)]
    timestamp: Option<u64>,
    /// Skip work order creation.
    #[arg(long)]
    no_tickets: bool,
    /// Also print the full report JSON to stdout.
    #[arg(long)]
    print: bool,
}

#[derive(Subcommand, Debug)]
enum TicketCommand {
    /// Create a work order by hand.
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "high")]
        priority: String,
    },
    /// Show one work order.
    Show {
        #[arg(long)]
        id: i64,
    },
    /// Change a work order's status.
    SetStatus {
        #[arg(long)]
        id: i64,
        /// open|in_progress|resolved|dismissed
        #[arg(long)]
        status: String,
    },
    /// List work orders, optionally by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let ui = ui::Ui::new(cli.ui, std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load config");
        EngineConfig::load_from(cli.config.as_deref())?
    };

    match cli.command {
        Command::TrainModel { output, seed } => train_model(&ui, &cfg, output, seed),
        Command::Detect(images) => detect(&ui, &cfg, &images),
        Command::Run(args) => run(&ui, &cfg, args),
        Command::Summarize { report, write } => summarize(&report, write),
        Command::Alert { message } => alert(&cfg, &message),
        Command::Ticket(command) => ticket(&cfg, command),
    }
}

fn train_model(ui: &ui::Ui, cfg: &EngineConfig, output: Option<PathBuf>, seed: u64) -> Result<()> {
    let output = output.unwrap_or_else(|| cfg.classifier.model_path.clone());
    let model = {
        let _stage = ui.stage("Train classifier");
        train_baseline(seed).map_err(CoreError::model)?
    };
    model.save(&output)?;
    println!("{} (fingerprint {})", output.display(), model.fingerprint());
    Ok(())
}

fn detect(ui: &ui::Ui, cfg: &EngineConfig, images: &ImageArgs) -> Result<()> {
    let pair = {
        let _stage = ui.stage("Load images");
        ImagePair::load(&images.before, &images.after)?
    };
    let extractor = DifferenceExtractor::new(cfg.extraction.clone())?;
    let candidates = {
        let _stage = ui.stage("Extract candidates");
        extractor.extract(&pair)?
    };
    println!("{}", serde_json::to_string_pretty(&candidates)?);
    Ok(())
}

fn run(ui: &ui::Ui, cfg: &EngineConfig, args: RunArgs) -> Result<()> {
    let pair = {
        let _stage = ui.stage("Load images");
        ImagePair::load(&args.images.before, &args.images.after)?
    };
    let geo = geo_context(&args)?;
    if geo.is_empty() {
        log::warn!("no geospatial input; corridor distance is unknown for every candidate");
    }

    let tickets: Option<Box<dyn TicketSink>> = if args.no_tickets {
        None
    } else {
        Some(Box::new(SqliteWorkOrderStore::open(&cfg.storage.work_orders_db)?))
    };
    let mut pipeline = Pipeline::from_config(cfg, Box::new(LogNotifier::new()), tickets)?
        .with_report_sink(Box::new(JsonReportWriter::new(&cfg.storage.reports_dir)));

    let request = RunRequest {
        pair,
        encroachment_type: EncroachmentType::parse(&args.encroachment_type),
        geo,
        timestamp_s: match args.timestamp {
            Some(ts) => ts,
            None => now_s()?,
        },
    };
    let outcome = {
        let mut tracker = ui.run_tracker();
        pipeline.run_observed(request, &mut |stage| tracker.on_stage(stage))?
    };

    for failure in outcome.degraded() {
        log::warn!("degraded: {}", failure.clone().into_error());
    }
    if args.print {
        println!("{}", String::from_utf8(outcome.report.to_json()?)?);
    }
    if let Some(artifact) = &outcome.artifact {
        println!("{}", artifact.location);
    }
    println!("{}", outcome.report.summarize());
    Ok(())
}

fn geo_context(args: &RunArgs) -> Result<GeoContext> {
    let site = match (args.longitude, args.latitude) {
        (Some(lon), Some(lat)) => Some(GeoPoint::new(lon, lat)?),
        _ => None,
    };
    let georeference = args.georef.as_deref().map(parse_georef).transpose()?;
    let corridor = args
        .corridor
        .as_deref()
        .map(Corridor::load)
        .transpose()?;
    if let Some(d) = args.site_distance_m {
        if !d.is_finite() || d < 0.0 {
            return Err(anyhow!("--site-distance-m must be a non-negative number"));
        }
    }
    Ok(GeoContext {
        site,
        georeference,
        corridor,
        site_distance_meters: args.site_distance_m,
    })
}

fn parse_georef(raw: &str) -> Result<GeoReference> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| anyhow!("invalid --georef {}: {}", raw, e))?;
    let &[lon, lat, lon_per_pixel, lat_per_pixel] = parts.as_slice() else {
        return Err(anyhow!(
            "--georef expects ORIGIN_LON,ORIGIN_LAT,LON_PER_PX,LAT_PER_PX"
        ));
    };
    Ok(GeoReference::new(GeoPoint::new(lon, lat)?, lon_per_pixel, lat_per_pixel)?)
}

fn summarize(path: &Path, write: bool) -> Result<()> {
    let report = RunReport::load(path)?;
    let summary = report.summarize();
    if write {
        let out = PathBuf::from(format!("{}_summary.txt", path.with_extension("").display()));
        std::fs::write(&out, format!("{}\n", summary))
            .map_err(|e| anyhow!("failed to write {}: {}", out.display(), e))?;
        println!("{}", out.display());
    } else {
        println!("{}", summary);
    }
    Ok(())
}

fn alert(cfg: &EngineConfig, message: &str) -> Result<()> {
    let recipients = cfg.alerts.recipients();
    if recipients.is_empty() {
        log::warn!("no alert channel is enabled; nothing to send");
    }
    let mut notifier = LogNotifier::new();
    let statuses = notifier.notify(message, &recipients, None)?;
    println!("{}: {}", ALERT_SUBJECT, serde_json::to_string(&statuses)?);
    Ok(())
}

fn ticket(cfg: &EngineConfig, command: TicketCommand) -> Result<()> {
    let mut store = SqliteWorkOrderStore::open(&cfg.storage.work_orders_db)?;
    match command {
        TicketCommand::Create {
            title,
            description,
            priority,
        } => {
            let priority = ThreatLevel::parse(&priority)
                .ok_or_else(|| anyhow!("unknown priority {}", priority))?;
            let order = NewWorkOrder {
                title,
                description,
                priority,
                latitude: None,
                longitude: None,
                evidence: None,
            };
            let id = store.create(&order, now_s()?)?;
            println!(
                "{}",
                serde_json::json!({ "id": id.0, "status": WorkOrderStatus::Open })
            );
        }
        TicketCommand::Show { id } => match store.get(TicketId(id))? {
            Some(order) => println!("{}", serde_json::to_string_pretty(&order)?),
            None => return Err(anyhow!("work order {} not found", TicketId(id))),
        },
        TicketCommand::SetStatus { id, status } => {
            let status = WorkOrderStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown status {}", status))?;
            store.update_status(TicketId(id), status)?;
            println!("{} -> {}", TicketId(id), status);
        }
        TicketCommand::List { status } => {
            let status = status
                .as_deref()
                .map(|s| WorkOrderStatus::parse(s).ok_or_else(|| anyhow!("unknown status {}", s)))
                .transpose()?;
            println!("{}", serde_json::to_string_pretty(&store.list(status)?)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn georef_parses_four_numbers() {
        let g = parse_georef("-97.0, 35.0, 0.00001, -0.00001").unwrap();
        assert_eq!(g.origin.lon, -97.0);
        assert_eq!(g.lat_per_pixel, -0.00001);
    }

    #[test]
    fn georef_rejects_bad_input_up_front() {
        for raw in [
            "-97.0,35.0,NaN,-0.00001",
            "-97.0,35.0,0.00001,inf",
            "-97.0,35.0,0,-0.00001",
            "-97.0,35.0,0.00001",
            "-97.0,95.0,0.00001,-0.00001",
            "a,b,c,d",
        ] {
            assert!(parse_georef(raw).is_err(), "{}", raw);
        }
    }
}
