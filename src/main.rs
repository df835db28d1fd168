//! CLI entry point for the claim report tool.
//!
//! Provides subcommands for producing a claim report from the upstream
//! stores and for rendering one from a local input bundle.

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use trip_claim_rater::engine::{EngineInput, generate_report};
use trip_claim_rater::error::ReportError;
use trip_claim_rater::fetch::api::UpstreamApi;
use trip_claim_rater::fetch::trip_logs::{TripLogConfig, load_trip_logs};
use trip_claim_rater::model::{
    DayHalf, DayKind, PaymentChannel, ReportBundle, ReportFilters, Timetable,
};
use trip_claim_rater::output::{envelope_json, gzip_bytes, upload_report, write_report_file};

#[derive(Parser)]
#[command(name = "trip_claim_rater")]
#[command(about = "Builds claim and punctuality reports for scheduled bus trips", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce a claim report by fetching inputs from the upstream stores
    Report {
        /// Agency to report on
        #[arg(long)]
        agency_id: i64,

        /// Start of the claim window passed to the transaction store
        #[arg(long)]
        from: String,

        /// End of the claim window passed to the transaction store
        #[arg(long)]
        to: String,

        /// Narrow the upstream transaction query to one route
        #[arg(long)]
        route: Option<String>,

        /// Keep only morning or only afternoon departures
        #[arg(long, value_enum)]
        am_pm: Option<DayHalf>,

        /// Keep only weekday or only weekend departures
        #[arg(long, value_enum)]
        weekend_weekday: Option<DayKind>,

        /// Local date-time lower bound, e.g. "2024-08-20 00:00:00"
        #[arg(long)]
        select_from: Option<String>,

        /// Local date-time upper bound, e.g. "2024-08-20 23:59:59"
        #[arg(long)]
        select_to: Option<String>,

        /// Keep only trips of this vehicle registration
        #[arg(long)]
        vehicle: Option<String>,

        /// Keep only trips of this driver
        #[arg(long)]
        driver: Option<String>,

        /// Keep only cash or only cashless fares
        #[arg(long, value_enum)]
        paid_by: Option<PaymentChannel>,

        /// File to write the rendered report to
        #[arg(short, long, default_value = "claim_report.csv")]
        output: String,

        /// Optional: S3 bucket to upload the report envelope to
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Optional: S3 object key for the uploaded envelope
        #[arg(long)]
        s3_key: Option<String>,

        /// Gzip the envelope before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Render a claim report from a local JSON input bundle
    Render {
        /// Path to the JSON bundle (agency, transactions, timetable, routes,
        /// trip logs)
        #[arg(value_name = "BUNDLE")]
        bundle: String,

        /// File to write the rendered report to
        #[arg(short, long, default_value = "claim_report.csv")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/trip_claim_rater.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("trip_claim_rater.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Report {
            agency_id,
            from,
            to,
            route,
            am_pm,
            weekend_weekday,
            select_from,
            select_to,
            vehicle,
            driver,
            paid_by,
            output,
            s3_bucket,
            s3_key,
            gzip,
        } => {
            if from.trim().is_empty() {
                return Err(ReportError::MissingParameter("from").into());
            }
            if to.trim().is_empty() {
                return Err(ReportError::MissingParameter("to").into());
            }

            let filters = ReportFilters {
                am_pm,
                day_kind: weekend_weekday,
                select_from: select_from.as_deref().map(parse_local_bound).transpose()?,
                select_to: select_to.as_deref().map(parse_local_bound).transpose()?,
                vehicle,
                driver,
                paid_by,
            };

            run_report(
                agency_id,
                &from,
                &to,
                route.as_deref(),
                filters,
                &output,
                s3_bucket,
                s3_key,
                gzip,
            )
            .await?;
        }
        Commands::Render { bundle, output } => {
            let bytes = std::fs::read(&bundle)?;
            let bundle: ReportBundle = serde_json::from_slice(&bytes)?;

            let route_stops: HashMap<_, _> = bundle
                .routes
                .into_iter()
                .filter(|route| !route.stops.is_empty())
                .map(|route| (route.id, route.stops))
                .collect();

            let report = generate_report(EngineInput {
                agency: bundle.agency,
                transactions: bundle.transactions,
                timetable: Timetable::from_entries(bundle.timetable),
                route_stops,
                trip_logs: bundle.trip_logs,
                filters: ReportFilters::default(),
            });

            write_report_file(&output, &report)?;
            info!(
                trips = report.summaries.len(),
                output = %output,
                "report rendered from bundle"
            );
        }
    }

    Ok(())
}

/// Parses a local filter bound: full date-time first, bare date as its
/// midnight.
fn parse_local_bound(raw: &str) -> Result<NaiveDateTime> {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(parsed);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
    Ok(date.and_hms_opt(0, 0, 0).expect("midnight exists"))
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all, fields(agency_id, from, to))]
async fn run_report(
    agency_id: i64,
    from: &str,
    to: &str,
    route: Option<&str>,
    filters: ReportFilters,
    output: &str,
    s3_bucket: Option<String>,
    s3_key: Option<String>,
    gzip: bool,
) -> Result<()> {
    let api = Arc::new(UpstreamApi::from_env()?);

    let agency = api
        .agency(agency_id)
        .await
        .map_err(|e| ReportError::upstream("fetching agency", e))?
        .ok_or(ReportError::AgencyNotFound(agency_id))?;

    let transactions = api
        .claim_transactions(agency_id, route, from, to)
        .await
        .map_err(|e| ReportError::upstream("fetching claim transactions", e))?;
    info!(count = transactions.len(), "claim transactions fetched");

    let timetable_entries = api
        .timetable_entries(agency_id)
        .await
        .map_err(|e| ReportError::upstream("fetching timetable", e))?;
    let timetable = Timetable::from_entries(timetable_entries);

    // Routes degrade individually: a failed stop list never aborts the
    // batch, the route just reports without stop coverage.
    let mut route_ids: Vec<i64> = transactions.iter().map(|trx| trx.route_id).collect();
    route_ids.sort_unstable();
    route_ids.dedup();

    let mut route_stops = HashMap::new();
    for route_id in route_ids {
        match api.route_with_stops(agency_id, route_id).await {
            Ok(Some(route)) if !route.stops.is_empty() => {
                route_stops.insert(route_id, route.stops);
            }
            Ok(_) => warn!(route_id, "route has no stops"),
            Err(err) => {
                warn!(route_id, error = %err, "route fetch failed, degrading to no stops");
            }
        }
    }

    let mut trip_ids: Vec<String> = transactions.iter().map(|trx| trx.trip_id.clone()).collect();
    trip_ids.sort_unstable();
    trip_ids.dedup();

    let trip_logs = load_trip_logs(api.clone(), trip_ids, TripLogConfig::from_env()).await;

    let report = generate_report(EngineInput {
        agency,
        transactions,
        timetable,
        route_stops,
        trip_logs,
        filters,
    });

    write_report_file(output, &report)?;
    info!(trips = report.summaries.len(), output, "report written");

    if let Some(bucket) = s3_bucket {
        let config = aws_config::load_from_env().await;
        let s3 = aws_sdk_s3::Client::new(&config);

        let mut body = envelope_json(&report)?;
        if gzip {
            body = gzip_bytes(&body)?;
        }

        let key = s3_key.unwrap_or_else(|| {
            let window = format!("{from}_{to}").replace([' ', ':'], "-");
            let suffix = if gzip { ".json.gz" } else { ".json" };
            format!("claims/agency_id={agency_id}/{window}{suffix}")
        });

        upload_report(&s3, &bucket, &key, body, gzip).await?;
    }

    Ok(())
}
