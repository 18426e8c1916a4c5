//! Haven CLI - Emergency alert dispatch from the terminal
//!
//! Triggers SOS alerts and contact messages with the same offline
//! discipline as the app: deliver now when the network allows,
//! otherwise queue durably and drain on a later sweep.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use haven_core::api::HttpAlertEndpoint;
use haven_core::config::DispatchConfig;
use haven_core::db::{Database, LibSqlQueueRepository, LibSqlStateRepository, QueueRepository,
    StateRepository};
use haven_core::dispatch::{AbortReason, AlertDispatcher, ConnectivityProbe, DispatchOutcome};
use haven_core::location::LocationProvider;
use haven_core::models::{ContactPayload, Coordinates, QueueItem, QueuePayload};
use haven_core::retry::RetryPolicy;
use haven_core::sync::{BackgroundSyncWorker, Notifier};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "haven")]
#[command(about = "Send emergency alerts with offline-safe delivery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger an SOS alert
    Sos {
        /// Optional note attached to the alert
        #[arg(long)]
        note: Option<String>,
        /// Latitude of a known position (requires --lon)
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude of a known position (requires --lat)
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Skip the direct attempt and queue immediately
        #[arg(long)]
        offline: bool,
    },
    /// Send a message to the emergency contact team
    Contact {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        message: String,
    },
    /// Show the durable queue
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync sweep over the queue
    Sync,
    /// Periodically sweep the queue while wake tags are armed
    Watch {
        /// Seconds between wake checks
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] haven_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Set HAVEN_API_BASE_URL to the alert API base URL")]
    MissingApiBaseUrl,
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("Endpoint error: {0}")]
    Endpoint(String),
    #[error("Dispatch aborted: {0}")]
    Aborted(String),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("haven=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Sos {
            note,
            lat,
            lon,
            offline,
        } => run_sos(note, lat, lon, offline, &db_path).await?,
        Commands::Contact {
            first_name,
            last_name,
            email,
            phone,
            message,
        } => {
            run_contact(
                ContactPayload {
                    first_name,
                    last_name,
                    email,
                    phone_number: phone,
                    message,
                },
                &db_path,
            )
            .await?;
        }
        Commands::Queue { json } => run_queue(json, &db_path).await?,
        Commands::Sync => run_sync(&db_path).await?,
        Commands::Watch { interval } => run_watch(interval, &db_path).await?,
    }

    Ok(())
}

/// Connectivity signal for a terminal session: online unless forced
/// off by a flag or `HAVEN_OFFLINE`.
struct EnvConnectivityProbe {
    forced_offline: bool,
}

impl ConnectivityProbe for EnvConnectivityProbe {
    fn is_online(&self) -> bool {
        !(self.forced_offline || env_flag("HAVEN_OFFLINE"))
    }
}

/// Location source for a terminal session: a position handed in via
/// flags or `HAVEN_LAT`/`HAVEN_LON`. No flags, no fix.
struct CliLocationProvider {
    coordinates: Option<Coordinates>,
}

impl LocationProvider for CliLocationProvider {
    async fn current_fix(&self) -> Option<Coordinates> {
        self.coordinates
    }
}

/// Delivery outcomes land on stderr so stdout stays scriptable.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    async fn show(&self, title: &str, body: &str, tag: &str) {
        eprintln!("[{tag}] {title}: {body}");
    }
}

async fn run_sos(
    note: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    offline: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let config = dispatch_config_from_env()?;
    let endpoint = build_endpoint(&config)?;
    let provider = CliLocationProvider {
        coordinates: resolve_cli_coordinates(lat, lon)?,
    };
    let probe = EnvConnectivityProbe {
        forced_offline: offline,
    };

    let dispatcher = AlertDispatcher::new(db.connection(), &endpoint, provider, probe, config);
    let outcome = dispatcher.trigger_alert(note, None).await?;
    report_outcome(&outcome)
}

async fn run_contact(payload: ContactPayload, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let config = dispatch_config_from_env()?;
    let endpoint = build_endpoint(&config)?;
    let provider = CliLocationProvider { coordinates: None };
    let probe = EnvConnectivityProbe {
        forced_offline: false,
    };

    let dispatcher = AlertDispatcher::new(db.connection(), &endpoint, provider, probe, config);
    let outcome = dispatcher.submit_contact(payload).await?;
    report_outcome(&outcome)
}

fn report_outcome(outcome: &DispatchOutcome) -> Result<(), CliError> {
    match outcome {
        DispatchOutcome::Delivered => {
            println!("delivered");
            Ok(())
        }
        DispatchOutcome::Queued(id) => {
            println!("queued {id}");
            Ok(())
        }
        DispatchOutcome::Aborted(AbortReason::IdentityUnavailable(reason)) => Err(
            CliError::Aborted(format!("no identity could be established ({reason})")),
        ),
        DispatchOutcome::Aborted(AbortReason::Rejected(message)) => {
            Err(CliError::Aborted(format!("rejected by the server: {message}")))
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueListItem {
    id: String,
    kind: String,
    status: String,
    summary: String,
    enqueued_at: i64,
    relative_time: String,
    retry_count: u32,
}

async fn run_queue(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlQueueRepository::new(db.connection());
    let items = repo.list().await?;

    if as_json {
        let json_items = items
            .iter()
            .map(queue_to_list_item)
            .collect::<Vec<QueueListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if items.is_empty() {
        println!("queue is empty");
    } else {
        for line in format_queue_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}

async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let config = dispatch_config_from_env()?;
    let endpoint = build_endpoint(&config)?;
    let report = sweep_once(db_path, &endpoint).await?;
    println!(
        "synced {}, requeued {}, failed {}",
        report.synced, report.requeued, report.failed
    );
    Ok(())
}

async fn run_watch(interval_secs: u64, db_path: &Path) -> Result<(), CliError> {
    let config = dispatch_config_from_env()?;
    let endpoint = build_endpoint(&config)?;
    let interval = Duration::from_secs(interval_secs.max(1));
    let policy = RetryPolicy::default();
    let mut misses: u32 = 0;

    tracing::info!("Watching queue every {}s", interval.as_secs());
    loop {
        if should_sweep(db_path).await? {
            let report = sweep_once(db_path, &endpoint).await?;
            if !report.is_empty() {
                println!(
                    "synced {}, requeued {}, failed {}",
                    report.synced, report.requeued, report.failed
                );
            }
            if report.requeued > 0 {
                // Back off while the endpoint keeps failing
                misses = misses.saturating_add(1);
                tokio::time::sleep(policy.backoff_delay(misses)).await;
                continue;
            }
            misses = 0;
        }
        tokio::time::sleep(interval).await;
    }
}

/// A wake is warranted while a sync tag is armed or pending work exists.
async fn should_sweep(db_path: &Path) -> Result<bool, CliError> {
    let db = open_database(db_path).await?;
    let state = LibSqlStateRepository::new(db.connection());
    if !state.armed_sync_tags().await?.is_empty() {
        return Ok(true);
    }

    let repo = LibSqlQueueRepository::new(db.connection());
    let pending = repo
        .list()
        .await?
        .iter()
        .any(|item| !item.status.is_terminal());
    Ok(pending)
}

async fn sweep_once(
    db_path: &Path,
    endpoint: &HttpAlertEndpoint,
) -> Result<haven_core::sync::SweepReport, CliError> {
    let db = open_database(db_path).await?;
    let worker = BackgroundSyncWorker::new(
        db.connection(),
        endpoint,
        TerminalNotifier,
        RetryPolicy::default(),
    );
    Ok(worker.run_sweep().await)
}

fn queue_to_list_item(item: &QueueItem) -> QueueListItem {
    let now_ms = chrono::Utc::now().timestamp_millis();
    QueueListItem {
        id: item.id.to_string(),
        kind: item.kind().as_str().to_string(),
        status: item.status.as_str().to_string(),
        summary: item_summary(item, 40),
        enqueued_at: item.enqueued_at,
        relative_time: format_relative_time(item.enqueued_at, now_ms),
        retry_count: item.retry_count,
    }
}

fn format_queue_lines(items: &[QueueItem]) -> Vec<String> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let short_id = item.id.to_string().chars().take(13).collect::<String>();
            let kind = item.kind().as_str();
            let status = item.status.as_str();
            let summary = item_summary(item, 40);
            let relative_time = format_relative_time(item.enqueued_at, now_ms);
            format!(
                "{short_id:<13}  {kind:<7}  {status:<8}  {summary:<40}  {relative_time:<10}  retries: {}",
                item.retry_count
            )
        })
        .collect()
}

fn item_summary(item: &QueueItem, max_chars: usize) -> String {
    let text = match &item.payload {
        QueuePayload::Alert(alert) => alert.custom_note.clone().unwrap_or_else(|| {
            format!(
                "alert at {:.4}, {:.4}",
                alert.location.latitude, alert.location.longitude
            )
        }),
        QueuePayload::Contact(contact) => contact.message.clone(),
    };

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

fn resolve_cli_coordinates(
    lat: Option<f64>,
    lon: Option<f64>,
) -> Result<Option<Coordinates>, CliError> {
    let (lat, lon) = match (lat, lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => match (env_float("HAVEN_LAT"), env_float("HAVEN_LON")) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Ok(None),
        },
    };
    parse_coordinates(lat, lon).map(Some)
}

fn parse_coordinates(lat: f64, lon: f64) -> Result<Coordinates, CliError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(CliError::InvalidCoordinates(format!(
            "latitude {lat} is outside [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(CliError::InvalidCoordinates(format!(
            "longitude {lon} is outside [-180, 180]"
        )));
    }
    Ok(Coordinates::new(lat, lon))
}

fn dispatch_config_from_env() -> Result<DispatchConfig, CliError> {
    let base_url = env::var("HAVEN_API_BASE_URL").map_err(|_| CliError::MissingApiBaseUrl)?;
    let mut config = DispatchConfig::new(base_url)?;
    if let Ok(token) = env::var("HAVEN_AUTH_TOKEN") {
        config = config.with_auth_token(token);
    }
    Ok(config)
}

fn build_endpoint(config: &DispatchConfig) -> Result<HttpAlertEndpoint, CliError> {
    HttpAlertEndpoint::new(&config.api_base_url).map_err(|e| CliError::Endpoint(e.to_string()))
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}

fn env_float(name: &str) -> Option<f64> {
    env::var(name).ok()?.trim().parse().ok()
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("HAVEN_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("haven")
        .join("haven.db")
}

async fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(path).await?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use haven_core::db::{Database, LibSqlQueueRepository, QueueRepository};
    use haven_core::models::{AlertPayload, Coordinates, QueuePayload};

    use super::{
        format_relative_time, item_summary, parse_coordinates, queue_to_list_item, resolve_db_path,
        run_queue, should_sweep, CliError,
    };

    fn alert_payload(note: Option<&str>) -> QueuePayload {
        QueuePayload::Alert(AlertPayload {
            location: Coordinates::new(23.8103, 90.4125),
            fallback_location: None,
            custom_note: note.map(str::to_string),
            metadata: None,
            was_offline: true,
            guest_session_id: None,
        })
    }

    #[test]
    fn format_relative_time_units() {
        let now = 10_000_000_000;
        assert_eq!(format_relative_time(now - 30_000, now), "just now");
        assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
        assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
        assert_eq!(
            format_relative_time(now - 3 * 24 * 60 * 60_000, now),
            "3d ago"
        );
    }

    #[test]
    fn parse_coordinates_validates_ranges() {
        assert!(parse_coordinates(23.8, 90.4).is_ok());
        assert!(matches!(
            parse_coordinates(91.0, 0.0),
            Err(CliError::InvalidCoordinates(_))
        ));
        assert!(matches!(
            parse_coordinates(0.0, 181.0),
            Err(CliError::InvalidCoordinates(_))
        ));
    }

    #[test]
    fn queue_list_item_never_exposes_the_credential() {
        let item = haven_core::models::QueueItem::new(
            alert_payload(Some("help")),
            Some("secret-bearer".to_string()),
        );

        let listed = queue_to_list_item(&item);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("secret-bearer"));
        assert!(json.contains("\"summary\":\"help\""));
    }

    #[test]
    fn item_summary_truncates_and_falls_back_to_location() {
        let noted = haven_core::models::QueueItem::new(
            alert_payload(Some("a very long note that should definitely be cut short here")),
            None,
        );
        let summary = item_summary(&noted, 20);
        assert_eq!(summary.chars().count(), 20);
        assert!(summary.ends_with("..."));

        let bare = haven_core::models::QueueItem::new(alert_payload(None), None);
        assert!(item_summary(&bare, 40).contains("23.8103"));
    }

    #[test]
    fn resolve_db_path_prefers_explicit_flag() {
        let explicit = resolve_db_path(Some(PathBuf::from("/tmp/haven-explicit.db")));
        assert_eq!(explicit, PathBuf::from("/tmp/haven-explicit.db"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_queue_renders_enqueued_items() {
        let db_path = unique_test_db_path();
        {
            let db = Database::open(&db_path).await.unwrap();
            let repo = LibSqlQueueRepository::new(db.connection());
            repo.enqueue(alert_payload(Some("first")), None)
                .await
                .unwrap();
            repo.enqueue(alert_payload(Some("second")), None)
                .await
                .unwrap();
        }

        // Smoke check both render paths against a real store
        run_queue(false, &db_path).await.unwrap();
        run_queue(true, &db_path).await.unwrap();

        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn should_sweep_tracks_pending_work() {
        let db_path = unique_test_db_path();

        assert!(!should_sweep(&db_path).await.unwrap());

        {
            let db = Database::open(&db_path).await.unwrap();
            let repo = LibSqlQueueRepository::new(db.connection());
            repo.enqueue(alert_payload(Some("wake up")), None)
                .await
                .unwrap();
        }

        assert!(should_sweep(&db_path).await.unwrap());

        cleanup_db_files(&db_path);
    }

    fn unique_test_db_path() -> PathBuf {
        static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("haven-cli-test-{timestamp}-{sequence}.db"))
    }

    fn cleanup_db_files(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
    }
}
